//! Child process owned by a mount.
//!
//! A subprocess keeps running if the task managing it disappears, so it is
//! an external resource: release must finish even if the caller is
//! cancelled.

use crate::compositor::domain::CompositorDomainError;
use crate::compositor::ports::{OwnedResource, Persistence, ReleaseError, ReleaseResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(2);
const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Program and arguments for a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
}

impl ProcessCommand {
    /// Creates a command for `program`.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorDomainError::EmptyCommand`] when the program is
    /// blank.
    pub fn new(program: impl Into<String>) -> Result<Self, CompositorDomainError> {
        let trimmed = program.into().trim().to_owned();
        if trimmed.is_empty() {
            return Err(CompositorDomainError::EmptyCommand);
        }
        Ok(Self {
            program: trimmed,
            args: Vec::new(),
        })
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns the program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

/// A spawned child process, killed and reaped on release.
#[derive(Debug)]
pub struct ChildProcessResource {
    label: String,
    pid: Option<u32>,
    exit_grace: Duration,
    child: Mutex<Child>,
}

impl ChildProcessResource {
    /// Spawns `command` with null stdio.
    ///
    /// # Errors
    ///
    /// Returns the spawn error.
    pub fn spawn(command: &ProcessCommand) -> std::io::Result<Self> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Self::from_child(command.program(), child))
    }

    /// Takes ownership of an already spawned child.
    #[must_use]
    pub fn from_child(name: &str, child: Child) -> Self {
        let pid = child.id();
        let label = pid.map_or_else(
            || format!("process:{name}"),
            |id| format!("process:{name}:{id}"),
        );
        Self {
            label,
            pid,
            exit_grace: DEFAULT_EXIT_GRACE,
            child: Mutex::new(child),
        }
    }

    /// Sets how long release waits for the process to exit after the kill.
    #[must_use]
    pub const fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    /// Returns the OS process id observed at spawn.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns whether the process has not exited yet.
    ///
    /// # Errors
    ///
    /// Returns the OS error from polling the process.
    pub async fn is_running(&self) -> std::io::Result<bool> {
        Ok(self.child.lock().await.try_wait()?.is_none())
    }

    /// Sends the kill signal unless the process already exited.
    ///
    /// Returns `true` when the process had already exited.
    fn signal(&self, child: &mut Child) -> ReleaseResult<bool> {
        if child.try_wait().map_err(ReleaseError::failed)?.is_some() {
            return Ok(true);
        }
        child.start_kill().map_err(ReleaseError::failed)?;
        debug!(resource = %self.label, "sent kill to child process");
        Ok(false)
    }
}

#[async_trait]
impl OwnedResource for ChildProcessResource {
    fn label(&self) -> &str {
        &self.label
    }

    fn persistence(&self) -> Persistence {
        Persistence::External
    }

    async fn release(&self) -> ReleaseResult<()> {
        let mut child = self.child.lock().await;
        if self.signal(&mut child)? {
            return Ok(());
        }
        match tokio::time::timeout(self.exit_grace, child.wait()).await {
            Ok(status) => status.map(|_| ()).map_err(ReleaseError::failed),
            Err(_) => Err(ReleaseError::StillRunning(self.label.clone())),
        }
    }

    fn release_blocking(&self) -> ReleaseResult<()> {
        let mut child = self.child.blocking_lock();
        if self.signal(&mut child)? {
            return Ok(());
        }
        let deadline = Instant::now() + self.exit_grace;
        loop {
            if child.try_wait().map_err(ReleaseError::failed)?.is_some() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ReleaseError::StillRunning(self.label.clone()));
            }
            std::thread::sleep(BLOCKING_POLL_INTERVAL);
        }
    }
}
