//! Child processes owned by mounts.

#![cfg(unix)]

use super::helpers::{config, echo, entered};
use mosaic::compositor::CompositorConfig;
use mosaic::compositor::adapters::memory::ScriptedConnector;
use mosaic::compositor::adapters::{ChildProcessResource, ProcessCommand};
use rstest::rstest;
use std::sync::Arc;

fn sleeper() -> Arc<ChildProcessResource> {
    let command = ProcessCommand::new("sleep")
        .expect("command should be valid")
        .arg("30");
    Arc::new(ChildProcessResource::spawn(&command).expect("sleep should spawn"))
}

fn owning(child: &Arc<ChildProcessResource>, name: &str) -> ScriptedConnector {
    let shared: Arc<ChildProcessResource> = Arc::clone(child);
    ScriptedConnector::new(echo(name)).with_shared_resource(shared)
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unmount_stops_the_child_process(config: CompositorConfig) {
    let compositor = entered(config).await;
    let child = sleeper();
    compositor
        .mount("tools", &owning(&child, "tools"))
        .await
        .expect("mount should succeed");
    assert!(child.is_running().await.expect("poll"));

    compositor.unmount("tools").await.expect("unmount");

    assert!(!child.is_running().await.expect("poll"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_handshake_stops_the_child_process(config: CompositorConfig) {
    let compositor = entered(config).await;
    let child = sleeper();

    let result = compositor
        .mount("tools", &owning(&child, "tools").failing("no handshake"))
        .await;

    assert!(result.is_err());
    assert!(!child.is_running().await.expect("poll"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn exit_stops_every_child_process(config: CompositorConfig) {
    let compositor = entered(config).await;
    let children = [sleeper(), sleeper()];
    for (index, child) in children.iter().enumerate() {
        let name = format!("tools{index}");
        compositor
            .mount(&name, &owning(child, &name))
            .await
            .expect("mount should succeed");
    }

    let report = compositor.exit().await.expect("exit");

    assert!(report.is_clean(), "unexpected failures: {report:?}");
    for child in &children {
        assert!(!child.is_running().await.expect("poll"));
    }
}
