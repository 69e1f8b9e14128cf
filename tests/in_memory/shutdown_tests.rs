//! Bounded exit, cancelled exit and unmount, and dropping a compositor
//! without exit.

use super::helpers::{ReleaseCounter, config, echo, entered};
use mosaic::compositor::adapters::memory::ScriptedConnector;
use mosaic::compositor::domain::{CompositorState, MountState};
use mosaic::compositor::services::MountHandle;
use mosaic::compositor::{Compositor, CompositorConfig};
use rstest::rstest;
use std::time::{Duration, Instant};

/// Polls `counter` until it reaches `expected` or one second passes.
async fn settle(counter: &ReleaseCounter, expected: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(1);
    while counter.get() < expected && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    counter.get()
}

/// Polls `handle` until the mount is closed or one second passes.
async fn settle_closed(handle: &MountHandle) -> MountState {
    let deadline = Instant::now() + Duration::from_secs(1);
    while handle.state() != MountState::Closed && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.state()
}

fn held(counter: &ReleaseCounter) -> ScriptedConnector {
    ScriptedConnector::new(echo("held"))
        .with_resource(counter.cleanup_after("a", Duration::from_millis(20)))
        .with_resource(counter.cleanup_after("b", Duration::from_millis(20)))
}

async fn mount_counted(compositor: &Compositor, name: &str, connector: ScriptedConnector) {
    compositor
        .mount(name, &connector)
        .await
        .expect("mount should succeed");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn exit_is_bounded_when_one_mount_hangs(config: CompositorConfig) {
    let bounded = config
        .with_teardown_timeout(Duration::from_millis(150))
        .with_release_timeout(Duration::from_millis(100))
        .with_session_close_timeout(Duration::from_millis(100));
    let compositor = entered(bounded).await;
    let first = ReleaseCounter::new();
    let hung = ReleaseCounter::new();
    let last = ReleaseCounter::new();
    mount_counted(
        &compositor,
        "first",
        ScriptedConnector::new(echo("first")).with_resource(first.cleanup("process")),
    )
    .await;
    mount_counted(
        &compositor,
        "hung",
        ScriptedConnector::new(echo("hung"))
            .with_resource(hung.cleanup_after("a", Duration::from_secs(5)))
            .with_resource(hung.cleanup_after("b", Duration::from_secs(5)))
            .with_resource(hung.cleanup_after("c", Duration::from_secs(5))),
    )
    .await;
    mount_counted(
        &compositor,
        "last",
        ScriptedConnector::new(echo("last")).with_resource(last.cleanup("process")),
    )
    .await;

    let started = Instant::now();
    let report = compositor.exit().await.expect("exit should succeed");
    let elapsed = started.elapsed();

    assert_eq!(report.failures.len(), 1, "failures: {:?}", report.failures);
    let failure = report.failures.first().expect("one failure");
    assert_eq!(failure.prefix.as_str(), "hung");
    assert!(failure.is_timeout());
    assert_eq!(first.get(), 1);
    assert_eq!(last.get(), 1);
    assert!(
        elapsed < Duration::from_secs(2),
        "exit took {elapsed:?} despite the teardown bound"
    );
    assert_eq!(settle(&hung, 3).await, 3, "abandoned resources still release");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hung.get(), 3);
}

#[rstest]
#[case(0)]
#[case(2)]
#[case(15)]
#[case(40)]
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_exit_releases_every_resource_exactly_once(
    config: CompositorConfig,
    #[case] cancel_after_ms: u64,
) {
    let compositor = entered(config).await;
    let counters: Vec<ReleaseCounter> = (0..3).map(|_| ReleaseCounter::new()).collect();
    for (index, counter) in counters.iter().enumerate() {
        let name = format!("m{index}");
        mount_counted(
            &compositor,
            &name,
            ScriptedConnector::new(echo(&name))
                .with_resource(counter.cleanup_after("process", Duration::from_millis(20))),
        )
        .await;
    }

    let _finished = tokio::time::timeout(
        Duration::from_millis(cancel_after_ms),
        compositor.exit(),
    )
    .await;

    assert_eq!(compositor.state(), CompositorState::Closed);
    for counter in &counters {
        assert_eq!(settle(counter, 1).await, 1);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    for counter in &counters {
        assert_eq!(counter.get(), 1, "a resource was released twice");
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn dropping_an_active_compositor_releases_in_the_background(config: CompositorConfig) {
    let compositor = entered(config).await;
    let counter = ReleaseCounter::new();
    mount_counted(
        &compositor,
        "orphan",
        ScriptedConnector::new(echo("orphan")).with_resource(counter.cleanup("process")),
    )
    .await;

    drop(compositor);

    assert_eq!(settle(&counter, 1).await, 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn exit_twice_is_use_after_close(config: CompositorConfig) {
    let compositor = entered(config).await;

    let report = compositor.exit().await.expect("first exit");

    assert!(report.is_clean());
    assert!(matches!(
        compositor.exit().await,
        Err(mosaic::compositor::CompositorError::UseAfterClose)
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_unmount_still_releases_a_held_mount(config: CompositorConfig) {
    let compositor = entered(config).await;
    let counter = ReleaseCounter::new();
    let handle = compositor
        .mount("held", &held(&counter))
        .await
        .expect("mount should succeed");

    let _finished =
        tokio::time::timeout(Duration::from_millis(1), compositor.unmount("held")).await;

    assert!(compositor.handle("held").is_none());
    assert_eq!(settle(&counter, 2).await, 2);
    assert_eq!(settle_closed(&handle).await, MountState::Closed);
    let report = compositor.exit().await.expect("exit should succeed");
    assert!(report.is_clean(), "unexpected failures: {report:?}");
    assert!(compositor.teardown_failures().is_empty());
    assert_eq!(counter.get(), 2, "a resource was released twice");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_exit_still_releases_a_held_mount(config: CompositorConfig) {
    let compositor = entered(config).await;
    let counter = ReleaseCounter::new();
    let handle = compositor
        .mount("held", &held(&counter))
        .await
        .expect("mount should succeed");

    let _finished = tokio::time::timeout(Duration::from_millis(1), compositor.exit()).await;

    assert_eq!(compositor.state(), CompositorState::Closed);
    assert_eq!(settle(&counter, 2).await, 2);
    assert_eq!(settle_closed(&handle).await, MountState::Closed);
    assert!(compositor.teardown_failures().is_empty());
    assert!(compositor.leaks().is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.get(), 2, "a resource was released twice");
}
