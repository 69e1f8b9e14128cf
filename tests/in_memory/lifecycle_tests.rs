//! Mount lifecycle flows across the public API.

use super::helpers::{ReleaseCounter, config, echo, entered};
use mosaic::compositor::adapters::memory::{InProcessConnector, ScriptedConnector};
use mosaic::compositor::domain::{CompositorState, MountState};
use mosaic::compositor::ports::ChildConnector;
use mosaic::compositor::{CompositorConfig, CompositorError, MountErrorPolicy};
use rstest::rstest;
use serde_json::json;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn mount_route_unmount_remount_and_exit(config: CompositorConfig) {
    let compositor = entered(config).await;
    let counters: Vec<(&str, ReleaseCounter)> = ["a", "b", "c"]
        .into_iter()
        .map(|name| (name, ReleaseCounter::new()))
        .collect();
    for (name, counter) in &counters {
        let connector =
            ScriptedConnector::new(echo(name)).with_resource(counter.cleanup("process"));
        compositor
            .mount(name, &connector)
            .await
            .expect("mount should succeed");
    }

    for (name, _) in &counters {
        let reply = compositor
            .route(name, "echo", json!({"from": name}))
            .await
            .expect("route should succeed");
        assert_eq!(reply, json!({"from": name}));
    }

    compositor.unmount("b").await.expect("unmount should succeed");
    assert!(matches!(
        compositor.route("b", "echo", json!({})).await,
        Err(CompositorError::UnknownMount(_))
    ));
    let (_, b_counter) = counters
        .iter()
        .find(|(name, _)| *name == "b")
        .expect("b counter");
    assert_eq!(b_counter.get(), 1);

    let second_b = ReleaseCounter::new();
    compositor
        .mount(
            "b",
            &ScriptedConnector::new(echo("b2")).with_resource(second_b.cleanup("process")),
        )
        .await
        .expect("remount should succeed");
    let reply = compositor
        .call_tool("b_echo", json!("again"))
        .await
        .expect("remounted prefix should route");
    assert_eq!(reply, json!("again"));

    let report = compositor.exit().await.expect("exit should succeed");

    assert!(report.is_clean(), "unexpected failures: {report:?}");
    assert_eq!(compositor.state(), CompositorState::Closed);
    for (name, counter) in &counters {
        assert_eq!(counter.get(), 1, "mount {name} released once");
    }
    assert_eq!(second_b.get(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn handles_track_state_after_unmount(config: CompositorConfig) {
    let compositor = entered(config).await;
    let handle = compositor
        .mount("alpha", &InProcessConnector::new(echo("alpha")))
        .await
        .expect("mount should succeed");
    assert_eq!(handle.state(), MountState::Active);
    assert!(!handle.is_pinned());

    compositor.unmount("alpha").await.expect("unmount");

    assert_eq!(handle.state(), MountState::Closed);
    let snapshot = handle.snapshot();
    assert!(snapshot.closed_at.is_some());
    assert!(compositor.handle("alpha").is_none());
    assert!(matches!(
        compositor.unmount("alpha").await,
        Err(CompositorError::UnknownMount(_))
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn resources_registered_through_a_handle_are_released_on_unmount(
    config: CompositorConfig,
) {
    let compositor = entered(config).await;
    let late = ReleaseCounter::new();
    let handle = compositor
        .mount("alpha", &InProcessConnector::new(echo("alpha")))
        .await
        .expect("mount should succeed");

    handle
        .register_resource(late.cleanup("helper"))
        .expect("active mount accepts resources");
    compositor.unmount("alpha").await.expect("unmount");

    assert_eq!(late.get(), 1);
    let after = ReleaseCounter::new();
    assert!(matches!(
        handle.register_resource(after.cleanup("too-late")),
        Err(CompositorError::MountClosed(_))
    ));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(after.get(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_handshake_keeps_the_prefix_until_unmounted(config: CompositorConfig) {
    let compositor = entered(config).await;
    let counter = ReleaseCounter::new();
    let broken = ScriptedConnector::new(echo("broken"))
        .with_resource(counter.cleanup("process"))
        .failing("refused");

    assert!(matches!(
        compositor.mount("broken", &broken).await,
        Err(CompositorError::HandshakeFailed { .. })
    ));
    assert_eq!(counter.get(), 1);
    let snapshot = compositor
        .list()
        .into_iter()
        .find(|snapshot| snapshot.prefix.as_str() == "broken")
        .expect("failed mount is listed");
    assert_eq!(snapshot.state, MountState::Failed);
    assert!(snapshot.error.is_some_and(|error| error.contains("refused")));

    compositor.unmount("broken").await.expect("unmount");
    compositor
        .mount("broken", &InProcessConnector::new(echo("fixed")))
        .await
        .expect("prefix is free after unmount");
    assert_eq!(counter.get(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn batch_mount_collects_every_outcome(config: CompositorConfig) {
    let compositor = entered(config).await;
    let alpha = InProcessConnector::new(echo("alpha"));
    let broken = ScriptedConnector::new(echo("beta")).failing("handshake refused");
    let gamma = InProcessConnector::new(echo("gamma"));
    let servers: [(&str, &dyn ChildConnector); 3] =
        [("alpha", &alpha), ("beta", &broken), ("gamma", &gamma)];

    let results = compositor
        .mount_many(servers, MountErrorPolicy::Collect)
        .await
        .expect("collect never raises");

    let keys: Vec<&str> = results.keys().map(String::as_str).collect();
    assert_eq!(keys, ["alpha", "beta", "gamma"]);
    assert!(results.get("alpha").is_some_and(Option::is_none));
    assert!(matches!(
        results.get("beta"),
        Some(Some(CompositorError::HandshakeFailed { .. }))
    ));
    assert_eq!(compositor.mount_state("alpha"), Some(MountState::Active));
    assert_eq!(compositor.mount_state("beta"), Some(MountState::Failed));
    assert_eq!(compositor.mount_state("gamma"), Some(MountState::Active));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn batch_mount_raises_the_first_failure(config: CompositorConfig) {
    let compositor = entered(config).await;
    let alpha = InProcessConnector::new(echo("alpha"));
    let broken = ScriptedConnector::new(echo("beta")).failing("handshake refused");
    let taken = InProcessConnector::new(echo("taken"));
    let servers: [(&str, &dyn ChildConnector); 3] =
        [("alpha", &alpha), ("beta", &broken), ("alpha", &taken)];

    let result = compositor
        .mount_many(servers, MountErrorPolicy::Raise)
        .await;

    assert!(matches!(
        result,
        Err(CompositorError::HandshakeFailed { ref prefix, .. }) if prefix.as_str() == "beta"
    ));
    assert_eq!(compositor.mount_state("alpha"), Some(MountState::Active));
}
