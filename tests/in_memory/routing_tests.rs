//! Routing while the mount set changes, and deterministic replays.

use super::helpers::{config, echo, entered};
use mosaic::compositor::adapters::memory::{InProcessConnector, ScriptedConnector};
use mosaic::compositor::{Compositor, CompositorConfig, CompositorError};
use rstest::rstest;
use serde_json::{Value, json};
use std::time::Duration;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn routing_to_a_stable_mount_survives_churn(config: CompositorConfig) {
    let compositor = entered(config).await;
    compositor
        .mount("stable", &InProcessConnector::new(echo("stable")))
        .await
        .expect("stable mount");

    let callers: Vec<_> = (0..8)
        .map(|caller| {
            let routed = compositor.clone();
            tokio::spawn(async move {
                for call in 0..25 {
                    let payload = json!({"caller": caller, "call": call});
                    let reply = routed
                        .route("stable", "echo", payload.clone())
                        .await
                        .expect("stable route should never fail");
                    assert_eq!(reply, payload);
                }
            })
        })
        .collect();
    for round in 0..10 {
        let connector = ScriptedConnector::new(echo("churn"))
            .with_handshake_delay(Duration::from_millis(round % 3));
        compositor
            .mount("churn", &connector)
            .await
            .expect("churn mount");
        compositor.unmount("churn").await.expect("churn unmount");
    }

    for caller in callers {
        caller.await.expect("caller task should not panic");
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn routes_during_a_slow_handshake_do_not_see_the_pending_mount(config: CompositorConfig) {
    let compositor = entered(config).await;
    let mounting = compositor.clone();
    let pending = tokio::spawn(async move {
        let connector =
            ScriptedConnector::new(echo("slow")).with_handshake_delay(Duration::from_millis(100));
        mounting.mount("slow", &connector).await.map(|_| ())
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let early = compositor.route("slow", "echo", json!({})).await;
    let meta = compositor
        .route("compositor_meta", "list_mounts", json!({}))
        .await;

    assert!(matches!(early, Err(CompositorError::UnknownMount(_))));
    assert!(meta.is_ok(), "routing must not wait for the mutation lock");
    pending
        .await
        .expect("mount task")
        .expect("slow mount should succeed");
    compositor
        .route("slow", "echo", json!({}))
        .await
        .expect("mounted after handshake");
}

fn outcome(result: Result<Value, CompositorError>) -> String {
    match result {
        Ok(value) => format!("ok:{value}"),
        Err(err) => format!("err:{err}"),
    }
}

async fn replay(compositor: &Compositor) -> Vec<String> {
    let mut log = Vec::new();
    let mount = |name: &'static str| {
        let target = compositor.clone();
        async move {
            target
                .mount(name, &InProcessConnector::new(echo(name)))
                .await
                .map(|_| Value::Null)
        }
    };
    log.push(outcome(mount("alpha").await));
    log.push(outcome(mount("beta").await));
    log.push(outcome(mount("alpha").await));
    log.push(outcome(compositor.call_tool("alpha_echo", json!(1)).await));
    log.push(outcome(
        compositor
            .call_tool("beta_fail", json!({"message": "boom"}))
            .await,
    ));
    log.push(outcome(compositor.unmount("beta").await.map(|()| Value::Null)));
    log.push(outcome(compositor.call_tool("beta_echo", json!(2)).await));
    log.push(outcome(mount("beta").await));
    log.push(outcome(compositor.route("beta", "echo", json!(3)).await));
    let prefixes: Vec<String> = compositor.prefixes().into_iter().map(String::from).collect();
    log.push(prefixes.join(","));
    log
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn replaying_the_same_sequence_gives_the_same_outcomes(config: CompositorConfig) {
    let first = entered(config.clone()).await;
    let second = entered(config).await;

    let first_log = replay(&first).await;
    let second_log = replay(&second).await;

    assert_eq!(first_log, second_log);
    assert_eq!(
        first_log.last().map(String::as_str),
        Some("resources,compositor_meta,alpha,beta")
    );
    assert!(first_log.iter().any(|entry| entry.contains("already in use")));
    assert!(first_log.iter().any(|entry| entry.contains("unknown tool")));
}
