//! Pinned servers reached through qualified tool names.

use super::helpers::{config, echo, entered};
use mosaic::compositor::adapters::memory::{EchoServer, InProcessConnector};
use mosaic::compositor::{CompositorConfig, CompositorError};
use rstest::rstest;
use serde_json::{Value, json};
use std::sync::Arc;

fn docs() -> Arc<EchoServer> {
    Arc::new(
        EchoServer::new("docs")
            .with_text_resource("file:///readme", "hello, compositor")
            .with_text_resource("file:///notes", "n"),
    )
}

fn prefixes_of(mounts: &Value) -> Vec<&str> {
    mounts
        .as_array()
        .expect("mount list is an array")
        .iter()
        .filter_map(|mount| mount.get("prefix").and_then(Value::as_str))
        .collect()
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn meta_tools_describe_the_mount_set(config: CompositorConfig) {
    let compositor = entered(config).await;
    compositor
        .mount("docs", &InProcessConnector::new(docs()))
        .await
        .expect("mount");

    let mounts = compositor
        .call_tool("compositor_meta_list_mounts", Value::Null)
        .await
        .expect("list_mounts");
    let state = compositor
        .call_tool("compositor_meta_mount_state", json!({"prefix": "docs"}))
        .await
        .expect("mount_state");
    let tools = compositor
        .call_tool("compositor_meta_list_tools", json!({}))
        .await
        .expect("list_tools");

    assert_eq!(prefixes_of(&mounts), ["resources", "compositor_meta", "docs"]);
    assert_eq!(state, json!({"prefix": "docs", "state": "active"}));
    let names: Vec<&str> = tools
        .as_array()
        .expect("tool list is an array")
        .iter()
        .filter_map(|tool| tool.get("name").and_then(Value::as_str))
        .collect();
    assert!(names.contains(&"docs_echo"));
    assert!(names.contains(&"resources_read"));
    assert!(names.contains(&"compositor_meta_list_mounts"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn meta_reports_unknown_mounts_as_tool_errors(config: CompositorConfig) {
    let compositor = entered(config).await;

    let result = compositor
        .call_tool("compositor_meta_mount_state", json!({"prefix": "ghost"}))
        .await;

    assert!(matches!(
        result,
        Err(CompositorError::Session { ref prefix, ref source })
            if prefix == "compositor_meta" && source.to_string().contains("unknown mount: ghost")
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn resources_are_listed_and_read_through_qualified_names(config: CompositorConfig) {
    let compositor = entered(config).await;
    compositor
        .mount("docs", &InProcessConnector::new(docs()))
        .await
        .expect("mount");
    compositor
        .mount("plain", &InProcessConnector::new(echo("plain")))
        .await
        .expect("mount");

    let listed = compositor
        .call_tool("resources_list", json!({"server": "docs"}))
        .await
        .expect("list");
    let read = compositor
        .call_tool(
            "resources_read",
            json!({"server": "docs", "uri": "file:///readme", "start_offset": 7, "max_bytes": 4}),
        )
        .await
        .expect("read");

    let uris: Vec<&str> = listed["resources"]
        .as_array()
        .expect("resource array")
        .iter()
        .filter_map(|entry| entry.get("uri").and_then(Value::as_str))
        .collect();
    assert_eq!(uris, ["file:///readme", "file:///notes"]);
    assert_eq!(read["window"], json!({"start_offset": 7, "max_bytes": 4}));
    assert_eq!(read["parts"][0]["text"], json!("comp"));
    assert_eq!(read["parts"][0]["total_bytes"], json!(17));
    assert_eq!(read["total_parts"], json!(1));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn admin_tools_exist_only_when_enabled(config: CompositorConfig) {
    let without = entered(config.clone()).await;
    let with = entered(config.with_admin(true)).await;
    with.mount("docs", &InProcessConnector::new(docs()))
        .await
        .expect("mount");

    let missing = without
        .call_tool("compositor_admin_unmount", json!({"prefix": "docs"}))
        .await;
    let removed = with
        .call_tool("compositor_admin_unmount", json!({"prefix": "docs"}))
        .await
        .expect("admin unmount");

    assert!(matches!(missing, Err(CompositorError::UnknownTool(_))));
    assert_eq!(removed, json!({"ok": true}));
    assert!(with.handle("docs").is_none());
}
