//! Broadcast server surface: state seeding, status JSON, SPA fallback,
//! and the health probes, driven over real sockets.

use fg_test_utils::MockUpstream;
use futures_util::StreamExt;
use gateway::Gateway;
use gateway::config::{self, GatewayConfig};
use std::collections::HashMap;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

fn test_config(upstream_url: &str) -> GatewayConfig {
    let mut env = HashMap::new();
    env.insert(
        "FEEDGATE_TOKEN".to_owned(),
        "itest-token-0123456789".to_owned(),
    );
    env.insert("FEEDGATE_ACTOR_URL".to_owned(), upstream_url.to_owned());
    env.insert("FEEDGATE_CHANNELS".to_owned(), "all".to_owned());
    env.insert("FEEDGATE_USERS".to_owned(), "alice,bob".to_owned());
    env.insert("FEEDGATE_BROADCAST_PORT".to_owned(), "0".to_owned());
    env.insert("FEEDGATE_HEALTH_PORT".to_owned(), "0".to_owned());
    env.insert("FEEDGATE_CLI_ENABLED".to_owned(), "false".to_owned());
    env.insert("FEEDGATE_RECONNECT_INITIAL_MS".to_owned(), "50".to_owned());
    env.insert("FEEDGATE_RECONNECT_MAX_MS".to_owned(), "200".to_owned());
    config::load_from_sources(None, &env).expect("test config must load")
}

fn post_frame(id: usize, username: &str) -> serde_json::Value {
    serde_json::json!({
        "event_type": "post_created",
        "data": {
            "user": { "username": username },
            "tweet": {
                "id": format!("t{id}"),
                "bodyText": format!("msg {id}"),
                "author": { "handle": username },
            },
        },
    })
}

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn late_client_is_seeded_with_recent_events_newest_first() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url()))
        .await
        .expect("gateway start");
    wait_until("connection", || upstream.connection_count() >= 1).await;

    for i in 0..3 {
        upstream.push_json(&post_frame(i, "alice"));
    }
    wait_until("delivery", {
        let core = gateway.core().clone();
        move || core.stats().delivered() == 3
    })
    .await;

    // A client connecting only now still gets the full picture.
    let addr = gateway.broadcast_addr().unwrap();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("ws connect");
    let state: serde_json::Value = match ws.next().await.unwrap().unwrap() {
        Message::Text(t) => serde_json::from_str(&t).unwrap(),
        other => panic!("expected state frame, got {other:?}"),
    };

    assert_eq!(state["type"], "state");
    let events = state["events"].as_array().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["primary_id"], "t2", "newest first");
    assert_eq!(events[2]["primary_id"], "t0");
    assert_eq!(state["users"][0], "alice");
    assert_eq!(state["users"][1], "bob");
    assert_eq!(state["connection"], "connected");
    assert_eq!(state["stats"]["delivered"], 3);
    assert_eq!(state["filters"]["users"][0], "alice");

    gateway.stop().await;
}

#[tokio::test]
async fn api_state_matches_socket_state_document() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url()))
        .await
        .expect("gateway start");
    wait_until("connection", || upstream.connection_count() >= 1).await;

    upstream.push_json(&post_frame(1, "alice"));
    wait_until("delivery", {
        let core = gateway.core().clone();
        move || core.stats().delivered() == 1
    })
    .await;

    let addr = gateway.broadcast_addr().unwrap();
    let http_state: serde_json::Value = reqwest::get(format!("http://{addr}/api/state"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    let ws_state: serde_json::Value = match ws.next().await.unwrap().unwrap() {
        Message::Text(t) => serde_json::from_str(&t).unwrap(),
        other => panic!("expected state frame, got {other:?}"),
    };

    assert_eq!(http_state["type"], "state");
    assert_eq!(http_state["events"], ws_state["events"]);
    assert_eq!(http_state["users"], ws_state["users"]);
    assert_eq!(http_state["filters"], ws_state["filters"]);

    gateway.stop().await;
}

#[tokio::test]
async fn unknown_get_paths_fall_back_to_the_bundle() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url()))
        .await
        .expect("gateway start");
    let addr = gateway.broadcast_addr().unwrap();

    // Without embed-ui the bundle placeholder answers; the point is that
    // route-like paths are not 404s.
    let resp = reqwest::get(format!("http://{addr}/feed/live")).await.unwrap();
    assert!(resp.status().is_success());
    let body = resp.text().await.unwrap();
    assert!(body.contains("feedgate"));

    // Reserved namespaces never fall through to the bundle.
    let resp = reqwest::get(format!("http://{addr}/api/nope")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    // And the dashboard surface is read-only.
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/feed/live"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 405);

    gateway.stop().await;
}

#[tokio::test]
async fn health_probes_reflect_lifecycle() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url()))
        .await
        .expect("gateway start");

    let health = gateway.health_addr();
    let resp = reqwest::get(format!("http://{health}/healthz")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let resp = reqwest::get(format!("http://{health}/readyz")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    gateway.stop().await;
}

#[tokio::test]
async fn status_frame_follows_connection_state_changes() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url()))
        .await
        .expect("gateway start");
    wait_until("connection", || upstream.connection_count() >= 1).await;

    let addr = gateway.broadcast_addr().unwrap();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    // Consume the state seed.
    let _ = ws.next().await.unwrap().unwrap();

    upstream.drop_connections();

    // The client hears about the reconnect cycle.
    let frame: serde_json::Value = loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("status frame within deadline")
            .unwrap()
            .unwrap()
        {
            Message::Text(t) => {
                let value: serde_json::Value = serde_json::from_str(&t).unwrap();
                if value["type"] == "status" {
                    break value;
                }
            }
            _ => continue,
        }
    };
    assert!(
        frame["connection"] == "reconnecting" || frame["connection"] == "connected",
        "unexpected connection state: {frame}"
    );

    gateway.stop().await;
}
