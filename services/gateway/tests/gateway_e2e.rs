//! End-to-end pipeline suites against a mock crawler.
//!
//! Covers:
//! 1. duplicate suppression across the full path (counters + socket)
//! 2. user filtering
//! 3. reconnect after an upstream drop
//! 4. runtime resubscription into idle and back
//! 5. the `users` query parameter contract

use fg_test_utils::MockUpstream;
use futures_util::StreamExt;
use gateway::Gateway;
use gateway::config::{self, GatewayConfig};
use std::collections::HashMap;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

fn test_config(upstream_url: &str, extra: &[(&str, &str)]) -> GatewayConfig {
    let mut env = HashMap::new();
    env.insert(
        "FEEDGATE_TOKEN".to_owned(),
        "itest-token-0123456789".to_owned(),
    );
    env.insert("FEEDGATE_ACTOR_URL".to_owned(), upstream_url.to_owned());
    env.insert("FEEDGATE_CHANNELS".to_owned(), "tweets".to_owned());
    env.insert("FEEDGATE_BROADCAST_PORT".to_owned(), "0".to_owned());
    env.insert("FEEDGATE_HEALTH_PORT".to_owned(), "0".to_owned());
    env.insert("FEEDGATE_CLI_ENABLED".to_owned(), "true".to_owned());
    env.insert("FEEDGATE_RECONNECT_INITIAL_MS".to_owned(), "50".to_owned());
    env.insert("FEEDGATE_RECONNECT_MAX_MS".to_owned(), "200".to_owned());
    for (key, value) in extra {
        env.insert((*key).to_owned(), (*value).to_owned());
    }
    config::load_from_sources(None, &env).expect("test config must load")
}

fn post_frame(id: &str, username: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "event_type": "post_created",
        "data": {
            "user": { "username": username },
            "tweet": { "id": id, "bodyText": text, "author": { "handle": username } },
            "timestamp": "2026-03-01T12:00:00Z",
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

async fn status_json(gateway: &Gateway) -> serde_json::Value {
    let addr = gateway.broadcast_addr().expect("broadcast enabled");
    reqwest::get(format!("http://{addr}/status"))
        .await
        .expect("status request")
        .json()
        .await
        .expect("status json")
}

#[tokio::test]
async fn duplicate_frames_deliver_once_end_to_end() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url(), &[]))
        .await
        .expect("gateway start");
    wait_until("upstream connection", || upstream.connection_count() >= 1).await;

    let addr = gateway.broadcast_addr().unwrap();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("ws connect");

    // First frame is the state seed.
    let state: serde_json::Value = match ws.next().await.unwrap().unwrap() {
        Message::Text(t) => serde_json::from_str(&t).unwrap(),
        other => panic!("expected text state frame, got {other:?}"),
    };
    assert_eq!(state["type"], "state");

    let frame = post_frame("tweet123", "elonmusk", "Hello");
    upstream.push_json(&frame);
    upstream.push_json(&frame);

    // Exactly one event frame reaches the socket.
    let event: serde_json::Value = match ws.next().await.unwrap().unwrap() {
        Message::Text(t) => serde_json::from_str(&t).unwrap(),
        other => panic!("expected event frame, got {other:?}"),
    };
    assert_eq!(event["type"], "event");
    assert_eq!(event["event"]["user"]["username"], "elonmusk");

    let second = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(second.is_err(), "duplicate must not produce a second frame");

    let mut status = status_json(&gateway).await;
    for _ in 0..100 {
        if status["events"]["total"] == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        status = status_json(&gateway).await;
    }
    assert_eq!(status["events"]["total"], 2);
    assert_eq!(status["events"]["delivered"], 1);
    assert_eq!(status["events"]["deduped"], 1);

    gateway.stop().await;
}

#[tokio::test]
async fn user_filter_passes_only_configured_users() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(
        &upstream.base_url(),
        &[("FEEDGATE_USERS", "alice")],
    ))
    .await
    .expect("gateway start");
    wait_until("upstream connection", || upstream.connection_count() >= 1).await;

    upstream.push_json(&post_frame("t1", "alice", "from alice"));
    upstream.push_json(&post_frame("t2", "bob", "from bob"));

    let mut status = status_json(&gateway).await;
    for _ in 0..100 {
        if status["events"]["total"] == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        status = status_json(&gateway).await;
    }
    assert_eq!(status["events"]["total"], 2);
    assert_eq!(status["events"]["delivered"], 1);

    // The delivered event is alice's: newest-first recent buffer says so.
    let addr = gateway.broadcast_addr().unwrap();
    let state: serde_json::Value = reqwest::get(format!("http://{addr}/api/state"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let events = state["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["user"]["username"], "alice");

    gateway.stop().await;
}

#[tokio::test]
async fn reconnects_after_upstream_drop_and_dedupes_resends() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url(), &[]))
        .await
        .expect("gateway start");
    wait_until("first connection", || upstream.connection_count() >= 1).await;

    let frame = post_frame("t1", "alice", "before the drop");
    upstream.push_json(&frame);
    wait_until("first delivery", {
        let core = gateway.core().clone();
        move || core.stats().delivered() == 1
    })
    .await;

    upstream.drop_connections();
    wait_until("reconnect", || upstream.connection_count() >= 2).await;

    // The crawler resends the same content after reconnect: deduped.
    upstream.push_json(&frame);
    // And a genuinely new frame flows normally.
    upstream.push_json(&post_frame("t2", "alice", "after the drop"));

    wait_until("post-reconnect delivery", {
        let core = gateway.core().clone();
        move || core.stats().delivered() == 2
    })
    .await;
    assert_eq!(gateway.core().stats().deduped(), 1);

    gateway.stop().await;
}

#[tokio::test]
async fn runtime_resubscription_idles_and_revives() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url(), &[]))
        .await
        .expect("gateway start");
    wait_until("connection", || upstream.connection_count() >= 1).await;
    let addr = gateway.broadcast_addr().unwrap();
    let client = reqwest::Client::new();

    // Empty channel set is the defined way into idle.
    let resp = client
        .post(format!("http://{addr}/api/subscription"))
        .json(&serde_json::json!({ "channels": [], "users": ["Dave"] }))
        .send()
        .await
        .expect("subscription update");
    assert!(resp.status().is_success());
    let state: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(state["mode"], "idle");
    assert_eq!(state["source"], "runtime");
    assert_eq!(state["users"][0], "dave");

    // Unknown channels are rejected before touching the upstream.
    let resp = client
        .post(format!("http://{addr}/api/subscription"))
        .json(&serde_json::json!({ "channels": ["likes"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // Reviving with a concrete channel reconnects.
    let before = upstream.connection_count();
    let resp = client
        .post(format!("http://{addr}/api/subscription"))
        .json(&serde_json::json!({ "channels": ["tweets"], "users": [] }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let state: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(state["mode"], "active");
    wait_until("revived connection", || upstream.connection_count() > before).await;

    gateway.stop().await;
}

#[tokio::test]
async fn users_param_is_sent_iff_users_configured() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(
        &upstream.base_url(),
        &[("FEEDGATE_USERS", " Bob , alice ,BOB")],
    ))
    .await
    .expect("gateway start");
    wait_until("connection", || upstream.connection_count() >= 1).await;

    let record = upstream.last_connection().unwrap();
    assert_eq!(record.channel, "tweets");
    assert_eq!(record.token.as_deref(), Some("itest-token-0123456789"));
    assert_eq!(
        record.users.as_deref(),
        Some("alice,bob"),
        "users must be trimmed, lowercased, deduped, sorted"
    );
    gateway.stop().await;

    // And without users the parameter is absent entirely.
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(test_config(&upstream.base_url(), &[]))
        .await
        .expect("gateway start");
    wait_until("connection", || upstream.connection_count() >= 1).await;
    assert_eq!(upstream.last_connection().unwrap().users, None);
    gateway.stop().await;
}
