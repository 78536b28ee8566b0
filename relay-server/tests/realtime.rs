use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use futures::StreamExt;
use relay_core::{Channel, NewMessage};
use relay_server::{create_app, routes};
use serde_json::Value;
use tower::ServiceExt;

mod common;

use common::{
    build_state, build_test_app, seed_conversation, test_config,
    whatsapp_delivery,
};

async fn next_chunk(
    body: &mut (impl futures::Stream<Item = Result<axum::body::Bytes, axum::Error>>
              + Unpin),
) -> Result<String> {
    let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .context("timed out waiting for an SSE frame")?
        .context("stream ended")??;
    Ok(String::from_utf8_lossy(&chunk).into_owned())
}

#[tokio::test]
async fn stream_delivers_updates_and_keep_alives() -> Result<()> {
    let (state, _sender) = build_state(test_config());
    let store = state.store();
    let conversation = seed_conversation(
        &store,
        Channel::WhatsApp,
        "96170000010",
        None,
        Utc::now(),
    )
    .await?;

    let app = create_app(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!(
                    "{}?conversation={}",
                    routes::STREAM,
                    conversation.id
                ))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(state.subscriptions().active_count(), 1);

    let mut body = response.into_body().into_data_stream();

    // Idle: the first frame is a heartbeat comment.
    let frame = next_chunk(&mut body).await?;
    assert!(frame.starts_with(": keep-alive"), "unexpected frame {frame:?}");

    state
        .dispatcher()
        .notify_with_summary(&conversation.id, "inbound message")
        .await;

    let mut frame = next_chunk(&mut body).await?;
    while frame.starts_with(':') {
        frame = next_chunk(&mut body).await?;
    }
    assert!(frame.contains("event: update"), "unexpected frame {frame:?}");
    assert!(frame.contains(conversation.id.as_str()));

    drop(body);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.subscriptions().active_count(), 0);
    Ok(())
}

#[tokio::test]
async fn stream_requires_a_conversation() -> Result<()> {
    let app = build_test_app()?;

    let response = app
        .server
        .get(routes::STREAM)
        .add_query_param("conversation", " ")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn poll_without_wait_returns_stored_messages() -> Result<()> {
    let app = build_test_app()?;
    let now = Utc::now();
    let conversation =
        seed_conversation(&app.store, Channel::WhatsApp, "96170000011", None, now)
            .await?;
    app.store
        .create_message(NewMessage::inbound(conversation.id.clone(), "hi", now))
        .await?;

    let response = app
        .server
        .get(routes::POLL)
        .add_query_param("conversation", conversation.id.as_str())
        .add_query_param("since", 0)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["resolution"], "immediate");
    assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn long_poll_returns_immediately_when_messages_exist() -> Result<()> {
    let app = build_test_app()?;
    let now = Utc::now();
    let conversation =
        seed_conversation(&app.store, Channel::WhatsApp, "96170000012", None, now)
            .await?;
    app.store
        .create_message(NewMessage::inbound(conversation.id.clone(), "hi", now))
        .await?;

    let response = app
        .server
        .get(routes::POLL)
        .add_query_param("conversation", conversation.id.as_str())
        .add_query_param("since", now.timestamp_millis() - 1_000)
        .add_query_param("wait", true)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["resolution"], "immediate");
    assert!(body.get("event").is_none());
    Ok(())
}

#[tokio::test]
async fn long_poll_times_out_with_empty_result() -> Result<()> {
    let app = build_test_app()?;

    let started = std::time::Instant::now();
    let response = app
        .server
        .get(routes::POLL)
        .add_query_param("conversation", "quiet-conversation")
        .add_query_param("since", Utc::now().timestamp_millis())
        .add_query_param("wait", true)
        .add_query_param("timeout_ms", 150)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["resolution"], "timeout");
    assert_eq!(body["messages"], Value::Array(Vec::new()));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(app.state.subscriptions().active_count(), 0);
    Ok(())
}

#[tokio::test]
async fn long_poll_after_reply_waits_for_something_new() -> Result<()> {
    let app = build_test_app()?;
    let conversation = seed_conversation(
        &app.store,
        Channel::WhatsApp,
        "96170000014",
        Some("100200300"),
        Utc::now(),
    )
    .await?;

    app.server
        .post(&format!("/api/v1/conversations/{}/reply", conversation.id))
        .json(&serde_json::json!({ "text": "see you soon" }))
        .await
        .assert_status_ok();
    let latest = app
        .store
        .list_messages(&conversation.id)
        .await?
        .pop()
        .context("reply stored")?;

    let response = app
        .server
        .get(routes::POLL)
        .add_query_param("conversation", conversation.id.as_str())
        .add_query_param("since", latest.timestamp_millis())
        .add_query_param("wait", true)
        .add_query_param("timeout_ms", 150)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["resolution"], "timeout");
    assert_eq!(body["messages"], Value::Array(Vec::new()));
    Ok(())
}

#[tokio::test]
async fn long_poll_wakes_on_webhook_delivery() -> Result<()> {
    let app = build_test_app()?;
    let now = Utc::now();
    let conversation = seed_conversation(
        &app.store,
        Channel::WhatsApp,
        "96170000013",
        Some("100200300"),
        now,
    )
    .await?;

    let waiter = async {
        app.server
            .get(routes::POLL)
            .add_query_param("conversation", conversation.id.as_str())
            .add_query_param("since", now.timestamp_millis())
            .add_query_param("wait", true)
            .await
    };
    let writer = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        app.server
            .post(routes::META_WEBHOOK)
            .json(&whatsapp_delivery(
                "96170000013",
                "are you there?",
                now.timestamp() + 60,
            ))
            .await
    };

    let (response, delivery) = tokio::join!(waiter, writer);
    delivery.assert_status_ok();
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["resolution"], "event");
    assert_eq!(body["event"]["conversation_id"], conversation.id.as_str());
    assert_eq!(body["messages"][0]["text"], "are you there?");
    Ok(())
}

#[tokio::test]
async fn poll_rejects_out_of_range_since() -> Result<()> {
    let app = build_test_app()?;

    let response = app
        .server
        .get(routes::POLL)
        .add_query_param("conversation", "abc")
        .add_query_param("since", i64::MAX)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn subscriptions_endpoint_lists_open_streams() -> Result<()> {
    let app = build_test_app()?;
    let conversation_id = relay_core::ConversationId::new("watched");
    let _stream = app.state.subscriptions().open_stream(&conversation_id);

    let response = app.server.get("/api/v1/realtime/subscriptions").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["active"], 1);
    assert_eq!(body["subscriptions"][0]["conversation_id"], "watched");
    Ok(())
}

#[tokio::test]
async fn health_reports_single_process_mode() -> Result<()> {
    let app = build_test_app()?;

    let response = app.server.get(routes::HEALTH).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["store"]["status"], "healthy");
    assert_eq!(body["checks"]["feed"]["mode"], "single_process");

    let ping = app.server.get(routes::PING).await;
    ping.assert_status_ok();
    let ping: Value = ping.json();
    assert_eq!(ping["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn long_poll_after_shutdown_is_unavailable() -> Result<()> {
    let app = build_test_app()?;
    app.state.fanout().shutdown().await;

    let response = app
        .server
        .get(routes::POLL)
        .add_query_param("conversation", "abc")
        .add_query_param("since", Utc::now().timestamp_millis())
        .add_query_param("wait", true)
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
