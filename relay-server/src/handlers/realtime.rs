use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Query, State},
    response::{
        Json, Sse,
        sse::Event,
    },
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use relay_core::fanout::{
    EventStream, PollOutcome, StreamMessage, SubscriptionSnapshot,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::parse_conversation_id;
use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

/// SSE event name carrying a change event.
pub const UPDATE_EVENT: &str = "update";
/// SSE comment sent on every heartbeat tick.
pub const KEEP_ALIVE_COMMENT: &str = "keep-alive";

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub conversation: String,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub conversation: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub since: i64,
    #[serde(default)]
    pub wait: bool,
    /// Can only shorten the server's long-poll ceiling.
    pub timeout_ms: Option<u64>,
}

/// GET /stream?conversation=<id>
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let conversation_id = parse_conversation_id(&query.conversation)?;
    let updates = state.subscriptions().open_stream(&conversation_id);
    debug!(
        subscription_id = %updates.id(),
        conversation_id = %conversation_id,
        "stream opened"
    );

    Ok(Sse::new(sse_events(updates)))
}

fn sse_events(
    mut updates: EventStream,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(message) = updates.next().await {
            match message {
                StreamMessage::Update(event) => {
                    match Event::default().event(UPDATE_EVENT).json_data(&event) {
                        Ok(sse) => yield Ok::<Event, Infallible>(sse),
                        Err(err) => warn!(
                            conversation_id = %event.conversation_id,
                            error = %err,
                            "failed to encode change event for SSE"
                        ),
                    }
                }
                StreamMessage::Heartbeat => {
                    yield Ok(Event::default().comment(KEEP_ALIVE_COMMENT));
                }
            }
        }
    }
}

/// GET /poll?conversation=<id>&since=<ms>&wait=<bool>[&timeout_ms=<n>]
pub async fn poll_handler(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
) -> AppResult<Json<PollOutcome>> {
    let conversation_id = parse_conversation_id(&query.conversation)?;
    let since = since_from_millis(query.since)?;

    if !query.wait {
        let messages = state
            .store()
            .list_messages_since(&conversation_id, since)
            .await?;
        return Ok(Json(PollOutcome::immediate(messages)));
    }

    let subscriptions = state.subscriptions();
    let timeout = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| subscriptions.poll_ceiling());

    let outcome = subscriptions
        .wait_for_update(&conversation_id, since, timeout)
        .await?;
    Ok(Json(outcome))
}

fn since_from_millis(since: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(since)
        .ok_or_else(|| AppError::bad_request("since is out of range"))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub active: usize,
    pub subscriptions: Vec<SubscriptionSnapshot>,
}

/// GET /api/v1/realtime/subscriptions
pub async fn subscriptions_handler(
    State(state): State<AppState>,
) -> Json<SubscriptionsResponse> {
    let subscriptions = state.subscriptions().snapshot();
    Json(SubscriptionsResponse {
        active: subscriptions.len(),
        subscriptions,
    })
}
