use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use relay_core::{
    Message, NewMessage,
    inbound::{InboundMessage, WebhookEnvelope},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /webhooks/meta: Meta's subscription handshake.
pub async fn verify_handler(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let expected = state.config().meta.verify_token.as_str();
    let subscribing = query.mode.as_deref() == Some("subscribe");
    let token_matches = !expected.is_empty()
        && query.verify_token.as_deref() == Some(expected);

    if subscribing && token_matches {
        info!("webhook verification accepted");
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            query.challenge.unwrap_or_default(),
        )
            .into_response()
    } else {
        warn!(mode = ?query.mode, "webhook verification rejected");
        (StatusCode::FORBIDDEN, "Forbidden").into_response()
    }
}

/// POST /webhooks/meta: stores each inbound message, then notifies
/// subscribers of its conversation.
pub async fn ingest_handler(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> AppResult<Json<Value>> {
    let inbound = envelope.inbound_messages(Utc::now());
    debug!(
        object = %envelope.object,
        messages = inbound.len(),
        "webhook delivery received"
    );

    for message in &inbound {
        let stored = ingest_message(&state, message).await?;
        state
            .dispatcher()
            .notify_with_summary(&stored.conversation_id, "inbound message")
            .await;
    }

    Ok(Json(json!({ "received": true })))
}

async fn ingest_message(
    state: &AppState,
    inbound: &InboundMessage,
) -> AppResult<Message> {
    let store = state.store();
    let conversation = store.upsert_conversation(inbound.conversation()).await?;
    let message = store
        .create_message(NewMessage::inbound(
            conversation.id.clone(),
            inbound.text.clone(),
            inbound.timestamp,
        ))
        .await?;

    info!(
        conversation_id = %conversation.id,
        channel = %conversation.channel,
        "inbound message stored"
    );
    Ok(message)
}
