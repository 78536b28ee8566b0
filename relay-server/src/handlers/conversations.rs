use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use relay_core::{
    Channel, Conversation, ConversationId, Message, NewConversation,
    NewMessage, normalize_phone,
    outbound::{OutboundMessage, OutboundReceipt},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::parse_conversation_id;
use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

pub const DEFAULT_LIST_LIMIT: usize = 40;
pub const MAX_LIST_LIMIT: usize = 200;
pub const DEFAULT_REPLY_TEXT: &str = "Hello! 👋";

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub has_unread: bool,
}

impl From<Conversation> for ConversationSummary {
    fn from(conversation: Conversation) -> Self {
        Self {
            has_unread: conversation.has_unread(),
            conversation,
        }
    }
}

/// GET /api/v1/conversations?limit=N
pub async fn list_conversations_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let conversations = state.store().list_conversations(limit).await?;
    Ok(Json(conversations.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/conversations/{id}/messages
pub async fn list_messages_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Message>>> {
    let conversation = load_conversation(&state, &id).await?;
    let messages = state.store().list_messages(&conversation.id).await?;
    Ok(Json(messages))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplyRequest {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub ok: bool,
    pub conversation_id: ConversationId,
    pub message: Message,
    pub receipt: OutboundReceipt,
}

/// POST /api/v1/conversations/{id}/reply
///
/// Sends through the Graph API first; the outbound message is stored only
/// once the provider accepted it.
pub async fn reply_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReplyRequest>,
) -> AppResult<Json<ReplyResponse>> {
    let conversation = load_conversation(&state, &id).await?;
    let text = reply_text(request.text.as_deref());

    let receipt = state
        .outbound()
        .send_message(&OutboundMessage {
            channel: conversation.channel,
            to: conversation.external_id.clone(),
            text: text.clone(),
            source_id: conversation.source_id.clone(),
        })
        .await?;

    // Insert and `updated_at` bump are a single write.
    let message = state
        .store()
        .create_message(NewMessage::outbound(
            conversation.id.clone(),
            text,
            Utc::now(),
        ))
        .await?;

    state
        .dispatcher()
        .notify_with_summary(&conversation.id, "outbound message")
        .await;
    info!(conversation_id = %conversation.id, channel = %conversation.channel, "reply sent");

    Ok(Json(ReplyResponse {
        ok: true,
        conversation_id: conversation.id,
        message,
        receipt,
    }))
}

fn reply_text(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => DEFAULT_REPLY_TEXT.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct StartChatRequest {
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct StartChatResponse {
    pub ok: bool,
    pub created: bool,
    pub conversation: Conversation,
}

/// POST /api/v1/conversations: opens (or reuses) a WhatsApp chat with a
/// phone number typed in the dashboard.
pub async fn start_chat_handler(
    State(state): State<AppState>,
    Json(request): Json<StartChatRequest>,
) -> AppResult<(StatusCode, Json<StartChatResponse>)> {
    let meta = &state.config().meta;
    let phone = normalize_phone(&request.phone, &meta.default_country_code)
        .ok_or_else(|| AppError::bad_request("Phone missing"))?;

    let store = state.store();
    if let Some(conversation) =
        store.find_conversation(&phone, Channel::WhatsApp).await?
    {
        return Ok((
            StatusCode::OK,
            Json(StartChatResponse {
                ok: true,
                created: false,
                conversation,
            }),
        ));
    }

    let conversation = store
        .create_conversation(NewConversation {
            channel: Channel::WhatsApp,
            external_id: phone,
            source_id: meta.default_phone_number_id.clone(),
            customer_name: None,
            seen_at: Utc::now(),
        })
        .await?;
    info!(conversation_id = %conversation.id, "whatsapp chat started");

    Ok((
        StatusCode::CREATED,
        Json(StartChatResponse {
            ok: true,
            created: true,
            conversation,
        }),
    ))
}

/// POST /api/v1/conversations/{id}/read
pub async fn mark_read_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let conversation_id = parse_conversation_id(&id)?;
    let updated = state
        .store()
        .mark_read(&conversation_id, Utc::now())
        .await?;
    Ok(Json(json!({ "ok": updated })))
}

async fn load_conversation(
    state: &AppState,
    raw_id: &str,
) -> AppResult<Conversation> {
    let id = parse_conversation_id(raw_id)?;
    state
        .store()
        .get_conversation(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Conversation {id} not found")))
}
