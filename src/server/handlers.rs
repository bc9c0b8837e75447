//! Route handlers. Request bodies are deliberately lenient about field names
//! (`object_key` vs `object_id`, numeric strings for numbers) because in-world
//! scripts build JSON by hand.
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;
use crate::chat::{NpcPersona, APOLOGY};
use crate::delivery::{run_quest_turn, TurnJob};
use crate::logutil::escape_log;
use crate::metrics;
use crate::quest::ObjectRegistration;
use crate::validation::{sanitize_message, validate_id, ValidationError};

/// Success body: `ok: true` alongside the flattened payload.
#[derive(Debug, Serialize)]
pub struct Ack<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub inner: T,
}

fn ack<T: Serialize>(inner: T) -> Json<Ack<T>> {
    Json(Ack { ok: true, inner })
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(b)| b).map_err(|e| {
        debug!("Rejected request body: {}", e);
        ApiError::BadRequest("invalid_json".to_string())
    })
}

fn resolve_npc(state: &AppState, npc_id: Option<&str>) -> Result<String, ValidationError> {
    match npc_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => validate_id("npc_id", id),
        None => Ok(state.config.conversation.default_npc_id.clone()),
    }
}

fn lenient_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n.min(u32::MAX as u64) as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "avatar_id")]
    pub avatar_key: String,
    #[serde(default)]
    pub npc_id: Option<String>,
}

/// Invalid input on `/chat` still carries the apology so the NPC has a line to say.
fn chat_rejected(code: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"ok": false, "reply": APOLOGY, "error": code})),
    )
        .into_response()
}

pub async fn chat(
    State(st): State<AppState>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(b)) => b,
        Err(e) => {
            debug!("Rejected /chat body: {}", e);
            return chat_rejected("invalid_json".to_string());
        }
    };
    let checked = sanitize_message(&body.message, st.config.conversation.message_max_bytes)
        .and_then(|m| Ok((m, validate_id("avatar_key", &body.avatar_key)?)))
        .and_then(|(m, a)| Ok((m, a, resolve_npc(&st, body.npc_id.as_deref())?)));
    let (message, avatar, npc_id) = match checked {
        Ok(v) => v,
        Err(e) => return chat_rejected(e.code()),
    };

    let turn = run_quest_turn(&st.quests, &st.orchestrator, &avatar, &npc_id, &message).await;
    if !turn.ok {
        let code = turn.error_code.unwrap_or_else(|| "llm_error".to_string());
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({"ok": false, "reply": turn.chat, "error": code})),
        )
            .into_response();
    }
    let reply_chars = turn.chat.chars().count();
    Json(json!({
        "ok": true,
        "reply": turn.chat,
        "reply_chars": reply_chars,
        "actions": turn.actions,
        "quest": turn.quest,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ChatAsyncBody {
    #[serde(default, alias = "avatar_id")]
    pub avatar_key: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub npc_id: Option<String>,
    #[serde(default, alias = "object_id")]
    pub object_key: String,
    #[serde(default, alias = "token")]
    pub callback_token: String,
    #[serde(default)]
    pub client_req_id: Option<String>,
}

pub async fn chat_async(
    State(st): State<AppState>,
    payload: Result<Json<ChatAsyncBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(payload)?;
    let message = sanitize_message(&body.message, st.config.conversation.message_max_bytes)?;
    let avatar = validate_id("avatar_key", &body.avatar_key)?;
    let npc_id = resolve_npc(&st, body.npc_id.as_deref())?;
    let object_id = validate_id("object_id", &body.object_key)?;
    if body.callback_token.trim().is_empty() {
        return Err(ApiError::Unauthorized("callback_token_required"));
    }
    st.registry
        .validate(&object_id, &npc_id, body.callback_token.trim())?;

    let request_id = match body.client_req_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => validate_id("client_req_id", id)?,
        _ => uuid::Uuid::new_v4().simple().to_string(),
    };

    st.dispatcher.submit(TurnJob {
        request_id: request_id.clone(),
        avatar_id: avatar,
        npc_id,
        object_id,
        message,
    })?;
    debug!("Queued async turn {}", request_id);
    Ok(Json(json!({"ok": true, "queued": true, "client_req_id": request_id})))
}

#[derive(Debug, Deserialize)]
pub struct RegisterCallbackBody {
    #[serde(default, alias = "object_key")]
    pub object_id: String,
    #[serde(default, alias = "url")]
    pub callback_url: String,
    #[serde(default)]
    pub npc_id: Option<String>,
    #[serde(default)]
    pub region: String,
}

pub async fn register_callback(
    State(st): State<AppState>,
    payload: Result<Json<RegisterCallbackBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(payload)?;
    let object_id = validate_id("object_id", &body.object_id)?;
    let npc_id = resolve_npc(&st, body.npc_id.as_deref())?;
    let issued = st
        .registry
        .register(&object_id, &npc_id, &body.callback_url, body.region.trim())?;
    Ok(Json(json!({
        "ok": true,
        "callback_token": issued.callback_token,
        "expires_sec": issued.expires_sec,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    #[serde(default)]
    pub token: String,
}

pub async fn fetch_package(State(st): State<AppState>, Query(q): Query<FetchQuery>) -> Response {
    match st.packages.get(q.token.trim()) {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterObjectBody {
    #[serde(default, alias = "object_key")]
    pub object_id: String,
    #[serde(default)]
    pub object_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub position: Value,
    #[serde(default)]
    pub difficulty: Value,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub found_message: String,
    #[serde(default)]
    pub category: String,
}

pub async fn register_object(
    State(st): State<AppState>,
    payload: Result<Json<RegisterObjectBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(payload)?;
    let id = validate_id("object_id", &body.object_id)?;
    let reg = ObjectRegistration {
        id,
        display_name: body.object_name.trim().to_string(),
        region: body.region.trim().to_string(),
        position: lenient_string(&body.position),
        difficulty: lenient_u32(&body.difficulty),
        hint: body.hint.trim().to_string(),
        found_message: body.found_message.trim().to_string(),
        category: body.category.trim().to_string(),
    };
    let object = st.quests.pool().register(reg)?;
    Ok(Json(json!({
        "ok": true,
        "object_id": object.id,
        "difficulty": object.difficulty,
        "last_seen": object.last_seen,
    })))
}

pub async fn pool_status(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.quests.pool().status())
}

#[derive(Debug, Deserialize)]
pub struct QuestEventBody {
    #[serde(default, alias = "avatar_id")]
    pub avatar_key: String,
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub object_key: String,
    #[serde(default)]
    pub event: String,
}

pub async fn quest_event(
    State(st): State<AppState>,
    payload: Result<Json<QuestEventBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let body = json_body(payload)?;
    let avatar = validate_id("avatar_key", &body.avatar_key)?;
    let raw_object = if body.object_id.trim().is_empty() {
        &body.object_key
    } else {
        &body.object_id
    };
    let object_id = validate_id("object_id", raw_object)?;
    let outcome = st
        .quests
        .handle_event(&avatar, &object_id, body.event.trim())?;
    Ok(ack(outcome))
}

pub async fn admin_npc_upsert(
    State(st): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NpcPersona>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    st.admin.check(&headers)?;
    let mut persona = json_body(payload)?;
    persona.npc_id = validate_id("npc_id", &persona.npc_id)?;
    let saved = st.orchestrator.npcs().upsert(persona)?;
    info!("NPC persona updated: {}", escape_log(&saved.npc_id));
    Ok(Json(json!({"ok": true, "npc": saved})))
}

#[derive(Debug, Deserialize)]
pub struct ConversationResetBody {
    #[serde(default, alias = "avatar_id")]
    pub avatar_key: String,
    #[serde(default)]
    pub npc_id: Option<String>,
}

pub async fn admin_conversation_reset(
    State(st): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ConversationResetBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    st.admin.check(&headers)?;
    let body = json_body(payload)?;
    let avatar = validate_id("avatar_key", &body.avatar_key)?;
    let conversations = st.orchestrator.conversations();
    let removed = match body.npc_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(npc) => {
            let npc = validate_id("npc_id", npc)?;
            usize::from(conversations.reset(&avatar, &npc)?)
        }
        None => conversations.reset_all(&avatar)?,
    };
    info!(
        "Conversation reset for {}: {} record(s) removed",
        escape_log(&avatar),
        removed
    );
    Ok(Json(json!({"ok": true, "removed": removed})))
}

#[derive(Debug, Deserialize)]
pub struct ProfileRefreshBody {
    #[serde(default, alias = "avatar_id", alias = "avatar_uuid")]
    pub avatar_key: String,
}

pub async fn admin_profile_refresh(
    State(st): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ProfileRefreshBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    st.admin.check(&headers)?;
    let body = json_body(payload)?;
    let avatar = validate_id("avatar_key", &body.avatar_key)?;
    let card = st.orchestrator.profiles().lookup(&avatar, true).await;
    Ok(Json(json!({"ok": true, "refreshed": card.is_some(), "card": card})))
}

pub async fn admin_stats(
    State(st): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    st.admin.check(&headers)?;
    Ok(Json(json!({
        "ok": true,
        "metrics": metrics::snapshot(),
        "pool": st.quests.pool().status(),
        "callbacks_registered": st.registry.len(),
        "packages_cached": st.packages.len(),
        "queue_available": st.dispatcher.available(),
    })))
}
