//! Bot API JSON shapes and their mapping onto core domain types.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use echobot_core::{
    domain::{Batch, ChatId, Message, MessageId, Update, UpdateId, UpdateKind, UNKNOWN_SENDER},
    errors::Error,
    Result,
};

/// Envelope shared by every Bot API method.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub(crate) ok: bool,
    pub(crate) result: Option<T>,
    pub(crate) description: Option<String>,
    pub(crate) error_code: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub(crate) chat_id: i64,
    pub(crate) text: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    message_id: Option<i64>,
    #[serde(default)]
    chat: Option<WireChat>,
    #[serde(default)]
    from: Option<WireUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    #[serde(default)]
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    #[serde(default)]
    username: Option<String>,
}

/// Decode a `getUpdates` response.
///
/// Endpoint errors and broken JSON become [`Error::Transport`]. An entry
/// without an integer `update_id` is logged and left out of the batch; only a
/// non-empty result where no entry carries one is a transport error. A bad
/// message inside an otherwise valid update only marks that update malformed.
pub(crate) fn decode_updates(status: StatusCode, body: &str) -> Result<Batch> {
    let resp: ApiResponse<Vec<Value>> = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(_) if !status.is_success() => {
            return Err(Error::Transport(format!("HTTP error: {status}")));
        }
        Err(e) => return Err(Error::Transport(format!("malformed payload: {e}"))),
    };

    if !resp.ok {
        return Err(Error::Transport(describe_failure(status, &resp)));
    }

    let entries = resp.result.unwrap_or_default();
    let batch: Batch = entries.iter().filter_map(decode_update).collect();
    if batch.is_empty() && !entries.is_empty() {
        return Err(Error::Transport(
            "malformed payload: no update carries an update_id".to_string(),
        ));
    }
    Ok(batch)
}

fn decode_update(raw: &Value) -> Option<Update> {
    let Some(id) = raw.get("update_id").and_then(Value::as_i64) else {
        warn!(entry = %raw, "skipping update without update_id");
        return None;
    };

    let kind = match raw.get("message") {
        None | Some(Value::Null) => UpdateKind::Other,
        Some(m) => match decode_message(m) {
            Ok(message) => UpdateKind::Message(message),
            Err(reason) => UpdateKind::Malformed { reason },
        },
    };

    Some(Update {
        id: UpdateId(id),
        kind,
    })
}

fn decode_message(raw: &Value) -> std::result::Result<Message, String> {
    let wire: WireMessage =
        serde_json::from_value(raw.clone()).map_err(|e| format!("bad message: {e}"))?;

    let chat_id = wire
        .chat
        .and_then(|c| c.id)
        .ok_or_else(|| "message.chat.id missing".to_string())?;

    let sender_label = wire
        .from
        .and_then(|u| u.username)
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

    Ok(Message {
        chat_id: ChatId(chat_id),
        message_id: wire.message_id.map(MessageId),
        text: wire.text,
        sender_label,
        sent_at: wire
            .date
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
    })
}

/// Whether a `sendMessage` response acknowledges delivery. Anything other than
/// a 2xx with `ok=true` counts as not acknowledged.
pub(crate) fn decode_ack(status: StatusCode, body: &str) -> bool {
    if !status.is_success() {
        return false;
    }
    serde_json::from_str::<ApiResponse<Value>>(body)
        .map(|r| r.ok)
        .unwrap_or(false)
}

fn describe_failure<T>(status: StatusCode, resp: &ApiResponse<T>) -> String {
    match (&resp.description, resp.error_code) {
        (Some(d), Some(code)) => format!("API error {code}: {d}"),
        (Some(d), None) => format!("API error: {d}"),
        (None, _) if !status.is_success() => format!("HTTP error: {status}"),
        (None, _) => "API error: no description".to_string(),
    }
}
