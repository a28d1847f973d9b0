//! JSON wire envelope exchanged over the WebSocket.
//!
//! Every frame is `{ "type": <string>, "payload": <object> }`. Clients send
//! `private_message`; the server sends `new_message` both to the recipient
//! and, as confirmation, to the sender, and `user_status` to everyone else
//! whenever a user connects or disconnects.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::db::models::PrivateMessage;
use crate::db::UserId;

pub const PRIVATE_MESSAGE: &str = "private_message";
pub const NEW_MESSAGE: &str = "new_message";
pub const USER_STATUS: &str = "user_status";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Inbound `private_message` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    pub recipient_id: UserId,
    pub content: String,
}

/// Outbound `new_message` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageNotification {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub sender_username: String,
    pub content: String,
    /// RFC3339 server timestamp of the persisted message
    pub timestamp: String,
}

impl From<&PrivateMessage> for NewMessageNotification {
    fn from(msg: &PrivateMessage) -> Self {
        Self {
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            sender_username: msg.sender_username.clone(),
            content: msg.content.clone(),
            timestamp: msg.created_at.clone(),
        }
    }
}

/// Outbound `user_status` payload: a presence change of another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusNotification {
    pub user_id: UserId,
    pub is_online: bool,
}

/// Decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    PrivateMessage(PrivateMessagePayload),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown frame type {0:?}")]
    UnknownType(String),
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid recipient {0}")]
    InvalidRecipient(UserId),
    #[error("empty message content")]
    EmptyContent,
}

/// Decode one inbound text frame.
pub fn decode_inbound(text: &str) -> Result<Inbound, FrameError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(FrameError::Malformed)?;

    match envelope.kind.as_str() {
        PRIVATE_MESSAGE => {
            let payload: PrivateMessagePayload = serde_json::from_value(envelope.payload)
                .map_err(|source| FrameError::InvalidPayload {
                    kind: PRIVATE_MESSAGE,
                    source,
                })?;
            if payload.recipient_id <= 0 {
                return Err(FrameError::InvalidRecipient(payload.recipient_id));
            }
            if payload.content.trim().is_empty() {
                return Err(FrameError::EmptyContent);
            }
            Ok(Inbound::PrivateMessage(payload))
        }
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

fn encode_frame<T: Serialize>(kind: &str, payload: &T) -> Result<Message, serde_json::Error> {
    let envelope = Envelope {
        kind: kind.to_string(),
        payload: serde_json::to_value(payload)?,
    };
    Ok(Message::Text(serde_json::to_string(&envelope)?.into()))
}

/// Encode a `new_message` notification as a text frame.
pub fn encode_new_message(notification: &NewMessageNotification) -> Result<Message, serde_json::Error> {
    encode_frame(NEW_MESSAGE, notification)
}

pub fn encode_user_status(notification: &UserStatusNotification) -> Result<Message, serde_json::Error> {
    encode_frame(USER_STATUS, notification)
}
