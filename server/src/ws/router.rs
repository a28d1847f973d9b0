//! Point-to-point routing of private messages.
//!
//! Persist first, then deliver: a message is never announced to anyone
//! before it is durably stored.

use axum::extract::ws::Message;
use tokio::sync::mpsc::error::TrySendError;

use crate::chat::messages::save_message;
use crate::db::models::PrivateMessage;
use crate::db::{run_blocking, DbPool, StoreError};
use crate::ws::hub::{Hub, HubError, WorkerHandle};
use crate::ws::protocol::{encode_new_message, NewMessageNotification, PrivateMessagePayload};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("failed to persist message: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Hub(#[from] HubError),
}

/// What happened to the live delivery attempt for the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued on the recipient's outbound queue.
    Delivered,
    /// Recipient not connected; the message waits in history.
    Offline,
    /// Recipient's queue was full; it was force-deregistered.
    Evicted,
    /// Sender wrote to itself; the confirmation is the only copy sent.
    SelfAddressed,
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub message: PrivateMessage,
    pub delivery: Delivery,
    /// Whether the confirmation made it onto the sender's queue.
    pub confirmed: bool,
}

/// Persist `request` from `sender`, deliver it to the recipient if online,
/// and confirm it back to the sender.
pub async fn route_private_message(
    db: &DbPool,
    hub: &Hub,
    sender: &WorkerHandle,
    request: PrivateMessagePayload,
) -> Result<RouteOutcome, RouteError> {
    let sender_id = sender.user_id();
    let recipient_id = request.recipient_id;

    let message = run_blocking(db, move |conn| {
        save_message(conn, sender_id, recipient_id, &request.content)
    })
    .await?;

    let frame = encode_new_message(&NewMessageNotification::from(&message))?;

    let delivery = if recipient_id == sender_id {
        Delivery::SelfAddressed
    } else {
        match hub.lookup(recipient_id).await? {
            Some(recipient) => deliver(hub, &recipient, frame.clone()).await?,
            None => Delivery::Offline,
        }
    };

    // Best-effort: the sender can re-fetch history if this is dropped.
    let confirmed = match sender.try_enqueue(frame) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(
                user_id = sender_id,
                message_id = message.id,
                full = matches!(e, TrySendError::Full(_)),
                "Dropped confirmation for sender"
            );
            false
        }
    };

    tracing::debug!(
        message_id = message.id,
        sender_id,
        recipient_id,
        delivery = ?delivery,
        "Routed private message"
    );

    Ok(RouteOutcome {
        message,
        delivery,
        confirmed,
    })
}

async fn deliver(hub: &Hub, recipient: &WorkerHandle, frame: Message) -> Result<Delivery, HubError> {
    match recipient.try_enqueue(frame) {
        Ok(()) => Ok(Delivery::Delivered),
        Err(TrySendError::Full(_)) => {
            tracing::warn!(
                user_id = recipient.user_id(),
                conn_id = recipient.conn_id(),
                "Outbound queue full, evicting connection"
            );
            hub.deregister(recipient).await?;
            Ok(Delivery::Evicted)
        }
        // Worker is already tearing down; its own deregister is in flight.
        Err(TrySendError::Closed(_)) => Ok(Delivery::Offline),
    }
}
