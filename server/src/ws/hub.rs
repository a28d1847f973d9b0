//! Connection registry: the single authoritative map from identity to its
//! live connection worker.
//!
//! The map is owned by one task. `register`, `deregister`, `lookup` and
//! `shutdown` are requests on a bounded queue, answered over a oneshot, and
//! processed strictly one at a time. Presence writes happen inside that same
//! task, in request order, so presence can never end up reversed relative to
//! the map. No lock guards the map.
//!
//! After each committed presence change the task pushes a `user_status`
//! frame to every other registered worker. The push is best-effort: a
//! worker whose queue is full simply misses it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::chat::presence::set_user_status;
use crate::db::{run_blocking, DbPool, UserId};
use crate::ws::protocol::{encode_user_status, UserStatusNotification};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Reference to one live connection worker: its identity, its bounded
/// outbound queue, and the token that closes it.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    user_id: UserId,
    conn_id: u64,
    outbound: mpsc::Sender<Message>,
    shutdown: CancellationToken,
}

impl WorkerHandle {
    /// Create a handle together with the receiving end of its outbound queue.
    pub fn channel(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let handle = Self {
            user_id,
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            outbound,
            shutdown: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Non-blocking enqueue onto the outbound queue.
    pub fn try_enqueue(&self, msg: Message) -> Result<(), mpsc::error::TrySendError<Message>> {
        if self.shutdown.is_cancelled() {
            return Err(mpsc::error::TrySendError::Closed(msg));
        }
        self.outbound.try_send(msg)
    }

    /// Close the outbound queue. The outbound task sends a close frame and
    /// exits; the inbound task stops reading.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.outbound.is_closed()
    }

    /// Resolves once the worker has been closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("connection registry is shut down")]
    Closed,
}

enum HubCommand {
    Register {
        worker: WorkerHandle,
        reply: oneshot::Sender<()>,
    },
    Deregister {
        user_id: UserId,
        conn_id: u64,
        reply: oneshot::Sender<bool>,
    },
    Lookup {
        user_id: UserId,
        reply: oneshot::Sender<Option<WorkerHandle>>,
    },
    OnlineCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the registry task.
#[derive(Debug, Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { worker, .. } => write!(f, "Register({})", worker.user_id),
            Self::Deregister { user_id, conn_id, .. } => {
                write!(f, "Deregister({}, conn {})", user_id, conn_id)
            }
            Self::Lookup { user_id, .. } => write!(f, "Lookup({})", user_id),
            Self::OnlineCount { .. } => write!(f, "OnlineCount"),
            Self::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

impl Hub {
    /// Spawn the registry task. It lives until `shutdown` is called or every
    /// `Hub` clone is dropped.
    pub fn spawn(db: DbPool, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        tokio::spawn(run_hub(rx, db));
        Self { tx }
    }

    /// Insert `worker` and mark its identity online. An existing worker for
    /// the same identity is replaced and closed.
    pub async fn register(&self, worker: WorkerHandle) -> Result<(), HubError> {
        self.request(|reply| HubCommand::Register { worker, reply }).await
    }

    /// Remove `worker` if the entry still refers to it, close it and mark the
    /// identity offline. Returns false (and does nothing) when the entry is
    /// gone or belongs to a newer worker.
    pub async fn deregister(&self, worker: &WorkerHandle) -> Result<bool, HubError> {
        let (user_id, conn_id) = (worker.user_id, worker.conn_id);
        self.request(|reply| HubCommand::Deregister {
            user_id,
            conn_id,
            reply,
        })
        .await
    }

    pub async fn lookup(&self, user_id: UserId) -> Result<Option<WorkerHandle>, HubError> {
        self.request(|reply| HubCommand::Lookup { user_id, reply }).await
    }

    pub async fn online_count(&self) -> Result<usize, HubError> {
        self.request(|reply| HubCommand::OnlineCount { reply }).await
    }

    /// Close every registered worker, mark each offline, and stop the task.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.request(|reply| HubCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

async fn run_hub(mut rx: mpsc::Receiver<HubCommand>, db: DbPool) {
    let mut clients: HashMap<UserId, WorkerHandle> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        tracing::trace!(command = ?cmd, "Registry request");
        match cmd {
            HubCommand::Register { worker, reply } => {
                let user_id = worker.user_id;
                let conn_id = worker.conn_id;
                if let Some(previous) = clients.insert(user_id, worker) {
                    previous.close();
                    tracing::info!(
                        user_id,
                        conn_id = previous.conn_id,
                        "Superseded by a newer connection"
                    );
                }
                update_presence(&db, user_id, true).await;
                announce_presence(&clients, user_id, true);
                tracing::info!(user_id, conn_id, online = clients.len(), "Connection registered");
                let _ = reply.send(());
            }
            HubCommand::Deregister {
                user_id,
                conn_id,
                reply,
            } => {
                let owns_entry = clients
                    .get(&user_id)
                    .is_some_and(|current| current.conn_id == conn_id);
                let removed = if owns_entry {
                    clients.remove(&user_id)
                } else {
                    None
                };

                if let Some(worker) = &removed {
                    worker.close();
                    update_presence(&db, user_id, false).await;
                    announce_presence(&clients, user_id, false);
                    tracing::info!(user_id, conn_id, online = clients.len(), "Connection deregistered");
                }
                let _ = reply.send(removed.is_some());
            }
            HubCommand::Lookup { user_id, reply } => {
                let worker = clients
                    .get(&user_id)
                    .filter(|worker| !worker.is_closed())
                    .cloned();
                let _ = reply.send(worker);
            }
            HubCommand::OnlineCount { reply } => {
                let _ = reply.send(clients.len());
            }
            HubCommand::Shutdown { reply } => {
                for (user_id, worker) in clients.drain() {
                    worker.close();
                    update_presence(&db, user_id, false).await;
                }
                tracing::info!("Connection registry shut down");
                let _ = reply.send(());
                break;
            }
        }
    }
}

/// Presence failures are logged; they never block registry progress.
async fn update_presence(db: &DbPool, user_id: UserId, online: bool) {
    if let Err(e) = run_blocking(db, move |conn| set_user_status(conn, user_id, online)).await {
        tracing::warn!(user_id, online, error = %e, "Failed to update presence");
    }
}

/// Push a presence change to every worker except the user's own.
fn announce_presence(clients: &HashMap<UserId, WorkerHandle>, user_id: UserId, is_online: bool) {
    let frame = match encode_user_status(&UserStatusNotification { user_id, is_online }) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Failed to encode presence update");
            return;
        }
    };

    for (&peer, worker) in clients {
        if peer == user_id {
            continue;
        }
        if worker.try_enqueue(frame.clone()).is_err() {
            tracing::debug!(user_id, peer, "Dropped presence update for peer");
        }
    }
}
