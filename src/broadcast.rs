//! Change notification fan-out
//!
//! A single dispatcher task owns the registry of live connections and handles
//! commands one at a time from its command channel. Each connection gets a
//! private bounded queue. Delivery uses `try_send`, so a stalled consumer can
//! never block the dispatcher: a full queue gets its connection dropped on the
//! spot, which also closes the queue.

use crate::error::ApiError;
use crate::types::{FileChange, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pending changes a connection may hold before it counts as stalled.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

const DEFAULT_COMMAND_CAPACITY: usize = 256;

pub type ConnectionId = u64;

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
    /// Dispatcher command channel capacity.
    pub command_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

/// The receiving half handed to a registered connection.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub user: UserId,
    receiver: mpsc::Receiver<FileChange>,
}

impl Subscription {
    /// Next change, or `None` once the connection has been unregistered
    /// (or dropped as a slow consumer) and the queue is drained.
    pub async fn recv(&mut self) -> Option<FileChange> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FileChange> {
        self.receiver.try_recv().ok()
    }
}

enum Command {
    Register {
        id: ConnectionId,
        user: UserId,
        queue: mpsc::Sender<FileChange>,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        user: UserId,
        change: FileChange,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Contains {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

struct Registration {
    user: UserId,
    queue: mpsc::Sender<FileChange>,
}

pub struct ChangeBroadcaster {
    config: BroadcasterConfig,
    commands: mpsc::Sender<Command>,
    inbox: Mutex<Option<mpsc::Receiver<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl ChangeBroadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        let (commands, inbox) = mpsc::channel(config.command_capacity.max(1));
        Self {
            config,
            commands,
            inbox: Mutex::new(Some(inbox)),
            task: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    /// Spawn the dispatcher task. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), ApiError> {
        let inbox = self
            .inbox
            .lock()
            .take()
            .ok_or_else(|| ApiError::Broadcaster("broadcaster already started".to_string()))?;

        let handle = tokio::spawn(dispatch(inbox));
        *self.task.lock() = Some(handle);
        info!(
            queue_capacity = self.config.queue_capacity,
            "Started change broadcaster"
        );
        Ok(())
    }

    /// Shut the dispatcher down and wait for it. Every registered queue is
    /// closed, so subscribers see `None` after draining.
    pub async fn stop(&self) -> Result<(), ApiError> {
        let handle = self.task.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        let _ = self.commands.send(Command::Shutdown).await;
        handle.await?;
        info!("Stopped change broadcaster");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Register a new connection for `user`.
    ///
    /// Commands sent before [`ChangeBroadcaster::start`] are buffered and
    /// processed once the dispatcher runs.
    pub async fn register(&self, user: UserId) -> Result<Subscription, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        self.commands
            .send(Command::Register {
                id,
                user: user.clone(),
                queue,
            })
            .await
            .map_err(|_| ApiError::Broadcaster("broadcaster is stopped".to_string()))?;
        Ok(Subscription { id, user, receiver })
    }

    /// Remove a connection. Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        let _ = self.commands.send(Command::Unregister { id }).await;
    }

    /// Queue a change for every connection of `user`. Never reports
    /// delivery failures.
    pub async fn broadcast(&self, user: &UserId, change: FileChange) {
        let command = Command::Broadcast {
            user: user.clone(),
            change,
        };
        if self.commands.send(command).await.is_err() {
            debug!(user = %user, "Broadcaster stopped, change dropped");
        }
    }

    /// Number of live connections, observed after every command sent so far.
    pub async fn connection_count(&self) -> Result<usize, ApiError> {
        let (reply, rx) = oneshot::channel();
        self.query(Command::Count { reply }).await?;
        rx.await
            .map_err(|_| ApiError::Broadcaster("broadcaster is stopped".to_string()))
    }

    pub async fn is_registered(&self, id: ConnectionId) -> Result<bool, ApiError> {
        let (reply, rx) = oneshot::channel();
        self.query(Command::Contains { id, reply }).await?;
        rx.await
            .map_err(|_| ApiError::Broadcaster("broadcaster is stopped".to_string()))
    }

    async fn query(&self, command: Command) -> Result<(), ApiError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ApiError::Broadcaster("broadcaster is stopped".to_string()))
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

async fn dispatch(mut inbox: mpsc::Receiver<Command>) {
    let mut registry: HashMap<ConnectionId, Registration> = HashMap::new();

    while let Some(command) = inbox.recv().await {
        match command {
            Command::Register { id, user, queue } => {
                info!(
                    connection_id = id,
                    user = %user,
                    total = registry.len() + 1,
                    "Registered connection"
                );
                registry.insert(id, Registration { user, queue });
            }
            Command::Unregister { id } => {
                if let Some(reg) = registry.remove(&id) {
                    info!(
                        connection_id = id,
                        user = %reg.user,
                        total = registry.len(),
                        "Unregistered connection"
                    );
                }
            }
            Command::Broadcast { user, change } => deliver(&mut registry, &user, &change),
            Command::Count { reply } => {
                let _ = reply.send(registry.len());
            }
            Command::Contains { id, reply } => {
                let _ = reply.send(registry.contains_key(&id));
            }
            Command::Shutdown => break,
        }
    }

    let remaining = registry.len();
    registry.clear();
    debug!(closed = remaining, "Change dispatcher exited");
}

fn deliver(
    registry: &mut HashMap<ConnectionId, Registration>,
    user: &UserId,
    change: &FileChange,
) {
    let mut delivered = 0usize;
    registry.retain(|id, reg| {
        if reg.user != *user {
            return true;
        }
        match reg.queue.try_send(change.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection_id = *id,
                    user = %reg.user,
                    "Dropping slow consumer with full queue"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = *id, "Dropping connection with closed queue");
                false
            }
        }
    });
    debug!(
        user = %user,
        kind = %change.kind,
        path = %change.file.path,
        delivered,
        total = registry.len(),
        "Broadcast change"
    );
}
