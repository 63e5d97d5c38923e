//! In-process domain event dispatcher.
//!
//! A bounded work channel decouples publishers (e.g. the agent transport)
//! from handlers; each handler invocation runs as its own task so one slow
//! handler never delays the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainEventKind {
    NodeConnected,
    NodeDisconnected,
}

#[derive(Debug, Clone)]
pub enum DomainEvent {
    NodeConnected { node_id: u64 },
    NodeDisconnected { node_id: u64 },
}

impl DomainEvent {
    pub fn kind(&self) -> DomainEventKind {
        match self {
            DomainEvent::NodeConnected { .. } => DomainEventKind::NodeConnected,
            DomainEvent::NodeDisconnected { .. } => DomainEventKind::NodeDisconnected,
        }
    }
}

#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    async fn handle(&self, event: DomainEvent);
}

type HandlerMap = HashMap<DomainEventKind, Vec<(u64, Arc<dyn DomainEventHandler>)>>;

pub struct EventDispatcher {
    tx: mpsc::Sender<DomainEvent>,
    rx: Mutex<Option<mpsc::Receiver<DomainEvent>>>,
    handlers: Arc<RwLock<HandlerMap>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for an event kind. Returns a token for
    /// [`EventDispatcher::unsubscribe`].
    pub fn subscribe(&self, kind: DomainEventKind, handler: Arc<dyn DomainEventHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.write();
        handlers.entry(kind).or_default().push((id, handler));
        id
    }

    pub fn unsubscribe(&self, kind: DomainEventKind, id: u64) {
        let mut handlers = self.handlers.write();
        if let Some(entries) = handlers.get_mut(&kind) {
            entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Enqueue an event. Applies backpressure when the work channel is full.
    pub async fn publish(&self, event: DomainEvent) -> Result<(), SyncError> {
        self.tx
            .send(event)
            .await
            .map_err(|e| SyncError::TransientIo(format!("event dispatcher closed: {e}")))
    }

    /// Spawn the dispatch loop. May be called once; subsequent calls return
    /// None.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.lock().take()?;
        let handlers = Arc::clone(&self.handlers);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let targets: Vec<Arc<dyn DomainEventHandler>> = {
                    let handlers = handlers.read();
                    handlers
                        .get(&event.kind())
                        .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                        .unwrap_or_default()
                };
                debug!(kind = ?event.kind(), handlers = targets.len(), "dispatching domain event");
                for handler in targets {
                    let event = event.clone();
                    tokio::spawn(async move {
                        handler.handle(event).await;
                    });
                }
            }
        }))
    }
}
