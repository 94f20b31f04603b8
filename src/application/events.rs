//! Typed event bus for catalog mutation events.
//!
//! Replaces the host platform's global string-keyed hook dispatch with an
//! explicit mediator: components subscribe to event kinds, mutation sources
//! publish events. Dispatch is in-process and sequential per event.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::entities::ProductTaxonomy;
use crate::domain::types::TermKind;

use std::sync::Arc;

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// Catalog mutation events the sync core reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A product was inserted or updated. Carries the taxonomy memberships
    /// before and after the write so removals are detectable.
    ProductSaved {
        id: Uuid,
        before: ProductTaxonomy,
        after: ProductTaxonomy,
    },
    /// A product was deleted; `memberships` is its final taxonomy state.
    ProductDeleted {
        id: Uuid,
        memberships: ProductTaxonomy,
    },
    TermSaved {
        kind: TermKind,
        term_id: Uuid,
    },
    TermDeleted {
        kind: TermKind,
        term_id: Uuid,
    },
    AttributeUpdated {
        id: Uuid,
    },
    AttributeDeleted {
        id: Uuid,
    },
    TermMetaChanged {
        kind: TermKind,
        term_id: Uuid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEventKind {
    ProductSaved,
    ProductDeleted,
    TermSaved,
    TermDeleted,
    AttributeUpdated,
    AttributeDeleted,
    TermMetaChanged,
}

impl SyncEventKind {
    pub const ALL: [SyncEventKind; 7] = [
        SyncEventKind::ProductSaved,
        SyncEventKind::ProductDeleted,
        SyncEventKind::TermSaved,
        SyncEventKind::TermDeleted,
        SyncEventKind::AttributeUpdated,
        SyncEventKind::AttributeDeleted,
        SyncEventKind::TermMetaChanged,
    ];
}

impl SyncEvent {
    pub fn kind(&self) -> SyncEventKind {
        match self {
            SyncEvent::ProductSaved { .. } => SyncEventKind::ProductSaved,
            SyncEvent::ProductDeleted { .. } => SyncEventKind::ProductDeleted,
            SyncEvent::TermSaved { .. } => SyncEventKind::TermSaved,
            SyncEvent::TermDeleted { .. } => SyncEventKind::TermDeleted,
            SyncEvent::AttributeUpdated { .. } => SyncEventKind::AttributeUpdated,
            SyncEvent::AttributeDeleted { .. } => SyncEventKind::AttributeDeleted,
            SyncEvent::TermMetaChanged { .. } => SyncEventKind::TermMetaChanged,
        }
    }
}

/// A published event with idempotency and ordering metadata.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub id: Uuid,
    pub epoch: Epoch,
    pub event: SyncEvent,
    pub timestamp: OffsetDateTime,
}

#[async_trait]
pub trait SyncEventHandler: Send + Sync {
    async fn handle(&self, event: &PublishedEvent) -> Result<(), RepoError>;
}

/// The mediator: `subscribe` at wiring time, `publish` from mutation paths.
pub struct EventBus {
    handlers: RwLock<HashMap<SyncEventKind, Vec<Arc<dyn SyncEventHandler>>>>,
    epoch_counter: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn subscribe(&self, kind: SyncEventKind, handler: Arc<dyn SyncEventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Subscribe a handler to every event kind.
    pub fn subscribe_all(&self, handler: Arc<dyn SyncEventHandler>) {
        for kind in SyncEventKind::ALL {
            self.subscribe(kind, handler.clone());
        }
    }

    /// Publish an event, dispatching sequentially to every subscriber of its
    /// kind. The first handler error aborts dispatch and is returned.
    pub async fn publish(&self, event: SyncEvent) -> Result<(), RepoError> {
        let published = PublishedEvent {
            id: Uuid::new_v4(),
            epoch: self.next_epoch(),
            event,
            timestamp: OffsetDateTime::now_utc(),
        };

        info!(
            event_id = %published.id,
            event_epoch = published.epoch,
            event_kind = ?published.event.kind(),
            "sync event published"
        );

        let subscribers: Vec<Arc<dyn SyncEventHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&published.event.kind())
            .cloned()
            .unwrap_or_default();

        for handler in subscribers {
            handler.handle(&published).await?;
        }

        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
