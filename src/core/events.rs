//! Lifecycle signals fired around manager mutations
//!
//! Each manager owns a [`Hooks`] list. Callbacks run synchronously, in
//! registration order, on the task performing the mutation:
//!
//! ```text
//! create() ──▶ BeforeCreate ──▶ write ──▶ (success) ──▶ AfterCreate
//!                                     └─▶ (failure) ──▶ error, no after-signal
//! ```
//!
//! After-signals can additionally be forwarded to an [`EventBus`], which
//! fans them out to async subscribers through `tokio::sync::broadcast`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let bus = EventBus::new(1024);
//! let mut rx = bus.subscribe();
//!
//! let hooks = Hooks::new()
//!     .on(Signal::BeforeCreate, |event| tracing::info!(?event.item, "creating"))
//!     .with_bus(bus);
//!
//! let manager = MemoryManager::new("user").with_hooks(hooks);
//! manager.create(item, true).await?;
//!
//! let envelope = rx.recv().await?;
//! assert_eq!(envelope.event.signal, Signal::AfterCreate);
//! ```

use crate::core::manager::Item;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// The mutation a lifecycle event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeAddToRelation,
    AfterAddToRelation,
    BeforeRemoveFromRelation,
    AfterRemoveFromRelation,
}

impl Signal {
    pub fn is_after(self) -> bool {
        matches!(
            self,
            Signal::AfterCreate
                | Signal::AfterUpdate
                | Signal::AfterDelete
                | Signal::AfterAddToRelation
                | Signal::AfterRemoveFromRelation
        )
    }

    /// Get the action name (create, update, delete, add, remove)
    pub fn action(self) -> &'static str {
        match self {
            Signal::BeforeCreate | Signal::AfterCreate => "create",
            Signal::BeforeUpdate | Signal::AfterUpdate => "update",
            Signal::BeforeDelete | Signal::AfterDelete => "delete",
            Signal::BeforeAddToRelation | Signal::AfterAddToRelation => "add",
            Signal::BeforeRemoveFromRelation | Signal::AfterRemoveFromRelation => "remove",
        }
    }
}

/// Payload passed to lifecycle callbacks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    pub signal: Signal,
    pub resource: String,
    pub item: Item,
    /// Fields that actually change (updates only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Item>,
    /// Relation attribute (relation signals only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Child item (relation signals only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child: Option<Item>,
}

impl LifecycleEvent {
    pub fn new(signal: Signal, resource: impl Into<String>, item: &Item) -> Self {
        Self {
            signal,
            resource: resource.into(),
            item: item.clone(),
            changes: None,
            attribute: None,
            child: None,
        }
    }

    pub fn with_changes(mut self, changes: &Item) -> Self {
        self.changes = Some(changes.clone());
        self
    }

    pub fn with_relation(mut self, attribute: &str, child: &Item) -> Self {
        self.attribute = Some(attribute.to_string());
        self.child = Some(child.clone());
        self
    }
}

type Callback = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Ordered list of lifecycle callbacks owned by one manager
#[derive(Clone, Default)]
pub struct Hooks {
    callbacks: Vec<(Signal, Callback)>,
    bus: Option<EventBus>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("callbacks", &self.callbacks.len())
            .field("bus", &self.bus.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one signal
    pub fn on(
        mut self,
        signal: Signal,
        callback: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.push((signal, Arc::new(callback)));
        self
    }

    /// Register a callback for every signal
    pub fn on_any(mut self, callback: impl Fn(&LifecycleEvent) + Send + Sync + 'static) -> Self {
        let callback: Callback = Arc::new(callback);
        for signal in [
            Signal::BeforeCreate,
            Signal::AfterCreate,
            Signal::BeforeUpdate,
            Signal::AfterUpdate,
            Signal::BeforeDelete,
            Signal::AfterDelete,
            Signal::BeforeAddToRelation,
            Signal::AfterAddToRelation,
            Signal::BeforeRemoveFromRelation,
            Signal::AfterRemoveFromRelation,
        ] {
            self.callbacks.push((signal, Arc::clone(&callback)));
        }
        self
    }

    /// Forward after-signals to an event bus
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty() && self.bus.is_none()
    }

    /// Run every callback registered for `event.signal`, in order
    pub fn emit(&self, event: LifecycleEvent) {
        for (signal, callback) in &self.callbacks {
            if *signal == event.signal {
                callback(&event);
            }
        }
        match &self.bus {
            Some(bus) if event.signal.is_after() => {
                bus.publish(event);
            }
            _ => {}
        }
    }
}

/// Envelope wrapping a lifecycle event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: LifecycleEvent,
}

impl EventEnvelope {
    /// Create a new event envelope
    pub fn new(event: LifecycleEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Broadcast-based event bus
///
/// The bus is cheap to clone and can be shared between managers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    ///
    /// The capacity determines how many events can be buffered before
    /// slow receivers start losing events (lagged).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    ///
    /// Never fails: without subscribers the event is dropped.
    /// Returns the number of receivers that will receive the event.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let envelope = EventEnvelope::new(event);
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
