//! Lifecycle event bus: trait for observing integration lifecycle events
//! (`load`, `ready`, `error`) across every live instance.
//!
//! Integrations accept an `Arc<dyn EventSink>`; per-instance listeners are
//! handled by the integration itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// The backing script finished loading.
    Load,
    /// The integration reached `ready` and is about to drain its queue.
    Ready,
    /// Load failure, timeout or queue overflow.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_id: Uuid,
    pub kind: LifecycleEventKind,
    pub integration: String,
    pub instance_id: Uuid,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for receiving lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// No-op sink for instances nobody observes.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: LifecycleEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_kind(&self, kind: LifecycleEventKind) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Kinds in emission order, handy for ordering assertions.
    pub fn kinds(&self) -> Vec<LifecycleEventKind> {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .map(|e| e.kind)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: LifecycleEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for creating a `LifecycleEvent`.
pub fn make_event(
    kind: LifecycleEventKind,
    integration: impl Into<String>,
    instance_id: Uuid,
    error: Option<String>,
) -> LifecycleEvent {
    LifecycleEvent {
        event_id: Uuid::new_v4(),
        kind,
        integration: integration.into(),
        instance_id,
        error,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
