//! Per-instance lifecycle listeners (`on` / `once`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use campaign_core::event_bus::{LifecycleEvent, LifecycleEventKind};
use parking_lot::Mutex;

pub type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    kind: LifecycleEventKind,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
pub struct Emitter {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: LifecycleEventKind, listener: Listener) -> ListenerId {
        self.add(kind, false, listener)
    }

    pub fn once(&self, kind: LifecycleEventKind, listener: Listener) -> ListenerId {
        self.add(kind, true, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Call every listener for `event.kind` in registration order. Listeners
    /// run without the registry locked, so they may register others or
    /// call back into the integration.
    pub fn emit(&self, event: &LifecycleEvent) -> usize {
        let listeners: Vec<Listener> = {
            let mut entries = self.entries.lock();
            let matched = entries
                .iter()
                .filter(|e| e.kind == event.kind)
                .map(|e| e.listener.clone())
                .collect();
            entries.retain(|e| !(e.once && e.kind == event.kind));
            matched
        };
        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    pub fn listener_count(&self, kind: LifecycleEventKind) -> usize {
        self.entries.lock().iter().filter(|e| e.kind == kind).count()
    }

    fn add(&self, kind: LifecycleEventKind, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push(Entry {
            id,
            kind,
            once,
            listener,
        });
        id
    }
}
