//! Integration lifecycle: one live, stateful use of a vendor adaptor.
//!
//! ```text
//! idle ──initialize()──▶ initializing ──▶ loading ──settle(ok)──▶ ready
//!                                            │
//!                                            └──settle(err)──▶ failed
//! ```
//!
//! Calls made before `ready` are buffered in a [`CallQueue`] and replayed in
//! order right after the `ready` event fires. A failed load closes the queue
//! and discards what it held; no retry is attempted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use campaign_core::config::AppConfig;
use campaign_core::event_bus::{make_event, noop_sink, EventSink, LifecycleEvent, LifecycleEventKind};
use campaign_core::{Call, CallRecord, ResolvedOptions, TagError, TagResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::descriptor::IntegrationDescriptor;
use crate::emitter::{Emitter, ListenerId};
use crate::environment::Environment;
use crate::loader::TagLoader;
use crate::mapping::VendorMapping;
use crate::queue::{CallQueue, Enqueue, QueueState};
use crate::registry_guard::RegistryGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Initializing,
    Loading,
    Ready,
    Failed,
}

/// Result of calling [`Integration::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The tag was injected; the integration is waiting for it to settle.
    Loading,
    /// The declared globals were already present, so nothing was injected.
    AlreadyPresent,
    /// Settled during the call (inline tag, or no tag to load).
    Ready,
    /// Settled with an error during the call.
    Failed,
    /// `initialize` had already been called; nothing happened.
    AlreadyInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetGlobals {
    Keep,
    Wipe,
}

struct Core {
    state: LifecycleState,
    pending_initial_page: bool,
    /// Bumped on reset so settlements of abandoned loads are ignored.
    generation: u64,
    last_error: Option<String>,
}

struct Inner {
    id: Uuid,
    descriptor: Arc<IntegrationDescriptor>,
    mapping: Arc<dyn VendorMapping>,
    options: ResolvedOptions,
    /// Tag chosen by the mapping for these options; `None` means the first.
    selected_tag: Option<String>,
    env: Arc<dyn Environment>,
    guard: RegistryGuard,
    loader: TagLoader,
    queue: CallQueue,
    core: Mutex<Core>,
    listeners: Emitter,
    sink: RwLock<Arc<dyn EventSink>>,
    loaded_latch: AtomicBool,
    load_count: AtomicUsize,
}

/// Handle to an integration instance. Clones share the same instance.
#[derive(Clone)]
pub struct Integration {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Integration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integration")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Integration {
    pub fn new(
        descriptor: Arc<IntegrationDescriptor>,
        mapping: Arc<dyn VendorMapping>,
        settings: &Map<String, Value>,
        env: Arc<dyn Environment>,
        config: &AppConfig,
    ) -> Self {
        let options = descriptor.resolve_options(settings);
        let selected_tag = mapping.select_tag(&options);
        let queue = CallQueue::new(descriptor.name(), config.queue.max_redrain);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                guard: RegistryGuard::new(env.clone()),
                loader: TagLoader::new(env.clone(), config.loader.clone()),
                descriptor,
                mapping,
                options,
                selected_tag,
                env,
                queue,
                core: Mutex::new(Core {
                    state: LifecycleState::Idle,
                    pending_initial_page: false,
                    generation: 0,
                    last_error: None,
                }),
                listeners: Emitter::new(),
                sink: RwLock::new(noop_sink()),
                loaded_latch: AtomicBool::new(false),
                load_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Forward every lifecycle event to `sink` as well as to listeners.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write() = sink;
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.descriptor.name()
    }

    pub fn descriptor(&self) -> &IntegrationDescriptor {
        &self.inner.descriptor
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.inner.options
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.core.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.core.lock().last_error.clone()
    }

    pub fn queue_state(&self) -> QueueState {
        self.inner.queue.state()
    }

    /// Calls waiting for the integration to become ready.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// How many times this instance asked the Tag Loader to load.
    pub fn load_count(&self) -> usize {
        self.inner.load_count.load(Ordering::Relaxed)
    }

    pub fn on(
        &self,
        kind: LifecycleEventKind,
        listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.listeners.on(kind, Arc::new(listener))
    }

    pub fn once(
        &self,
        kind: LifecycleEventKind,
        listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.listeners.once(kind, Arc::new(listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.off(id)
    }

    /// Whether the vendor library is present. Once observed true it stays
    /// true until [`reset`](Self::reset).
    pub fn loaded(&self) -> bool {
        if self.inner.loaded_latch.load(Ordering::Acquire) {
            return true;
        }
        let present = self.library_present();
        if present {
            self.inner.loaded_latch.store(true, Ordering::Release);
        }
        present
    }

    pub fn initialize(&self) -> InitOutcome {
        let inner = &self.inner;
        let generation = {
            let mut core = inner.core.lock();
            if core.state != LifecycleState::Idle {
                debug!(integration = %self.name(), state = ?core.state, "already initialized");
                return InitOutcome::AlreadyInitialized;
            }
            core.state = LifecycleState::Initializing;
            core.pending_initial_page = inner.descriptor.assumes_pageview();
            core.generation
        };
        info!(
            integration = %self.name(),
            assumes_pageview = inner.descriptor.assumes_pageview(),
            "initializing integration"
        );

        for call in inner.mapping.setup(&inner.options) {
            if let Err(e) = inner.env.invoke(&call) {
                warn!(integration = %self.name(), target = %call.target, error = %e, "setup call failed");
            }
        }

        if self.library_present() {
            info!(integration = %self.name(), "globals already present, skipping tag load");
            self.transition(LifecycleState::Loading);
            self.settle(generation, Ok(()));
            return InitOutcome::AlreadyPresent;
        }

        let selected = inner.selected_tag.as_deref();
        let rendered = match inner.descriptor.tag(selected) {
            Some(named) => named.template.render(&inner.options).map(Some),
            None => match selected {
                Some(name) => Err(TagError::Template(format!("no tag named '{name}'"))),
                None => Ok(None),
            },
        };

        self.transition(LifecycleState::Loading);
        let tag = match rendered {
            Ok(Some(tag)) => tag,
            Ok(None) => {
                debug!(integration = %self.name(), "no tag declared, nothing to load");
                self.settle(generation, Ok(()));
                return self.outcome();
            }
            Err(e) => {
                let err = TagError::LoadError {
                    integration: self.name().to_string(),
                    reason: e.to_string(),
                };
                self.settle(generation, Err(err));
                return self.outcome();
            }
        };

        inner.load_count.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let timeout = inner
            .loader
            .timeout_for(inner.descriptor.completion(), inner.descriptor.load_timeout());
        inner.loader.load(
            self.name(),
            &tag,
            inner.descriptor.completion(),
            timeout,
            Box::new(move |outcome| {
                if let Some(inner) = weak.upgrade() {
                    Integration { inner }.settle(generation, outcome);
                }
            }),
        );

        self.outcome()
    }

    fn library_present(&self) -> bool {
        self.inner
            .guard
            .is_present_for(&self.inner.descriptor, self.inner.selected_tag.as_deref())
    }

    pub fn track(&self, event: impl Into<String>, properties: Map<String, Value>) {
        self.call(Call::track(event, properties));
    }

    pub fn page(
        &self,
        category: Option<String>,
        name: Option<String>,
        properties: Map<String, Value>,
    ) {
        self.call(Call::Page {
            category,
            name,
            properties,
            initial: false,
        });
    }

    pub fn identify(&self, user_id: Option<String>, traits: Map<String, Value>) {
        self.call(Call::identify(user_id, traits));
    }

    pub fn group(&self, group_id: impl Into<String>, traits: Map<String, Value>) {
        self.call(Call::Group {
            group_id: group_id.into(),
            traits,
        });
    }

    pub fn alias(&self, to: impl Into<String>, from: Option<String>) {
        self.call(Call::Alias {
            to: to.into(),
            from,
        });
    }

    /// Queue `call` until ready, or dispatch it now if the queue has
    /// drained. Never fails; problems surface through logs and the `error`
    /// event.
    pub fn call(&self, mut call: Call) {
        if let Call::Page { initial, .. } = &mut call {
            let mut core = self.inner.core.lock();
            if core.pending_initial_page {
                core.pending_initial_page = false;
                *initial = true;
            }
        }

        match self.inner.queue.enqueue(CallRecord::new(call)) {
            Enqueue::Bypass(record) => self.dispatch(record),
            Enqueue::Queued | Enqueue::Dropped => {}
        }
    }

    /// Return to `idle`: queue cleared, listeners kept. Settlements of a
    /// load started before the reset are ignored.
    pub fn reset(&self, globals: ResetGlobals) {
        {
            let mut core = self.inner.core.lock();
            core.state = LifecycleState::Idle;
            core.pending_initial_page = false;
            core.generation += 1;
            core.last_error = None;
        }
        self.inner.queue.reset();
        self.inner.loaded_latch.store(false, Ordering::Release);
        if globals == ResetGlobals::Wipe {
            self.inner.guard.wipe(&self.inner.descriptor);
        }
        debug!(integration = %self.name(), ?globals, "integration reset");
    }

    fn transition(&self, to: LifecycleState) {
        let from = {
            let mut core = self.inner.core.lock();
            std::mem::replace(&mut core.state, to)
        };
        debug!(integration = %self.name(), ?from, ?to, "state transition");
    }

    fn outcome(&self) -> InitOutcome {
        match self.state() {
            LifecycleState::Ready => InitOutcome::Ready,
            LifecycleState::Failed => InitOutcome::Failed,
            _ => InitOutcome::Loading,
        }
    }

    fn settle(&self, generation: u64, outcome: TagResult<()>) {
        {
            let mut core = self.inner.core.lock();
            if core.generation != generation || core.state != LifecycleState::Loading {
                debug!(integration = %self.name(), state = ?core.state, "stale settlement ignored");
                return;
            }
            match &outcome {
                Ok(()) => core.state = LifecycleState::Ready,
                Err(e) => {
                    core.state = LifecycleState::Failed;
                    core.last_error = Some(e.to_string());
                }
            }
        }

        match outcome {
            Ok(()) => {
                info!(integration = %self.name(), queued = self.queued(), "integration ready");
                self.emit(LifecycleEventKind::Load, None);
                self.emit(LifecycleEventKind::Ready, None);
                match self.inner.queue.drain(|record| self.dispatch(record)) {
                    Ok(report) => debug!(
                        integration = %self.name(),
                        dispatched = report.dispatched,
                        reentrant = report.reentrant,
                        "call queue drained"
                    ),
                    Err(err) => {
                        {
                            let mut core = self.inner.core.lock();
                            core.state = LifecycleState::Failed;
                            core.last_error = Some(err.to_string());
                        }
                        error!(integration = %self.name(), error = %err, "integration failed during drain");
                        self.emit(LifecycleEventKind::Error, Some(err.to_string()));
                    }
                }
            }
            Err(err) => {
                let discarded = self.inner.queue.close();
                warn!(
                    integration = %self.name(),
                    error = %err,
                    discarded,
                    "integration failed, queued calls discarded"
                );
                self.emit(LifecycleEventKind::Error, Some(err.to_string()));
            }
        }
    }

    fn dispatch(&self, record: CallRecord) {
        let inner = &self.inner;
        let calls = match inner.mapping.map(&record.call, &inner.options) {
            Ok(calls) => calls,
            Err(e) => {
                metrics::counter!("tags.mapping.failed").increment(1);
                warn!(integration = %self.name(), method = %record.method(), error = %e, "vendor mapping failed");
                return;
            }
        };

        metrics::counter!("tags.calls.dispatched").increment(1);
        debug!(
            integration = %self.name(),
            method = %record.method(),
            record = %record.id,
            vendor_calls = calls.len(),
            "dispatching call"
        );
        for call in &calls {
            if let Err(e) = inner.env.invoke(call) {
                warn!(integration = %self.name(), target = %call.target, error = %e, "vendor invocation failed");
            }
        }
    }

    fn emit(&self, kind: LifecycleEventKind, error: Option<String>) {
        let event = make_event(kind, self.name(), self.id(), error);
        self.inner.listeners.emit(&event);
        let sink = self.inner.sink.read().clone();
        sink.emit(event);
    }
}
