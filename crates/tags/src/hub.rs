//! Analytics hub: drives a set of integrations as one.
//!
//! Every public call fans out to each configured integration, which queues or
//! dispatches it independently. A failing vendor never blocks the others;
//! `on_ready` callbacks run once every integration has settled either way.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use campaign_core::config::AppConfig;
use campaign_core::event_bus::{noop_sink, EventSink, LifecycleEventKind};
use campaign_core::{Call, TagError, TagResult};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::emitter::ListenerId;
use crate::environment::Environment;
use crate::lifecycle::{InitOutcome, Integration, LifecycleState, ResetGlobals};

type ReadyCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Readiness {
    initialized: AtomicBool,
    fired: AtomicBool,
    pending: Mutex<HashSet<Uuid>>,
    callbacks: Mutex<Vec<ReadyCallback>>,
}

impl Readiness {
    fn settled(&self, id: Uuid) {
        self.pending.lock().remove(&id);
        self.maybe_fire();
    }

    fn maybe_fire(&self) {
        if !self.initialized.load(Ordering::Acquire) || !self.pending.lock().is_empty() {
            return;
        }
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        debug!(callbacks = callbacks.len(), "all integrations settled");
        for callback in callbacks {
            callback();
        }
    }
}

pub struct Analytics {
    env: Arc<dyn Environment>,
    config: AppConfig,
    catalog: Arc<Catalog>,
    integrations: RwLock<Vec<Integration>>,
    readiness: Arc<Readiness>,
    watchers: Mutex<Vec<(Integration, ListenerId)>>,
    sink: Arc<dyn EventSink>,
}

impl Analytics {
    pub fn new(catalog: Arc<Catalog>, env: Arc<dyn Environment>, config: AppConfig) -> Self {
        Self {
            env,
            config,
            catalog,
            integrations: RwLock::new(Vec::new()),
            readiness: Arc::new(Readiness::default()),
            watchers: Mutex::new(Vec::new()),
            sink: noop_sink(),
        }
    }

    /// Forward lifecycle events of every integration added from now on to
    /// `sink`.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Add an already-built integration.
    pub fn add(&self, integration: Integration) {
        integration.set_event_sink(self.sink.clone());
        self.integrations.write().push(integration);
    }

    /// Instantiate `name` from the catalog with `settings` and add it.
    pub fn configure(&self, name: &str, settings: &Map<String, Value>) -> TagResult<Integration> {
        if self.get(name).is_some() {
            return Err(TagError::Descriptor(format!(
                "integration '{name}' is already configured"
            )));
        }
        let integration = self
            .catalog
            .instantiate(name, settings, self.env.clone(), &self.config)?;
        self.add(integration.clone());
        Ok(integration)
    }

    /// Configure every integration named in `settings` (name to settings
    /// object) and initialize them all.
    pub fn initialize_with(&self, settings: &Map<String, Value>) -> TagResult<()> {
        for (name, value) in settings {
            let vendor_settings = match value {
                Value::Object(map) => map.clone(),
                Value::Null | Value::Bool(true) => Map::new(),
                other => {
                    return Err(TagError::Config(format!(
                        "settings for '{name}' must be an object, got {other}"
                    )))
                }
            };
            self.configure(name, &vendor_settings)?;
        }
        self.initialize();
        Ok(())
    }

    /// Initialize every configured integration that has not been initialized
    /// yet. Integrations configured after `on_ready` fired reopen readiness
    /// until they settle too.
    pub fn initialize(&self) {
        let fresh: Vec<Integration> = self
            .integrations()
            .into_iter()
            .filter(|i| i.state() == LifecycleState::Idle)
            .collect();
        info!(integrations = fresh.len(), "initializing analytics");

        if !fresh.is_empty() {
            self.readiness
                .pending
                .lock()
                .extend(fresh.iter().map(|i| i.id()));
            self.readiness.fired.store(false, Ordering::Release);
        }
        self.readiness.initialized.store(true, Ordering::Release);

        for integration in &fresh {
            self.watch(integration);
            let outcome = integration.initialize();
            debug!(integration = %integration.name(), ?outcome, "integration initialize");
            if outcome == InitOutcome::Failed {
                warn!(
                    integration = %integration.name(),
                    error = %integration.last_error().unwrap_or_default(),
                    "integration failed to initialize"
                );
            }
            if matches!(integration.state(), LifecycleState::Ready | LifecycleState::Failed) {
                self.readiness.settled(integration.id());
            }
        }
        self.readiness.maybe_fire();
    }

    /// Run `callback` once every integration has settled. Runs immediately
    /// if that has already happened.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        if self.readiness.fired.load(Ordering::Acquire) {
            callback();
            return;
        }
        self.readiness.callbacks.lock().push(Box::new(callback));
        self.readiness.maybe_fire();
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.fired.load(Ordering::Acquire)
    }

    pub fn track(&self, event: &str, properties: Map<String, Value>) {
        self.fan_out(Call::track(event, properties));
    }

    pub fn page(
        &self,
        category: Option<String>,
        name: Option<String>,
        properties: Map<String, Value>,
    ) {
        self.fan_out(Call::Page {
            category,
            name,
            properties,
            initial: false,
        });
    }

    pub fn identify(&self, user_id: Option<String>, traits: Map<String, Value>) {
        self.fan_out(Call::identify(user_id, traits));
    }

    pub fn group(&self, group_id: &str, traits: Map<String, Value>) {
        self.fan_out(Call::Group {
            group_id: group_id.to_string(),
            traits,
        });
    }

    pub fn alias(&self, to: &str, from: Option<String>) {
        self.fan_out(Call::Alias {
            to: to.to_string(),
            from,
        });
    }

    pub fn get(&self, name: &str) -> Option<Integration> {
        self.integrations
            .read()
            .iter()
            .find(|i| i.name() == name)
            .cloned()
    }

    pub fn integrations(&self) -> Vec<Integration> {
        self.integrations.read().clone()
    }

    /// Reset every integration and forget readiness. Pending `on_ready`
    /// callbacks are dropped.
    pub fn reset(&self, globals: ResetGlobals) {
        for (integration, id) in self.watchers.lock().drain(..) {
            integration.off(id);
        }
        for integration in self.integrations() {
            integration.reset(globals);
        }
        self.readiness.initialized.store(false, Ordering::Release);
        self.readiness.fired.store(false, Ordering::Release);
        self.readiness.pending.lock().clear();
        self.readiness.callbacks.lock().clear();
        debug!(?globals, "analytics reset");
    }

    fn watch(&self, integration: &Integration) {
        let mut watchers = self.watchers.lock();
        for kind in [LifecycleEventKind::Ready, LifecycleEventKind::Error] {
            let readiness = self.readiness.clone();
            let id = integration.once(kind, move |event| readiness.settled(event.instance_id));
            watchers.push((integration.clone(), id));
        }
    }

    fn fan_out(&self, call: Call) {
        // Snapshot so integrations can call back into the hub while dispatching.
        for integration in self.integrations() {
            integration.call(call.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::IntegrationDescriptor;
    use crate::mapping::VendorMapping;
    use crate::sandbox::SandboxEnvironment;
    use campaign_core::event_bus::capture_sink;
    use campaign_core::{ResolvedOptions, VendorCall};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn tracking(root: &'static str) -> Arc<dyn VendorMapping> {
        Arc::new(move |call: &Call, _: &ResolvedOptions| -> TagResult<Vec<VendorCall>> {
            Ok(match call {
                Call::Track { event, .. } => {
                    vec![VendorCall::new(format!("{root}.track"), vec![json!(event)])]
                }
                _ => Vec::new(),
            })
        })
    }

    fn catalog() -> Arc<Catalog> {
        let catalog = Catalog::new();
        catalog
            .register(
                IntegrationDescriptor::builder("Alpha")
                    .global("alpha")
                    .option("key", "")
                    .tag(r#"<script src="https://alpha.example.com/{{ key }}.js">"#)
                    .build()
                    .unwrap(),
                tracking("alpha"),
            )
            .unwrap();
        catalog
            .register(
                IntegrationDescriptor::builder("Beta")
                    .global("beta")
                    .tag(r#"<script src="https://beta.example.com/lib.js">"#)
                    .build()
                    .unwrap(),
                tracking("beta"),
            )
            .unwrap();
        Arc::new(catalog)
    }

    fn settings() -> Map<String, Value> {
        json!({"Alpha": {"key": "a1"}, "Beta": {}})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fan_out_and_ready_after_all_settle() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = Analytics::new(catalog(), env.clone(), AppConfig::default());
        let (ready, callback) = counter();
        analytics.on_ready(callback);

        analytics.initialize_with(&settings()).unwrap();
        analytics.track("Signed Up", Map::new());
        assert_eq!(env.injected().len(), 2);

        env.fire_load("alpha.example.com");
        assert_eq!(ready.load(Ordering::SeqCst), 0);
        assert_eq!(env.invocations_of("alpha.track").len(), 1);
        assert_eq!(env.invocations_of("beta.track").len(), 0);

        env.fire_load("beta.example.com");
        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert!(analytics.is_ready());
        assert_eq!(env.invocations_of("beta.track").len(), 1);

        analytics.track("Upgraded", Map::new());
        assert_eq!(env.invocations_of("alpha.track").len(), 2);
        assert_eq!(env.invocations_of("beta.track").len(), 2);
    }

    #[test]
    fn test_calls_before_initialize_are_replayed() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = Analytics::new(catalog(), env.clone(), AppConfig::default());
        analytics.configure("Alpha", &Map::new()).unwrap();
        analytics.track("Early", Map::new());
        analytics.initialize();
        env.fire_load("alpha.example.com");

        let alpha = analytics.get("Alpha").unwrap();
        assert_eq!(alpha.state(), LifecycleState::Ready);
        assert_eq!(env.invocations_of("alpha.track").len(), 1);
    }

    #[test]
    fn test_failure_does_not_block_others() {
        let env = Arc::new(SandboxEnvironment::new());
        let sink = capture_sink();
        let analytics =
            Analytics::new(catalog(), env.clone(), AppConfig::default()).with_event_sink(sink.clone());
        let (ready, callback) = counter();

        analytics.track("Checkout", Map::new());
        analytics.initialize_with(&settings()).unwrap();
        analytics.on_ready(callback);
        env.fire_error("alpha.example.com", "blocked");
        env.fire_load("beta.example.com");

        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert_eq!(analytics.get("Alpha").unwrap().state(), LifecycleState::Failed);
        assert_eq!(env.invocations_of("alpha.track").len(), 0);
        assert_eq!(env.invocations_of("beta.track").len(), 1);
        assert_eq!(sink.count_kind(LifecycleEventKind::Error), 1);
        assert_eq!(sink.count_kind(LifecycleEventKind::Ready), 1);
    }

    #[test]
    fn test_ready_immediately_with_no_integrations() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = Analytics::new(catalog(), env, AppConfig::default());
        let (ready, callback) = counter();
        analytics.on_ready(callback);
        assert_eq!(ready.load(Ordering::SeqCst), 0);

        analytics.initialize();
        assert_eq!(ready.load(Ordering::SeqCst), 1);

        let (late, callback) = counter();
        analytics.on_ready(callback);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initialize_again_does_not_rewatch() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = Analytics::new(catalog(), env.clone(), AppConfig::default());
        analytics.initialize_with(&settings()).unwrap();
        assert_eq!(analytics.watchers.lock().len(), 4);

        env.fire_load("alpha.example.com");
        analytics.initialize();
        analytics.initialize();
        assert_eq!(analytics.watchers.lock().len(), 4);
        assert_eq!(env.injected().len(), 2);

        env.fire_load("beta.example.com");
        assert!(analytics.is_ready());
    }

    #[test]
    fn test_late_integration_reopens_readiness() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = Analytics::new(catalog(), env.clone(), AppConfig::default());
        let (first, callback) = counter();
        analytics.on_ready(callback);
        analytics.configure("Alpha", &Map::new()).unwrap();
        analytics.initialize();
        env.fire_load("alpha.example.com");
        assert!(analytics.is_ready());
        assert_eq!(first.load(Ordering::SeqCst), 1);

        analytics.configure("Beta", &Map::new()).unwrap();
        analytics.initialize();
        assert!(!analytics.is_ready());
        let (second, callback) = counter();
        analytics.on_ready(callback);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        env.fire_load("beta.example.com");
        assert!(analytics.is_ready());
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(first.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_configure_errors() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = Analytics::new(catalog(), env, AppConfig::default());
        assert!(matches!(
            analytics.configure("Gamma", &Map::new()).err().unwrap(),
            TagError::UnknownIntegration(_)
        ));
        analytics.configure("Beta", &Map::new()).unwrap();
        assert!(analytics.configure("Beta", &Map::new()).is_err());

        let bad = json!({"Alpha": "a1"}).as_object().cloned().unwrap();
        assert!(matches!(
            analytics.initialize_with(&bad).unwrap_err(),
            TagError::Config(_)
        ));
    }

    #[test]
    fn test_reset_allows_reinitialize() {
        let env = Arc::new(SandboxEnvironment::new());
        let analytics = Analytics::new(catalog(), env.clone(), AppConfig::default());
        analytics.initialize_with(&settings()).unwrap();
        env.fire_load("example.com");
        assert!(analytics.is_ready());

        analytics.reset(ResetGlobals::Wipe);
        assert!(!analytics.is_ready());
        assert_eq!(env.global("alpha"), None);

        let (ready, callback) = counter();
        analytics.on_ready(callback);
        analytics.initialize();
        assert_eq!(ready.load(Ordering::SeqCst), 0);
        env.fire_load("example.com");
        assert_eq!(ready.load(Ordering::SeqCst), 1);
    }
}
