//! Tag loader: injects a rendered tag and settles exactly once.
//!
//! Every load produces a [`LoadSignal`] that the environment (script events,
//! vendor callbacks) and the timeout timer all report into. The first
//! outcome wins; everything after it is logged and dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use campaign_core::config::LoaderConfig;
use campaign_core::{RenderedTag, TagError, TagResult};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::descriptor::CompletionSource;
use crate::environment::{Environment, TimerId};

pub type SettleFn = Box<dyn FnOnce(TagResult<()>) + Send>;

struct Attempt {
    id: Uuid,
    integration: String,
    completion: CompletionSource,
    settled: AtomicBool,
    on_settle: Mutex<Option<SettleFn>>,
    timer: Mutex<Option<TimerId>>,
    env: Weak<dyn Environment>,
}

/// Completion channel for one load attempt. Cheap to clone; every clone
/// reports into the same attempt.
#[derive(Clone)]
pub struct LoadSignal {
    attempt: Arc<Attempt>,
}

impl LoadSignal {
    /// The tag's load event fired.
    pub fn script_loaded(&self) {
        match &self.attempt.completion {
            CompletionSource::ScriptLoad => self.settle(Ok(()), "script_load"),
            CompletionSource::VendorCallback { callback } => debug!(
                integration = %self.attempt.integration,
                callback = %callback,
                "script loaded, waiting for vendor callback"
            ),
        }
    }

    /// The tag's error event fired.
    pub fn script_failed(&self, reason: impl Into<String>) {
        let err = TagError::LoadError {
            integration: self.attempt.integration.clone(),
            reason: reason.into(),
        };
        self.settle(Err(err), "script_error");
    }

    /// The vendor invoked its ready callback.
    pub fn vendor_ready(&self) {
        self.settle(Ok(()), "vendor_ready");
    }

    /// The vendor reported a failure through its callback convention.
    pub fn vendor_failed(&self, reason: impl Into<String>) {
        let err = TagError::LoadError {
            integration: self.attempt.integration.clone(),
            reason: reason.into(),
        };
        self.settle(Err(err), "vendor_error");
    }

    pub fn is_settled(&self) -> bool {
        self.attempt.settled.load(Ordering::Acquire)
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt.id
    }

    fn timed_out(&self, after: Duration) {
        let err = TagError::LoadTimeout {
            integration: self.attempt.integration.clone(),
            after_ms: after.as_millis() as u64,
        };
        self.settle(Err(err), "timeout");
    }

    fn settle(&self, outcome: TagResult<()>, source: &'static str) {
        let attempt = &self.attempt;
        if attempt.settled.swap(true, Ordering::AcqRel) {
            debug!(
                integration = %attempt.integration,
                attempt = %attempt.id,
                source,
                "late load signal ignored"
            );
            return;
        }

        if let Some(timer) = attempt.timer.lock().take() {
            if let Some(env) = attempt.env.upgrade() {
                env.clear_timeout(timer);
            }
        }

        if let Err(ref err) = outcome {
            metrics::counter!("tags.load.failed").increment(1);
            warn!(integration = %attempt.integration, source, error = %err, "tag load failed");
        } else {
            debug!(integration = %attempt.integration, source, "tag load settled");
        }

        let callback = attempt.on_settle.lock().take();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }
}

/// Handle returned by [`TagLoader::load`].
pub struct LoadAttempt {
    signal: LoadSignal,
}

impl LoadAttempt {
    pub fn id(&self) -> Uuid {
        self.signal.attempt_id()
    }

    pub fn is_settled(&self) -> bool {
        self.signal.is_settled()
    }

    pub fn signal(&self) -> &LoadSignal {
        &self.signal
    }
}

#[derive(Clone)]
pub struct TagLoader {
    env: Arc<dyn Environment>,
    config: LoaderConfig,
}

impl TagLoader {
    pub fn new(env: Arc<dyn Environment>, config: LoaderConfig) -> Self {
        Self { env, config }
    }

    /// Timeout window for a load. A descriptor override wins; otherwise
    /// script-load sources use the configured (possibly absent) window and
    /// vendor-callback sources always get one.
    pub fn timeout_for(
        &self,
        completion: &CompletionSource,
        descriptor_override: Option<Duration>,
    ) -> Option<Duration> {
        descriptor_override.or(match completion {
            CompletionSource::ScriptLoad => self.config.script_timeout(),
            CompletionSource::VendorCallback { .. } => Some(self.config.vendor_callback_timeout()),
        })
    }

    pub fn load(
        &self,
        integration: &str,
        tag: &RenderedTag,
        completion: &CompletionSource,
        timeout: Option<Duration>,
        on_settle: SettleFn,
    ) -> LoadAttempt {
        metrics::counter!("tags.load.started").increment(1);

        let signal = LoadSignal {
            attempt: Arc::new(Attempt {
                id: Uuid::new_v4(),
                integration: integration.to_string(),
                completion: completion.clone(),
                settled: AtomicBool::new(false),
                on_settle: Mutex::new(Some(on_settle)),
                timer: Mutex::new(None),
                env: Arc::downgrade(&self.env),
            }),
        };

        debug!(
            integration,
            attempt = %signal.attempt_id(),
            tag = %tag,
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "injecting tag"
        );

        if let Some(after) = timeout {
            let timer_signal = signal.clone();
            let id = self
                .env
                .set_timeout(after, Box::new(move || timer_signal.timed_out(after)));
            *signal.attempt.timer.lock() = Some(id);
        }

        if let CompletionSource::VendorCallback { callback } = completion {
            self.env.on_vendor_ready(callback, signal.clone());
        }

        match self.env.inject(tag, signal.clone()) {
            Err(e) => signal.script_failed(format!("injection failed: {e}")),
            Ok(()) if tag.is_inline() => signal.script_loaded(),
            Ok(()) => {}
        }

        LoadAttempt { signal }
    }
}
