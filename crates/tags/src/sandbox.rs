//! In-memory environment for tests and dry runs.
//!
//! Globals live in a map, injected tags are recorded instead of fetched,
//! load/error events and vendor callbacks are fired by hand, and timers run
//! on a virtual clock advanced with [`SandboxEnvironment::advance`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use campaign_core::{RenderedTag, VendorCall};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::environment::{Environment, TimerId, TimerTask};
use crate::loader::LoadSignal;

type InvokeHook = Arc<dyn Fn(&VendorCall) + Send + Sync>;

struct Timer {
    due: Duration,
    task: TimerTask,
}

#[derive(Default)]
struct SandboxState {
    globals: HashMap<String, Value>,
    injected: Vec<RenderedTag>,
    scripts: Vec<(String, LoadSignal)>,
    vendor_waiters: HashMap<String, Vec<LoadSignal>>,
    defines_on_load: Vec<(String, String, Value)>,
    timers: BTreeMap<TimerId, Timer>,
    next_timer: u64,
    now: Duration,
    invocations: Vec<VendorCall>,
    hooks: HashMap<String, InvokeHook>,
    fail_injections: bool,
    strict_invoke: bool,
}

#[derive(Default)]
pub struct SandboxEnvironment {
    state: Mutex<SandboxState>,
}

impl SandboxEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// When a script whose src contains `src_fragment` fires its load
    /// event, define `global` first, the way the real vendor script would.
    pub fn defines_on_load(&self, src_fragment: &str, global: &str, value: Value) {
        self.state.lock().defines_on_load.push((
            src_fragment.to_string(),
            global.to_string(),
            value,
        ));
    }

    /// Make every subsequent `inject` fail, as if there were no document.
    pub fn fail_injections(&self, fail: bool) {
        self.state.lock().fail_injections = fail;
    }

    /// Reject calls through a global that is not defined yet, the way a
    /// browser throws on `ga(...)` before the stub exists.
    pub fn strict_invoke(&self, strict: bool) {
        self.state.lock().strict_invoke = strict;
    }

    pub fn injected(&self) -> Vec<RenderedTag> {
        self.state.lock().injected.clone()
    }

    /// Fire the load event of every injected script whose src contains
    /// `src_fragment`. Returns how many scripts matched.
    pub fn fire_load(&self, src_fragment: &str) -> usize {
        let signals = {
            let mut state = self.state.lock();
            let matched: Vec<(String, LoadSignal)> = state
                .scripts
                .iter()
                .filter(|(src, _)| src.contains(src_fragment))
                .cloned()
                .collect();
            let defines: Vec<(String, Value)> = state
                .defines_on_load
                .iter()
                .filter(|(fragment, _, _)| {
                    matched.iter().any(|(src, _)| src.contains(fragment.as_str()))
                })
                .map(|(_, global, value)| (global.clone(), value.clone()))
                .collect();
            for (global, value) in defines {
                state.globals.insert(global, value);
            }
            matched
                .into_iter()
                .map(|(_, signal)| signal)
                .collect::<Vec<_>>()
        };
        debug!(src_fragment, matched = signals.len(), "sandbox load event");
        for signal in &signals {
            signal.script_loaded();
        }
        signals.len()
    }

    /// Fire the error event of every injected script whose src contains
    /// `src_fragment`.
    pub fn fire_error(&self, src_fragment: &str, reason: &str) -> usize {
        let signals = matching(&self.state.lock().scripts, src_fragment);
        for signal in &signals {
            signal.script_failed(reason);
        }
        signals.len()
    }

    /// Invoke a vendor ready callback registered under `callback`.
    pub fn fire_vendor_ready(&self, callback: &str) -> usize {
        let signals = self
            .state
            .lock()
            .vendor_waiters
            .get(callback)
            .cloned()
            .unwrap_or_default();
        for signal in &signals {
            signal.vendor_ready();
        }
        signals.len()
    }

    /// Advance the virtual clock, running every timer that falls due in
    /// deadline order.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;
        loop {
            let next = {
                let mut state = self.state.lock();
                let due = state
                    .timers
                    .iter()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(id, t)| (t.due, **id))
                    .map(|(id, _)| *id);
                match due.and_then(|id| state.timers.remove(&id)) {
                    Some(timer) => {
                        state.now = timer.due;
                        Some(timer.task)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match next {
                Some(task) => task(),
                None => break,
            }
        }
    }

    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub fn invocations(&self) -> Vec<VendorCall> {
        self.state.lock().invocations.clone()
    }

    pub fn invocations_of(&self, target: &str) -> Vec<VendorCall> {
        self.state
            .lock()
            .invocations
            .iter()
            .filter(|c| c.target == target)
            .cloned()
            .collect()
    }

    /// Run `hook` whenever `target` is invoked, after the call is recorded.
    pub fn on_invoke(&self, target: &str, hook: impl Fn(&VendorCall) + Send + Sync + 'static) {
        self.state
            .lock()
            .hooks
            .insert(target.to_string(), Arc::new(hook));
    }

    /// Wipe all globals, injected tags, pending signals, timers and
    /// recorded invocations.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let now = state.now;
        *state = SandboxState {
            now,
            ..SandboxState::default()
        };
    }
}

fn matching(scripts: &[(String, LoadSignal)], src_fragment: &str) -> Vec<LoadSignal> {
    scripts
        .iter()
        .filter(|(src, _)| src.contains(src_fragment))
        .map(|(_, signal)| signal.clone())
        .collect()
}

/// Apply `root.a.b = value` to the globals map. Intermediate objects must
/// already exist. Stubs leave a defined target alone.
fn assign(globals: &mut HashMap<String, Value>, call: &VendorCall) -> anyhow::Result<()> {
    let value = call.args.first().cloned().unwrap_or(Value::Null);
    let mut path = call.target.split('.');
    let root = path.next().unwrap_or_default();
    let fields: Vec<&str> = path.collect();
    let Some((last, parents)) = fields.split_last() else {
        if call.keep_existing && globals.get(root).is_some_and(|v| !v.is_null()) {
            return Ok(());
        }
        globals.insert(root.to_string(), value);
        return Ok(());
    };

    let mut node = globals
        .get_mut(root)
        .ok_or_else(|| anyhow!("cannot assign {}: '{root}' is undefined", call.target))?;
    for field in parents {
        node = node
            .get_mut(*field)
            .ok_or_else(|| anyhow!("cannot assign {}: '{field}' is undefined", call.target))?;
    }
    match node.as_object_mut() {
        Some(object) => {
            if !(call.keep_existing && object.get(*last).is_some_and(|v| !v.is_null())) {
                object.insert((*last).to_string(), value);
            }
            Ok(())
        }
        None => Err(anyhow!("cannot assign {}: parent is not an object", call.target)),
    }
}

impl Environment for SandboxEnvironment {
    fn global(&self, name: &str) -> Option<Value> {
        self.state.lock().globals.get(name).cloned()
    }

    fn set_global(&self, name: &str, value: Value) {
        self.state.lock().globals.insert(name.to_string(), value);
    }

    fn remove_global(&self, name: &str) {
        self.state.lock().globals.remove(name);
    }

    fn inject(&self, tag: &RenderedTag, signal: LoadSignal) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_injections {
            return Err(anyhow!("no document to inject <{}> into", tag.kind.as_str()));
        }
        state.injected.push(tag.clone());
        if let Some(src) = tag.src() {
            state.scripts.push((src.to_string(), signal));
        }
        Ok(())
    }

    fn on_vendor_ready(&self, callback: &str, signal: LoadSignal) {
        self.state
            .lock()
            .vendor_waiters
            .entry(callback.to_string())
            .or_default()
            .push(signal);
    }

    fn set_timeout(&self, after: Duration, task: TimerTask) -> TimerId {
        let mut state = self.state.lock();
        state.next_timer += 1;
        let id = TimerId(state.next_timer);
        let due = state.now + after;
        state.timers.insert(id, Timer { due, task });
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        self.state.lock().timers.remove(&id);
    }

    fn invoke(&self, call: &VendorCall) -> anyhow::Result<()> {
        let hook = {
            let mut state = self.state.lock();
            if call.assign {
                assign(&mut state.globals, call)?;
            } else if state.strict_invoke && !state.globals.contains_key(call.root()) {
                return Err(anyhow!("{} is not defined", call.root()));
            }
            state.invocations.push(call.clone());
            state.hooks.get(&call.target).cloned()
        };
        if let Some(hook) = hook {
            hook(call);
        }
        Ok(())
    }
}
