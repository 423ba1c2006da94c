//! The execution environment integrations run against.
//!
//! Everything that touches shared global state (vendor globals, the
//! document, timers) goes through [`Environment`], so the lifecycle core can
//! run unchanged against a browser binding or the in-memory
//! [`SandboxEnvironment`](crate::sandbox::SandboxEnvironment).

use std::time::Duration;

use campaign_core::{RenderedTag, VendorCall};
use serde_json::Value;

use crate::loader::LoadSignal;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

pub type TimerTask = Box<dyn FnOnce() + Send>;

pub trait Environment: Send + Sync {
    /// Current value of a global symbol, if defined.
    fn global(&self, name: &str) -> Option<Value>;

    fn set_global(&self, name: &str, value: Value);

    fn remove_global(&self, name: &str);

    /// Insert a tag into the document. The environment reports the tag's
    /// load/error events through `signal`, as many times as they occur.
    /// Returning an error means the tag could not be inserted at all.
    fn inject(&self, tag: &RenderedTag, signal: LoadSignal) -> anyhow::Result<()>;

    /// Register interest in a vendor's own ready callback, e.g. a function
    /// the vendor script invokes once it has bootstrapped.
    fn on_vendor_ready(&self, callback: &str, signal: LoadSignal);

    fn set_timeout(&self, after: Duration, task: TimerTask) -> TimerId;

    fn clear_timeout(&self, id: TimerId);

    /// Invoke a vendor function.
    fn invoke(&self, call: &VendorCall) -> anyhow::Result<()>;
}
