//! Registry guard: answers "are this integration's globals present?" and
//! snapshots/restores them for test teardown.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::descriptor::IntegrationDescriptor;
use crate::environment::Environment;

/// Captured values of a descriptor's globals. `None` means the symbol was
/// undefined when captured.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSnapshot {
    entries: Vec<(String, Option<Value>)>,
}

impl GlobalSnapshot {
    pub fn entries(&self) -> &[(String, Option<Value>)] {
        &self.entries
    }
}

#[derive(Clone)]
pub struct RegistryGuard {
    env: Arc<dyn Environment>,
}

impl RegistryGuard {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self { env }
    }

    /// True iff the vendor library behind the descriptor's default tag has
    /// loaded. See [`is_present_for`](Self::is_present_for).
    pub fn is_present(&self, descriptor: &IntegrationDescriptor) -> bool {
        self.is_present_for(descriptor, None)
    }

    /// True iff every presence path for `tag` resolves to a non-null value.
    /// A descriptor with nothing to check can never be detected, so it is
    /// never considered present.
    pub fn is_present_for(&self, descriptor: &IntegrationDescriptor, tag: Option<&str>) -> bool {
        let paths = descriptor.presence(tag);
        !paths.is_empty() && paths.iter().all(|path| self.resolves(path))
    }

    fn resolves(&self, path: &str) -> bool {
        let mut fields = path.split('.');
        let Some(root) = fields.next().and_then(|root| self.env.global(root)) else {
            return false;
        };
        let mut node = &root;
        for field in fields {
            match node.get(field) {
                Some(next) => node = next,
                None => return false,
            }
        }
        !node.is_null()
    }

    pub fn capture(&self, descriptor: &IntegrationDescriptor) -> GlobalSnapshot {
        GlobalSnapshot {
            entries: descriptor
                .globals()
                .iter()
                .map(|name| (name.clone(), self.env.global(name)))
                .collect(),
        }
    }

    pub fn restore(&self, snapshot: &GlobalSnapshot) {
        for (name, value) in &snapshot.entries {
            match value {
                Some(value) => self.env.set_global(name, value.clone()),
                None => self.env.remove_global(name),
            }
        }
        debug!(globals = snapshot.entries.len(), "globals restored");
    }

    /// Remove every global the descriptor declares.
    pub fn wipe(&self, descriptor: &IntegrationDescriptor) {
        for name in descriptor.globals() {
            self.env.remove_global(name);
        }
    }
}
