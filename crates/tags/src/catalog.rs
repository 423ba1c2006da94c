//! Catalog of known vendor adaptors, keyed by integration name.

use std::sync::Arc;

use campaign_core::config::AppConfig;
use campaign_core::{TagError, TagResult};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::info;

use crate::descriptor::IntegrationDescriptor;
use crate::environment::Environment;
use crate::lifecycle::Integration;
use crate::mapping::VendorMapping;

#[derive(Clone)]
pub struct CatalogEntry {
    pub descriptor: Arc<IntegrationDescriptor>,
    pub mapping: Arc<dyn VendorMapping>,
}

#[derive(Default)]
pub struct Catalog {
    entries: DashMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        descriptor: IntegrationDescriptor,
        mapping: Arc<dyn VendorMapping>,
    ) -> TagResult<()> {
        let name = descriptor.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(TagError::Descriptor(format!(
                "integration '{name}' is already registered"
            )));
        }
        info!(integration = %name, globals = descriptor.globals().len(), "registered integration");
        self.entries.insert(
            name,
            CatalogEntry {
                descriptor: Arc::new(descriptor),
                mapping,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<CatalogEntry> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// Registered integration names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create a fresh, idle instance of `name` configured with `settings`.
    pub fn instantiate(
        &self,
        name: &str,
        settings: &Map<String, Value>,
        env: Arc<dyn Environment>,
        config: &AppConfig,
    ) -> TagResult<Integration> {
        let entry = self
            .get(name)
            .ok_or_else(|| TagError::UnknownIntegration(name.to_string()))?;
        Ok(Integration::new(
            entry.descriptor,
            entry.mapping,
            settings,
            env,
            config,
        ))
    }
}
