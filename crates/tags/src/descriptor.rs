//! Integration descriptors: the static declaration every vendor adaptor
//! provides: name, owned globals, option defaults, tag templates, and how the
//! vendor signals that its script is ready.

use std::time::Duration;

use campaign_core::{TagError, TagResult, TagTemplate};
use campaign_core::types::ResolvedOptions;
use serde_json::{Map, Value};
use tracing::debug;

/// Where the Tag Loader takes its settlement from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSource {
    /// The injected tag's own load/error events.
    ScriptLoad,
    /// A callback the vendor script invokes once it has bootstrapped. The
    /// tag's load event is ignored; its error event still fails the load.
    VendorCallback { callback: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub name: String,
    pub default: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedTag {
    pub name: String,
    pub template: TagTemplate,
    /// Symbols the library behind this tag defines once it has run.
    pub presence: Vec<String>,
}

/// Immutable per-vendor definition. Compare two descriptors with `==` to
/// check an adaptor's declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationDescriptor {
    name: String,
    globals: Vec<String>,
    presence: Vec<String>,
    options: Vec<OptionSpec>,
    tags: Vec<NamedTag>,
    assumes_pageview: bool,
    completion: CompletionSource,
    load_timeout: Option<Duration>,
}

impl IntegrationDescriptor {
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            globals: Vec::new(),
            presence: Vec::new(),
            options: Vec::new(),
            tags: Vec::new(),
            tag_presence: Vec::new(),
            assumes_pageview: false,
            completion: CompletionSource::ScriptLoad,
            load_timeout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn globals(&self) -> &[String] {
        &self.globals
    }

    /// Dotted paths that prove the vendor library for `tag` has loaded.
    /// Tag-level paths win over descriptor-level ones; with neither, every
    /// owned global must be present.
    pub fn presence(&self, tag: Option<&str>) -> &[String] {
        match self.tag(tag) {
            Some(named) if !named.presence.is_empty() => &named.presence,
            _ if !self.presence.is_empty() => &self.presence,
            _ => &self.globals,
        }
    }

    pub fn options(&self) -> &[OptionSpec] {
        &self.options
    }

    pub fn tags(&self) -> &[NamedTag] {
        &self.tags
    }

    /// Tag by name, or the first declared tag when `name` is `None`.
    pub fn tag(&self, name: Option<&str>) -> Option<&NamedTag> {
        match name {
            Some(name) => self.tags.iter().find(|t| t.name == name),
            None => self.tags.first(),
        }
    }

    pub fn assumes_pageview(&self) -> bool {
        self.assumes_pageview
    }

    pub fn completion(&self) -> &CompletionSource {
        &self.completion
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout
    }

    /// Option defaults overridden by `settings`. Keys the descriptor does not
    /// declare are kept so vendor mappings can still read them.
    pub fn resolve_options(&self, settings: &Map<String, Value>) -> ResolvedOptions {
        let mut resolved: Map<String, Value> = self
            .options
            .iter()
            .map(|o| (o.name.clone(), o.default.clone()))
            .collect();
        for (key, value) in settings {
            if !self.options.iter().any(|o| &o.name == key) {
                debug!(integration = %self.name, option = %key, "undeclared option passed through");
            }
            resolved.insert(key.clone(), value.clone());
        }
        ResolvedOptions::new(resolved)
    }
}

pub struct DescriptorBuilder {
    name: String,
    globals: Vec<String>,
    presence: Vec<String>,
    options: Vec<(String, Value)>,
    tags: Vec<(String, String)>,
    tag_presence: Vec<(String, String)>,
    assumes_pageview: bool,
    completion: CompletionSource,
    load_timeout: Option<Duration>,
}

impl DescriptorBuilder {
    /// Declare a global symbol the integration owns. Duplicates collapse.
    pub fn global(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.globals.contains(&name) {
            self.globals.push(name);
        }
        self
    }

    /// Declare a symbol (e.g. `_pa.track`) that only the loaded vendor
    /// library defines, as opposed to the pre-load stub.
    pub fn loaded_when(mut self, path: impl Into<String>) -> Self {
        self.presence.push(path.into());
        self
    }

    /// Like [`loaded_when`](Self::loaded_when), for one named tag.
    pub fn tag_loaded_when(mut self, tag: impl Into<String>, path: impl Into<String>) -> Self {
        self.tag_presence.push((tag.into(), path.into()));
        self
    }

    pub fn option(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.options.push((name.into(), default.into()));
        self
    }

    /// Declare the integration's default tag.
    pub fn tag(self, template: impl Into<String>) -> Self {
        self.named_tag("library", template)
    }

    pub fn named_tag(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.tags.push((name.into(), template.into()));
        self
    }

    /// The vendor tag records a page view by itself once loaded.
    pub fn assumes_pageview(mut self) -> Self {
        self.assumes_pageview = true;
        self
    }

    pub fn ready_on_load(mut self) -> Self {
        self.completion = CompletionSource::ScriptLoad;
        self
    }

    pub fn ready_on_callback(mut self, callback: impl Into<String>) -> Self {
        self.completion = CompletionSource::VendorCallback {
            callback: callback.into(),
        };
        self
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> TagResult<IntegrationDescriptor> {
        if self.name.trim().is_empty() {
            return Err(TagError::Descriptor("integration name must not be empty".into()));
        }

        let mut options: Vec<OptionSpec> = Vec::with_capacity(self.options.len());
        for (name, default) in self.options {
            if options.iter().any(|o| o.name == name) {
                return Err(TagError::Descriptor(format!(
                    "{}: option '{name}' declared twice",
                    self.name
                )));
            }
            options.push(OptionSpec { name, default });
        }

        let mut tags: Vec<NamedTag> = Vec::with_capacity(self.tags.len());
        for (tag_name, source) in self.tags {
            if tags.iter().any(|t| t.name == tag_name) {
                return Err(TagError::Descriptor(format!(
                    "{}: tag '{tag_name}' declared twice",
                    self.name
                )));
            }
            let template = TagTemplate::parse(&source)?;
            if let Some(missing) = template
                .placeholders()
                .iter()
                .find(|p| !options.iter().any(|o| &o.name == *p))
            {
                return Err(TagError::Descriptor(format!(
                    "{}: tag '{tag_name}' references undeclared option '{missing}'",
                    self.name
                )));
            }
            tags.push(NamedTag {
                name: tag_name,
                template,
                presence: Vec::new(),
            });
        }

        for (tag_name, path) in self.tag_presence {
            let Some(named) = tags.iter_mut().find(|t| t.name == tag_name) else {
                return Err(TagError::Descriptor(format!(
                    "{}: presence declared for unknown tag '{tag_name}'",
                    self.name
                )));
            };
            named.presence.push(path);
        }

        if let Some(empty) = self
            .presence
            .iter()
            .chain(tags.iter().flat_map(|t| &t.presence))
            .find(|p| p.split('.').any(str::is_empty))
        {
            return Err(TagError::Descriptor(format!(
                "{}: invalid presence path '{empty}'",
                self.name
            )));
        }

        if let CompletionSource::VendorCallback { callback } = &self.completion {
            if callback.trim().is_empty() {
                return Err(TagError::Descriptor(format!(
                    "{}: vendor callback name must not be empty",
                    self.name
                )));
            }
        }

        Ok(IntegrationDescriptor {
            name: self.name,
            globals: self.globals,
            presence: self.presence,
            options,
            tags,
            assumes_pageview: self.assumes_pageview,
            completion: self.completion,
            load_timeout: self.load_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn perfect_audience() -> IntegrationDescriptor {
        IntegrationDescriptor::builder("Perfect Audience")
            .assumes_pageview()
            .global("_pa")
            .option("siteId", "")
            .tag(r#"<script src="//tag.perfectaudience.com/serve/{{ siteId }}.js">"#)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_settings() {
        let descriptor = perfect_audience();
        assert_eq!(descriptor.name(), "Perfect Audience");
        assert!(descriptor.assumes_pageview());
        assert_eq!(descriptor.globals(), ["_pa".to_string()]);
        assert_eq!(descriptor.options()[0].default, json!(""));
        assert_eq!(descriptor.completion(), &CompletionSource::ScriptLoad);
        assert_eq!(descriptor.tag(None).unwrap().name, "library");
    }

    #[test]
    fn test_descriptors_compare_by_declaration() {
        assert_eq!(perfect_audience(), perfect_audience());

        let without_pageview = IntegrationDescriptor::builder("Perfect Audience")
            .global("_pa")
            .option("siteId", "")
            .tag(r#"<script src="//tag.perfectaudience.com/serve/{{ siteId }}.js">"#)
            .build()
            .unwrap();
        assert_ne!(perfect_audience(), without_pageview);
    }

    #[test]
    fn test_globals_are_an_ordered_set() {
        let descriptor = IntegrationDescriptor::builder("Google Analytics")
            .global("ga")
            .global("_gaq")
            .global("ga")
            .global("GoogleAnalyticsObject")
            .build()
            .unwrap();
        assert_eq!(
            descriptor.globals(),
            ["ga".to_string(), "_gaq".to_string(), "GoogleAnalyticsObject".to_string()]
        );
    }

    #[test]
    fn test_resolve_options_overrides_defaults() {
        let descriptor = IntegrationDescriptor::builder("Google Analytics")
            .option("anonymizeIp", false)
            .option("domain", "none")
            .option("siteSpeedSampleRate", Value::Null)
            .build()
            .unwrap();
        let settings = json!({"anonymizeIp": true, "trackingId": "UA-1"});
        let resolved = descriptor.resolve_options(settings.as_object().unwrap());

        assert!(resolved.bool("anonymizeIp"));
        assert_eq!(resolved.str("domain"), Some("none"));
        assert!(resolved.get("siteSpeedSampleRate").is_none());
        assert_eq!(resolved.str("trackingId"), Some("UA-1"));
    }

    #[test]
    fn test_build_validation() {
        assert!(IntegrationDescriptor::builder("  ").build().is_err());
        assert!(IntegrationDescriptor::builder("X")
            .option("a", 1)
            .option("a", 2)
            .build()
            .is_err());
        assert!(IntegrationDescriptor::builder("X")
            .tag(r#"<script src="//x.com/{{ apiKey }}.js">"#)
            .build()
            .is_err());
        assert!(IntegrationDescriptor::builder("X")
            .option("apiKey", "")
            .tag(r#"<script src="//x.com/{{ apiKey }}.js">"#)
            .tag(r#"<script src="//y.com/{{ apiKey }}.js">"#)
            .build()
            .is_err());
        assert!(IntegrationDescriptor::builder("X")
            .ready_on_callback("")
            .build()
            .is_err());
    }

    #[test]
    fn test_presence_is_separate_from_owned_globals() {
        let descriptor = IntegrationDescriptor::builder("Google Analytics")
            .global("ga")
            .global("_gaq")
            .named_tag("universal", r#"<script src="//www.google-analytics.com/analytics.js">"#)
            .named_tag("classic", r#"<script src="//www.google-analytics.com/ga.js">"#)
            .tag_loaded_when("universal", "gaplugins")
            .tag_loaded_when("classic", "_gat")
            .build()
            .unwrap();
        assert_eq!(descriptor.presence(None), ["gaplugins".to_string()]);
        assert_eq!(descriptor.presence(Some("classic")), ["_gat".to_string()]);
        assert_eq!(descriptor.globals().len(), 2);

        let pixel = IntegrationDescriptor::builder("Pixel")
            .global("_px")
            .loaded_when("_px.track")
            .build()
            .unwrap();
        assert_eq!(pixel.presence(None), ["_px.track".to_string()]);
        assert_eq!(perfect_audience().presence(None), ["_pa".to_string()]);

        assert!(IntegrationDescriptor::builder("X")
            .tag_loaded_when("missing", "x")
            .build()
            .is_err());
        assert!(IntegrationDescriptor::builder("X")
            .loaded_when("x..y")
            .build()
            .is_err());
    }

    #[test]
    fn test_named_tags_lookup() {
        let descriptor = IntegrationDescriptor::builder("Google Analytics")
            .named_tag("universal", r#"<script src="//www.google-analytics.com/analytics.js">"#)
            .named_tag("classic", r#"<script src="//www.google-analytics.com/ga.js">"#)
            .build()
            .unwrap();
        assert_eq!(descriptor.tag(None).unwrap().name, "universal");
        assert_eq!(descriptor.tag(Some("classic")).unwrap().name, "classic");
        assert!(descriptor.tag(Some("missing")).is_none());
    }
}
