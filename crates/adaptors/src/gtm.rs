//! Google Tag Manager adaptor: everything becomes a `dataLayer.push`.

use campaign_core::{Call, ResolvedOptions, TagResult, VendorCall};
use campaign_tags::{IntegrationDescriptor, VendorMapping};
use chrono::Utc;
use serde_json::{json, Map, Value};

pub const NAME: &str = "Google Tag Manager";

pub fn descriptor() -> TagResult<IntegrationDescriptor> {
    IntegrationDescriptor::builder(NAME)
        .assumes_pageview()
        .global("dataLayer")
        .global("google_tag_manager")
        .loaded_when("google_tag_manager")
        .option("containerId", "")
        .option("trackNamedPages", true)
        .option("trackCategorizedPages", true)
        .tag(r#"<script src="//www.googletagmanager.com/gtm.js?id={{ containerId }}&l=dataLayer">"#)
        .build()
}

pub struct TagManager;

fn push(object: Map<String, Value>) -> VendorCall {
    VendorCall::new("dataLayer.push", vec![Value::Object(object)])
}

fn event(name: &str, properties: &Map<String, Value>) -> VendorCall {
    let mut object = properties.clone();
    object.insert("event".into(), json!(name));
    push(object)
}

impl VendorMapping for TagManager {
    fn setup(&self, _options: &ResolvedOptions) -> Vec<VendorCall> {
        let mut start = Map::new();
        start.insert("gtm.start".into(), json!(Utc::now().timestamp_millis()));
        start.insert("event".into(), json!("gtm.js"));
        vec![VendorCall::stub("dataLayer", json!([])), push(start)]
    }

    fn map(&self, call: &Call, options: &ResolvedOptions) -> TagResult<Vec<VendorCall>> {
        let calls = match call {
            Call::Track { event: name, properties } => vec![event(name, properties)],
            Call::Page {
                category,
                name,
                properties,
                ..
            } => {
                let mut calls = Vec::new();
                if let Some(category) = category.as_deref() {
                    if options.bool("trackCategorizedPages") {
                        calls.push(event(&format!("Viewed {category} Page"), properties));
                    }
                }
                if let Some(name) = name.as_deref() {
                    if options.bool("trackNamedPages") {
                        let full = match category.as_deref() {
                            Some(category) => format!("{category} {name}"),
                            None => name.to_string(),
                        };
                        calls.push(event(&format!("Viewed {full} Page"), properties));
                    }
                }
                calls
            }
            Call::Identify { .. } | Call::Group { .. } | Call::Alias { .. } => Vec::new(),
        };
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ResolvedOptions {
        descriptor()
            .unwrap()
            .resolve_options(json!({"containerId": "GTM-M8M29T"}).as_object().unwrap())
    }

    #[test]
    fn test_tag_renders_container() {
        let descriptor = descriptor().unwrap();
        assert!(descriptor.assumes_pageview());
        let tag = descriptor.tag(None).unwrap().template.render(&options()).unwrap();
        assert_eq!(
            tag.src(),
            Some("//www.googletagmanager.com/gtm.js?id=GTM-M8M29T&l=dataLayer")
        );
    }

    #[test]
    fn test_setup_pushes_start_event() {
        let calls = TagManager.setup(&options());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], VendorCall::stub("dataLayer", json!([])));
        assert_eq!(calls[1].target, "dataLayer.push");
        assert_eq!(calls[1].args[0]["event"], "gtm.js");
        assert!(calls[1].args[0]["gtm.start"].is_i64());
        assert_eq!(
            descriptor().unwrap().presence(None),
            ["google_tag_manager".to_string()]
        );
    }

    #[test]
    fn test_track_merges_properties() {
        let props = json!({"plan": "pro"}).as_object().cloned().unwrap();
        let calls = TagManager
            .map(&Call::track("Signed Up", props), &options())
            .unwrap();
        assert_eq!(calls[0].args[0], json!({"event": "Signed Up", "plan": "pro"}));
    }

    #[test]
    fn test_page_events() {
        let call = Call::Page {
            category: Some("Docs".into()),
            name: Some("Setup".into()),
            properties: Map::new(),
            initial: false,
        };
        let calls = TagManager.map(&call, &options()).unwrap();
        let names: Vec<&str> = calls
            .iter()
            .filter_map(|c| c.args[0]["event"].as_str())
            .collect();
        assert_eq!(names, vec!["Viewed Docs Page", "Viewed Docs Setup Page"]);

        let quiet = descriptor().unwrap().resolve_options(
            json!({"trackNamedPages": false, "trackCategorizedPages": false})
                .as_object()
                .unwrap(),
        );
        assert!(TagManager.map(&call, &quiet).unwrap().is_empty());
    }
}
