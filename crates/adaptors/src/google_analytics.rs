//! Google Analytics adaptor. Universal analytics drives the `ga` command
//! queue; the classic tag (`classic: true`) pushes command arrays onto
//! `_gaq`.

use campaign_core::{Call, ResolvedOptions, TagResult, VendorCall};
use chrono::Utc;
use campaign_tags::{IntegrationDescriptor, VendorMapping};
use serde_json::{json, Map, Value};

use crate::{prop_f64, prop_str};

pub const NAME: &str = "Google Analytics";

const LINKID_PLUGIN: &str = "http://www.google-analytics.com/plugins/ga/inpage_linkid.js";

pub fn descriptor() -> TagResult<IntegrationDescriptor> {
    IntegrationDescriptor::builder(NAME)
        .ready_on_load()
        .global("ga")
        .global("_gaq")
        .global("GoogleAnalyticsObject")
        .global("gaplugins")
        .global("_gat")
        .option("anonymizeIp", false)
        .option("classic", false)
        .option("domain", "none")
        .option("doubleClick", false)
        .option("enhancedLinkAttribution", false)
        .option("ignoreReferrer", Value::Null)
        .option("siteSpeedSampleRate", Value::Null)
        .option("trackingId", "")
        .option("trackNamedPages", true)
        .named_tag("universal", r#"<script src="//www.google-analytics.com/analytics.js">"#)
        .named_tag("classic", r#"<script src="//www.google-analytics.com/ga.js">"#)
        .named_tag("doubleclick", r#"<script src="//stats.g.doubleclick.net/dc.js">"#)
        .tag_loaded_when("universal", "gaplugins")
        .tag_loaded_when("classic", "_gat")
        .tag_loaded_when("doubleclick", "_gat")
        .build()
}

pub struct GoogleAnalytics;

/// The fields shared by universal `send event` and classic `_trackEvent`.
struct EventFields<'a> {
    category: &'a str,
    action: &'a str,
    label: Option<&'a str>,
    value: i64,
    non_interaction: Option<bool>,
}

impl<'a> EventFields<'a> {
    fn from_track(event: &'a str, properties: &'a Map<String, Value>) -> Self {
        let value = prop_f64(properties, "revenue")
            .or_else(|| prop_f64(properties, "value"))
            .unwrap_or(0.0);
        Self {
            category: prop_str(properties, "category").unwrap_or("All"),
            action: event,
            label: prop_str(properties, "label"),
            value: value.round() as i64,
            non_interaction: properties.get("noninteraction").and_then(Value::as_bool),
        }
    }

    fn universal(&self) -> VendorCall {
        let mut fields = Map::new();
        fields.insert("eventCategory".into(), json!(self.category));
        fields.insert("eventAction".into(), json!(self.action));
        if let Some(label) = self.label {
            fields.insert("eventLabel".into(), json!(label));
        }
        fields.insert("eventValue".into(), json!(self.value));
        if let Some(non_interaction) = self.non_interaction {
            fields.insert("nonInteraction".into(), json!(non_interaction));
        }
        VendorCall::new("ga", vec![json!("send"), json!("event"), Value::Object(fields)])
    }

    fn classic(&self) -> VendorCall {
        gaq(json!([
            "_trackEvent",
            self.category,
            self.action,
            self.label,
            self.value,
            self.non_interaction
        ]))
    }
}

fn gaq(command: Value) -> VendorCall {
    VendorCall::new("_gaq.push", vec![command])
}

fn ga(args: Vec<Value>) -> VendorCall {
    VendorCall::new("ga", args)
}

impl GoogleAnalytics {
    fn setup_universal(options: &ResolvedOptions) -> Vec<VendorCall> {
        let mut create = Map::new();
        create.insert(
            "cookieDomain".into(),
            json!(options.str("domain").unwrap_or("none")),
        );
        if let Some(rate) = options.get("siteSpeedSampleRate") {
            create.insert("siteSpeedSampleRate".into(), rate.clone());
        }
        create.insert("allowLinker".into(), json!(true));

        // analytics.js drains `ga.q` once it loads; `l` is the stub's creation time.
        let mut calls = vec![
            VendorCall::stub("GoogleAnalyticsObject", json!("ga")),
            VendorCall::stub("ga", json!({"q": [], "l": Utc::now().timestamp_millis()})),
            ga(vec![
                json!("create"),
                json!(options.str("trackingId").unwrap_or_default()),
                Value::Object(create),
            ]),
        ];
        if options.bool("anonymizeIp") {
            calls.push(ga(vec![json!("set"), json!("anonymizeIp"), json!(true)]));
        }
        if options.bool("doubleClick") {
            calls.push(ga(vec![json!("require"), json!("displayfeatures")]));
        }
        if options.bool("enhancedLinkAttribution") {
            calls.push(ga(vec![json!("require"), json!("linkid"), json!("linkid.js")]));
        }
        calls
    }

    fn setup_classic(options: &ResolvedOptions) -> Vec<VendorCall> {
        let mut calls = vec![
            VendorCall::stub("_gaq", json!([])),
            gaq(json!(["_setAccount", options.str("trackingId").unwrap_or_default()])),
            gaq(json!(["_setAllowLinker", true])),
        ];
        if options.bool("anonymizeIp") {
            calls.push(gaq(json!(["_gat._anonymizeIp"])));
        }
        if let Some(domain) = options.str("domain") {
            calls.push(gaq(json!(["_setDomainName", domain])));
        }
        if let Some(rate) = options.get("siteSpeedSampleRate") {
            calls.push(gaq(json!(["_setSiteSpeedSampleRate", rate])));
        }
        if options.bool("enhancedLinkAttribution") {
            calls.push(gaq(json!(["_require", "inpage_linkid", LINKID_PLUGIN])));
        }
        match options.get("ignoreReferrer") {
            Some(Value::Array(referrers)) => {
                for referrer in referrers {
                    calls.push(gaq(json!(["_addIgnoredRef", referrer])));
                }
            }
            Some(referrer @ Value::String(_)) => {
                calls.push(gaq(json!(["_addIgnoredRef", referrer])));
            }
            _ => {}
        }
        calls
    }

    fn named_page_event(name: &str) -> String {
        format!("Viewed {name} Page")
    }
}

impl VendorMapping for GoogleAnalytics {
    fn setup(&self, options: &ResolvedOptions) -> Vec<VendorCall> {
        if options.bool("classic") {
            Self::setup_classic(options)
        } else {
            Self::setup_universal(options)
        }
    }

    fn select_tag(&self, options: &ResolvedOptions) -> Option<String> {
        let tag = match (options.bool("classic"), options.bool("doubleClick")) {
            (true, true) => "doubleclick",
            (true, false) => "classic",
            (false, _) => "universal",
        };
        Some(tag.to_string())
    }

    fn map(&self, call: &Call, options: &ResolvedOptions) -> TagResult<Vec<VendorCall>> {
        let classic = options.bool("classic");
        let calls = match call {
            Call::Track { event, properties } => {
                let fields = EventFields::from_track(event, properties);
                vec![if classic {
                    fields.classic()
                } else {
                    fields.universal()
                }]
            }
            Call::Page {
                name, properties, ..
            } => {
                let path = prop_str(properties, "path");
                let mut calls = if classic {
                    vec![gaq(json!(["_trackPageview", path]))]
                } else {
                    let mut fields = Map::new();
                    if let Some(path) = path {
                        fields.insert("page".into(), json!(path));
                    }
                    if let Some(name) = name {
                        fields.insert("title".into(), json!(name));
                    }
                    if let Some(url) = prop_str(properties, "url") {
                        fields.insert("url".into(), json!(url));
                    }
                    vec![ga(vec![json!("send"), json!("pageview"), Value::Object(fields)])]
                };

                if let Some(name) = name.as_deref().filter(|_| options.bool("trackNamedPages")) {
                    let action = Self::named_page_event(name);
                    let named = EventFields {
                        category: "All",
                        action: &action,
                        label: None,
                        value: 0,
                        non_interaction: Some(true),
                    };
                    calls.push(if classic {
                        named.classic()
                    } else {
                        named.universal()
                    });
                }
                calls
            }
            Call::Identify { .. } | Call::Group { .. } | Call::Alias { .. } => Vec::new(),
        };
        Ok(calls)
    }
}
