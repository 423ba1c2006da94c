//! SnapEngage live chat adaptor. Only `identify` with an email reaches the
//! vendor.

use campaign_core::{Call, ResolvedOptions, TagResult, VendorCall};
use campaign_tags::{IntegrationDescriptor, VendorMapping};
use serde_json::json;
use tracing::debug;

use crate::prop_str;

pub const NAME: &str = "SnapEngage";

pub fn descriptor() -> TagResult<IntegrationDescriptor> {
    IntegrationDescriptor::builder(NAME)
        .assumes_pageview()
        .ready_on_load()
        .global("SnapABug")
        .option("apiKey", "")
        .tag(r#"<script src="//www.snapengage.com/cdn/js/{{ apiKey }}.js">"#)
        .build()
}

pub struct SnapEngage;

impl VendorMapping for SnapEngage {
    fn map(&self, call: &Call, _options: &ResolvedOptions) -> TagResult<Vec<VendorCall>> {
        let Call::Identify { traits, .. } = call else {
            return Ok(Vec::new());
        };
        match prop_str(traits, "email") {
            Some(email) => Ok(vec![VendorCall::new(
                "SnapABug.setUserEmail",
                vec![json!(email)],
            )]),
            None => {
                debug!(integration = NAME, "identify without email ignored");
                Ok(Vec::new())
            }
        }
    }
}
