//! Perfect Audience retargeting adaptor.

use campaign_core::{Call, ResolvedOptions, TagResult, VendorCall};
use campaign_tags::{IntegrationDescriptor, VendorMapping};
use serde_json::{json, Value};

use crate::prop_f64;

pub const NAME: &str = "Perfect Audience";

pub fn descriptor() -> TagResult<IntegrationDescriptor> {
    IntegrationDescriptor::builder(NAME)
        .assumes_pageview()
        .global("_pa")
        .loaded_when("_pa.track")
        .option("siteId", "")
        .tag(r#"<script src="//tag.perfectaudience.com/serve/{{ siteId }}.js">"#)
        .build()
}

pub struct PerfectAudience;

impl VendorMapping for PerfectAudience {
    fn setup(&self, _options: &ResolvedOptions) -> Vec<VendorCall> {
        vec![VendorCall::stub("_pa", json!({}))]
    }

    fn map(&self, call: &Call, _options: &ResolvedOptions) -> TagResult<Vec<VendorCall>> {
        let Call::Track { event, properties } = call else {
            return Ok(Vec::new());
        };

        let mut calls = Vec::new();
        if event == "Viewed Product" {
            let total = prop_f64(properties, "total").or_else(|| prop_f64(properties, "revenue"));
            let order_id = properties.get("orderId").cloned().unwrap_or(Value::Null);
            let sku = properties.get("sku").cloned().unwrap_or(Value::Null);
            calls.push(VendorCall::assign("_pa.orderId", order_id));
            calls.push(VendorCall::assign("_pa.revenue", json!(total)));
            calls.push(VendorCall::assign("_pa.productId", sku));
        }
        calls.push(VendorCall::new(
            "_pa.track",
            vec![json!(event), Value::Object(properties.clone())],
        ));
        Ok(calls)
    }
}
