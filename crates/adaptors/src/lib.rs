//! Built-in vendor adaptors.
//!
//! Each adaptor is data: an [`IntegrationDescriptor`] plus a pure
//! [`VendorMapping`](campaign_tags::VendorMapping) that turns normalized calls
//! into invocations of the vendor's globals.
//!
//! - [`google_analytics`]: Google Analytics (universal `ga` and classic `_gaq`)
//! - [`gtm`]: Google Tag Manager `dataLayer`
//! - [`perfect_audience`]: Perfect Audience retargeting `_pa`
//! - [`snapengage`]: SnapEngage live chat `SnapABug`

pub mod google_analytics;
pub mod gtm;
pub mod perfect_audience;
pub mod snapengage;

use std::sync::Arc;

use campaign_core::TagResult;
use campaign_tags::Catalog;
use serde_json::{Map, Value};

/// A catalog with every built-in adaptor registered.
pub fn builtin_catalog() -> TagResult<Catalog> {
    let catalog = Catalog::new();
    catalog.register(
        google_analytics::descriptor()?,
        Arc::new(google_analytics::GoogleAnalytics),
    )?;
    catalog.register(gtm::descriptor()?, Arc::new(gtm::TagManager))?;
    catalog.register(
        perfect_audience::descriptor()?,
        Arc::new(perfect_audience::PerfectAudience),
    )?;
    catalog.register(snapengage::descriptor()?, Arc::new(snapengage::SnapEngage))?;
    Ok(catalog)
}

/// String property, if present and a string.
pub(crate) fn prop_str<'a>(properties: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    properties.get(key).and_then(Value::as_str)
}

/// Numeric property. Numeric strings are accepted too.
pub(crate) fn prop_f64(properties: &Map<String, Value>, key: &str) -> Option<f64> {
    match properties.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_catalog() {
        let catalog = builtin_catalog().unwrap();
        assert_eq!(
            catalog.names(),
            vec![
                "Google Analytics",
                "Google Tag Manager",
                "Perfect Audience",
                "SnapEngage"
            ]
        );
    }

    #[test]
    fn test_prop_helpers() {
        let props = json!({"revenue": "9.99", "value": 3, "label": "x", "flag": true});
        let props = props.as_object().unwrap();
        assert_eq!(prop_f64(props, "revenue"), Some(9.99));
        assert_eq!(prop_f64(props, "value"), Some(3.0));
        assert_eq!(prop_f64(props, "flag"), None);
        assert_eq!(prop_str(props, "label"), Some("x"));
        assert_eq!(prop_str(props, "missing"), None);
    }
}
