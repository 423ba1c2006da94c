//! Vendor mappings: the only vendor-specific logic the lifecycle core
//! calls: turning a normalized [`Call`] into invocations of the vendor's
//! globals.

use campaign_core::{Call, ResolvedOptions, TagResult, VendorCall};

pub trait VendorMapping: Send + Sync {
    /// Calls pushed into the vendor's pre-load stub when the integration
    /// initializes.
    fn setup(&self, _options: &ResolvedOptions) -> Vec<VendorCall> {
        Vec::new()
    }

    /// Name of the declared tag to load. `None` loads the first one.
    fn select_tag(&self, _options: &ResolvedOptions) -> Option<String> {
        None
    }

    /// Map one call. An empty vec means the vendor ignores this call.
    fn map(&self, call: &Call, options: &ResolvedOptions) -> TagResult<Vec<VendorCall>>;
}

impl<F> VendorMapping for F
where
    F: Fn(&Call, &ResolvedOptions) -> TagResult<Vec<VendorCall>> + Send + Sync,
{
    fn map(&self, call: &Call, options: &ResolvedOptions) -> TagResult<Vec<VendorCall>> {
        self(call, options)
    }
}
