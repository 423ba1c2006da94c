//! Shared building blocks for the tag integration framework: error type,
//! configuration, lifecycle event bus, tag templates and the normalized call
//! records every vendor adaptor consumes.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod templates;
pub mod types;

pub use crate::config::AppConfig;
pub use error::{TagError, TagResult};
pub use templates::{RenderedTag, TagKind, TagTemplate};
pub use types::{Call, CallRecord, Method, ResolvedOptions, VendorCall};
