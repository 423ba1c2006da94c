//! Tag integration lifecycle: loads third-party analytics vendor tags,
//! buffers calls until each vendor is ready, and replays them in order.
//!
//! # Modules
//!
//! - [`descriptor`]: Static per-vendor declarations (globals, options, tags)
//! - [`registry_guard`]: Presence checks and snapshots of vendor globals
//! - [`loader`]: Tag injection with exactly-once settlement and timeouts
//! - [`queue`]: Pre-ready call buffer with re-entrant drain
//! - [`lifecycle`]: The per-instance state machine tying the above together
//! - [`catalog`] / [`hub`]: Registered adaptors and multi-vendor fan-out
//! - [`sandbox`]: In-memory [`Environment`] for tests and dry runs

pub mod catalog;
pub mod descriptor;
pub mod emitter;
pub mod environment;
pub mod hub;
pub mod lifecycle;
pub mod loader;
pub mod mapping;
pub mod queue;
pub mod registry_guard;
pub mod sandbox;

pub use catalog::{Catalog, CatalogEntry};
pub use descriptor::{CompletionSource, DescriptorBuilder, IntegrationDescriptor};
pub use emitter::ListenerId;
pub use environment::{Environment, TimerId};
pub use hub::Analytics;
pub use lifecycle::{InitOutcome, Integration, LifecycleState, ResetGlobals};
pub use loader::{LoadAttempt, LoadSignal, TagLoader};
pub use mapping::VendorMapping;
pub use queue::{CallQueue, QueueState};
pub use registry_guard::{GlobalSnapshot, RegistryGuard};
pub use sandbox::SandboxEnvironment;
