//! Shared domain logic for the Vesper inference services.
//!
//! Everything the daemon and the CLI both need lives here: the bounded
//! result cache, the telemetry ring buffer, request fingerprinting, GPU
//! snapshot types with their classification/recommendation heuristics,
//! and the wire-level request/response types.

pub mod api;
pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod gpu;
pub mod history;
pub mod vector;

pub use cache::{CacheStats, SharedCache, TtlCache};
pub use error::ServiceError;
pub use history::RollingHistory;

/// Crate version, reported by every health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
