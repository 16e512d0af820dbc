//! Service layer of the Stash blob store.
//!
//! Ties the metadata index and payload store together behind:
//! - HTTP API (blob upload, lookup, search and health routes)
//! - garbage collector (expired blobs and abandoned uploads)
//! - process setup (logging, signals, graceful shutdown)

pub mod collector;
pub mod config;
pub mod http;
pub mod process;
pub mod state;

// Re-export key types for convenience
pub use collector::CollectorConfig;
pub use config::Config;
pub use state::{HealthError, State as ServiceState, StateSetupError};
