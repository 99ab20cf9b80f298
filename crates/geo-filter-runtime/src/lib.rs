//! geo-filter runtime: lookup bridge, resolution cache, and feed reprocessing pipeline.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod pipeline;
pub mod transport;
pub mod types;

#[cfg(feature = "http")]
pub use bridge::HttpLookup;
pub use bridge::{LookupBackend, PrivilegedBridge, TableLookup};
pub use cache::{CacheStats, Resolution, ResolutionCache};
pub use config::{resolve_store_path, ApiConfig, RuntimeConfig};
pub use pipeline::{observe, PassReport, Pipeline};
pub use transport::{duplex, Endpoint};
