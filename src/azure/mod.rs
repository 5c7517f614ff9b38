//! Azure CLI, Resource Graph and Blob service access.
//!
//! - [`cli`] - external command execution ([`CommandRunner`])
//! - [`cache`] - dated JSON caching of slow queries
//! - [`graph`] - paginated Resource Graph queries
//! - [`blob`] - Blob operations ([`BlobStore`])

pub mod blob;
pub mod cache;
pub mod cli;
pub mod graph;

pub use blob::{AccessTier, BlobClient, BlobProperties, BlobStore, RehydratePriority};
pub use cache::{cache_file_name, read_or_fetch};
pub use cli::{args, parse_json, run_json, CommandRunner, SystemRunner};
pub use graph::{query, query_default, Data};
