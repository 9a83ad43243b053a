pub mod config;
pub mod error;
pub mod db;
pub mod markers;
pub mod matcher;
pub mod ingest;
pub mod segment;
pub mod oracle;
pub mod store;
pub mod embeddings;
pub mod cache;
pub mod watch;

pub use config::Config;
pub use error::{SifterError, Result};
pub use ingest::{IngestReport, IngestRequest, IngestStatus, Ingester};
pub use store::Store;
