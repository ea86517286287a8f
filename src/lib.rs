//! Local Uploadr Library
//!
//! Streaming upload ingestion server that persists files to a local directory.
//!
//! # Features
//!
//! - **Three upload shapes**: single-file multipart, multi-file multipart, raw body
//! - **Bounded memory**: bodies are streamed through a fixed-size buffer
//! - **Atomic publish**: files appear under their final name only when complete
//! - **Safe names**: client file names can never escape the storage root
//!
//! # Example
//!
//! ```no_run
//! use local_uploadr::{config::Config, server::UploadServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = UploadServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ingest;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use ingest::{IngestError, Ingestor};
pub use server::UploadServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
