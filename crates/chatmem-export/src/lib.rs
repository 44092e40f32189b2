//! `chatmem-export` – getting memory files off the machine.
//!
//! * [`archive`] picks a single memory file or packs every memory file into
//!   one gzipped tarball.
//! * [`server`] hands the resulting artifact out over a short-lived HTTP
//!   link ([`DownloadServer`]).
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::time::Duration;
//! use chatmem_export::{DownloadServer, build_archive};
//!
//! # async fn demo() -> Result<(), chatmem_export::ExportError> {
//! let artifact = build_archive(Path::new("memory_dbs"))?;
//! let server = DownloadServer::bind(artifact, "127.0.0.1").await?;
//! println!("{}", server.url());
//! server.serve_for(Duration::from_secs(14)).await;
//! # Ok(())
//! # }
//! ```

use chatmem_store::StoreError;
use thiserror::Error;

pub mod archive;
pub mod server;

pub use archive::{ARCHIVE_NAME, build_archive, prepare_single};
pub use server::DownloadServer;

/// Failures while preparing or serving a download.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("memory file not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("archive I/O error: {0}")]
    Archive(#[from] std::io::Error),

    #[error("could not open download listener: {0}")]
    Bind(#[source] std::io::Error),
}
