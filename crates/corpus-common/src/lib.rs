//! Corpus Runner common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pieces shared by every crate in the workspace:
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Checksums**: SHA-256 helpers used to fingerprint uploaded artifacts
//!
//! # Example
//!
//! ```no_run
//! use corpus_common::checksum::sha256_hex;
//!
//! fn fingerprint(path: &str) -> corpus_common::Result<()> {
//!     let digest = sha256_hex(&std::fs::read(path)?);
//!     tracing::info!(%digest, "artifact fingerprint");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
