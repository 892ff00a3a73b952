//! `monoflat` collapses a layered container image into a single-layer image.
//!
//! # Overview
//!
//! A container image is a chain of copy-on-write filesystem layers. Each layer records the files
//! it adds or changes, and the files it deletes as whiteout markers (`.wh.<name>`). monoflat
//! reconstructs the filesystem a union mount would expose at the top of the chain, then packages
//! it as a new image with a single layer on top of the original base:
//!
//! 1. **History**: walk the image's history through the runtime API, down to its base layer
//! 2. **Merge**: copy every layer above the base into a scratch tree, oldest first, then resolve
//!    whiteouts
//! 3. **Package**: archive the merged tree as a gzip-compressed tar
//! 4. **Assemble**: write a build context (archive plus Dockerfile) and build the new image
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use monoflat::{config::FlattenConfig, Flattener};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = FlattenConfig::builder()
//!         .image("redis")
//!         .tag("redis:flat")
//!         .build();
//!
//!     let outcome = Flattener::from_config(&config)?
//!         .flatten(config.image(), config.tag())
//!         .await?;
//!
//!     println!("flattened onto {}", outcome.image().base());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Run configuration and defaults
//! - [`image`] - Final-image derivation, packaging and assembly
//! - [`layer`] - Layer chains and layer content stores
//! - [`rootfs`] - Layer merging and whiteout resolution
//! - [`runtime`] - Container runtime API client
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;
mod flatten;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod image;
pub mod layer;
pub mod rootfs;
pub mod runtime;
pub mod utils;

pub use error::*;
pub use flatten::*;
