//! Reconstruction of an image's filesystem from its layers.
//!
//! Layers are copied into a scratch directory oldest first, each one overwriting what the layers
//! below it put there. Deletions are recorded by layers as whiteout markers (`.wh.<name>`); once
//! every layer is in place, a single pass removes each marked entry together with its marker.
//!
//! Two copy strategies are available:
//!
//! 1. [`FsCopier`] (default)
//!    - Copies entries natively
//!    - Preserves modes, timestamps, hard links, symlinks, FIFOs and device nodes
//!    - Preserves ownership when running as root
//!
//! 2. [`RsyncCopier`]
//!    - Delegates to `rsync -aHSx --devices --specials`
//!    - Requires `rsync` on `PATH`
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use monoflat::{
//!     layer::{GraphLayerStore, LayerChain},
//!     rootfs::{self, FsCopier, LayerMerger},
//!     runtime::DockerEngine,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = DockerEngine::new(
//!     "/var/run/docker.sock",
//!     "v1.4",
//!     "http://localhost:4243/v1.3",
//! )?;
//! let chain = LayerChain::fetch(&engine, "redis").await?;
//!
//! let mut merger = LayerMerger::new(
//!     Arc::new(GraphLayerStore::new("/var/lib/docker/graph")),
//!     Box::new(FsCopier::new()),
//! );
//! let tree = merger.merge(&chain.without_base(), "/tmp/redis/merged").await?;
//!
//! // Clean up once the tree has been packaged
//! rootfs::remove(tree.root()).await?;
//! # Ok(())
//! # }
//! ```

mod copy;
mod merge;
mod remove;
mod rsync;
mod whiteout;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use copy::*;
pub use merge::*;
pub use remove::*;
pub use rsync::*;
pub use whiteout::*;
