use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use getset::Getters;
use tokio::fs;

use crate::{
    utils::{self, GRAPH_LAYER_SUBDIR},
    MonoflatError, MonoflatResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Trait for resolving a layer id to the directory holding the layer's content.
///
/// Resolved directories are only ever read.
#[async_trait::async_trait]
pub trait LayerStore: Send + Sync {
    /// Returns the content root of the layer.
    ///
    /// # Errors
    /// - [`MonoflatError::NotFound`] if the layer is unknown
    /// - [`MonoflatError::Unavailable`] if the backing storage cannot be reached
    async fn resolve(&self, id: &str) -> MonoflatResult<PathBuf>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A layer store backed by the runtime's on-disk graph.
///
/// ```text
/// graph_root/
/// ├── <layer id>/
/// │   ├── json
/// │   └── layer/   - Content root of the layer
/// └── <layer id>/
///     └── layer/
/// ```
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct GraphLayerStore {
    /// The root of the graph.
    graph_root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GraphLayerStore {
    /// Creates a store over the graph at `graph_root`.
    pub fn new(graph_root: impl AsRef<Path>) -> Self {
        Self {
            graph_root: graph_root.as_ref().to_path_buf(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl LayerStore for GraphLayerStore {
    async fn resolve(&self, id: &str) -> MonoflatResult<PathBuf> {
        if !utils::is_valid_layer_id(id) {
            return Err(MonoflatError::NotFound(format!("invalid layer id {:?}", id)));
        }

        if let Err(e) = fs::read_dir(&self.graph_root).await {
            return Err(MonoflatError::Unavailable(format!(
                "layer graph {}: {}",
                self.graph_root.display(),
                e
            )));
        }

        let content_root = self.graph_root.join(id).join(GRAPH_LAYER_SUBDIR);
        match fs::symlink_metadata(&content_root).await {
            Ok(metadata) if metadata.is_dir() => Ok(content_root),
            Ok(_) => Err(MonoflatError::NotFound(format!(
                "{} is not a directory",
                content_root.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(MonoflatError::NotFound(format!(
                "layer {} has no content at {}",
                id,
                content_root.display()
            ))),
            Err(e) => Err(MonoflatError::Unavailable(format!(
                "{}: {}",
                content_root.display(),
                e
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
