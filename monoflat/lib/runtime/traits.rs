use crate::MonoflatResult;

use super::{HistoryEntry, ImageInspect};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Trait for reading image metadata from a container runtime.
#[async_trait::async_trait]
pub trait ImageRuntime: Send + Sync {
    /// Returns the history of an image, most-derived layer first.
    async fn history(&self, image: &str) -> MonoflatResult<Vec<HistoryEntry>>;

    /// Returns the inspect record of a single layer.
    async fn inspect(&self, id: &str) -> MonoflatResult<ImageInspect>;
}
