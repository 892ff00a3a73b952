use std::collections::HashSet;

use getset::Getters;

use crate::{
    runtime::{ImageInspect, ImageRuntime, LayerConfig},
    MonoflatError, MonoflatResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single filesystem changeset in an image's ancestry.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct Layer {
    /// The layer id.
    id: String,

    /// The parent layer id, `None` for a base layer.
    parent: Option<String>,

    /// The author recorded with the layer.
    author: String,

    /// The runtime configuration recorded with the layer.
    config: LayerConfig,
}

/// The ancestry of an image, most-derived layer first.
///
/// Every layer except the last names the next one as its parent, and no id appears twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerChain {
    layers: Vec<Layer>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Layer {
    /// Creates a new layer.
    pub fn new(
        id: impl Into<String>,
        parent: Option<String>,
        author: impl Into<String>,
        config: LayerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            parent,
            author: author.into(),
            config,
        }
    }

    /// Returns `true` if the layer has no parent.
    pub fn is_base(&self) -> bool {
        self.parent.is_none()
    }
}

impl LayerChain {
    /// Creates a chain from layers ordered most-derived first.
    ///
    /// # Errors
    /// Returns [`MonoflatError::InvalidChain`] if a layer's parent is not the next layer or an id
    /// repeats.
    pub fn new(layers: Vec<Layer>) -> MonoflatResult<Self> {
        let mut seen = HashSet::new();
        for layer in &layers {
            if !seen.insert(layer.id.as_str()) {
                return Err(MonoflatError::InvalidChain(format!(
                    "layer {} appears more than once",
                    layer.id
                )));
            }
        }

        for pair in layers.windows(2) {
            let (child, parent) = (&pair[0], &pair[1]);
            if child.parent.as_deref() != Some(parent.id.as_str()) {
                return Err(MonoflatError::InvalidChain(format!(
                    "layer {} has parent {:?}, expected {}",
                    child.id, child.parent, parent.id
                )));
            }
        }

        Ok(Self { layers })
    }

    /// Fetches the full ancestry of `image` from the runtime, down to its base layer.
    ///
    /// # Errors
    /// Returns error if:
    /// - The runtime is unreachable or does not know the image
    /// - The history does not end in a base layer
    /// - A layer's parent does not match the next history entry
    pub async fn fetch(runtime: &dyn ImageRuntime, image: &str) -> MonoflatResult<Self> {
        tracing::info!("get history of {}", image);
        let history = runtime.history(image).await?;

        tracing::info!(
            "inspect {} layer(s) that form the image {}",
            history.len(),
            image
        );
        let mut layers = Vec::with_capacity(history.len());
        for entry in &history {
            let inspect = runtime.inspect(entry.id()).await?;
            tracing::debug!(
                "layer {} (parent {:?}) created by {:?}",
                inspect.id(),
                inspect.parent(),
                entry.created_by()
            );
            layers.push(Layer::from(inspect));
        }

        if let Some(last) = layers.last() {
            if !last.is_base() {
                return Err(MonoflatError::InvalidChain(format!(
                    "history of {} ends at {}, which still has parent {:?}",
                    image, last.id, last.parent
                )));
            }
        }

        Self::new(layers)
    }

    /// Returns the layers, most-derived first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns the number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if the chain has no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Returns the most-derived layer.
    pub fn most_derived(&self) -> Option<&Layer> {
        self.layers.first()
    }

    /// Returns the oldest layer.
    pub fn base(&self) -> Option<&Layer> {
        self.layers.last()
    }

    /// Returns the chain with its oldest layer dropped.
    pub fn without_base(&self) -> LayerChain {
        let end = self.layers.len().saturating_sub(1);
        LayerChain {
            layers: self.layers[..end].to_vec(),
        }
    }

    /// Iterates over the layers in the order they are applied: oldest first, most-derived last.
    pub fn merge_order(&self) -> impl DoubleEndedIterator<Item = &Layer> {
        self.layers.iter().rev()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<ImageInspect> for Layer {
    fn from(inspect: ImageInspect) -> Self {
        Self {
            parent: inspect.parent().map(str::to_string),
            id: inspect.id().clone(),
            author: inspect.author().clone(),
            config: inspect.config().clone(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::runtime::HistoryEntry;

    use super::*;

    #[test]
    fn test_layer_chain_rejects_broken_parent_links() {
        let result = LayerChain::new(vec![
            helper::layer("l2", Some("l1")),
            helper::layer("l1", Some("lx")),
            helper::layer("l0", None),
        ]);

        assert!(matches!(result, Err(MonoflatError::InvalidChain(_))));
    }

    #[test]
    fn test_layer_chain_rejects_repeated_ids() {
        let result = LayerChain::new(vec![
            helper::layer("l1", Some("l1")),
            helper::layer("l1", None),
        ]);

        assert!(matches!(result, Err(MonoflatError::InvalidChain(_))));
    }

    #[test]
    fn test_layer_chain_merge_order_is_oldest_first() -> anyhow::Result<()> {
        let chain = LayerChain::new(vec![
            helper::layer("l2", Some("l1")),
            helper::layer("l1", Some("l0")),
            helper::layer("l0", None),
        ])?;

        let order: Vec<_> = chain.merge_order().map(|layer| layer.id().as_str()).collect();
        assert_eq!(order, vec!["l0", "l1", "l2"]);

        let derived = chain.without_base();
        let order: Vec<_> = derived
            .merge_order()
            .map(|layer| layer.id().as_str())
            .collect();
        assert_eq!(order, vec!["l1", "l2"]);
        assert_eq!(chain.base().map(|layer| layer.id().as_str()), Some("l0"));
        assert_eq!(
            chain.most_derived().map(|layer| layer.id().as_str()),
            Some("l2")
        );

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_layer_chain_fetch_walks_history() -> anyhow::Result<()> {
        let runtime = helper::FakeRuntime::new(&[("l2", "l1"), ("l1", "l0"), ("l0", "")]);

        let chain = LayerChain::fetch(&runtime, "app").await?;

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.layers()[0].parent().as_deref(), Some("l1"));
        assert!(chain.layers()[2].is_base());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_layer_chain_fetch_requires_a_base() -> anyhow::Result<()> {
        let runtime = helper::FakeRuntime::new(&[("l2", "l1"), ("l1", "l0")]);

        let result = LayerChain::fetch(&runtime, "app").await;

        assert!(matches!(result, Err(MonoflatError::InvalidChain(_))));

        Ok(())
    }

    mod helper {
        use super::*;

        pub(super) fn layer(id: &str, parent: Option<&str>) -> Layer {
            Layer::new(
                id,
                parent.map(str::to_string),
                "",
                LayerConfig::default(),
            )
        }

        /// A runtime that serves a fixed history of `(id, parent)` pairs.
        pub(super) struct FakeRuntime {
            history: Vec<HistoryEntry>,
            layers: HashMap<String, ImageInspect>,
        }

        impl FakeRuntime {
            pub(super) fn new(pairs: &[(&str, &str)]) -> Self {
                Self {
                    history: pairs
                        .iter()
                        .map(|(id, _)| HistoryEntry::new(*id, vec![], ""))
                        .collect(),
                    layers: pairs
                        .iter()
                        .map(|(id, parent)| {
                            (
                                id.to_string(),
                                ImageInspect::new(*id, *parent, "", LayerConfig::default()),
                            )
                        })
                        .collect(),
                }
            }
        }

        #[async_trait::async_trait]
        impl ImageRuntime for FakeRuntime {
            async fn history(&self, _image: &str) -> MonoflatResult<Vec<HistoryEntry>> {
                Ok(self.history.clone())
            }

            async fn inspect(&self, id: &str) -> MonoflatResult<ImageInspect> {
                self.layers
                    .get(id)
                    .cloned()
                    .ok_or_else(|| MonoflatError::NotFound(id.to_string()))
            }
        }
    }
}
