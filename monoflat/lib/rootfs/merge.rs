use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use getset::Getters;
use tokio::fs;

use crate::{
    layer::{LayerChain, LayerStore},
    MonoflatError, MonoflatResult,
};

use super::{resolve_whiteouts, retire_overridden_whiteouts, LayerCopier, WhiteoutReport};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Reconstructs the filesystem of a layer chain in a scratch directory.
///
/// Layers are copied oldest first, so content from a more-derived layer always wins. A whiteout
/// only shadows the layers below it: before a layer is copied, earlier markers for paths it
/// re-adds are applied and dropped. The remaining markers are resolved once, after every layer
/// has been applied.
pub struct LayerMerger {
    store: Arc<dyn LayerStore>,
    copier: Box<dyn LayerCopier>,
}

/// The result of a merge.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct MergedTree {
    /// The directory holding the merged filesystem.
    root: PathBuf,

    /// The ids of the applied layers, in the order they were applied.
    layers_applied: Vec<String>,

    /// What the whiteout pass removed.
    whiteouts: WhiteoutReport,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerMerger {
    /// Creates a merger that reads layers from `store` and writes them with `copier`.
    pub fn new(store: Arc<dyn LayerStore>, copier: Box<dyn LayerCopier>) -> Self {
        Self { store, copier }
    }

    /// Merges `chain` into `dest`, which must be missing or empty.
    ///
    /// Every layer's content root is resolved before anything is written, so an unknown layer
    /// leaves `dest` untouched.
    ///
    /// ## Layout
    ///
    /// ```text
    /// chain (most-derived first)      dest/
    /// ├── l2: x, .wh.y          ───→  ├── x   (from l2)
    /// ├── l1: y, z              ───→  └── z   (from l1; y is whited out by l2)
    /// ```
    ///
    /// # Errors
    /// Returns error if:
    /// - `dest` exists and is not an empty directory
    /// - A layer cannot be resolved
    /// - A layer cannot be copied
    /// - A whiteout cannot be resolved
    pub async fn merge(
        &mut self,
        chain: &LayerChain,
        dest: impl AsRef<Path>,
    ) -> MonoflatResult<MergedTree> {
        let dest = dest.as_ref();
        prepare_dest(dest).await?;

        let mut sources = Vec::with_capacity(chain.len());
        for layer in chain.merge_order() {
            let content_root = self.store.resolve(layer.id()).await?;
            sources.push((layer.id().clone(), content_root));
        }

        let mut layers_applied = Vec::with_capacity(sources.len());
        let mut whiteouts = WhiteoutReport::default();
        for (index, (layer_id, content_root)) in sources.into_iter().enumerate() {
            tracing::info!(
                "[{}/{}] copy layer {} from {}",
                index + 1,
                chain.len(),
                layer_id,
                content_root.display()
            );
            whiteouts += retire_overridden_whiteouts(&content_root, dest).await?;
            self.copier
                .copy_layer(&layer_id, &content_root, dest)
                .await?;
            layers_applied.push(layer_id);
        }

        tracing::info!(
            "recursively delete whiteouts and deleted files in {}",
            dest.display()
        );
        whiteouts += resolve_whiteouts(dest).await?;
        tracing::debug!(
            "removed {} whiteout marker(s) and {} shadowed entries",
            whiteouts.markers_removed(),
            whiteouts.targets_removed()
        );

        self.copier.seal(dest).await?;

        Ok(MergedTree {
            root: dest.to_path_buf(),
            layers_applied,
            whiteouts,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Creates `dest` if needed and checks it is an empty directory.
async fn prepare_dest(dest: &Path) -> MonoflatResult<()> {
    match fs::read_dir(dest).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(MonoflatError::custom(anyhow::anyhow!(
                    "scratch directory {} is not empty",
                    dest.display()
                )));
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(dest).await?,
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    use tempfile::tempdir;
    use walkdir::WalkDir;

    use crate::{
        layer::{GraphLayerStore, Layer},
        rootfs::{FsCopier, RsyncCopier},
        runtime::LayerConfig,
    };

    use super::*;

    #[test_log::test(tokio::test)]
    /// Tests that upper layers override lower ones and whiteouts hide lower content.
    ///
    /// ```text
    /// l2 (most derived): x, .wh.y, etc/.wh.motd, etc/hosts = "l2"
    /// l1:                y, z, etc/motd, etc/hosts = "l1"
    /// l0 (base):         base.txt, etc/hosts = "l0"
    /// ```
    async fn test_merge_applies_layers_and_whiteouts() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let graph = temp.path().join("graph");
        helper::write_layer(&graph, "l0", &[("base.txt", "l0"), ("etc/hosts", "l0")]).await?;
        helper::write_layer(
            &graph,
            "l1",
            &[("y", "l1"), ("z", "l1"), ("etc/motd", "l1"), ("etc/hosts", "l1")],
        )
        .await?;
        helper::write_layer(
            &graph,
            "l2",
            &[("x", "l2"), (".wh.y", ""), ("etc/.wh.motd", ""), ("etc/hosts", "l2")],
        )
        .await?;

        let chain = helper::chain(&["l2", "l1", "l0"])?;
        let mut merger = LayerMerger::new(
            Arc::new(GraphLayerStore::new(&graph)),
            Box::new(FsCopier::new()),
        );
        let dest = temp.path().join("merged");
        let tree = merger.merge(&chain, &dest).await?;

        assert_eq!(tree.layers_applied(), &vec!["l0", "l1", "l2"]);
        assert_eq!(tree.whiteouts().targets_removed(), 2);
        assert_eq!(
            helper::snapshot(&dest)?,
            BTreeMap::from([
                ("base.txt".to_string(), Some("l0".to_string())),
                ("etc".to_string(), None),
                ("etc/hosts".to_string(), Some("l2".to_string())),
                ("x".to_string(), Some("l2".to_string())),
                ("z".to_string(), Some("l1".to_string())),
            ])
        );

        Ok(())
    }

    #[test_log::test(tokio::test)]
    /// Tests that a whiteout does not shadow content from the layers above it.
    ///
    /// ```text
    /// l2 (most derived): y = "l2", d/new = "l2"
    /// l1:                .wh.y, .wh.d
    /// l0 (base):         y = "l0", d/old = "l0"
    /// ```
    async fn test_merge_upper_layer_re_adds_whited_out_paths() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let graph = helper::write_re_add_layers(temp.path()).await?;

        let dest = temp.path().join("merged");
        let tree = LayerMerger::new(
            Arc::new(GraphLayerStore::new(&graph)),
            Box::new(FsCopier::new()),
        )
        .merge(&helper::chain(&["l2", "l1", "l0"])?, &dest)
        .await?;

        assert_eq!(helper::snapshot(&dest)?, helper::re_added_snapshot());
        assert_eq!(tree.whiteouts().markers_removed(), 2);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_merge_upper_layer_re_adds_whited_out_paths_with_rsync() -> anyhow::Result<()> {
        let Ok(copier) = RsyncCopier::new() else {
            tracing::warn!("rsync is not installed, skipping");
            return Ok(());
        };

        let temp = tempdir()?;
        let graph = helper::write_re_add_layers(temp.path()).await?;

        let dest = temp.path().join("merged");
        LayerMerger::new(Arc::new(GraphLayerStore::new(&graph)), Box::new(copier))
            .merge(&helper::chain(&["l2", "l1", "l0"])?, &dest)
            .await?;

        assert_eq!(helper::snapshot(&dest)?, helper::re_added_snapshot());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_merge_is_deterministic() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let graph = temp.path().join("graph");
        helper::write_layer(&graph, "l0", &[("a/b/c", "l0"), ("d", "l0")]).await?;
        helper::write_layer(&graph, "l1", &[("a/.wh.b", ""), ("a/e", "l1"), ("d", "l1")])
            .await?;

        let chain = helper::chain(&["l1", "l0"])?;
        let store: Arc<dyn LayerStore> = Arc::new(GraphLayerStore::new(&graph));

        let first = temp.path().join("first");
        LayerMerger::new(store.clone(), Box::new(FsCopier::new()))
            .merge(&chain, &first)
            .await?;
        let second = temp.path().join("second");
        LayerMerger::new(store, Box::new(FsCopier::new()))
            .merge(&chain, &second)
            .await?;

        assert_eq!(helper::snapshot(&first)?, helper::snapshot(&second)?);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_merge_layer_can_remove_its_own_entry() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let graph = temp.path().join("graph");
        helper::write_layer(&graph, "l0", &[("keep", "l0")]).await?;
        helper::write_layer(&graph, "l1", &[("tmp", "l1"), (".wh.tmp", "")]).await?;

        let chain = helper::chain(&["l1", "l0"])?;
        let dest = temp.path().join("merged");
        LayerMerger::new(
            Arc::new(GraphLayerStore::new(&graph)),
            Box::new(FsCopier::new()),
        )
        .merge(&chain, &dest)
        .await?;

        assert!(!dest.join("tmp").exists());
        assert!(dest.join("keep").exists());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_merge_copies_layers_oldest_first() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let graph = temp.path().join("graph");
        for id in ["l0", "l1", "l2"] {
            helper::write_layer(&graph, id, &[]).await?;
        }

        let copier = helper::RecordingCopier::default();
        let calls = copier.calls.clone();
        let chain = helper::chain(&["l2", "l1", "l0"])?;

        LayerMerger::new(Arc::new(GraphLayerStore::new(&graph)), Box::new(copier))
            .merge(&chain, temp.path().join("merged"))
            .await?;

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["copy l0", "copy l1", "copy l2", "seal"]
        );

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_merge_unknown_layer_writes_nothing() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let graph = temp.path().join("graph");
        helper::write_layer(&graph, "l0", &[("a", "l0")]).await?;

        let copier = helper::RecordingCopier::default();
        let calls = copier.calls.clone();
        let chain = helper::chain(&["l1", "l0"])?;

        let result = LayerMerger::new(Arc::new(GraphLayerStore::new(&graph)), Box::new(copier))
            .merge(&chain, temp.path().join("merged"))
            .await;

        assert!(matches!(result, Err(MonoflatError::NotFound(_))));
        assert!(calls.lock().unwrap().is_empty());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_merge_rejects_non_empty_dest() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let graph = temp.path().join("graph");
        helper::write_layer(&graph, "l0", &[]).await?;
        let dest = temp.path().join("merged");
        fs::create_dir_all(&dest).await?;
        fs::write(dest.join("stale"), "").await?;

        let result = LayerMerger::new(
            Arc::new(GraphLayerStore::new(&graph)),
            Box::new(FsCopier::new()),
        )
        .merge(&helper::chain(&["l0"])?, &dest)
        .await;

        assert!(result.is_err());

        Ok(())
    }

    mod helper {
        use super::*;

        /// Writes a layer of plain files into a graph, creating parents as needed.
        pub(super) async fn write_layer(
            graph: &Path,
            id: &str,
            files: &[(&str, &str)],
        ) -> anyhow::Result<()> {
            let root = graph.join(id).join("layer");
            fs::create_dir_all(&root).await?;
            for (path, content) in files {
                let path = root.join(path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(path, content).await?;
            }
            Ok(())
        }

        /// Writes three layers where the top one re-adds paths the middle one whited out.
        pub(super) async fn write_re_add_layers(root: &Path) -> anyhow::Result<PathBuf> {
            let graph = root.join("graph");
            write_layer(&graph, "l0", &[("y", "l0"), ("d/old", "l0")]).await?;
            write_layer(&graph, "l1", &[(".wh.y", ""), (".wh.d", "")]).await?;
            write_layer(&graph, "l2", &[("y", "l2"), ("d/new", "l2")]).await?;
            Ok(graph)
        }

        /// The merged tree of [`write_re_add_layers`].
        pub(super) fn re_added_snapshot() -> BTreeMap<String, Option<String>> {
            BTreeMap::from([
                ("d".to_string(), None),
                ("d/new".to_string(), Some("l2".to_string())),
                ("y".to_string(), Some("l2".to_string())),
            ])
        }

        /// Builds a linear chain from ids ordered most-derived first.
        pub(super) fn chain(ids: &[&str]) -> anyhow::Result<LayerChain> {
            let layers = ids
                .iter()
                .enumerate()
                .map(|(index, id)| {
                    Layer::new(
                        *id,
                        ids.get(index + 1).map(|parent| parent.to_string()),
                        "",
                        LayerConfig::default(),
                    )
                })
                .collect();
            Ok(LayerChain::new(layers)?)
        }

        /// Maps each relative path to its content, or `None` for directories.
        pub(super) fn snapshot(root: &Path) -> anyhow::Result<BTreeMap<String, Option<String>>> {
            let mut entries = BTreeMap::new();
            for entry in WalkDir::new(root).min_depth(1) {
                let entry = entry?;
                let relative = entry.path().strip_prefix(root)?.to_string_lossy().into_owned();
                let content = if entry.file_type().is_dir() {
                    None
                } else {
                    Some(std::fs::read_to_string(entry.path())?)
                };
                entries.insert(relative, content);
            }
            Ok(entries)
        }

        /// A copier that records its calls and writes nothing.
        #[derive(Default)]
        pub(super) struct RecordingCopier {
            pub(super) calls: Arc<Mutex<Vec<String>>>,
        }

        #[async_trait::async_trait]
        impl LayerCopier for RecordingCopier {
            async fn copy_layer(
                &mut self,
                layer_id: &str,
                _source: &Path,
                _dest: &Path,
            ) -> MonoflatResult<()> {
                self.calls.lock().unwrap().push(format!("copy {}", layer_id));
                Ok(())
            }

            async fn seal(&mut self, _dest: &Path) -> MonoflatResult<()> {
                self.calls.lock().unwrap().push("seal".to_string());
                Ok(())
            }
        }
    }
}
