use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use getset::Getters;
use tokio::fs;
use typed_builder::TypedBuilder;

use crate::{
    config::{CopierKind, FlattenConfig},
    image::{Archiver, DockerCliBuilder, FinalImage, ImageAssembler, ImageBuilder, TarArchiver},
    layer::{GraphLayerStore, LayerChain, LayerStore},
    rootfs::{self, FsCopier, LayerCopier, LayerMerger, RsyncCopier, WhiteoutReport},
    runtime::{DockerEngine, ImageRuntime},
    utils::{self, ARCHIVE_EXTENSION, MERGED_SUBDIR},
    MonoflatResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A step of the flatten pipeline. Failures are tagged with the stage they happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Locating the tools a run needs.
    Setup,

    /// Fetching the image's history and layer metadata.
    History,

    /// Merging the layers into a scratch tree.
    Merge,

    /// Archiving the merged tree.
    Package,

    /// Writing the build context and building the new image.
    Assemble,
}

/// Flattens an image into a new single-layer image.
///
/// ## Pipeline
///
/// ```text
/// history ──→ merge ──────────────→ package ───────────→ assemble
/// (chain)     (scratch/merged/)     (scratch/*.tar.gz)   (build context, image)
/// ```
///
/// Every layer of the image except its base is merged; the new image is declared on top of the
/// base.
///
/// ## Examples
///
/// ```no_run
/// use monoflat::{config::FlattenConfig, Flattener};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = FlattenConfig::builder()
///     .image("redis")
///     .tag("redis:flat")
///     .build();
///
/// let outcome = Flattener::from_config(&config)?
///     .flatten(config.image(), config.tag())
///     .await?;
/// println!("base: {}", outcome.image().base());
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct Flattener {
    /// Where image metadata comes from.
    runtime: Arc<dyn ImageRuntime>,

    /// Where layer content comes from.
    store: Arc<dyn LayerStore>,

    /// How layer content is copied into the scratch tree.
    copier: Box<dyn LayerCopier>,

    /// How the merged tree is archived.
    archiver: Arc<dyn Archiver>,

    /// The image builder. Without one, only the build context is written.
    #[builder(default, setter(strip_option))]
    builder: Option<Arc<dyn ImageBuilder>>,

    /// The directory scratch trees and build contexts are created in.
    #[builder(setter(into))]
    scratch_root: PathBuf,

    /// Keep the scratch tree and build context after a successful run.
    #[builder(default)]
    keep_scratch: bool,
}

/// The result of a successful flatten.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct FlattenOutcome {
    /// The image that was produced.
    image: FinalImage,

    /// The ids of the merged layers, oldest first.
    layers_merged: Vec<String>,

    /// What the whiteout pass removed.
    whiteouts: WhiteoutReport,

    /// The build context, if it was kept.
    context_dir: Option<PathBuf>,

    /// The scratch directory, if it was kept.
    scratch_dir: Option<PathBuf>,

    /// Whether the image builder ran.
    built: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Flattener {
    /// Creates a flattener backed by the container runtime described in `config`.
    ///
    /// # Errors
    /// Returns error tagged with [`Stage::Setup`] if:
    /// - A required binary (`rsync` or `docker`) is not installed
    /// - The runtime client cannot be built
    pub fn from_config(config: &FlattenConfig) -> MonoflatResult<Self> {
        let copier: Box<dyn LayerCopier> = match config.copier() {
            CopierKind::Native => Box::new(FsCopier::new()),
            CopierKind::Rsync => Box::new(RsyncCopier::new().map_err(|e| e.at(Stage::Setup))?),
        };

        let builder: Option<Arc<dyn ImageBuilder>> = if *config.context_only() {
            None
        } else {
            let builder = DockerCliBuilder::new().map_err(|e| e.at(Stage::Setup))?;
            Some(Arc::new(builder))
        };

        let runtime = DockerEngine::from_config(config).map_err(|e| e.at(Stage::Setup))?;

        Ok(Self {
            runtime: Arc::new(runtime),
            store: Arc::new(GraphLayerStore::new(config.graph_root())),
            copier,
            archiver: Arc::new(TarArchiver::new()),
            builder,
            scratch_root: config.scratch_root().clone(),
            keep_scratch: *config.keep_scratch(),
        })
    }

    /// Flattens `image` into a new image tagged `tag`.
    ///
    /// On success the scratch tree is removed, and so is the build context once the image is
    /// built, unless the flattener keeps scratch. On failure both are left in place and their
    /// location is logged.
    ///
    /// # Errors
    /// Returns [`crate::MonoflatError::StageFailed`] naming the stage that failed.
    pub async fn flatten(self, image: &str, tag: &str) -> MonoflatResult<FlattenOutcome> {
        let Flattener {
            runtime,
            store,
            copier,
            archiver,
            builder,
            scratch_root,
            keep_scratch,
        } = self;

        // History
        let chain = LayerChain::fetch(runtime.as_ref(), image)
            .await
            .map_err(|e| e.at(Stage::History))?;
        let final_image = FinalImage::derive(&chain, tag).map_err(|e| e.at(Stage::History))?;
        tracing::info!(
            "{} has {} layer(s); flattening onto base {}",
            image,
            chain.len(),
            final_image.base()
        );

        // Merge
        let scratch_dir = create_scratch_dir(&scratch_root, image)
            .await
            .map_err(|e| e.at(Stage::Merge))?;
        let merged = LayerMerger::new(store, copier)
            .merge(&chain.without_base(), scratch_dir.join(MERGED_SUBDIR))
            .await
            .map_err(|e| {
                leave_scratch(&scratch_dir);
                e.at(Stage::Merge)
            })?;

        // Package
        tracing::info!("prepare archived contents");
        let archive_path = scratch_dir.join(archive_name(&scratch_dir));
        let archive_path = archiver
            .archive(merged.root(), &archive_path)
            .await
            .map_err(|e| {
                leave_scratch(&scratch_dir);
                e.at(Stage::Package)
            })?;
        let final_image = final_image.with_archive(&archive_path);

        // Assemble
        let assembler = match builder {
            Some(builder) => ImageAssembler::new(&scratch_root, builder),
            None => ImageAssembler::context_only(&scratch_root),
        };
        let assembled = assembler.assemble(&final_image).await.map_err(|e| {
            leave_scratch(&scratch_dir);
            e.at(Stage::Assemble)
        })?;
        let built = assembled.tag().is_some();

        let scratch_dir = if keep_scratch {
            tracing::info!("keeping scratch tree at {}", scratch_dir.display());
            Some(scratch_dir)
        } else {
            discard(&scratch_dir).await;
            None
        };

        let context_dir = if keep_scratch || !built {
            Some(assembled.context_dir().clone())
        } else {
            discard(assembled.context_dir()).await;
            None
        };

        Ok(FlattenOutcome {
            image: final_image,
            layers_merged: merged.layers_applied().clone(),
            whiteouts: *merged.whiteouts(),
            context_dir,
            scratch_dir,
            built,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Creates a fresh scratch directory for `image` under `scratch_root`.
async fn create_scratch_dir(scratch_root: &Path, image: &str) -> MonoflatResult<PathBuf> {
    fs::create_dir_all(scratch_root).await?;
    let scratch_dir = tempfile::Builder::new()
        .prefix(&utils::normalize_name(image))
        .tempdir_in(scratch_root)?
        .keep();

    tracing::info!("sync layers into {}", scratch_dir.display());
    Ok(scratch_dir)
}

/// Returns the archive file name for a scratch directory: its own name plus the archive
/// extension.
fn archive_name(scratch_dir: &Path) -> String {
    let stem = scratch_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flattened".to_string());

    format!("{}.{}", stem, ARCHIVE_EXTENSION)
}

fn leave_scratch(scratch_dir: &Path) {
    tracing::warn!("scratch tree left at {}", scratch_dir.display());
}

/// Removes a directory the run no longer needs. Failures are logged, not returned.
async fn discard(dir: &Path) {
    if let Err(e) = rootfs::remove(dir).await {
        tracing::warn!("failed to remove {}: {}", dir.display(), e);
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Setup => write!(f, "setup"),
            Stage::History => write!(f, "history"),
            Stage::Merge => write!(f, "merge"),
            Stage::Package => write!(f, "package"),
            Stage::Assemble => write!(f, "assemble"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Setup.to_string(), "setup");
        assert_eq!(Stage::History.to_string(), "history");
        assert_eq!(Stage::Merge.to_string(), "merge");
        assert_eq!(Stage::Package.to_string(), "package");
        assert_eq!(Stage::Assemble.to_string(), "assemble");
    }

    #[test]
    fn test_from_config_tags_missing_tools_with_setup() {
        let config = FlattenConfig::builder()
            .image("redis")
            .tag("redis:flat")
            .copier(CopierKind::Rsync)
            .context_only(true)
            .build();

        match (Flattener::from_config(&config), which::which("rsync")) {
            (Ok(_), Ok(_)) => {}
            (Err(e), Err(_)) => {
                assert_eq!(e.stage(), Some(Stage::Setup));
                assert!(e.to_string().starts_with("setup failed: binary not found"));
            }
            (result, rsync) => panic!(
                "from_config returned {:?} while rsync lookup returned {:?}",
                result.err(),
                rsync
            ),
        }
    }

    #[test]
    fn test_archive_name_follows_scratch_dir() {
        assert_eq!(
            archive_name(Path::new("/tmp/redis3xYz")),
            "redis3xYz.tar.gz"
        );
    }
}
