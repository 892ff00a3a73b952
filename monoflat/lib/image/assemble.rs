use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use getset::Getters;
use tokio::{fs, process::Command};

use crate::{
    utils::{self, DOCKERFILE_FILENAME},
    MonoflatError, MonoflatResult,
};

use super::{BuildDescriptor, FinalImage};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Trait for turning a build context into a tagged image.
#[async_trait::async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds the context at `context_dir` and tags the result as `tag`.
    ///
    /// # Errors
    /// Returns [`MonoflatError::BuildFailed`] if no image was produced.
    async fn build(&self, context_dir: &Path, tag: &str) -> MonoflatResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Builds images with the `docker` command line client.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct DockerCliBuilder {
    /// The path of the `docker` binary.
    binary: PathBuf,
}

/// Writes the build context of a [`FinalImage`] and hands it to an [`ImageBuilder`].
pub struct ImageAssembler {
    scratch_root: PathBuf,
    builder: Option<Arc<dyn ImageBuilder>>,
}

/// The outcome of an assembly.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct AssembledImage {
    /// The build context directory.
    context_dir: PathBuf,

    /// The tag of the image, if one was built.
    tag: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerCliBuilder {
    /// Locates `docker` on `PATH`.
    ///
    /// # Errors
    /// Returns [`MonoflatError::BinaryNotFound`] if `docker` is not installed.
    pub fn new() -> MonoflatResult<Self> {
        Ok(Self::with_binary(which::which("docker")?))
    }

    /// Uses the `docker` binary at `binary`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ImageAssembler {
    /// Creates an assembler that writes build contexts under `scratch_root` and builds them with
    /// `builder`.
    pub fn new(scratch_root: impl AsRef<Path>, builder: Arc<dyn ImageBuilder>) -> Self {
        Self {
            scratch_root: scratch_root.as_ref().to_path_buf(),
            builder: Some(builder),
        }
    }

    /// Creates an assembler that only writes build contexts.
    pub fn context_only(scratch_root: impl AsRef<Path>) -> Self {
        Self {
            scratch_root: scratch_root.as_ref().to_path_buf(),
            builder: None,
        }
    }

    /// Writes the build context of `image` and builds it.
    ///
    /// The context is a fresh directory under the scratch root holding a copy of the image's
    /// archive and a Dockerfile that adds it at `/`.
    ///
    /// # Errors
    /// Returns error if:
    /// - The image has no archive
    /// - The context directory cannot be written
    /// - The builder fails
    pub async fn assemble(&self, image: &FinalImage) -> MonoflatResult<AssembledImage> {
        let context_dir = self.write_context(image).await?;

        let Some(builder) = &self.builder else {
            tracing::info!("build context ready at {}", context_dir.display());
            return Ok(AssembledImage {
                context_dir,
                tag: None,
            });
        };

        tracing::info!("create new image {}", image.name());
        builder.build(&context_dir, image.name()).await?;

        Ok(AssembledImage {
            context_dir,
            tag: Some(image.name().clone()),
        })
    }

    /// Prepares the build context directory of `image`.
    async fn write_context(&self, image: &FinalImage) -> MonoflatResult<PathBuf> {
        let archive = image.archive().as_ref().ok_or_else(|| {
            MonoflatError::custom(anyhow::anyhow!("image {} has no archive", image.name()))
        })?;
        let archive_name = archive
            .file_name()
            .ok_or_else(|| {
                MonoflatError::custom(anyhow::anyhow!(
                    "archive path {} has no file name",
                    archive.display()
                ))
            })?
            .to_string_lossy()
            .into_owned();

        fs::create_dir_all(&self.scratch_root).await?;
        let context_dir = tempfile::Builder::new()
            .prefix(&utils::normalize_name(image.name()))
            .tempdir_in(&self.scratch_root)?
            .keep();
        tracing::info!(
            "prepare a directory to build new image {}",
            context_dir.display()
        );

        tracing::debug!("copy archive file over");
        fs::copy(archive, context_dir.join(&archive_name)).await?;

        tracing::debug!("create dockerfile");
        let descriptor = BuildDescriptor::new(image, archive_name);
        fs::write(context_dir.join(DOCKERFILE_FILENAME), descriptor.to_string()).await?;

        Ok(context_dir)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl ImageBuilder for DockerCliBuilder {
    async fn build(&self, context_dir: &Path, tag: &str) -> MonoflatResult<()> {
        tracing::debug!(
            "{} build -t {} . (in {})",
            self.binary.display(),
            tag,
            context_dir.display()
        );

        let output = Command::new(&self.binary)
            .args(["build", "-t", tag, "."])
            .current_dir(context_dir)
            .output()
            .await
            .map_err(|e| {
                MonoflatError::BuildFailed(format!(
                    "could not run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(MonoflatError::BuildFailed(format!(
                "{} build exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
