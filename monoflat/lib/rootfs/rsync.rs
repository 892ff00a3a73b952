use std::{
    io,
    path::{Path, PathBuf},
};

use getset::Getters;
use tokio::process::Command;

use crate::{MonoflatError, MonoflatResult};

use super::LayerCopier;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Archive mode with hard links, sparse files, devices and specials, without crossing filesystems.
const RSYNC_ARGS: [&str; 3] = ["-aHSx", "--devices", "--specials"];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A copier that delegates to the `rsync` binary.
///
/// Ownership is only preserved when the process runs as root.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct RsyncCopier {
    /// The path of the `rsync` binary.
    binary: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RsyncCopier {
    /// Locates `rsync` on `PATH`.
    ///
    /// # Errors
    /// Returns [`MonoflatError::BinaryNotFound`] if `rsync` is not installed.
    pub fn new() -> MonoflatResult<Self> {
        Ok(Self::with_binary(which::which("rsync")?))
    }

    /// Uses the `rsync` binary at `binary`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl LayerCopier for RsyncCopier {
    async fn copy_layer(
        &mut self,
        layer_id: &str,
        source: &Path,
        dest: &Path,
    ) -> MonoflatResult<()> {
        // The trailing slash copies the directory's content rather than the directory itself
        let mut source_contents = source.as_os_str().to_owned();
        source_contents.push("/");

        tracing::debug!(
            "{} {} {} {}",
            self.binary.display(),
            RSYNC_ARGS.join(" "),
            source_contents.to_string_lossy(),
            dest.display()
        );

        let output = Command::new(&self.binary)
            .args(RSYNC_ARGS)
            .arg(&source_contents)
            .arg(dest)
            .output()
            .await
            .map_err(|source_error| MonoflatError::CopyFailed {
                layer: layer_id.to_string(),
                path: source.to_path_buf(),
                source: source_error,
            })?;

        if !output.status.success() {
            return Err(MonoflatError::CopyFailed {
                layer: layer_id.to_string(),
                path: source.to_path_buf(),
                source: io::Error::other(format!(
                    "rsync exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )),
            });
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
