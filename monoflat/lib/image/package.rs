use std::{
    fs::File,
    io::{self, BufWriter},
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use getset::CopyGetters;
use tar::{Builder, HeaderMode};
use walkdir::WalkDir;

use crate::{MonoflatError, MonoflatResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Trait for serializing a merged tree into a single portable archive.
#[async_trait::async_trait]
pub trait Archiver: Send + Sync {
    /// Archives the content of `source_dir` into `archive_path` and returns the archive path.
    ///
    /// # Errors
    /// Returns [`MonoflatError::ArchiveFailed`] if the archive cannot be written.
    async fn archive(&self, source_dir: &Path, archive_path: &Path) -> MonoflatResult<PathBuf>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Writes gzip-compressed tar archives.
///
/// Entries are stored relative to the archived directory (rooted at `.`), in file name order, with
/// numeric ownership, full permissions and modification times. Symlinks are stored as links, and
/// FIFOs and device nodes as special entries. Sockets cannot be represented and are skipped.
#[derive(Debug, Clone, Copy, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct TarArchiver {
    /// The gzip compression level, 0 to 9.
    level: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TarArchiver {
    /// Creates an archiver with the default compression level.
    pub fn new() -> Self {
        Self {
            level: Compression::default().level(),
        }
    }

    /// Creates an archiver with the given compression level.
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl Archiver for TarArchiver {
    async fn archive(&self, source_dir: &Path, archive_path: &Path) -> MonoflatResult<PathBuf> {
        let source_dir = source_dir.to_path_buf();
        let archive_path = archive_path.to_path_buf();
        let level = Compression::new(self.level);

        tracing::info!(
            "archive {} into {}",
            source_dir.display(),
            archive_path.display()
        );

        tokio::task::spawn_blocking(move || -> MonoflatResult<PathBuf> {
            write_archive(&source_dir, &archive_path, level).map_err(|source| {
                MonoflatError::ArchiveFailed {
                    path: source_dir.clone(),
                    source,
                }
            })?;

            Ok(archive_path)
        })
        .await?
    }
}

impl Default for TarArchiver {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Writes `source_dir` into a gzip-compressed tar at `archive_path`.
fn write_archive(source_dir: &Path, archive_path: &Path, level: Compression) -> io::Result<()> {
    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(BufWriter::new(file), level);

    let mut builder = Builder::new(encoder);
    builder.mode(HeaderMode::Complete);
    builder.follow_symlinks(false);

    builder.append_path_with_name(source_dir, ".")?;
    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        if entry.file_type().is_socket() {
            tracing::warn!("socket ignored: {}", entry.path().display());
            continue;
        }

        builder.append_path_with_name(entry.path(), relative)?;
    }

    builder.into_inner()?.finish()?.into_inner()?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
