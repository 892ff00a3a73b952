use std::{
    collections::{BTreeMap, HashMap},
    fs::{FileTimes, Metadata},
    io::{self, ErrorKind},
    os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
    time::SystemTime,
};

use nix::{
    libc,
    sys::stat::{self, Mode, SFlag},
    unistd,
};
use tokio::fs;

use crate::{utils, MonoflatError, MonoflatResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Trait for copying a layer's content into the scratch tree.
///
/// Layers are handed to the copier one at a time, oldest first. Each call must overwrite entries
/// that already exist at the same relative path.
#[async_trait::async_trait]
pub trait LayerCopier: Send {
    /// Copies the content of `source` into `dest`.
    ///
    /// # Errors
    /// Returns [`MonoflatError::CopyFailed`] if any entry cannot be copied.
    async fn copy_layer(&mut self, layer_id: &str, source: &Path, dest: &Path)
        -> MonoflatResult<()>;

    /// Finalizes `dest` once every layer is applied and whiteouts are resolved.
    async fn seal(&mut self, _dest: &Path) -> MonoflatResult<()> {
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A native copier that preserves permissions, ownership, timestamps, hard links, symlinks, FIFOs,
/// sockets and device nodes.
///
/// Non-directory entries are created under a staging name next to their target and renamed into
/// place, so every entry is replaced atomically. Directories are kept owner-writable while layers
/// are applied; their recorded metadata is applied by [`LayerCopier::seal`], deepest first.
///
/// Entries that live on a different filesystem than the layer root are skipped.
#[derive(Debug)]
pub struct FsCopier {
    /// Final metadata of every directory in the scratch tree. Later layers overwrite earlier ones.
    deferred_dirs: BTreeMap<PathBuf, EntryMetadata>,

    /// Whether ownership is copied. Only root can change it.
    preserve_ownership: bool,
}

/// The metadata of an entry that is carried into the scratch tree.
#[derive(Debug, Clone)]
struct EntryMetadata {
    mode: u32,
    uid: u32,
    gid: u32,
    accessed: Option<SystemTime>,
    modified: Option<SystemTime>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FsCopier {
    /// Creates a new copier. Ownership is preserved when running as root.
    pub fn new() -> Self {
        Self {
            deferred_dirs: BTreeMap::new(),
            preserve_ownership: unistd::geteuid().is_root(),
        }
    }

    /// Copies a single entry to `target`, replacing whatever is there.
    async fn copy_entry(
        &mut self,
        source: &Path,
        target: &Path,
        metadata: &Metadata,
        hard_links: &mut HashMap<(u64, u64), PathBuf>,
    ) -> io::Result<()> {
        if metadata.is_dir() {
            return self.copy_dir(target, metadata).await;
        }

        let staging = utils::staging_path(target).ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidInput,
                format!("cannot stage {}", target.display()),
            )
        })?;
        remove_non_dir(&staging).await?;

        let link_key = (metadata.dev(), metadata.ino());
        if metadata.nlink() > 1 {
            if let Some(first) = hard_links.get(&link_key) {
                tracing::debug!("Linking: {} -> {}", target.display(), first.display());
                fs::hard_link(first, &staging).await?;
                return self.replace(&staging, target).await;
            }
        }

        self.materialize(source, &staging, metadata).await?;
        self.apply_metadata(&staging, &EntryMetadata::from(metadata), metadata.is_symlink())?;
        self.replace(&staging, target).await?;

        if metadata.nlink() > 1 {
            hard_links.insert(link_key, target.to_path_buf());
        }

        Ok(())
    }

    /// Creates or reuses the directory at `target` and records its final metadata.
    async fn copy_dir(&mut self, target: &Path, metadata: &Metadata) -> io::Result<()> {
        match fs::symlink_metadata(target).await {
            Ok(existing) if existing.is_dir() => {}
            Ok(_) => {
                fs::remove_file(target).await?;
                fs::create_dir(target).await?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Creating directory: {}", target.display());
                fs::create_dir(target).await?;
            }
            Err(e) => return Err(e),
        }

        let writable = std::fs::Permissions::from_mode((metadata.mode() & 0o7777) | 0o700);
        fs::set_permissions(target, writable).await?;
        self.deferred_dirs
            .insert(target.to_path_buf(), EntryMetadata::from(metadata));

        Ok(())
    }

    /// Creates a copy of the non-directory `source` at `staging`.
    async fn materialize(
        &self,
        source: &Path,
        staging: &Path,
        metadata: &Metadata,
    ) -> io::Result<()> {
        let file_type = metadata.file_type();
        let perm = Mode::from_bits_truncate((metadata.mode() & 0o7777) as libc::mode_t);

        if file_type.is_file() {
            tracing::debug!(
                "Copying file: {} -> {}",
                source.display(),
                staging.display()
            );
            fs::copy(source, staging).await?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(source).await?;
            tracing::debug!(
                "Creating symlink: {} -> {}",
                staging.display(),
                link_target.display()
            );
            fs::symlink(&link_target, staging).await?;
        } else if file_type.is_fifo() {
            tracing::debug!("Creating FIFO: {}", staging.display());
            unistd::mkfifo(staging, perm)?;
        } else {
            let kind = if file_type.is_char_device() {
                SFlag::S_IFCHR
            } else if file_type.is_block_device() {
                SFlag::S_IFBLK
            } else if file_type.is_socket() {
                SFlag::S_IFSOCK
            } else {
                return Err(io::Error::new(
                    ErrorKind::Unsupported,
                    format!("unsupported file type at {}", source.display()),
                ));
            };

            tracing::debug!("Creating special file: {}", staging.display());
            stat::mknod(staging, kind, perm, metadata.rdev() as libc::dev_t)?;
        }

        Ok(())
    }

    /// Applies timestamps, ownership and mode to a freshly created entry.
    fn apply_metadata(
        &self,
        path: &Path,
        metadata: &EntryMetadata,
        is_symlink: bool,
    ) -> io::Result<()> {
        if is_symlink {
            if self.preserve_ownership {
                std::os::unix::fs::lchown(path, Some(metadata.uid), Some(metadata.gid))?;
            }
            return Ok(());
        }

        let file_type = std::fs::symlink_metadata(path)?.file_type();
        if file_type.is_file() || file_type.is_dir() {
            // The entry may not be readable or writable with its final mode, so timestamps go first
            let current = std::fs::symlink_metadata(path)?.permissions().mode();
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(current | 0o600))?;
            metadata.set_times(path, file_type.is_dir())?;
        }

        if self.preserve_ownership {
            std::os::unix::fs::lchown(path, Some(metadata.uid), Some(metadata.gid))?;
        }

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(metadata.mode & 0o7777))?;
        tracing::debug!(
            "Applied permissions to {}: {} ({:#o})",
            path.display(),
            utils::format_mode(metadata.mode),
            metadata.mode & 0o7777
        );

        Ok(())
    }

    /// Moves `staging` over `target`, removing a directory in the way first.
    async fn replace(&mut self, staging: &Path, target: &Path) -> io::Result<()> {
        if let Ok(existing) = fs::symlink_metadata(target).await {
            if existing.is_dir() {
                tracing::debug!("Replacing directory: {}", target.display());
                fs::remove_dir_all(target).await?;
                self.deferred_dirs.retain(|path, _| !path.starts_with(target));
            }
        }

        fs::rename(staging, target).await
    }
}

impl EntryMetadata {
    /// Sets the access and modification times on `path`.
    fn set_times(&self, path: &Path, is_dir: bool) -> io::Result<()> {
        let mut times = FileTimes::new();
        if let Some(accessed) = self.accessed {
            times = times.set_accessed(accessed);
        }
        if let Some(modified) = self.modified {
            times = times.set_modified(modified);
        }

        let file = if is_dir {
            std::fs::File::open(path)?
        } else {
            std::fs::OpenOptions::new().write(true).open(path)?
        };

        file.set_times(times)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl LayerCopier for FsCopier {
    async fn copy_layer(
        &mut self,
        layer_id: &str,
        source: &Path,
        dest: &Path,
    ) -> MonoflatResult<()> {
        let copy_failed = |path: &Path| {
            let layer = layer_id.to_string();
            let path = path.to_path_buf();
            move |source: io::Error| MonoflatError::CopyFailed {
                layer,
                path,
                source,
            }
        };

        let root_metadata = fs::symlink_metadata(source)
            .await
            .map_err(copy_failed(source))?;
        let root_dev = root_metadata.dev();

        fs::create_dir_all(dest).await.map_err(copy_failed(dest))?;
        self.copy_dir(dest, &root_metadata)
            .await
            .map_err(copy_failed(source))?;

        let mut hard_links = HashMap::new();
        let mut stack = vec![source.to_path_buf()];

        while let Some(current_dir) = stack.pop() {
            let mut entries = fs::read_dir(&current_dir)
                .await
                .map_err(copy_failed(&current_dir))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(copy_failed(&current_dir))?
            {
                let path = entry.path();
                let metadata = fs::symlink_metadata(&path)
                    .await
                    .map_err(copy_failed(&path))?;

                if metadata.dev() != root_dev {
                    tracing::warn!(
                        "Skipping {}: it is on a different filesystem than layer {}",
                        path.display(),
                        layer_id
                    );
                    continue;
                }

                let relative_path = path.strip_prefix(source).map_err(|e| {
                    copy_failed(&path)(io::Error::new(ErrorKind::InvalidInput, e))
                })?;
                let target_path = dest.join(relative_path);

                self.copy_entry(&path, &target_path, &metadata, &mut hard_links)
                    .await
                    .map_err(copy_failed(&path))?;

                if metadata.is_dir() {
                    stack.push(path);
                }
            }
        }

        Ok(())
    }

    async fn seal(&mut self, dest: &Path) -> MonoflatResult<()> {
        let deferred = std::mem::take(&mut self.deferred_dirs);

        // Descendants sort after their ancestors, so walking backwards seals children first
        for (path, metadata) in deferred.iter().rev() {
            if !path.starts_with(dest) {
                continue;
            }

            match fs::symlink_metadata(path).await {
                Ok(existing) if existing.is_dir() => {}
                _ => continue,
            }

            self.apply_metadata(path, metadata, false)
                .map_err(|source| MonoflatError::CopyFailed {
                    layer: "(seal)".to_string(),
                    path: path.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}

impl Default for FsCopier {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&Metadata> for EntryMetadata {
    fn from(metadata: &Metadata) -> Self {
        Self {
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            accessed: metadata.accessed().ok(),
            modified: metadata.modified().ok(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Removes a leftover non-directory entry at `path`, if any.
async fn remove_non_dir(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempfile::tempdir;

    use super::*;

    #[test_log::test(tokio::test)]
    /// Tests copying files with various permissions and special files.
    ///
    /// Test Structure:
    /// ```text
    /// source/                             dest/
    /// ├── test.txt       (rw-r--r--) ───→ ├── test.txt       (rw-r--r--)
    /// ├── readonly.txt   (r--r--r--) ───→ ├── readonly.txt   (r--r--r--)
    /// ├── test.fifo      (rw-r--r--) ───→ ├── test.fifo      (rw-r--r--)
    /// ├── link.txt     → test.txt ──────→ ├── link.txt     → test.txt
    /// ├── hard.txt     (same inode as test.txt)
    /// │                                   ├── hard.txt     (same inode as test.txt)
    /// └── sealed/        (r-x------) ───→ └── sealed/        (r-x------)
    ///     └── inner.txt  (r--------) ───→     └── inner.txt  (r--------)
    /// ```
    async fn test_rootfs_fs_copier_preserves_entries() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let source_dir = temp.path().join("source");
        let dest_dir = temp.path().join("dest");
        helper::create_test_fixtures(&source_dir).await?;

        let mut copier = FsCopier::new();
        copier.copy_layer("l1", &source_dir, &dest_dir).await?;

        // Directories stay writable until sealed
        assert_eq!(helper::mode(&dest_dir.join("sealed"))? & 0o700, 0o700);
        copier.seal(&dest_dir).await?;

        assert_eq!(fs::read_to_string(dest_dir.join("test.txt")).await?, "test content");
        assert_eq!(helper::mode(&dest_dir.join("test.txt"))?, 0o644);
        assert_eq!(helper::mode(&dest_dir.join("readonly.txt"))?, 0o444);
        assert_eq!(helper::mode(&dest_dir.join("sealed"))?, 0o500);
        assert_eq!(helper::mode(&dest_dir.join("sealed/inner.txt"))?, 0o400);

        let fifo = fs::symlink_metadata(dest_dir.join("test.fifo")).await?;
        assert!(fifo.file_type().is_fifo());
        assert_eq!(fifo.permissions().mode() & 0o777, 0o644);

        assert_eq!(
            fs::read_link(dest_dir.join("link.txt")).await?,
            PathBuf::from("test.txt")
        );

        let original = fs::metadata(dest_dir.join("test.txt")).await?;
        let hard = fs::metadata(dest_dir.join("hard.txt")).await?;
        assert_eq!(original.ino(), hard.ino());

        let source_mtime = fs::metadata(source_dir.join("test.txt")).await?.modified()?;
        assert_eq!(original.modified()?, source_mtime);

        // No staging entries are left behind
        let mut entries = fs::read_dir(&dest_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            assert!(!entry
                .file_name()
                .to_string_lossy()
                .starts_with(utils::STAGING_PREFIX));
        }

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_fs_copier_overwrites_across_types() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let lower = temp.path().join("lower");
        let upper = temp.path().join("upper");
        let dest_dir = temp.path().join("dest");

        // lower: `a` is a directory, `b` is a file, `c` is a file
        fs::create_dir_all(lower.join("a/nested")).await?;
        fs::write(lower.join("a/nested/deep.txt"), "deep").await?;
        fs::write(lower.join("b"), "file b").await?;
        fs::write(lower.join("c"), "old c").await?;

        // upper: `a` becomes a file, `b` becomes a directory, `c` becomes a symlink
        fs::create_dir_all(&upper).await?;
        fs::write(upper.join("a"), "file a").await?;
        fs::create_dir(upper.join("b")).await?;
        fs::write(upper.join("b/inside.txt"), "inside").await?;
        symlink("b/inside.txt", upper.join("c"))?;

        let mut copier = FsCopier::new();
        copier.copy_layer("lower", &lower, &dest_dir).await?;
        copier.copy_layer("upper", &upper, &dest_dir).await?;
        copier.seal(&dest_dir).await?;

        assert_eq!(fs::read_to_string(dest_dir.join("a")).await?, "file a");
        assert!(fs::metadata(dest_dir.join("b")).await?.is_dir());
        assert_eq!(
            fs::read_to_string(dest_dir.join("b/inside.txt")).await?,
            "inside"
        );
        assert!(fs::symlink_metadata(dest_dir.join("c"))
            .await?
            .file_type()
            .is_symlink());
        assert_eq!(fs::read_to_string(dest_dir.join("c")).await?, "inside");

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_fs_copier_writes_into_read_only_lower_directory() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let lower = temp.path().join("lower");
        let upper = temp.path().join("upper");
        let dest_dir = temp.path().join("dest");

        fs::create_dir_all(lower.join("etc")).await?;
        fs::write(lower.join("etc/hosts"), "old").await?;
        fs::set_permissions(lower.join("etc"), std::fs::Permissions::from_mode(0o555)).await?;

        fs::create_dir_all(upper.join("etc")).await?;
        fs::write(upper.join("etc/hosts"), "new").await?;
        fs::set_permissions(upper.join("etc"), std::fs::Permissions::from_mode(0o555)).await?;

        let mut copier = FsCopier::new();
        copier.copy_layer("lower", &lower, &dest_dir).await?;
        copier.copy_layer("upper", &upper, &dest_dir).await?;
        copier.seal(&dest_dir).await?;

        assert_eq!(fs::read_to_string(dest_dir.join("etc/hosts")).await?, "new");
        assert_eq!(helper::mode(&dest_dir.join("etc"))?, 0o555);

        // Let the temp dir clean up after itself
        for dir in [lower.join("etc"), upper.join("etc"), dest_dir.join("etc")] {
            fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rootfs_fs_copier_missing_source_fails() -> anyhow::Result<()> {
        let temp = tempdir()?;

        let mut copier = FsCopier::new();
        let result = copier
            .copy_layer("l1", &temp.path().join("missing"), &temp.path().join("dest"))
            .await;

        assert!(matches!(
            result,
            Err(MonoflatError::CopyFailed { layer, .. }) if layer == "l1"
        ));

        Ok(())
    }

    mod helper {
        use super::*;

        pub(super) fn mode(path: &Path) -> io::Result<u32> {
            Ok(std::fs::symlink_metadata(path)?.permissions().mode() & 0o7777)
        }

        /// Creates test fixtures with various file types and permissions for testing copy functionality
        pub(super) async fn create_test_fixtures(source_dir: &Path) -> anyhow::Result<()> {
            fs::create_dir(source_dir).await?;

            let test_file = source_dir.join("test.txt");
            fs::write(&test_file, "test content").await?;
            fs::set_permissions(&test_file, std::fs::Permissions::from_mode(0o644)).await?;
            fs::hard_link(&test_file, source_dir.join("hard.txt")).await?;

            let readonly_file = source_dir.join("readonly.txt");
            fs::write(&readonly_file, "readonly content").await?;
            fs::set_permissions(&readonly_file, std::fs::Permissions::from_mode(0o444)).await?;

            let sealed_dir = source_dir.join("sealed");
            fs::create_dir(&sealed_dir).await?;
            let inner_file = sealed_dir.join("inner.txt");
            fs::write(&inner_file, "inner content").await?;
            fs::set_permissions(&inner_file, std::fs::Permissions::from_mode(0o400)).await?;
            fs::set_permissions(&sealed_dir, std::fs::Permissions::from_mode(0o500)).await?;

            unistd::mkfifo(&source_dir.join("test.fifo"), Mode::from_bits_truncate(0o644))?;
            fs::set_permissions(
                source_dir.join("test.fifo"),
                std::fs::Permissions::from_mode(0o644),
            )
            .await?;

            symlink("test.txt", source_dir.join("link.txt"))?;

            Ok(())
        }
    }
}
