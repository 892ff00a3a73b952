use std::{
    ffi::OsStr,
    io::ErrorKind,
    ops::AddAssign,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use getset::CopyGetters;
use tokio::fs;
use walkdir::WalkDir;

use crate::{MonoflatError, MonoflatResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The file name prefix that marks a whiteout.
///
/// A marker `.wh.<name>` records that `<name>` in the same directory was deleted by the layer that
/// carries the marker.
pub const WHITEOUT_PREFIX: &str = ".wh.";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a whiteout pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct WhiteoutReport {
    /// The number of markers removed.
    markers_removed: usize,

    /// The number of shadowed entries removed.
    targets_removed: usize,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Applies every whiteout marker in `tree` and removes the markers.
///
/// For each marker `.wh.<name>`, the sibling `<name>` is removed recursively if it exists, then the
/// marker itself is removed. Symlinks are never followed and entries that are already gone are
/// ignored, so a marker inside a directory that another marker removed is not an error.
///
/// Marker names with nothing after the prefix only remove the marker. Opaque-directory markers
/// (`.wh..wh..opq`) are treated the same way as any other marker.
///
/// # Errors
/// Returns [`MonoflatError::WhiteoutFailed`] if the tree cannot be walked or an entry cannot be
/// removed.
pub async fn resolve_whiteouts(tree: impl AsRef<Path>) -> MonoflatResult<WhiteoutReport> {
    let tree = tree.as_ref();
    let markers = find_markers(tree).await?;
    tracing::debug!("found {} whiteout marker(s) in {}", markers.len(), tree.display());

    let mut report = WhiteoutReport::default();
    for marker in markers {
        if let Some(target) = whiteout_target(&marker) {
            if remove_entry(&target).await? {
                tracing::debug!("whiteout removed {}", target.display());
                report.targets_removed += 1;
            }
        }

        if remove_entry(&marker).await? {
            report.markers_removed += 1;
        }
    }

    Ok(report)
}

/// Retires the whiteouts in `dest` that the layer at `source` overrides.
///
/// A marker only shadows the layers applied before it. When `source` carries a real entry at a
/// path an earlier layer whited out, the earlier marker is applied now: the shadowed entry and the
/// marker are removed from `dest`, so the layer can be copied in and the final
/// [`resolve_whiteouts`] pass leaves it alone. Must run before `source` is copied into `dest`.
///
/// Entries of `source` on another filesystem are not considered.
///
/// # Errors
/// Returns [`MonoflatError::WhiteoutFailed`] if `source` cannot be walked or an entry in `dest`
/// cannot be removed.
pub async fn retire_overridden_whiteouts(
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> MonoflatResult<WhiteoutReport> {
    let dest = dest.as_ref();
    let entries = find_entries(source.as_ref()).await?;

    let mut report = WhiteoutReport::default();
    for relative in entries {
        let target = dest.join(&relative);
        let Some(marker) = whiteout_marker(&target) else {
            continue;
        };

        match fs::symlink_metadata(&marker).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(MonoflatError::WhiteoutFailed {
                    path: marker,
                    source: e,
                })
            }
        }

        if remove_entry(&target).await? {
            tracing::debug!("whiteout removed {} before it is re-added", target.display());
            report.targets_removed += 1;
        }

        if remove_entry(&marker).await? {
            report.markers_removed += 1;
        }
    }

    Ok(report)
}

/// Returns `true` if `name` is a whiteout marker.
pub fn is_whiteout(name: &OsStr) -> bool {
    name.as_bytes().starts_with(WHITEOUT_PREFIX.as_bytes())
}

/// Returns the path a whiteout marker shadows, or `None` if `marker` is not a marker or names
/// nothing.
///
/// ## Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use monoflat::rootfs::whiteout_target;
///
/// assert_eq!(
///     whiteout_target(Path::new("/merged/etc/.wh.motd")),
///     Some(PathBuf::from("/merged/etc/motd"))
/// );
/// assert_eq!(whiteout_target(Path::new("/merged/etc/.wh.")), None);
/// assert_eq!(whiteout_target(Path::new("/merged/etc/motd")), None);
/// ```
pub fn whiteout_target(marker: &Path) -> Option<PathBuf> {
    let name = marker.file_name()?;
    if !is_whiteout(name) {
        return None;
    }

    let target = &name.as_bytes()[WHITEOUT_PREFIX.len()..];
    if target.is_empty() {
        return None;
    }

    Some(marker.with_file_name(OsStr::from_bytes(target)))
}

/// Returns the marker that would shadow `target`, or `None` if `target` has no file name.
///
/// ## Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use monoflat::rootfs::whiteout_marker;
///
/// assert_eq!(
///     whiteout_marker(Path::new("/merged/etc/motd")),
///     Some(PathBuf::from("/merged/etc/.wh.motd"))
/// );
/// ```
pub fn whiteout_marker(target: &Path) -> Option<PathBuf> {
    let name = target.file_name()?;

    let mut marker = std::ffi::OsString::from(WHITEOUT_PREFIX);
    marker.push(name);

    Some(target.with_file_name(marker))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Collects the relative paths of the entries in `source` that are not markers, parents first.
async fn find_entries(source: &Path) -> MonoflatResult<Vec<PathBuf>> {
    let root = source.to_path_buf();

    tokio::task::spawn_blocking(move || -> MonoflatResult<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1).same_file_system(true) {
            let entry = entry.map_err(|e| MonoflatError::WhiteoutFailed {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone()),
                source: e.into(),
            })?;

            if is_whiteout(entry.file_name()) {
                continue;
            }

            if let Ok(relative) = entry.path().strip_prefix(&root) {
                entries.push(relative.to_path_buf());
            }
        }

        Ok(entries)
    })
    .await?
}

/// Collects every marker in `tree`, in walk order.
async fn find_markers(tree: &Path) -> MonoflatResult<Vec<PathBuf>> {
    let root = tree.to_path_buf();

    tokio::task::spawn_blocking(move || -> MonoflatResult<Vec<PathBuf>> {
        let mut markers = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1) {
            let entry = entry.map_err(|e| MonoflatError::WhiteoutFailed {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone()),
                source: e.into(),
            })?;

            if is_whiteout(entry.file_name()) {
                markers.push(entry.into_path());
            }
        }

        Ok(markers)
    })
    .await?
}

/// Removes the entry at `path` without following symlinks.
///
/// Returns `false` if there was nothing to remove.
async fn remove_entry(path: &Path) -> MonoflatResult<bool> {
    let whiteout_failed = |source| MonoflatError::WhiteoutFailed {
        path: path.to_path_buf(),
        source,
    };

    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(whiteout_failed(e)),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(whiteout_failed(e)),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl AddAssign for WhiteoutReport {
    fn add_assign(&mut self, other: Self) {
        self.markers_removed += other.markers_removed;
        self.targets_removed += other.targets_removed;
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
