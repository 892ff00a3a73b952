use std::{io::ErrorKind, os::unix::fs::PermissionsExt, path::Path};

use tokio::fs;

use crate::{utils, MonoflatResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Removes a scratch directory and everything in it.
///
/// Merged trees keep the modes of the original layers, so directories may not be writable by the
/// current user. Every directory is made owner-accessible before the tree is removed.
///
/// Does nothing if `dir` does not exist.
///
/// # Errors
/// Returns error if a directory cannot be made accessible or the tree cannot be removed.
pub async fn remove(dir: impl AsRef<Path>) -> MonoflatResult<()> {
    let dir = dir.as_ref();
    match fs::symlink_metadata(dir).await {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Ok(fs::remove_file(dir).await?),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let mut dir_stack = vec![dir.to_path_buf()];
    while let Some(current_dir) = dir_stack.pop() {
        let mode = fs::symlink_metadata(&current_dir).await?.permissions().mode();
        if mode & 0o700 != 0o700 {
            fs::set_permissions(&current_dir, std::fs::Permissions::from_mode(mode | 0o700))
                .await?;
            tracing::debug!(
                "Made directory accessible: {}, mode: {} -> {}",
                current_dir.display(),
                utils::format_mode(mode),
                utils::format_mode(mode | 0o700)
            );
        }

        let mut entries = fs::read_dir(&current_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dir_stack.push(entry.path());
            }
        }
    }

    match fs::remove_dir_all(dir).await {
        Ok(_) => tracing::debug!("Successfully removed {}", dir.display()),
        Err(e) => {
            tracing::error!("Failed to remove {}: {}", dir.display(), e);
            return Err(e.into());
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
