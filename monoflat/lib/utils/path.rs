use std::path::{Path, PathBuf};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of a graph entry that holds the layer's filesystem diff.
pub const GRAPH_LAYER_SUBDIR: &str = "layer";

/// The sub directory of a scratch directory that holds the merged tree.
pub const MERGED_SUBDIR: &str = "merged";

/// The name of the build descriptor written into the build context.
pub const DOCKERFILE_FILENAME: &str = "Dockerfile";

/// The extension of packaged archives.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Prefix of the temporary names entries are materialized under before being renamed into place.
pub const STAGING_PREFIX: &str = ".monoflat~";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns a name that can be used as a single path component.
///
/// Image references like `library/ubuntu:22.04` contain separators that would otherwise create
/// nested directories when used as a temp directory prefix.
///
/// ## Examples
///
/// ```
/// use monoflat::utils::normalize_name;
///
/// assert_eq!(normalize_name("library/ubuntu:22.04"), "library-ubuntu:22.04");
/// ```
pub fn normalize_name(name: &str) -> String {
    name.replace('/', "-")
}

/// Returns the sibling path an entry is staged at before it replaces `target`.
///
/// Returns `None` if `target` has no parent or file name.
pub fn staging_path(target: &Path) -> Option<PathBuf> {
    let parent = target.parent()?;
    let name = target.file_name()?;

    let mut staged = std::ffi::OsString::from(STAGING_PREFIX);
    staged.push(name);

    Some(parent.join(staged))
}

/// Checks that a layer identifier can safely be used as a single path component.
pub fn is_valid_layer_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains('/') && !id.contains('\0')
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_a_sibling() {
        let staged = staging_path(Path::new("/tmp/merged/etc/passwd")).unwrap();
        assert_eq!(staged, PathBuf::from("/tmp/merged/etc/.monoflat~passwd"));
        assert!(staging_path(Path::new("/")).is_none());
    }

    #[test]
    fn test_is_valid_layer_id() {
        assert!(is_valid_layer_id(
            "511136ea3c5a64f264b78b5433614aec563103b4d4702f3ba7d4d2698e22c158"
        ));
        assert!(!is_valid_layer_id(""));
        assert!(!is_valid_layer_id(".."));
        assert!(!is_valid_layer_id("../etc"));
    }
}
