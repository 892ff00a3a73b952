use std::path::{Path, PathBuf};

use getset::Getters;

use crate::{layer::LayerChain, MonoflatError, MonoflatResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The number of leading tokens dropped from an inherited command (the shell and `-c`).
const SHELL_PREFIX_LEN: usize = 2;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The definition of the single-layer image a run produces.
///
/// The new image is declared on top of the chain's base layer and inherits the author, exposed
/// ports and command of the most-derived layer.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct FinalImage {
    /// The id of the base layer the new image is built `FROM`.
    base: String,

    /// The tag of the new image.
    name: String,

    /// The author inherited from the most-derived layer.
    author: String,

    /// The ports inherited from the most-derived layer.
    ports: Vec<String>,

    /// The normalized command inherited from the most-derived layer.
    cmd: Vec<String>,

    /// The packaged archive of the merged tree, once it exists.
    archive: Option<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FinalImage {
    /// Derives the new image from `chain`.
    ///
    /// # Errors
    /// Returns [`MonoflatError::EmptyChain`] if the chain has fewer than two layers.
    pub fn derive(chain: &LayerChain, new_name: impl Into<String>) -> MonoflatResult<Self> {
        if chain.len() < 2 {
            return Err(MonoflatError::EmptyChain(chain.len()));
        }

        let (Some(most_derived), Some(base)) = (chain.most_derived(), chain.base()) else {
            return Err(MonoflatError::EmptyChain(chain.len()));
        };

        Ok(Self {
            base: base.id().clone(),
            name: new_name.into(),
            author: most_derived.author().clone(),
            ports: most_derived.config().ports(),
            cmd: normalize_cmd(most_derived.config().cmd()),
            archive: None,
        })
    }

    /// Sets the packaged archive.
    pub fn with_archive(mut self, archive: impl AsRef<Path>) -> Self {
        self.archive = Some(archive.as_ref().to_path_buf());
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Strips the shell prefix from an inherited command.
///
/// Commands recorded by the runtime are usually wrapped as `/bin/sh -c <command>`. This is a
/// heuristic: when a command has more than two tokens the first two are dropped, otherwise the
/// command is discarded. The tokens themselves are not inspected.
///
/// ## Examples
///
/// ```
/// use monoflat::image::normalize_cmd;
///
/// let cmd = ["/bin/sh", "-c", "echo hi"].map(String::from);
/// assert_eq!(normalize_cmd(&cmd), vec!["echo hi".to_string()]);
///
/// let cmd = ["echo", "hi"].map(String::from);
/// assert!(normalize_cmd(&cmd).is_empty());
/// ```
pub fn normalize_cmd(cmd: &[String]) -> Vec<String> {
    if cmd.len() > SHELL_PREFIX_LEN {
        cmd[SHELL_PREFIX_LEN..].to_vec()
    } else {
        Vec::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
