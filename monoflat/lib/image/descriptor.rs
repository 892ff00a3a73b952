use std::fmt;

use getset::Getters;

use super::FinalImage;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The build descriptor (Dockerfile) of a flattened image.
///
/// Renders as:
///
/// ```text
/// FROM <base>
/// MAINTAINER <author>        (only when there is an author)
/// ADD <archive> /
/// EXPOSE <port> <port> ...     (only when there are ports)
/// CMD <token> <token> ...      (only when there is a command)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct BuildDescriptor {
    /// The image to build on.
    base: String,

    /// The maintainer of the new image.
    author: String,

    /// The archive name, relative to the build context.
    archive_name: String,

    /// The ports to expose.
    ports: Vec<String>,

    /// The command tokens.
    cmd: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BuildDescriptor {
    /// Creates the descriptor of `image`, adding the archive at `archive_name`.
    pub fn new(image: &FinalImage, archive_name: impl Into<String>) -> Self {
        Self {
            base: image.base().clone(),
            author: image.author().clone(),
            archive_name: archive_name.into(),
            ports: image.ports().clone(),
            cmd: image.cmd().clone(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for BuildDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FROM {}", self.base)?;

        if !self.author.trim().is_empty() {
            writeln!(f, "MAINTAINER {}", self.author)?;
        }

        writeln!(f, "ADD {} /", self.archive_name)?;

        if !self.ports.is_empty() {
            writeln!(f, "EXPOSE {}", self.ports.join(" "))?;
        }

        if !self.cmd.is_empty() {
            writeln!(f, "CMD {}", self.cmd.join(" "))?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
