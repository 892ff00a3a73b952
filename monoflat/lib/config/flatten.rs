use std::{fmt, path::PathBuf};

use getset::Getters;
use typed_builder::TypedBuilder;

use super::{
    DEFAULT_API_VERSION, DEFAULT_DOCKER_SOCKET, DEFAULT_GRAPH_ROOT, DEFAULT_LEGACY_ENDPOINT,
    DEFAULT_SCRATCH_ROOT,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Settings for a single flatten run.
///
/// ## Examples
///
/// ```
/// use monoflat::config::{CopierKind, FlattenConfig};
///
/// let config = FlattenConfig::builder()
///     .image("library/redis")
///     .tag("redis:flat")
///     .copier(CopierKind::Rsync)
///     .build();
///
/// assert_eq!(config.image(), "library/redis");
/// assert_eq!(config.api_version(), "v1.4");
/// ```
#[derive(Debug, Clone, TypedBuilder, Getters)]
#[getset(get = "pub")]
pub struct FlattenConfig {
    /// The image to flatten.
    #[builder(setter(into))]
    image: String,

    /// The tag of the flattened image.
    #[builder(setter(into))]
    tag: String,

    /// The unix socket of the container runtime.
    #[builder(default = PathBuf::from(DEFAULT_DOCKER_SOCKET), setter(into))]
    docker_socket: PathBuf,

    /// The API version prefix used on the unix socket.
    #[builder(default = DEFAULT_API_VERSION.to_string(), setter(into))]
    api_version: String,

    /// The legacy endpoint tried once when the socket is unreachable.
    #[builder(default = DEFAULT_LEGACY_ENDPOINT.to_string(), setter(into))]
    legacy_endpoint: String,

    /// The root of the runtime's layer graph.
    #[builder(default = PathBuf::from(DEFAULT_GRAPH_ROOT), setter(into))]
    graph_root: PathBuf,

    /// The directory scratch trees and build contexts are created in.
    #[builder(default = DEFAULT_SCRATCH_ROOT.clone(), setter(into))]
    scratch_root: PathBuf,

    /// How layers are copied into the scratch tree.
    #[builder(default)]
    copier: CopierKind,

    /// Keep the scratch tree after a successful run.
    #[builder(default)]
    keep_scratch: bool,

    /// Write the build context but do not invoke the image builder.
    #[builder(default)]
    context_only: bool,
}

/// The strategy used to copy layer content into the scratch tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CopierKind {
    /// Copy entries natively.
    #[default]
    Native,

    /// Delegate to `rsync`.
    Rsync,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for CopierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopierKind::Native => write!(f, "native"),
            CopierKind::Rsync => write!(f, "rsync"),
        }
    }
}
