use std::{path::PathBuf, sync::LazyLock};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The unix socket the container runtime listens on.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// The API version prefix used for requests over the unix socket.
pub const DEFAULT_API_VERSION: &str = "v1.4";

/// The legacy TCP endpoint (including its API version prefix) tried when the socket is unreachable.
pub const DEFAULT_LEGACY_ENDPOINT: &str = "http://localhost:4243/v1.3";

/// The directory holding one entry per layer, each with a `layer/` diff directory.
pub const DEFAULT_GRAPH_ROOT: &str = "/var/lib/docker/graph";

/// The directory scratch trees and build contexts are created in.
pub static DEFAULT_SCRATCH_ROOT: LazyLock<PathBuf> = LazyLock::new(std::env::temp_dir);
