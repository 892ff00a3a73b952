//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the path of the runtime's unix socket.
pub const MONOFLAT_DOCKER_SOCKET_ENV_VAR: &str = "MONOFLAT_DOCKER_SOCKET";

/// Environment variable for the API version prefix used on the unix socket.
pub const MONOFLAT_API_VERSION_ENV_VAR: &str = "MONOFLAT_API_VERSION";

/// Environment variable for the legacy TCP endpoint tried when the socket is unreachable.
pub const MONOFLAT_LEGACY_ENDPOINT_ENV_VAR: &str = "MONOFLAT_LEGACY_ENDPOINT";

/// Environment variable for the root of the runtime's layer graph.
pub const MONOFLAT_GRAPH_ROOT_ENV_VAR: &str = "MONOFLAT_GRAPH_ROOT";

/// Environment variable for the directory scratch trees and build contexts are created in.
pub const MONOFLAT_SCRATCH_ROOT_ENV_VAR: &str = "MONOFLAT_SCRATCH_ROOT";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Loads variables from a `.env` file in the current directory or its parents, if there is one.
///
/// Variables already set in the environment take precedence.
pub fn load_env_file() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("failed to load .env file: {}", e),
    }
}
