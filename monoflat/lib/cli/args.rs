use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{
        CopierKind, FlattenConfig, DEFAULT_API_VERSION, DEFAULT_DOCKER_SOCKET, DEFAULT_GRAPH_ROOT,
        DEFAULT_LEGACY_ENDPOINT, DEFAULT_SCRATCH_ROOT,
    },
    utils::{
        MONOFLAT_API_VERSION_ENV_VAR, MONOFLAT_DOCKER_SOCKET_ENV_VAR, MONOFLAT_GRAPH_ROOT_ENV_VAR,
        MONOFLAT_LEGACY_ENDPOINT_ENV_VAR, MONOFLAT_SCRATCH_ROOT_ENV_VAR,
    },
};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// monoflat - Collapse a layered container image into a single-layer image
#[derive(Debug, Parser)]
#[command(name = "monoflat", author, about, version, styles=styles::styles())]
pub struct MonoflatArgs {
    /// The image to flatten
    #[arg(value_name = "IMAGE")]
    pub image: String,

    /// Tag name of the new flattened image
    #[arg(short, long, value_name = "TAG")]
    pub tag: String,

    /// Unix socket of the container runtime
    #[arg(long, env = MONOFLAT_DOCKER_SOCKET_ENV_VAR, default_value = DEFAULT_DOCKER_SOCKET)]
    pub docker_socket: PathBuf,

    /// API version prefix used on the unix socket
    #[arg(long, env = MONOFLAT_API_VERSION_ENV_VAR, default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Legacy endpoint tried once when the socket is unreachable
    #[arg(long, env = MONOFLAT_LEGACY_ENDPOINT_ENV_VAR, default_value = DEFAULT_LEGACY_ENDPOINT)]
    pub legacy_endpoint: String,

    /// Root of the runtime's layer graph
    #[arg(long, env = MONOFLAT_GRAPH_ROOT_ENV_VAR, default_value = DEFAULT_GRAPH_ROOT)]
    pub graph_root: PathBuf,

    /// Directory scratch trees and build contexts are created in
    #[arg(long, env = MONOFLAT_SCRATCH_ROOT_ENV_VAR, default_value_os_t = DEFAULT_SCRATCH_ROOT.clone())]
    pub scratch_root: PathBuf,

    /// How layers are copied into the scratch tree
    #[arg(long, value_enum, default_value_t = CopierKind::Native)]
    pub copier: CopierKind,

    /// Keep the scratch tree and build context after a successful run
    #[arg(long)]
    pub keep_scratch: bool,

    /// Write the build context without building the image
    #[arg(long)]
    pub context_only: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl MonoflatArgs {
    /// Returns the run configuration described by the arguments.
    pub fn to_config(&self) -> FlattenConfig {
        FlattenConfig::builder()
            .image(self.image.as_str())
            .tag(self.tag.as_str())
            .docker_socket(self.docker_socket.clone())
            .api_version(self.api_version.as_str())
            .legacy_endpoint(self.legacy_endpoint.as_str())
            .graph_root(self.graph_root.clone())
            .scratch_root(self.scratch_root.clone())
            .copier(self.copier)
            .keep_scratch(self.keep_scratch)
            .context_only(self.context_only)
            .build()
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args_command_is_valid() {
        MonoflatArgs::command().debug_assert();
    }

    #[test]
    fn test_args_to_config() -> anyhow::Result<()> {
        let args = MonoflatArgs::try_parse_from([
            "monoflat",
            "-t",
            "redis:flat",
            "--copier",
            "rsync",
            "--graph-root",
            "/srv/graph",
            "--context-only",
            "library/redis",
        ])?;

        let config = args.to_config();

        assert_eq!(config.image(), "library/redis");
        assert_eq!(config.tag(), "redis:flat");
        assert_eq!(*config.copier(), CopierKind::Rsync);
        assert_eq!(config.graph_root(), &PathBuf::from("/srv/graph"));
        assert!(*config.context_only());
        assert!(!*config.keep_scratch());

        Ok(())
    }

    #[test]
    fn test_args_require_tag() {
        assert!(MonoflatArgs::try_parse_from(["monoflat", "redis"]).is_err());
    }
}
