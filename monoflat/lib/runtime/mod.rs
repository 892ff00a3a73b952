//! Access to the container runtime's image metadata.
//!
//! The flatten pipeline only needs two calls from the runtime: the history of an image and the
//! inspect record of each layer in it. [`ImageRuntime`] captures that contract and
//! [`DockerEngine`] implements it over the runtime's unix socket, falling back once to the legacy
//! TCP endpoint when the socket cannot be reached.

mod docker;
mod models;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;
pub use models::*;
pub use traits::*;
