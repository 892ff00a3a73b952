//! Packaging and assembly of the flattened image.
//!
//! Once a chain has been merged, the merged tree is archived by an [`Archiver`], and the archive
//! is wrapped by an [`ImageAssembler`] into a build context whose Dockerfile declares the chain's
//! base layer as its base and restores the author, exposed ports and command of the most-derived
//! layer.

mod assemble;
mod descriptor;
mod final_image;
mod package;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use assemble::*;
pub use descriptor::*;
pub use final_image::*;
pub use package::*;
