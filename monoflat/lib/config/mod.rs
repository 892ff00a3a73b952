//! Configuration for a flatten run.

mod defaults;
mod flatten;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use flatten::*;
