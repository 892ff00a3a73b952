//! Command line interface of the `monoflat` binary.

mod args;
pub mod styles;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
pub use styles::AnsiStyles;
