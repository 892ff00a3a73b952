//! Layers, the chain they form, and where their content lives.

mod chain;
mod store;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use chain::*;
pub use store::*;
