//! Circuit passes: reference resolution, flattening and finalization.
//!
//! Each pass works on the [`CompilerContext`](crate::context::CompilerContext)
//! left by the one before it. The result is a [`FlatCircuit`] holding only
//! primitive elements.

pub(crate) mod flatten;
mod graph;
pub(crate) mod resolve;
mod validate;

pub use flatten::flatten_netlist;
pub use graph::FlatCircuit;
pub use resolve::{resolve_netlist, Resolver};
pub use validate::finalize_circuit;
