//! # Netlist Core
//!
//! Front end of a symbolic circuit analysis tool: compiles hierarchical,
//! SPICE-like netlists into one flat circuit of primitive elements.
//!
//! This library provides:
//! - A tokenizer with engineering-notation literals and `{...}` expressions
//! - A static catalogue of devices and primitive models
//! - A library manager for built-in and user sub-circuit libraries
//! - Four compiler passes producing a [`FlatCircuit`]
//!
//! ## Architecture
//!
//! - [`dsl`] - Tokenizer, circuit definitions and the structural parser (pass 1)
//! - [`devices`] - Device and model catalogue
//! - [`library`] - Library compilation and caches
//! - [`circuit`] - Reference resolution (pass 2), flattening (pass 3) and
//!   finalization (pass 4)
//! - [`context`] - Compiler state and configuration
//! - [`expr`] - Parameter expressions behind the [`Symbolic`] trait
//!
//! ## Usage
//!
//! ```no_run
//! use netlist_core::{compile_netlist, CompilerConfig, CompilerContext};
//!
//! let mut ctx = CompilerContext::new(CompilerConfig::default());
//! let flat = compile_netlist(
//!     &mut ctx,
//!     "\"RC\"\nV1 in 0 V value=1\nR1 in out 1k\nC1 out 0 {C}\n.end\n",
//!     "rc.cir",
//! );
//! assert!(flat.is_ok());
//! for diagnostic in ctx.diagnostics.items() {
//!     eprintln!("{}", diagnostic);
//! }
//! ```
//!
//! ## Sharing the built-in library
//!
//! The built-in library is immutable once compiled. Independent contexts can
//! share it:
//!
//! ```no_run
//! use netlist_core::{CompilerConfig, CompilerContext, Library};
//!
//! let builtin = Library::builtin();
//! let a = CompilerContext::with_builtin(CompilerConfig::default(), builtin.clone());
//! let b = CompilerContext::with_builtin(CompilerConfig::default(), builtin);
//! ```

pub mod circuit;
pub mod compiler;
pub mod context;
pub mod devices;
pub mod dsl;
pub mod error;
pub mod expr;
pub mod library;

// Re-export main types for convenience
pub use circuit::FlatCircuit;
pub use compiler::{compile_file, compile_netlist};
pub use context::{CompilerConfig, CompilerContext};
pub use error::{Diagnostic, NetlistError, Result, Severity};
pub use expr::{Expr, Symbolic};
pub use library::Library;
