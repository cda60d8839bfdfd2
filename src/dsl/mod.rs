//! Netlist language front end: tokenizer, definitions and structural parser.
//!
//! The language is line oriented and SPICE-like. Netlists and library files
//! share one grammar.
//!
//! # Grammar Overview
//!
//! ```text
//! source      = title { line }
//! title       = any_text | '"' any_text '"'
//! line        = comment | command | element | continuation
//! comment     = '*' { any_char } | ';' { any_char }
//! continuation= '+' { token }            (appended to the previous line)
//! command     = '.' command_name { argument }
//! element     = ref_des node* ref* [model | value] { param_def }
//! instance    = 'X' name node* subckt_name { param_def }
//!
//! command_name = "subckt" | "ends" | "param" | "model" | "lib" | "include"
//!              | "source" | "detector" | "lgref" | "end"
//! value       = number [scale_suffix] | '{' expression '}'
//! param_def   = name '=' (value | name | '"' expression '"')
//! scale_suffix= 'y' | 'z' | 'a' | 'f' | 'p' | 'n' | 'u' | 'm'
//!             | 'k' | 'M' | 'G' | 'T' | 'P'
//! ```
//!
//! # Commands
//!
//! | Command | Syntax |
//! |---------|--------|
//! | .subckt | `.subckt <name> <nodes...> [param=default...]` |
//! | .ends | `.ends [name]` |
//! | .param | `.param <name>=<value>...` |
//! | .model | `.model <name> <base model> [param=value...]` |
//! | .lib, .include | `.lib <file>...` |
//! | .source | `.source <independent source>...` |
//! | .detector | `.detector <dependent variable>...` |
//! | .lgref | `.lgref <controlled source>...` |
//! | .end | `.end` |
//!
//! # Example
//!
//! ```text
//! "Inverting amplifier"
//! .lib opamps.lib
//! .param Rs=1k Rf={10*Rs}
//! V1 in 0 V value=1
//! R1 in n {Rs}
//! R2 n out {Rf}
//! O1 out 0 0 n OV value={1e5/(1+s/1e3)}
//! .source V1
//! .detector V_out
//! .end
//! ```

mod ast;
mod lexer;
mod parser;

pub use ast::*;
pub use lexer::{normalize_scale_suffixes, tokenize, LexError, Lexer, Token, TokenKind, Tokenized, SCALE_SUFFIXES};
pub use parser::{parse_source, SourceKind};
