//! Compiler configuration and state shared by all passes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dsl::CircuitDefinition;
use crate::error::{Diagnostics, Severity};
use crate::library::{Library, LibraryKind};

/// Default limit on sub-circuit nesting during flattening.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Default cap on the total number of sub-circuit expansions.
pub const DEFAULT_MAX_EXPANSIONS: usize = 100_000;

/// Configuration for a compiler context.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerConfig {
    /// Directory library references are resolved against.
    pub project_root: PathBuf,
    /// Circuit directory, relative to the project root.
    pub circuit_dir: PathBuf,
    /// User library directory, relative to the project root.
    pub lib_dir: PathBuf,
    /// Extra library files compiled into the built-in cache.
    pub builtin_libraries: Vec<PathBuf>,
    /// Severity of the Laplace variable appearing in a `.model` parameter
    /// where the base model forbids it.
    pub laplace_severity: Severity,
    /// Maximum sub-circuit nesting depth.
    pub max_depth: usize,
    /// Maximum number of sub-circuit expansions in one circuit.
    pub max_expansions: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            circuit_dir: PathBuf::from("cir"),
            lib_dir: PathBuf::from("lib"),
            builtin_libraries: Vec::new(),
            laplace_severity: Severity::Warning,
            max_depth: DEFAULT_MAX_DEPTH,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }
}

impl CompilerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project root directory.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// Set the circuit directory (relative to the project root).
    pub fn with_circuit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.circuit_dir = dir.into();
        self
    }

    /// Set the user library directory (relative to the project root).
    pub fn with_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lib_dir = dir.into();
        self
    }

    /// Add a library file to the built-in cache.
    pub fn with_builtin_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.builtin_libraries.push(path.into());
        self
    }

    /// Set the severity of forbidden Laplace variables in `.model` lines.
    pub fn with_laplace_severity(mut self, severity: Severity) -> Self {
        self.laplace_severity = severity;
        self
    }

    /// Set the maximum sub-circuit nesting depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the maximum number of sub-circuit expansions.
    pub fn with_max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    /// Candidate locations of a referenced library file, in search order.
    pub fn library_candidates(&self, name: &str) -> Vec<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() {
            return vec![path.to_path_buf()];
        }
        vec![
            self.project_root.join(path),
            self.project_root.join(&self.circuit_dir).join(path),
            self.project_root.join(&self.lib_dir).join(path),
        ]
    }
}

/// State of one compilation.
///
/// A context owns everything a netlist compilation mutates. The built-in
/// library is compiled once and never changed afterwards, so it is held
/// behind an [`Arc`] and can be shared by independent contexts.
#[derive(Debug)]
pub struct CompilerContext {
    pub config: CompilerConfig,
    /// Circuit definitions keyed by hierarchical path
    pub forest: BTreeMap<String, CircuitDefinition>,
    /// Currently open definitions, outermost first
    pub hierarchy: Vec<CircuitDefinition>,
    /// Definitions promoted from user libraries
    pub user: Library,
    /// Definitions of the built-in libraries
    pub builtin: Arc<Library>,
    /// Canonical paths of library files already compiled
    pub(crate) compiled: BTreeSet<PathBuf>,
    pub diagnostics: Diagnostics,
}

impl CompilerContext {
    /// Create a context and compile the built-in libraries.
    pub fn new(config: CompilerConfig) -> Self {
        let mut ctx = Self::with_builtin(config, Arc::new(Library::default()));
        ctx.reinitialize();
        ctx
    }

    /// Create a context sharing an already compiled built-in library.
    pub fn with_builtin(config: CompilerConfig, builtin: Arc<Library>) -> Self {
        let compiled = builtin.files.iter().cloned().collect();
        Self {
            config,
            forest: BTreeMap::new(),
            hierarchy: Vec::new(),
            user: Library::default(),
            builtin,
            compiled,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Prepare for the next top-level netlist. Compiled libraries are kept.
    pub fn reset(&mut self) {
        self.forest.clear();
        self.hierarchy.clear();
        self.diagnostics.clear();
    }

    /// Drop every compiled library and recompile the built-in ones.
    pub fn reinitialize(&mut self) {
        self.reset();
        self.user = Library::default();
        self.builtin = Arc::new(Library::default());
        self.compiled.clear();

        self.compile_builtin_text();
        for path in self.config.builtin_libraries.clone() {
            if let Err(err) = self.compile_library(&path, LibraryKind::BuiltIn) {
                self.diagnostics.report(err, None);
            }
        }
        tracing::info!(
            circuits = self.builtin.circuits.len(),
            models = self.builtin.models.len(),
            params = self.builtin.params.len(),
            "built-in libraries compiled"
        );
    }

    /// Number of errors counted against the netlist definitions.
    pub fn forest_errors(&self) -> usize {
        self.forest.values().map(|d| d.errors).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = CompilerConfig::new()
            .with_project_root("/proj")
            .with_lib_dir("libs")
            .with_max_depth(8)
            .with_laplace_severity(Severity::Error);
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.laplace_severity, Severity::Error);
        assert_eq!(
            config.library_candidates("amps.lib"),
            vec![
                PathBuf::from("/proj/amps.lib"),
                PathBuf::from("/proj/cir/amps.lib"),
                PathBuf::from("/proj/libs/amps.lib"),
            ]
        );
        assert_eq!(config.library_candidates("/abs/x.lib"), vec![PathBuf::from("/abs/x.lib")]);
    }

    #[test]
    fn test_shared_builtin() {
        let first = CompilerContext::new(CompilerConfig::default());
        let second = CompilerContext::with_builtin(CompilerConfig::default(), first.builtin.clone());
        assert!(Arc::ptr_eq(&first.builtin, &second.builtin));
        assert!(second.builtin.circuits.contains_key("Q"));
    }

    #[test]
    fn test_configured_builtin_libraries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.lib");
        std::fs::write(&path, "\"extra\"\n.param gx=2\n.subckt extra a b\nR1 a b {gx}\n.ends\n").unwrap();
        let config = CompilerConfig::default()
            .with_builtin_library(&path)
            .with_builtin_library(dir.path().join("missing.lib"));
        let ctx = CompilerContext::new(config);

        assert!(ctx.builtin.circuit("extra").is_some());
        assert!(ctx.builtin.circuit("Q").is_some());
        assert!(ctx.builtin.param("gx").is_some());
        assert!(ctx.user.circuit("extra").is_none());
        assert!(ctx.user.params.is_empty());
        assert_eq!(ctx.builtin.files.len(), 1);
        assert_eq!(ctx.diagnostics.error_count(), 1);
        assert!(matches!(
            ctx.diagnostics.items()[0].error,
            crate::error::NetlistError::LibraryNotFound { .. }
        ));
    }

    #[test]
    fn test_reset_keeps_libraries() {
        let mut ctx = CompilerContext::new(CompilerConfig::default());
        ctx.forest.insert("x".into(), CircuitDefinition::new("x", "x"));
        ctx.reset();
        assert!(ctx.forest.is_empty());
        assert!(!ctx.builtin.circuits.is_empty());
    }
}
