//! Library manager.
//!
//! Library files use the netlist grammar. A library is parsed under its own
//! namespace in the forest, resolved, and then its definitions are promoted
//! into one of two caches:
//!
//! - the built-in cache, compiled once when a context is initialized and
//!   shared read-only afterwards
//! - the user cache, filled by `.lib` / `.include` lines of netlists
//!
//! Sub-circuits and `.model` lines become prototypes; `.param` lines at the
//! top level of a library become global parameters.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::circuit::resolve::Resolver;
use crate::context::CompilerContext;
use crate::dsl::{self, ancestor_paths, CircuitDefinition, ModelDefinition, SourceKind, Store};
use crate::error::{NetlistError, Result};
use crate::expr::Expr;

/// File name of the embedded standard library.
pub const BUILTIN_LIBRARY_NAME: &str = "stdlib.lib";

/// Text of the embedded standard library.
pub const BUILTIN_LIBRARY: &str = include_str!("../../lib/stdlib.lib");

const NAMESPACE_PREFIX: &str = "lib:";

/// Which cache a library is compiled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryKind {
    BuiltIn,
    User,
}

impl LibraryKind {
    /// Store that prototypes of this cache are addressed by.
    pub fn store(self) -> Store {
        match self {
            Self::BuiltIn => Store::BuiltIn,
            Self::User => Store::UserLibrary,
        }
    }
}

/// Compiled library definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Library {
    /// Sub-circuit prototypes keyed by path (nested ones as `outer/inner`)
    pub circuits: BTreeMap<String, CircuitDefinition>,
    /// `.model` prototypes
    pub models: BTreeMap<String, ModelDefinition>,
    /// Global parameters
    pub params: BTreeMap<String, Expr>,
    /// Canonical paths of the files compiled into this library
    pub files: Vec<PathBuf>,
}

impl Library {
    /// Compile the embedded standard library with the default configuration.
    pub fn builtin() -> Arc<Library> {
        CompilerContext::new(Default::default()).builtin
    }

    /// Top-level sub-circuit prototype by name.
    pub fn circuit(&self, name: &str) -> Option<&CircuitDefinition> {
        self.circuits.get(name)
    }

    pub fn model(&self, name: &str) -> Option<&ModelDefinition> {
        self.models.get(name)
    }

    pub fn param(&self, name: &str) -> Option<&Expr> {
        self.params.get(name)
    }

    /// Add definitions, keeping existing entries on name clashes.
    ///
    /// A definition with errors is left out together with the definitions
    /// nested in it, so instances of it fail to resolve.
    fn promote(&mut self, mut defs: BTreeMap<String, CircuitDefinition>, label: &str) {
        let failed: BTreeSet<String> = defs
            .values()
            .filter(|d| d.errors > 0)
            .map(|d| d.path.clone())
            .collect();
        defs.retain(|path, _| {
            let skip = ancestor_paths(path)
                .into_iter()
                .any(|p| failed.contains(p) && (p == path.as_str() || !p.is_empty()));
            if skip {
                tracing::warn!(library = label, subckt = %path, "definition has errors, not promoted");
            }
            !skip
        });
        if let Some(root) = defs.remove("") {
            for (name, value) in root.params {
                if self.params.contains_key(&name) {
                    tracing::warn!(library = label, param = %name, "global parameter already defined, keeping first");
                    continue;
                }
                self.params.insert(name, value);
            }
            for (name, model) in root.models {
                if self.models.contains_key(&name) {
                    tracing::warn!(library = label, model = %name, "model already defined, keeping first");
                    continue;
                }
                self.models.insert(name, model);
            }
            if !root.elements.is_empty() {
                tracing::warn!(
                    library = label,
                    count = root.elements.len(),
                    "elements outside sub-circuits ignored"
                );
            }
        }
        for (path, def) in defs {
            if self.circuits.contains_key(&path) {
                tracing::warn!(library = label, subckt = %path, "sub-circuit already defined, keeping first");
                continue;
            }
            self.circuits.insert(path, def);
        }
    }
}

fn namespace_for(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{}{}", NAMESPACE_PREFIX, sanitized)
}

fn is_builtin_reference(name: &str) -> bool {
    Path::new(name)
        .file_name()
        .is_some_and(|f| f == BUILTIN_LIBRARY_NAME)
}

impl CompilerContext {
    pub(crate) fn compile_builtin_text(&mut self) {
        self.compile_library_text(BUILTIN_LIBRARY, BUILTIN_LIBRARY_NAME, LibraryKind::BuiltIn);
    }

    /// Compile a library file. Compiling the same file again is a no-op.
    pub fn compile_library(&mut self, path: &Path, kind: LibraryKind) -> Result<()> {
        let display = path.display().to_string();
        let canonical = fs::canonicalize(path).map_err(|_| NetlistError::LibraryNotFound {
            path: display.clone(),
        })?;
        if self.compiled.contains(&canonical) {
            tracing::debug!(library = %canonical.display(), "library already compiled");
            return Ok(());
        }
        // recorded first so that libraries including each other terminate
        self.compiled.insert(canonical.clone());

        let text = fs::read_to_string(&canonical).map_err(|e| NetlistError::LibraryRead {
            path: display.clone(),
            message: e.to_string(),
        })?;
        self.compile_library_text(&text, &display, kind);
        match kind {
            LibraryKind::User => self.user.files.push(canonical),
            LibraryKind::BuiltIn => Arc::make_mut(&mut self.builtin).files.push(canonical),
        }
        Ok(())
    }

    /// Compile library text labelled `label` and promote its definitions.
    ///
    /// Returns the number of errors found in the library.
    pub fn compile_library_text(&mut self, text: &str, label: &str, kind: LibraryKind) -> usize {
        tracing::info!(library = label, ?kind, "compiling library");
        let namespace = namespace_for(label);

        let saved = std::mem::take(&mut self.hierarchy);
        let mut errors = dsl::parse_source(self, text, Arc::from(label), &namespace, SourceKind::Library(kind));
        self.hierarchy = saved;

        let nested = format!("{}/", namespace);
        let keys: Vec<String> = self
            .forest
            .keys()
            .filter(|k| **k == namespace || k.starts_with(&nested))
            .cloned()
            .collect();
        let mut defs = BTreeMap::new();
        for key in keys {
            if let Some(mut def) = self.forest.remove(&key) {
                def.path = key.strip_prefix(&nested).unwrap_or("").to_string();
                defs.insert(def.path.clone(), def);
            }
        }

        let mut resolver = Resolver {
            store: kind.store(),
            user: &self.user,
            builtin: &self.builtin,
            laplace_severity: self.config.laplace_severity,
            diagnostics: &mut self.diagnostics,
        };
        errors += resolver.resolve(&mut defs);

        match kind {
            LibraryKind::User => self.user.promote(defs, label),
            LibraryKind::BuiltIn => Arc::make_mut(&mut self.builtin).promote(defs, label),
        }
        if errors > 0 {
            tracing::warn!(library = label, errors, "library compiled with errors");
        }
        errors
    }

    /// Compile a library referenced from a netlist or library line.
    pub fn include_library(&mut self, name: &str, kind: LibraryKind) -> Result<()> {
        if is_builtin_reference(name) {
            return Err(NetlistError::BuiltinLibraryReference {
                name: name.to_string(),
            });
        }
        let path = self
            .config
            .library_candidates(name)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| NetlistError::LibraryNotFound {
                path: name.to_string(),
            })?;
        self.compile_library(&path, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerConfig;
    use crate::devices::ModelKind;
    use std::io::Write;

    fn write_lib(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_builtin_prototypes_match_models() {
        let lib = Library::builtin();
        for kind in ModelKind::ALL.iter().filter(|k| !k.is_stamp()) {
            let proto = kind.prototype();
            let expansion = proto.expansion.unwrap();
            let circuit = lib.circuit(expansion).unwrap_or_else(|| panic!("missing {}", expansion));
            let formals: Vec<&str> = circuit.formals.keys().map(String::as_str).collect();
            let mut params: Vec<&str> = proto.params.iter().map(|p| p.name).collect();
            params.sort_unstable();
            assert_eq!(formals, params, "formals of {}", expansion);
        }
        assert!(lib.param("U_T").is_some());
    }

    #[test]
    fn test_builtin_compiles_cleanly() {
        let ctx = CompilerContext::new(CompilerConfig::default());
        assert_eq!(ctx.diagnostics.items().len(), 0);
    }

    #[test]
    fn test_library_compiled_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_lib(
            dir.path(),
            "amps.lib",
            "\"amplifiers\"\n.param gain=9\n.subckt buf in out\nE1 out 0 in 0 {gain}\n.ends\n",
        );
        let mut ctx = CompilerContext::new(CompilerConfig::default());
        ctx.compile_library(&path, LibraryKind::User).unwrap();
        let before = ctx.user.clone();
        ctx.compile_library(&path, LibraryKind::User).unwrap();
        assert_eq!(ctx.user, before);
        assert_eq!(ctx.user.circuits.len(), 1);
        assert_eq!(ctx.user.params["gain"], Expr::Number(9.0));
        assert_eq!(ctx.user.files.len(), 1);
        assert!(ctx.forest.is_empty());
    }

    #[test]
    fn test_include_search_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        write_lib(&dir.path().join("lib"), "x.lib", "\"x\"\n.subckt X1 a b\nR1 a b 1\n.ends\n");
        let mut ctx = CompilerContext::new(CompilerConfig::default().with_project_root(dir.path()));
        ctx.include_library("x.lib", LibraryKind::User).unwrap();
        assert!(ctx.user.circuit("X1").is_some());

        let err = ctx.include_library("missing.lib", LibraryKind::User).unwrap_err();
        assert!(matches!(err, NetlistError::LibraryNotFound { .. }));
        let err = ctx.include_library("stdlib.lib", LibraryKind::User).unwrap_err();
        assert!(matches!(err, NetlistError::BuiltinLibraryReference { .. }));
    }

    #[test]
    fn test_mutually_including_libraries() {
        let dir = tempfile::tempdir().unwrap();
        write_lib(dir.path(), "a.lib", "\"a\"\n.lib b.lib\n.subckt A p q\nR1 p q 1\n.ends\n");
        write_lib(dir.path(), "b.lib", "\"b\"\n.lib a.lib\n.subckt B p q\nR1 p q 2\n.ends\n");
        let mut ctx = CompilerContext::new(CompilerConfig::default().with_project_root(dir.path()));
        ctx.include_library("a.lib", LibraryKind::User).unwrap();
        assert!(ctx.user.circuit("A").is_some());
        assert!(ctx.user.circuit("B").is_some());
        assert!(ctx.hierarchy.is_empty());
    }

    #[test]
    fn test_definitions_with_errors_not_promoted() {
        let mut ctx = CompilerContext::new(CompilerConfig::default());
        let errors = ctx.compile_library_text(
            "\"mixed\"\n\
             .subckt outer a b\n\
             .subckt inner p q\n\
             R1 p q nosuch\n\
             .ends\n\
             R1 a b 1\n\
             .ends\n\
             .subckt bad a b\n\
             .subckt child p q\n\
             R1 p q 1\n\
             .ends\n\
             R9 a b nosuch\n\
             .ends\n",
            "mixed.lib",
            LibraryKind::User,
        );
        assert_eq!(errors, 2);
        let paths: Vec<&str> = ctx.user.circuits.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["outer"]);
    }

    #[test]
    fn test_first_definition_kept() {
        let mut ctx = CompilerContext::new(CompilerConfig::default());
        ctx.compile_library_text("\"one\"\n.param p=1\n", "one.lib", LibraryKind::User);
        ctx.compile_library_text("\"two\"\n.param p=2\n", "two.lib", LibraryKind::User);
        assert_eq!(ctx.user.params["p"], Expr::Number(1.0));
    }
}
