//! Nested circuit definitions produced by the structural parser.

use std::collections::BTreeMap;

use crate::devices::{DeviceKind, ModelKind};
use crate::error::Origin;
use crate::expr::Expr;

/// Where a prototype definition is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Store {
    /// The netlist being compiled (`CompilerContext::forest`)
    Netlist,
    /// Definitions promoted from user libraries
    UserLibrary,
    /// The shared built-in library
    BuiltIn,
}

/// Handle of a sub-circuit prototype: its store and hierarchical path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtoKey {
    pub store: Store,
    pub path: String,
}

impl ProtoKey {
    pub fn new(store: Store, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    /// Sub-circuit name (last path component).
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// What an element's model field refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelRef {
    /// Name as written, before reference resolution
    Unresolved(String),
    /// A primitive stamp model
    Primitive(ModelKind),
    /// A prototype sub-circuit awaiting expansion
    Prototype(ProtoKey),
}

/// One element line.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Reference designator, unique within the owning circuit
    pub ref_des: String,
    pub device: DeviceKind,
    /// Model or sub-circuit name as written on the element line
    pub model_name: String,
    pub model: ModelRef,
    /// Connected node names
    pub nodes: Vec<String>,
    /// Names of other elements this one depends on (coupled inductors)
    pub refs: Vec<String>,
    pub params: BTreeMap<String, Expr>,
    /// Source location for error reporting
    pub origin: Origin,
}

impl Element {
    /// The primitive model, once resolved to one.
    pub fn model_kind(&self) -> Option<ModelKind> {
        match self.model {
            ModelRef::Primitive(kind) => Some(kind),
            _ => None,
        }
    }

    /// The prototype this element expands from, if any.
    pub fn prototype(&self) -> Option<&ProtoKey> {
        match &self.model {
            ModelRef::Prototype(key) => Some(key),
            _ => None,
        }
    }
}

/// A `.model` definition overriding the defaults of a primitive model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    pub name: String,
    /// Name of the primitive model this one is based on
    pub base: String,
    /// Fixed parameter values
    pub params: BTreeMap<String, Expr>,
    pub origin: Origin,
}

impl ModelDefinition {
    pub fn base_kind(&self) -> Option<ModelKind> {
        ModelKind::from_name(&self.base)
    }
}

/// Identifier named on a `.source`, `.detector` or `.lgref` line.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub origin: Origin,
}

/// A circuit definition: the main circuit, a library namespace, or a
/// sub-circuit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CircuitDefinition {
    pub name: String,
    /// Hierarchical key, `parent/name`
    pub path: String,
    pub title: String,
    /// Formal node interface (sub-circuits only)
    pub nodes: Vec<String>,
    /// Formal parameters and their defaults (sub-circuits only)
    pub formals: BTreeMap<String, Expr>,
    pub elements: BTreeMap<String, Element>,
    pub models: BTreeMap<String, ModelDefinition>,
    /// `.param` definitions
    pub params: BTreeMap<String, Expr>,
    /// Library files referenced with `.lib` / `.include`
    pub libraries: Vec<String>,
    pub sources: Vec<Declaration>,
    pub detectors: Vec<Declaration>,
    pub lgrefs: Vec<Declaration>,
    /// Names of sub-circuits defined directly inside this one
    pub subcircuits: Vec<String>,
    pub errors: usize,
    pub origin: Option<Origin>,
}

impl CircuitDefinition {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Join a parent path and a child name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// The path itself followed by every enclosing path, ending with the root
/// `""`.
pub fn ancestor_paths(path: &str) -> Vec<&str> {
    let mut out = vec![path];
    let mut current = path;
    while let Some((parent, _)) = current.rsplit_once('/') {
        out.push(parent);
        current = parent;
    }
    if !path.is_empty() {
        out.push("");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(child_path("", "amp"), "amp");
        assert_eq!(child_path("main/amp", "stage"), "main/amp/stage");
        assert_eq!(ancestor_paths("main/amp/stage"), vec!["main/amp/stage", "main/amp", "main", ""]);
        assert_eq!(ancestor_paths(""), vec![""]);
        assert_eq!(ProtoKey::new(Store::Netlist, "main/amp").name(), "amp");
    }
}
