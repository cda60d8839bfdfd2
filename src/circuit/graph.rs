//! Flat circuit structure.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::devices::GROUND_NODE;
use crate::dsl::{Declaration, Element};
use crate::expr::Expr;

/// A flattened circuit ready for equation assembly.
///
/// Every element is primitive. Maps are ordered so that two compilations of
/// the same input produce identical circuits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatCircuit {
    /// Title line of the netlist
    pub title: String,

    /// Primitive elements by reference designator
    pub elements: BTreeMap<String, Element>,

    /// Parameter definitions: netlist, renamed sub-circuit and pulled-in
    /// global parameters
    pub params: BTreeMap<String, Expr>,

    /// Unknowns: node potentials `V_<node>` followed by branch variables
    pub dep_vars: Vec<String>,

    /// Independent sources (V and I elements)
    pub indep_sources: Vec<String>,

    /// Controlled sources (E, F, G and H elements)
    pub controlled_sources: Vec<String>,

    /// Every node touched by an element
    pub nodes: BTreeSet<String>,

    /// `.source` declarations
    pub sources: Vec<Declaration>,

    /// `.detector` declarations
    pub detectors: Vec<Declaration>,

    /// `.lgref` declarations
    pub lgrefs: Vec<Declaration>,

    /// Parameters referenced but never defined
    pub undefined_params: BTreeSet<String>,

    /// Number of errors; the circuit must not be solved unless zero
    pub errors: usize,
}

impl FlatCircuit {
    /// Create an empty circuit with a title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Check if the circuit compiled without errors.
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }

    /// Check if the ground node is connected.
    pub fn has_ground(&self) -> bool {
        self.nodes.contains(GROUND_NODE)
    }

    /// Number of nodes excluding ground.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len() - usize::from(self.has_ground())
    }
}

impl fmt::Display for FlatCircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\"{}\"", self.title)?;
        for element in self.elements.values() {
            let model = element.model_kind().map_or(element.model_name.as_str(), |k| k.name());
            write!(f, "{} {}", element.ref_des, model)?;
            for node in element.nodes.iter().chain(&element.refs) {
                write!(f, " {}", node)?;
            }
            for (name, value) in &element.params {
                write!(f, " {}={{{}}}", name, value)?;
            }
            writeln!(f)?;
        }
        for (name, value) in &self.params {
            writeln!(f, ".param {}={{{}}}", name, value)?;
        }
        writeln!(f, "* nodes: {}", join(self.nodes.iter()))?;
        writeln!(f, "* dependent variables: {}", join(self.dep_vars.iter()))?;
        writeln!(f, "* independent sources: {}", join(self.indep_sources.iter()))?;
        writeln!(f, "* controlled sources: {}", join(self.controlled_sources.iter()))?;
        if !self.undefined_params.is_empty() {
            writeln!(f, "* undefined parameters: {}", join(self.undefined_params.iter()))?;
        }
        write!(f, "* errors: {}", self.errors)
    }
}

fn join<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(String::as_str).collect::<Vec<_>>().join(" ")
}
