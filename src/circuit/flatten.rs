//! Hierarchy flattener (pass 3).
//!
//! Expands every element bound to a prototype sub-circuit into copies of the
//! prototype's elements. Expansion is driven by a work queue so that nesting
//! depth and the total number of expansions can be capped.
//!
//! For an instance `X1` of prototype `P`:
//!
//! - formal nodes of `P` map positionally to the nodes of `X1`; other nodes
//!   of `P` except ground become `<node>_X1`
//! - copied elements and their cross-references become `<refDes>_X1`
//! - a symbol used inside `P` resolves to the actual parameter of `X1`, else
//!   the formal default of `P`, else the local `.param` of `P` (renamed to
//!   `<name>_X1`), else a global library parameter (name kept), else it is
//!   renamed to `<name>_X1`

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::FlatCircuit;
use crate::context::CompilerContext;
use crate::devices::{is_reserved_symbol, GROUND_NODE};
use crate::dsl::{CircuitDefinition, Element, ModelRef, ProtoKey, Store};
use crate::error::{Diagnostics, NetlistError, Origin, Severity};
use crate::expr::{Expr, Symbolic};
use crate::library::Library;

/// Run pass 3 on the netlist forest of `ctx`.
pub fn flatten_netlist(ctx: &mut CompilerContext) -> FlatCircuit {
    let mut flattener = Flattener {
        forest: &ctx.forest,
        user: &ctx.user,
        builtin: &ctx.builtin,
        max_depth: ctx.config.max_depth,
        max_expansions: ctx.config.max_expansions,
        diagnostics: &mut ctx.diagnostics,
        errors: 0,
    };
    let mut flat = flattener.flatten();
    flat.errors += ctx.forest_errors();
    flat
}

/// Copy a global parameter, and the globals its definition uses, into
/// `params` unless already defined there.
pub(crate) fn pull_global(name: &str, user: &Library, builtin: &Library, params: &mut BTreeMap<String, Expr>) -> bool {
    if params.contains_key(name) {
        return true;
    }
    let Some(value) = user.param(name).or_else(|| builtin.param(name)) else {
        return false;
    };
    params.insert(name.to_string(), value.clone());
    for symbol in value.free_symbols() {
        pull_global(&symbol, user, builtin, params);
    }
    true
}

struct Flattener<'a> {
    forest: &'a BTreeMap<String, CircuitDefinition>,
    user: &'a Library,
    builtin: &'a Library,
    max_depth: usize,
    max_expansions: usize,
    diagnostics: &'a mut Diagnostics,
    errors: usize,
}

/// Instance being expanded.
struct Expansion<'p> {
    instance: &'p Element,
    proto: &'p CircuitDefinition,
    nodes: BTreeMap<String, String>,
}

impl Expansion<'_> {
    fn rename(&self, name: &str) -> String {
        format!("{}_{}", name, self.instance.ref_des)
    }

    fn node(&self, node: &str) -> String {
        if node == GROUND_NODE {
            return node.to_string();
        }
        match self.nodes.get(node) {
            Some(actual) => actual.clone(),
            None => self.rename(node),
        }
    }
}

/// Lazily resolves the symbols used inside one expansion.
struct Binder<'p> {
    expansion: &'p Expansion<'p>,
    user: &'p Library,
    builtin: &'p Library,
    resolved: BTreeMap<String, Expr>,
    visiting: BTreeSet<String>,
    globals: BTreeSet<String>,
}

impl<'p> Binder<'p> {
    fn new(expansion: &'p Expansion<'p>, user: &'p Library, builtin: &'p Library) -> Self {
        Self {
            expansion,
            user,
            builtin,
            resolved: BTreeMap::new(),
            visiting: BTreeSet::new(),
            globals: BTreeSet::new(),
        }
    }

    fn bind(&mut self, symbol: &str) -> Expr {
        if let Some(value) = self.resolved.get(symbol) {
            return value.clone();
        }
        let instance = self.expansion.instance;
        let proto = self.expansion.proto;
        let value = if is_reserved_symbol(symbol) {
            Expr::symbol(symbol)
        } else if let Some(actual) = instance.params.get(symbol) {
            actual.clone()
        } else if let Some(default) = proto.formals.get(symbol) {
            if self.visiting.insert(symbol.to_string()) {
                let value = self.subst(default);
                self.visiting.remove(symbol);
                value
            } else {
                // self-referential default
                Expr::symbol(self.expansion.rename(symbol))
            }
        } else if proto.params.contains_key(symbol) {
            Expr::symbol(self.expansion.rename(symbol))
        } else if self.user.param(symbol).is_some() || self.builtin.param(symbol).is_some() {
            self.globals.insert(symbol.to_string());
            Expr::symbol(symbol)
        } else {
            Expr::symbol(self.expansion.rename(symbol))
        };
        self.resolved.insert(symbol.to_string(), value.clone());
        value
    }

    fn subst(&mut self, expr: &Expr) -> Expr {
        let bindings: BTreeMap<String, Expr> = expr
            .free_symbols()
            .into_iter()
            .map(|s| {
                let value = self.bind(&s);
                (s, value)
            })
            .collect();
        expr.subst(&bindings)
    }
}

impl<'a> Flattener<'a> {
    fn report(&mut self, error: NetlistError, origin: Option<Origin>) {
        if self.diagnostics.report(error, origin) == Severity::Error {
            self.errors += 1;
        }
    }

    fn prototype(&self, key: &ProtoKey) -> Option<&'a CircuitDefinition> {
        let (forest, user, builtin): (&'a BTreeMap<String, CircuitDefinition>, &'a Library, &'a Library) =
            (self.forest, self.user, self.builtin);
        match key.store {
            Store::Netlist => forest.get(&key.path),
            Store::UserLibrary => user.circuits.get(&key.path),
            Store::BuiltIn => builtin.circuits.get(&key.path),
        }
    }

    fn flatten(&mut self) -> FlatCircuit {
        let forest: &'a BTreeMap<String, CircuitDefinition> = self.forest;
        let Some(root) = forest.get("") else {
            return FlatCircuit::default();
        };
        let mut flat = FlatCircuit::new(root.title.clone());
        flat.elements = root.elements.clone();
        flat.params = root.params.clone();
        flat.sources = root.sources.clone();
        flat.detectors = root.detectors.clone();
        flat.lgrefs = root.lgrefs.clone();

        let mut queue: VecDeque<(String, usize)> = flat
            .elements
            .values()
            .filter(|e| e.prototype().is_some())
            .map(|e| (e.ref_des.clone(), 1))
            .collect();
        let mut expansions = 0;

        while let Some((ref_des, depth)) = queue.pop_front() {
            let Some(element) = flat.elements.remove(&ref_des) else {
                continue;
            };
            let Some(key) = element.prototype().cloned() else {
                flat.elements.insert(ref_des, element);
                continue;
            };
            if depth > self.max_depth {
                let error = NetlistError::DepthLimit {
                    ref_des,
                    limit: self.max_depth,
                };
                self.report(error, Some(element.origin.clone()));
                continue;
            }
            expansions += 1;
            if expansions > self.max_expansions {
                let error = NetlistError::ExpansionLimit {
                    limit: self.max_expansions,
                };
                self.report(error, Some(element.origin.clone()));
                break;
            }
            let Some(proto) = self.prototype(&key) else {
                let error = NetlistError::UnknownSubcircuit {
                    ref_des,
                    name: key.path.clone(),
                };
                self.report(error, Some(element.origin.clone()));
                continue;
            };
            tracing::trace!(instance = %ref_des, prototype = %key.path, depth, "expanding");
            for child in self.expand(&element, proto, &mut flat) {
                queue.push_back((child, depth + 1));
            }
        }
        // left over after an aborted expansion
        flat.elements.retain(|_, e| e.model_kind().is_some());

        flat.errors = self.errors;
        tracing::debug!(elements = flat.elements.len(), expansions, errors = self.errors, "pass 3 done");
        flat
    }

    /// Expand one instance into `flat`, returning the copies that still need
    /// expansion.
    fn expand(&mut self, instance: &Element, proto: &CircuitDefinition, flat: &mut FlatCircuit) -> Vec<String> {
        let expansion = Expansion {
            instance,
            proto,
            nodes: proto
                .nodes
                .iter()
                .cloned()
                .zip(instance.nodes.iter().cloned())
                .collect(),
        };
        let mut binder = Binder::new(&expansion, self.user, self.builtin);
        let mut pending = Vec::new();

        for element in proto.elements.values() {
            let mut copy = element.clone();
            copy.ref_des = expansion.rename(&element.ref_des);
            copy.refs = element.refs.iter().map(|r| expansion.rename(r)).collect();
            copy.nodes = element.nodes.iter().map(|n| expansion.node(n)).collect();
            copy.params = element
                .params
                .iter()
                .map(|(name, value)| (name.clone(), binder.subst(value)))
                .collect();

            if let ModelRef::Unresolved(model) = &copy.model {
                let error = NetlistError::UnknownModel {
                    ref_des: copy.ref_des.clone(),
                    model: model.clone(),
                };
                self.report(error, Some(element.origin.clone()));
                continue;
            }
            if flat.elements.contains_key(&copy.ref_des) {
                let error = NetlistError::NameCollision { ref_des: copy.ref_des };
                self.report(error, Some(instance.origin.clone()));
                continue;
            }
            if copy.prototype().is_some() {
                pending.push(copy.ref_des.clone());
            }
            flat.elements.insert(copy.ref_des.clone(), copy);
        }

        for (name, value) in &proto.params {
            // formals take priority over a local definition of the same name
            if proto.formals.contains_key(name) {
                continue;
            }
            let value = binder.subst(value);
            flat.params.entry(expansion.rename(name)).or_insert(value);
        }

        for global in &binder.globals {
            pull_global(global, self.user, self.builtin, &mut flat.params);
        }
        pending
    }
}
