//! Circuit finalizer (pass 4).

use std::collections::{BTreeMap, BTreeSet};

use super::flatten::pull_global;
use super::FlatCircuit;
use crate::context::CompilerContext;
use crate::devices::{is_reserved_symbol, GROUND_NODE};
use crate::error::{NetlistError, Origin, Severity};
use crate::expr::Symbolic;

/// Finalize a flattened circuit.
///
/// Checks:
/// - The ground node is connected (otherwise nothing else is computed)
/// - Every parameter used is defined, pulling in global library parameters
/// - `.source`, `.detector` and `.lgref` name existing objects
pub fn finalize_circuit(ctx: &mut CompilerContext, flat: &mut FlatCircuit) {
    flat.nodes = flat
        .elements
        .values()
        .flat_map(|e| e.nodes.iter().cloned())
        .collect();

    if !flat.has_ground() {
        let error = NetlistError::MissingGround {
            ground: GROUND_NODE.to_string(),
        };
        if ctx.diagnostics.report(error, None) == Severity::Error {
            flat.errors += 1;
        }
        return;
    }

    flat.dep_vars = flat
        .nodes
        .iter()
        .filter(|n| *n != GROUND_NODE)
        .map(|n| format!("V_{}", n))
        .collect();
    for element in flat.elements.values() {
        let Some(kind) = element.model_kind() else {
            continue;
        };
        for suffix in kind.prototype().dep_vars {
            flat.dep_vars.push(format!("{}_{}", suffix, element.ref_des));
        }
        if element.device.is_independent_source() {
            flat.indep_sources.push(element.ref_des.clone());
        } else if element.device.is_controlled_source() {
            flat.controlled_sources.push(element.ref_des.clone());
        }
    }

    resolve_parameters(ctx, flat);
    check_declarations(ctx, flat);

    tracing::debug!(
        nodes = flat.nodes.len(),
        dep_vars = flat.dep_vars.len(),
        undefined = flat.undefined_params.len(),
        "pass 4 done"
    );
}

fn used_symbols(flat: &FlatCircuit) -> BTreeSet<String> {
    flat.elements
        .values()
        .flat_map(|e| e.params.values())
        .chain(flat.params.values())
        .flat_map(|v| v.free_symbols())
        .filter(|s| !is_reserved_symbol(s))
        .collect()
}

/// Origin of the first element using each symbol.
fn first_uses(flat: &FlatCircuit) -> BTreeMap<String, Origin> {
    let mut uses = BTreeMap::new();
    for element in flat.elements.values() {
        for symbol in element.params.values().flat_map(|v| v.free_symbols()) {
            uses.entry(symbol).or_insert_with(|| element.origin.clone());
        }
    }
    uses
}

fn resolve_parameters(ctx: &mut CompilerContext, flat: &mut FlatCircuit) {
    for symbol in used_symbols(flat) {
        if !flat.params.contains_key(&symbol) {
            pull_global(&symbol, &ctx.user, &ctx.builtin, &mut flat.params);
        }
    }
    flat.undefined_params = used_symbols(flat)
        .into_iter()
        .filter(|s| !flat.params.contains_key(s))
        .collect();
    let uses = first_uses(flat);
    for name in &flat.undefined_params {
        let error = NetlistError::UndefinedParameter { name: name.clone() };
        if ctx.diagnostics.report(error, uses.get(name).cloned()) == Severity::Error {
            flat.errors += 1;
        }
    }
}

fn check_declarations(ctx: &mut CompilerContext, flat: &mut FlatCircuit) {
    let mut problems = Vec::new();
    for decl in &flat.sources {
        if !flat.indep_sources.contains(&decl.name) {
            let error = NetlistError::UnknownSource { name: decl.name.clone() };
            problems.push((error, decl.origin.clone()));
        }
    }
    for decl in &flat.detectors {
        if !flat.dep_vars.contains(&decl.name) {
            let error = NetlistError::UnknownDetector { name: decl.name.clone() };
            problems.push((error, decl.origin.clone()));
        }
    }
    for decl in &flat.lgrefs {
        if !flat.controlled_sources.contains(&decl.name) {
            let error = NetlistError::UnknownLoopGainReference { name: decl.name.clone() };
            problems.push((error, decl.origin.clone()));
        }
    }
    for (error, origin) in problems {
        if ctx.diagnostics.report(error, Some(origin)) == Severity::Error {
            flat.errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::flatten::flatten_netlist;
    use crate::circuit::resolve::resolve_netlist;
    use crate::context::CompilerConfig;
    use crate::dsl::{parse_source, SourceKind};
    use crate::expr::Expr;
    use std::sync::Arc;

    fn finalize(text: &str) -> (CompilerContext, FlatCircuit) {
        let mut ctx = CompilerContext::new(CompilerConfig::default());
        parse_source(&mut ctx, text, Arc::from("<test>"), "", SourceKind::Netlist);
        resolve_netlist(&mut ctx);
        let mut flat = flatten_netlist(&mut ctx);
        finalize_circuit(&mut ctx, &mut flat);
        (ctx, flat)
    }

    #[test]
    fn test_dependent_variables_and_sources() {
        let (_, flat) = finalize(
            "t\n\
             V1 in 0 V value=1\n\
             R1 in out 1k\n\
             E1 out 0 in 0 10\n\
             L1 out 0 1m\n\
             G1 out 0 in 0 1m\n\
             .end\n",
        );
        assert_eq!(flat.errors, 0);
        assert_eq!(flat.dep_vars, vec!["V_in", "V_out", "Io_E1", "I_L1", "I_V1"]);
        assert_eq!(flat.indep_sources, vec!["V1"]);
        assert_eq!(flat.controlled_sources, vec!["E1", "G1"]);
        assert_eq!(flat.num_nodes(), 2);
    }

    #[test]
    fn test_missing_ground_gate() {
        let (_, flat) = finalize("t\nV1 1 2 V value=1\nR1 1 2 1k\n.end\n");
        assert_eq!(flat.errors, 1);
        assert!(flat.dep_vars.is_empty());
        assert!(flat.indep_sources.is_empty());
    }

    #[test]
    fn test_undefined_and_global_parameters() {
        let (ctx, flat) = finalize(
            "t\n\
             .param Rb={2*Ra}\n\
             R1 1 0 {Rb}\n\
             R2 1 0 {U_T*1k/s}\n\
             C1 1 0 {Cx}\n\
             .end\n",
        );
        assert_eq!(flat.errors, 0);
        let undefined: Vec<&str> = flat.undefined_params.iter().map(String::as_str).collect();
        assert_eq!(undefined, vec!["Cx", "Ra"]);
        assert!(flat.params.contains_key("U_T"));
        assert!(flat.params.contains_key("k"));
        assert_eq!(flat.params["T"], Expr::Number(300.0));
        let items = ctx.diagnostics.items();
        assert!(items.iter().all(|d| d.severity == Severity::Info));
        // Cx is used by C1 on line 5, Ra only by a .param
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].origin.as_ref().map(|o| o.line), Some(5));
        assert!(items[0].render().ends_with("C1 1 0 {Cx}\n  | ^"));
        assert!(items[1].origin.is_none());
    }

    #[test]
    fn test_declarations_checked() {
        let (ctx, flat) = finalize(
            "t\n\
             V1 1 0 V value=1\n\
             R1 1 0 1k\n\
             E1 2 0 1 0 2\n\
             .source V1 R1\n\
             .detector V_1 V_9\n\
             .lgref E1 V1\n\
             .end\n",
        );
        assert_eq!(flat.errors, 0);
        let warnings: Vec<_> = ctx
            .diagnostics
            .items()
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 3);
        assert!(matches!(&warnings[0].error, NetlistError::UnknownSource { name } if name == "R1"));
        assert!(matches!(&warnings[1].error, NetlistError::UnknownDetector { name } if name == "V_9"));
        assert!(matches!(&warnings[2].error, NetlistError::UnknownLoopGainReference { name } if name == "V1"));
        let at: Vec<(usize, usize)> = warnings
            .iter()
            .filter_map(|d| d.origin.as_ref().map(|o| (o.line, o.column)))
            .collect();
        assert_eq!(at, vec![(5, 12), (6, 15), (7, 11)]);
        assert!(warnings[0].render().ends_with(".source V1 R1\n  |            ^"));
    }
}
