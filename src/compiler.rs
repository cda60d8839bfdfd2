//! Top-level driver running the four passes.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::circuit::{finalize_circuit, flatten_netlist, resolve_netlist, FlatCircuit};
use crate::context::CompilerContext;
use crate::dsl::{self, SourceKind};
use crate::error::{NetlistError, Result};

/// Compile netlist text into a flat circuit.
///
/// The context is reset first; compiled libraries are reused. Errors are
/// collected in `ctx.diagnostics` and counted in [`FlatCircuit::errors`].
/// Passes after the structural parser and after the resolver only run when
/// the netlist definitions are free of errors.
pub fn compile_netlist(ctx: &mut CompilerContext, text: &str, label: &str) -> FlatCircuit {
    ctx.reset();
    let file: Arc<str> = Arc::from(label);

    dsl::parse_source(ctx, text, file, "", SourceKind::Netlist);
    let title = ctx.forest.get("").map(|d| d.title.clone()).unwrap_or_default();
    if ctx.forest_errors() > 0 {
        tracing::debug!(errors = ctx.forest_errors(), "stopping after pass 1");
        return gated(ctx, title);
    }

    resolve_netlist(ctx);
    if ctx.forest_errors() > 0 {
        tracing::debug!(errors = ctx.forest_errors(), "stopping after pass 2");
        return gated(ctx, title);
    }

    let mut flat = flatten_netlist(ctx);
    finalize_circuit(ctx, &mut flat);
    tracing::info!(
        circuit = %flat.title,
        elements = flat.elements.len(),
        errors = flat.errors,
        "netlist compiled"
    );
    flat
}

fn gated(ctx: &CompilerContext, title: String) -> FlatCircuit {
    let mut flat = FlatCircuit::new(title);
    flat.errors = ctx.forest_errors();
    flat
}

/// Read and compile a netlist file.
pub fn compile_file(ctx: &mut CompilerContext, path: &Path) -> Result<FlatCircuit> {
    let text = fs::read_to_string(path).map_err(|e| NetlistError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(compile_netlist(ctx, &text, &path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerConfig;
    use crate::devices::ModelKind;
    use crate::error::Severity;
    use crate::expr::Expr;
    use crate::library::LibraryKind;
    use std::io::Write;

    fn context() -> CompilerContext {
        CompilerContext::new(CompilerConfig::default())
    }

    #[test]
    fn test_compile_amplifier() {
        let mut ctx = context();
        let flat = compile_netlist(
            &mut ctx,
            "\"Common emitter stage\"\n\
             .param Rc=4.7k\n\
             V1 in 0 V value=1\n\
             Q1 out in 0 0 Q gm=20m\n\
             R1 out 0 {Rc}\n\
             .source V1\n\
             .detector V_out\n\
             .end\n",
            "ce.cir",
        );
        assert_eq!(flat.errors, 0, "{:?}", ctx.diagnostics.items());
        assert_eq!(flat.title, "Common emitter stage");
        assert!(flat.elements.values().all(|e| e.model_kind().is_some()));
        let gm = &flat.elements["G1_Q1"];
        assert_eq!(gm.model_kind(), Some(ModelKind::G));
        assert_eq!(gm.params["value"], Expr::Number(20e-3));
        assert!(flat.dep_vars.contains(&"V_out".to_string()));
        assert_eq!(flat.indep_sources, vec!["V1"]);
        assert_eq!(flat.controlled_sources, vec!["G1_Q1"]);
    }

    #[test]
    fn test_gate_after_parse_errors() {
        let mut ctx = context();
        let flat = compile_netlist(&mut ctx, "t\nR1 1\nR2 1 0 nosuch\n.end\n", "bad.cir");
        assert_eq!(flat.errors, 1);
        assert!(flat.elements.is_empty());
        // pass 2 never ran, so the unknown model is not reported
        assert_eq!(ctx.diagnostics.error_count(), 1);
    }

    #[test]
    fn test_gate_after_resolve_errors() {
        let mut ctx = context();
        let flat = compile_netlist(&mut ctx, "t\nR2 1 0 nosuch\n.end\n", "bad.cir");
        assert_eq!(flat.errors, 1);
        assert!(flat.dep_vars.is_empty());
    }

    #[test]
    fn test_library_reference_from_netlist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        let mut file = std::fs::File::create(dir.path().join("lib").join("filters.lib")).unwrap();
        file.write_all(b"\"filters\"\n.param fc=1k\n.subckt lp in out\nR1 in out 1k\nC1 out 0 {1/(2*pi*fc*1k)}\n.ends\n")
            .unwrap();

        let mut ctx = CompilerContext::new(CompilerConfig::default().with_project_root(dir.path()));
        let text = "t\n.lib filters.lib\n.lib stdlib.lib\nV1 1 0 V value=1\nX1 1 2 lp\n.end\n";
        let flat = compile_netlist(&mut ctx, text, "main.cir");
        assert_eq!(flat.errors, 0);
        assert!(flat.elements.contains_key("C1_X1"));
        assert_eq!(flat.params["fc"], Expr::Number(1000.0));
        assert!(ctx
            .diagnostics
            .items()
            .iter()
            .any(|d| d.severity == Severity::Warning
                && matches!(d.error, NetlistError::BuiltinLibraryReference { .. })));

        // libraries survive the reset before the next netlist
        let flat = compile_netlist(&mut ctx, "t\nX1 1 0 lp\n.end\n", "again.cir");
        assert_eq!(flat.errors, 0);
        assert_eq!(ctx.user.files.len(), 1);
    }

    #[test]
    fn test_missing_library_is_an_error() {
        let mut ctx = context();
        let flat = compile_netlist(&mut ctx, "t\n.lib nowhere.lib\nR1 1 0 1\n.end\n", "x.cir");
        assert_eq!(flat.errors, 1);
        assert!(matches!(
            ctx.diagnostics.items()[0].error,
            NetlistError::LibraryNotFound { .. }
        ));
    }

    #[test]
    fn test_contexts_share_builtin_library() {
        let shared = context().builtin;
        let mut first = CompilerContext::with_builtin(CompilerConfig::default(), shared.clone());
        let mut second = CompilerContext::with_builtin(CompilerConfig::default(), shared.clone());
        let a = compile_netlist(&mut first, "t\nD1 1 0\nV1 1 0 V value=1\n.end\n", "a.cir");
        let b = compile_netlist(&mut second, "t\nD1 1 0\nV1 1 0 V value=1\n.end\n", "a.cir");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&first.builtin, &shared));
        first.user.params.insert("x".into(), Expr::Number(1.0));
        assert!(second.user.params.is_empty());
    }

    #[test]
    fn test_compile_file_missing() {
        let mut ctx = context();
        let err = compile_file(&mut ctx, Path::new("/definitely/not/here.cir")).unwrap_err();
        assert!(matches!(err, NetlistError::FileReadError { .. }));
    }

    #[test]
    fn test_library_errors_in_user_library() {
        let mut ctx = context();
        let errors = ctx.compile_library_text(
            "\"broken\"\n.subckt b x y\nR1 x y nosuch\nR2 x y 1k\n.ends\n.subckt ok x y\nR1 x y 1\n.ends\n",
            "broken.lib",
            LibraryKind::User,
        );
        assert_eq!(errors, 1);
        assert!(ctx.user.circuit("b").is_none());
        assert!(ctx.user.circuit("ok").is_some());

        let flat = compile_netlist(&mut ctx, "t\nV1 1 0 V value=1\nX1 1 0 b\n.end\n", "uses_b.cir");
        assert_eq!(flat.errors, 1);
        assert!(flat.elements.values().all(|e| e.model_kind().is_some()));
        assert!(matches!(
            &ctx.diagnostics.items()[0].error,
            NetlistError::UnknownSubcircuit { ref_des, name } if ref_des == "X1" && name == "b"
        ));
    }
}
