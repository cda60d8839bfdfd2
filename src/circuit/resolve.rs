//! Reference resolver (pass 2).
//!
//! Binds each element's model name to a primitive model or a prototype
//! sub-circuit and validates parameter names against what the model or
//! prototype declares.

use std::collections::BTreeMap;

use crate::context::CompilerContext;
use crate::devices::{DeviceKind, ModelKind, LAPLACE_VARIABLE};
use crate::dsl::{
    ancestor_paths, child_path, CircuitDefinition, Element, ModelDefinition, ModelRef, ProtoKey, Store,
};
use crate::error::{Diagnostics, NetlistError, Origin, Severity};
use crate::expr::{Expr, Symbolic};
use crate::library::Library;

/// Resolves the definitions of one store against the library caches.
pub struct Resolver<'a> {
    /// Store the definitions being resolved belong to
    pub store: Store,
    pub user: &'a Library,
    pub builtin: &'a Library,
    /// Severity of forbidden Laplace use in `.model` parameters
    pub laplace_severity: Severity,
    pub diagnostics: &'a mut Diagnostics,
}

/// Run pass 2 over the netlist forest of `ctx`.
pub fn resolve_netlist(ctx: &mut CompilerContext) -> usize {
    let mut resolver = Resolver {
        store: Store::Netlist,
        user: &ctx.user,
        builtin: &ctx.builtin,
        laplace_severity: ctx.config.laplace_severity,
        diagnostics: &mut ctx.diagnostics,
    };
    resolver.resolve(&mut ctx.forest)
}

fn forbids_laplace(kind: ModelKind, param: &str, value: &Expr) -> bool {
    kind.param(param).is_some_and(|spec| !spec.laplace) && value.contains_symbol(LAPLACE_VARIABLE)
}

impl<'a> Resolver<'a> {
    /// Resolve every definition in `defs`, returning the number of errors.
    pub fn resolve(&mut self, defs: &mut BTreeMap<String, CircuitDefinition>) -> usize {
        let keys: Vec<String> = defs.keys().cloned().collect();
        let mut total = 0;
        for key in keys {
            let Some(def) = defs.get(&key) else {
                continue;
            };
            let mut errors = 0;
            let elements = self.resolve_definition(def, defs, &mut errors);
            if let Some(def) = defs.get_mut(&key) {
                def.elements = elements;
                def.errors += errors;
            }
            total += errors;
        }
        tracing::debug!(store = ?self.store, definitions = defs.len(), errors = total, "pass 2 done");
        total
    }

    fn report(&mut self, error: NetlistError, origin: &Origin, errors: &mut usize) {
        let severity = error.severity();
        self.report_with(error, severity, origin, errors);
    }

    fn report_with(&mut self, error: NetlistError, severity: Severity, origin: &Origin, errors: &mut usize) {
        if self.diagnostics.report_with(error, severity, Some(origin.clone())) == Severity::Error {
            *errors += 1;
        }
    }

    fn resolve_definition(
        &mut self,
        def: &CircuitDefinition,
        defs: &BTreeMap<String, CircuitDefinition>,
        errors: &mut usize,
    ) -> BTreeMap<String, Element> {
        for element in def.elements.values() {
            for target in &element.refs {
                if !def.elements.contains_key(target) {
                    let error = NetlistError::UnknownReference {
                        ref_des: element.ref_des.clone(),
                        target: target.clone(),
                    };
                    self.report(error, &element.origin, errors);
                }
            }
        }

        for model in def.models.values() {
            self.check_model(model, errors);
        }

        let mut elements = def.elements.clone();
        for element in elements.values_mut() {
            if matches!(element.model, ModelRef::Unresolved(_)) {
                self.resolve_element(def, defs, element, errors);
            }
        }
        elements
    }

    /// Validate a `.model` line against its base primitive.
    fn check_model(&mut self, model: &ModelDefinition, errors: &mut usize) {
        let Some(kind) = model.base_kind() else {
            let error = NetlistError::UnknownModelBase {
                model: model.name.clone(),
                base: model.base.clone(),
            };
            self.report(error, &model.origin, errors);
            return;
        };
        for (name, value) in &model.params {
            if kind.param(name).is_none() {
                let error = NetlistError::IllegalModelParam {
                    model: model.name.clone(),
                    base: model.base.clone(),
                    param: name.clone(),
                };
                self.report(error, &model.origin, errors);
            } else if forbids_laplace(kind, name, value) {
                let error = NetlistError::LaplaceNotAllowed {
                    owner: model.name.clone(),
                    param: name.clone(),
                    variable: LAPLACE_VARIABLE.to_string(),
                };
                let severity = self.laplace_severity;
                self.report_with(error, severity, &model.origin, errors);
            }
        }
    }

    fn resolve_element(
        &mut self,
        def: &CircuitDefinition,
        defs: &BTreeMap<String, CircuitDefinition>,
        element: &mut Element,
        errors: &mut usize,
    ) {
        let name = element.model_name.clone();

        if element.device == DeviceKind::Subcircuit {
            match self.find_subcircuit(&def.path, defs, &name) {
                Some((key, proto)) => self.bind_prototype(element, key, proto, errors),
                None => {
                    let error = NetlistError::UnknownSubcircuit {
                        ref_des: element.ref_des.clone(),
                        name,
                    };
                    self.report(error, &element.origin, errors);
                }
            }
            return;
        }

        if let Some(kind) = ModelKind::from_name(&name) {
            if self.check_device(element, kind, errors) {
                self.check_element_params(element, kind, errors);
                self.finish_primitive(defs, element, kind, errors);
            }
            return;
        }

        if let Some(model) = self.find_model(def, defs, &name) {
            let Some(kind) = model.base_kind() else {
                let error = NetlistError::UnknownModelBase {
                    model: model.name.clone(),
                    base: model.base.clone(),
                };
                self.report(error, &element.origin, errors);
                return;
            };
            if self.check_device(element, kind, errors) {
                self.check_element_params(element, kind, errors);
                // element line values take precedence over the model's
                for (param, value) in &model.params {
                    if kind.param(param).is_some() && !element.params.contains_key(param) {
                        element.params.insert(param.clone(), value.clone());
                    }
                }
                self.finish_primitive(defs, element, kind, errors);
            }
            return;
        }

        if let Some((key, proto)) = self.find_subcircuit(&def.path, defs, &name) {
            self.bind_prototype(element, key, proto, errors);
            return;
        }

        let error = NetlistError::UnknownModel {
            ref_des: element.ref_des.clone(),
            model: name,
        };
        self.report(error, &element.origin, errors);
    }

    fn check_device(&mut self, element: &Element, kind: ModelKind, errors: &mut usize) -> bool {
        if element.device.accepts(kind) {
            return true;
        }
        let error = NetlistError::ModelNotAllowed {
            ref_des: element.ref_des.clone(),
            model: element.model_name.clone(),
            device: element.device.letter(),
        };
        self.report(error, &element.origin, errors);
        false
    }

    fn check_element_params(&mut self, element: &Element, kind: ModelKind, errors: &mut usize) {
        for (name, value) in &element.params {
            if kind.param(name).is_none() {
                let error = NetlistError::IllegalElementParam {
                    ref_des: element.ref_des.clone(),
                    model: element.model_name.clone(),
                    param: name.clone(),
                };
                self.report(error, &element.origin, errors);
            } else if forbids_laplace(kind, name, value) {
                let error = NetlistError::LaplaceNotAllowed {
                    owner: element.ref_des.clone(),
                    param: name.clone(),
                    variable: LAPLACE_VARIABLE.to_string(),
                };
                self.report(error, &element.origin, errors);
            }
        }
    }

    /// Fill defaults of a primitive model; non-stamp models are bound to
    /// their built-in prototype.
    fn finish_primitive(
        &mut self,
        defs: &BTreeMap<String, CircuitDefinition>,
        element: &mut Element,
        kind: ModelKind,
        errors: &mut usize,
    ) {
        let proto = kind.prototype();
        let Some(expansion) = proto.expansion else {
            for spec in proto.params {
                element
                    .params
                    .entry(spec.name.to_string())
                    .or_insert(Expr::Number(spec.default));
            }
            element.model = ModelRef::Primitive(kind);
            return;
        };

        let builtin: &'a Library = self.builtin;
        let found = match builtin.circuit(expansion) {
            Some(circuit) => Some(circuit),
            // the built-in library refers to its own prototypes
            None if self.store == Store::BuiltIn => defs.get(expansion),
            None => None,
        };
        let Some(circuit) = found else {
            let error = NetlistError::UnknownSubcircuit {
                ref_des: element.ref_des.clone(),
                name: expansion.to_string(),
            };
            self.report(error, &element.origin, errors);
            return;
        };
        for (formal, default) in &circuit.formals {
            element
                .params
                .entry(formal.clone())
                .or_insert_with(|| default.clone());
        }
        let key = ProtoKey::new(Store::BuiltIn, expansion);
        self.bind_prototype(element, key, circuit, errors);
    }

    fn bind_prototype(&mut self, element: &mut Element, key: ProtoKey, proto: &CircuitDefinition, errors: &mut usize) {
        if proto.nodes.len() != element.nodes.len() {
            let error = NetlistError::PortCountMismatch {
                ref_des: element.ref_des.clone(),
                subckt: proto.name.clone(),
                expected: proto.nodes.len(),
                found: element.nodes.len(),
            };
            self.report(error, &element.origin, errors);
        }
        for param in element.params.keys() {
            if !proto.formals.contains_key(param) {
                let error = NetlistError::IllegalInstanceParam {
                    ref_des: element.ref_des.clone(),
                    subckt: proto.name.clone(),
                    param: param.clone(),
                };
                self.report(error, &element.origin, errors);
            }
        }
        element.model = ModelRef::Prototype(key);
    }

    /// Lexical sub-circuit lookup: nested definitions of the owner and its
    /// ancestors, then the user library, then the built-in library.
    fn find_subcircuit<'d>(
        &self,
        owner: &str,
        defs: &'d BTreeMap<String, CircuitDefinition>,
        name: &str,
    ) -> Option<(ProtoKey, &'d CircuitDefinition)>
    where
        'a: 'd,
    {
        for scope in ancestor_paths(owner) {
            let path = child_path(scope, name);
            if let Some(def) = defs.get(&path) {
                return Some((ProtoKey::new(self.store, path), def));
            }
        }
        let user: &'a Library = self.user;
        if let Some(def) = user.circuit(name) {
            return Some((ProtoKey::new(Store::UserLibrary, name), def));
        }
        let builtin: &'a Library = self.builtin;
        builtin
            .circuit(name)
            .map(|def| (ProtoKey::new(Store::BuiltIn, name), def))
    }

    /// `.model` lookup: the owner, its ancestors, the user library, then the
    /// built-in library.
    fn find_model<'d>(
        &self,
        owner: &'d CircuitDefinition,
        defs: &'d BTreeMap<String, CircuitDefinition>,
        name: &str,
    ) -> Option<&'d ModelDefinition>
    where
        'a: 'd,
    {
        if let Some(model) = owner.models.get(name) {
            return Some(model);
        }
        for scope in ancestor_paths(&owner.path).into_iter().skip(1) {
            if let Some(model) = defs.get(scope).and_then(|d| d.models.get(name)) {
                return Some(model);
            }
        }
        let user: &'a Library = self.user;
        let builtin: &'a Library = self.builtin;
        user.model(name).or_else(|| builtin.model(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerConfig;
    use crate::dsl::{parse_source, SourceKind};
    use std::sync::Arc;

    fn resolve_with(config: CompilerConfig, text: &str) -> (CompilerContext, usize) {
        let mut ctx = CompilerContext::new(config);
        let parsed = parse_source(&mut ctx, text, Arc::from("<test>"), "", SourceKind::Netlist);
        assert_eq!(parsed, 0, "parse errors: {:?}", ctx.diagnostics.items());
        let errors = resolve_netlist(&mut ctx);
        (ctx, errors)
    }

    fn resolve(text: &str) -> (CompilerContext, usize) {
        resolve_with(CompilerConfig::default(), text)
    }

    fn element<'c>(ctx: &'c CompilerContext, path: &str, ref_des: &str) -> &'c Element {
        &ctx.forest[path].elements[ref_des]
    }

    fn has_error(ctx: &CompilerContext, pred: impl Fn(&NetlistError) -> bool) -> bool {
        ctx.diagnostics.items().iter().any(|d| pred(&d.error))
    }

    #[test]
    fn test_primitive_defaults() {
        let (ctx, errors) = resolve("t\nR1 1 0 1k\nV1 1 0 V value=1\n.end\n");
        assert_eq!(errors, 0);
        let r1 = element(&ctx, "", "R1");
        assert_eq!(r1.model, ModelRef::Primitive(ModelKind::R));
        assert_eq!(r1.params["value"], Expr::Number(1000.0));
        assert_eq!(r1.params["noisetemp"], Expr::Number(0.0));
        assert_eq!(r1.params.len(), ModelKind::R.prototype().params.len());
    }

    #[test]
    fn test_model_override_merges() {
        let (ctx, errors) = resolve(
            "t\n\
             .model Rn R noisetemp=300 value=2k\n\
             R1 1 0 Rn value=5k\n\
             R2 1 0 Rn\n\
             .end\n",
        );
        assert_eq!(errors, 0);
        let r1 = element(&ctx, "", "R1");
        assert_eq!(r1.model_kind(), Some(ModelKind::R));
        assert_eq!(r1.params["value"], Expr::Number(5000.0));
        assert_eq!(r1.params["noisetemp"], Expr::Number(300.0));
        assert_eq!(element(&ctx, "", "R2").params["value"], Expr::Number(2000.0));
    }

    #[test]
    fn test_reference_errors() {
        let (ctx, errors) = resolve(
            "t\n\
             L1 1 0 1m\n\
             K1 L1 L9 0.5\n\
             R1 1 0 R foo=1\n\
             C1 1 0 {1/s}\n\
             C2 1 0 R\n\
             R3 1 0 nosuch\n\
             .end\n",
        );
        assert_eq!(errors, 5);
        assert!(has_error(&ctx, |e| matches!(e, NetlistError::UnknownReference { target, .. } if target == "L9")));
        assert!(has_error(&ctx, |e| matches!(e, NetlistError::IllegalElementParam { param, .. } if param == "foo")));
        assert!(has_error(&ctx, |e| matches!(e, NetlistError::LaplaceNotAllowed { owner, .. } if owner == "C1")));
        assert!(has_error(&ctx, |e| matches!(e, NetlistError::ModelNotAllowed { device: 'C', .. })));
        assert!(has_error(&ctx, |e| matches!(e, NetlistError::UnknownModel { model, .. } if model == "nosuch")));
        assert_eq!(ctx.forest[""].errors, 5);
    }

    #[test]
    fn test_model_laplace_severity() {
        let text = "t\n.model Cs C value={1/s}\n.model Rx Zq gm=1\n.model Ry R bogus=1\n.end\n";
        let (ctx, errors) = resolve(text);
        // unknown base and illegal parameter; Laplace only warns
        assert_eq!(errors, 2);
        assert!(ctx
            .diagnostics
            .items()
            .iter()
            .any(|d| matches!(d.error, NetlistError::LaplaceNotAllowed { .. }) && d.severity == Severity::Warning));

        let (_, errors) = resolve_with(CompilerConfig::default().with_laplace_severity(Severity::Error), text);
        assert_eq!(errors, 3);
    }

    #[test]
    fn test_instance_binding() {
        let (ctx, errors) = resolve(
            "t\n\
             .subckt amp in out gain=10\n\
             E1 out 0 in 0 {gain}\n\
             .ends\n\
             X1 1 2 amp gain=5\n\
             X2 1 amp\n\
             X3 1 2 amp bias=1\n\
             .end\n",
        );
        assert_eq!(errors, 2);
        assert_eq!(
            element(&ctx, "", "X1").model,
            ModelRef::Prototype(ProtoKey::new(Store::Netlist, "amp"))
        );
        assert!(has_error(&ctx, |e| matches!(e, NetlistError::PortCountMismatch { expected: 2, found: 1, .. })));
        assert!(has_error(&ctx, |e| matches!(e, NetlistError::IllegalInstanceParam { param, .. } if param == "bias")));
    }

    #[test]
    fn test_non_stamp_model_uses_builtin_prototype() {
        let (ctx, errors) = resolve("t\nQ1 c b e 0 Q beta=200\nD1 a 0\n.end\n");
        assert_eq!(errors, 0);
        let q1 = element(&ctx, "", "Q1");
        assert_eq!(q1.prototype(), Some(&ProtoKey::new(Store::BuiltIn, "Q")));
        assert_eq!(q1.params["beta"], Expr::Number(200.0));
        assert_eq!(q1.params["gm"], Expr::Number(40e-3));
        assert_eq!(element(&ctx, "", "D1").prototype().map(|k| k.name()), Some("D"));
    }

    #[test]
    fn test_lexical_subcircuit_scope() {
        let (ctx, errors) = resolve(
            "t\n\
             .subckt amp in out\n\
             .subckt stage a b\n\
             R1 a b 1k\n\
             .ends\n\
             X1 in out stage\n\
             .ends\n\
             X1 1 2 amp\n\
             X2 1 2 stage\n\
             .end\n",
        );
        assert_eq!(errors, 1);
        assert_eq!(
            element(&ctx, "amp", "X1").prototype(),
            Some(&ProtoKey::new(Store::Netlist, "amp/stage"))
        );
        assert!(has_error(&ctx, |e| matches!(e, NetlistError::UnknownSubcircuit { ref_des, .. } if ref_des == "X2")));
    }
}
