//! Structural parser (pass 1).
//!
//! Walks the logical lines produced by [`tokenize`] and builds the forest of
//! nested circuit definitions in the [`CompilerContext`]. The open hierarchy
//! lives in `CompilerContext::hierarchy`; its first entry is the root of the
//! source being parsed (the main circuit or a library namespace).
//! `.lib` / `.include` lines compile the referenced library before the next
//! line is read.

use std::sync::Arc;

use super::ast::{child_path, CircuitDefinition, Declaration, Element, ModelDefinition, ModelRef};
use super::lexer::{tokenize, Token, TokenKind};
use crate::context::CompilerContext;
use crate::devices::DeviceKind;
use crate::error::{NetlistError, Origin, Severity};
use crate::library::LibraryKind;

/// What kind of source text is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A top-level netlist
    Netlist,
    /// A library file compiled into the given cache
    Library(LibraryKind),
}

impl SourceKind {
    /// Cache that libraries referenced from this source are compiled into.
    fn library_kind(self) -> LibraryKind {
        match self {
            Self::Netlist => LibraryKind::User,
            Self::Library(kind) => kind,
        }
    }
}

/// Parse `text` into the forest of `ctx` under the root path `namespace`.
///
/// The root definition and every sub-circuit found are inserted into
/// `ctx.forest`. Returns the number of errors counted against them.
pub fn parse_source(
    ctx: &mut CompilerContext,
    text: &str,
    file: Arc<str>,
    namespace: &str,
    kind: SourceKind,
) -> usize {
    ctx.diagnostics.add_source(file.clone(), text);
    let tokenized = tokenize(text);

    let root_name = match kind {
        SourceKind::Netlist => "main",
        SourceKind::Library(_) => namespace,
    };
    let mut root = CircuitDefinition::new(root_name, namespace);
    root.origin = Some(Origin::new(file.clone(), 1, 1));
    ctx.hierarchy.push(root);

    let mut parser = Parser {
        ctx,
        file,
        kind,
        skip_depth: 0,
        ended: false,
        errors: 0,
    };

    for lex in tokenized.errors {
        let origin = Origin::new(parser.file.clone(), lex.line, lex.column);
        parser.report(lex.error, Some(origin));
    }

    let mut lines = tokenized.lines.into_iter();
    match lines.next() {
        Some(first) => parser.parse_title(&first),
        None => parser.report(NetlistError::MissingTitle, None),
    }
    for line in lines {
        if parser.ended {
            break;
        }
        parser.parse_line(&line);
    }
    parser.finish();
    parser.errors
}

struct Parser<'c> {
    ctx: &'c mut CompilerContext,
    file: Arc<str>,
    kind: SourceKind,
    /// Nesting depth of a rejected `.subckt` whose lines are being skipped
    skip_depth: usize,
    ended: bool,
    errors: usize,
}

impl<'c> Parser<'c> {
    fn origin(&self, token: &Token) -> Origin {
        Origin::new(self.file.clone(), token.line, token.column)
    }

    fn current(&mut self) -> &mut CircuitDefinition {
        // the root is only popped by finish()
        let last = self.ctx.hierarchy.len() - 1;
        &mut self.ctx.hierarchy[last]
    }

    /// Report against the innermost open definition.
    fn report(&mut self, error: NetlistError, origin: Option<Origin>) {
        if self.ctx.diagnostics.report(error, origin) == Severity::Error {
            self.errors += 1;
            self.current().errors += 1;
        }
    }

    fn report_at(&mut self, error: NetlistError, token: &Token) {
        let origin = self.origin(token);
        self.report(error, Some(origin));
    }

    fn parse_title(&mut self, line: &[Token]) {
        match line.first() {
            Some(token) if token.kind == TokenKind::QuotedString => {
                let title = token.text.clone();
                self.current().title = title;
            }
            Some(token) => {
                self.report_at(NetlistError::MissingTitle, token);
                self.parse_line(line);
            }
            None => self.report(NetlistError::MissingTitle, None),
        }
    }

    fn parse_line(&mut self, line: &[Token]) {
        let Some(first) = line.first() else {
            return;
        };

        if self.skip_depth > 0 {
            if first.kind == TokenKind::Command {
                match first.text.as_str() {
                    ".subckt" => self.skip_depth += 1,
                    ".ends" => self.skip_depth -= 1,
                    ".end" => self.parse_end(),
                    _ => {}
                }
            }
            return;
        }

        match &first.kind {
            TokenKind::Command => self.parse_command(line),
            TokenKind::Identifier => self.parse_element(line),
            _ => self.report_at(NetlistError::unexpected("token", first.text.clone()), first),
        }
    }

    fn parse_command(&mut self, line: &[Token]) {
        let command = &line[0];
        let args = &line[1..];
        match command.text.as_str() {
            ".subckt" => self.parse_subckt(command, args),
            ".ends" => self.parse_ends(command),
            ".param" => self.parse_param(command, args),
            ".model" => self.parse_model(command, args),
            ".lib" | ".include" | ".inc" => self.parse_library(command, args),
            ".source" | ".detector" | ".lgref" => self.parse_declaration(command, args),
            ".end" => self.parse_end(),
            other => {
                let name = other.trim_start_matches('.').to_string();
                self.report_at(NetlistError::UnknownCommand { command: name }, command);
            }
        }
    }

    fn parse_subckt(&mut self, command: &Token, args: &[Token]) {
        let Some(name_tok) = args.first().filter(|t| t.kind == TokenKind::Identifier) else {
            self.report_at(NetlistError::malformed("subckt", "missing sub-circuit name"), command);
            self.skip_depth = 1;
            return;
        };
        let name = name_tok.text.clone();

        if self.ctx.hierarchy.iter().skip(1).any(|d| d.name == name) {
            self.report_at(NetlistError::HierarchyLoop { name }, name_tok);
            self.skip_depth = 1;
            return;
        }

        let parent_path = self.current().path.clone();
        let mut def = CircuitDefinition::new(name.clone(), child_path(&parent_path, &name));
        def.title = name;
        def.origin = Some(self.origin(command));

        let mut bad = Vec::new();
        for token in &args[1..] {
            match &token.kind {
                TokenKind::ParamDef { name, value } => {
                    def.formals.insert(name.clone(), value.clone());
                }
                _ if token.is_node_name() && def.formals.is_empty() => {
                    def.nodes.push(token.text.clone());
                }
                _ => bad.push(token),
            }
        }

        self.ctx.hierarchy.push(def);
        for token in bad {
            self.report_at(NetlistError::unexpected("sub-circuit argument", token.text.clone()), token);
        }
        tracing::trace!(path = %self.current().path, "opened sub-circuit");
    }

    fn parse_ends(&mut self, command: &Token) {
        if self.ctx.hierarchy.len() <= 1 {
            self.report_at(NetlistError::UnmatchedEnds, command);
            return;
        }
        self.close_subckt();
    }

    /// Pop the innermost sub-circuit and register it in the forest.
    fn close_subckt(&mut self) {
        let Some(def) = self.ctx.hierarchy.pop() else {
            return;
        };
        let name = def.name.clone();
        if self.ctx.forest.contains_key(&def.path) {
            self.report(NetlistError::DuplicateSubcircuit { name }, def.origin);
            return;
        }
        self.ctx.forest.insert(def.path.clone(), def);
        self.current().subcircuits.push(name);
    }

    fn parse_param(&mut self, command: &Token, args: &[Token]) {
        if args.is_empty() {
            self.report_at(NetlistError::malformed("param", "no parameter definitions"), command);
        }
        for token in args {
            match &token.kind {
                TokenKind::ParamDef { name, value } => {
                    self.current().params.insert(name.clone(), value.clone());
                }
                _ => self.report_at(NetlistError::unexpected("parameter definition", token.text.clone()), token),
            }
        }
    }

    fn parse_model(&mut self, command: &Token, args: &[Token]) {
        let (name, base) = match args {
            [name, base, ..]
                if name.kind == TokenKind::Identifier && base.kind == TokenKind::Identifier =>
            {
                (name.text.clone(), base.text.clone())
            }
            _ => {
                self.report_at(NetlistError::malformed("model", "expected '.model <name> <type> [params]'"), command);
                return;
            }
        };

        let mut model = ModelDefinition {
            name: name.clone(),
            base,
            params: Default::default(),
            origin: self.origin(&args[0]),
        };
        for token in &args[2..] {
            match &token.kind {
                TokenKind::ParamDef { name, value } => {
                    model.params.insert(name.clone(), value.clone());
                }
                _ => self.report_at(NetlistError::unexpected("model parameter", token.text.clone()), token),
            }
        }

        if self.current().models.contains_key(&name) {
            self.report_at(NetlistError::DuplicateModel { name }, &args[0]);
            return;
        }
        self.current().models.insert(name, model);
    }

    fn parse_library(&mut self, command: &Token, args: &[Token]) {
        if args.is_empty() {
            self.report_at(NetlistError::malformed("lib", "missing library file name"), command);
            return;
        }
        let kind = self.kind.library_kind();
        for token in args {
            if !matches!(
                token.kind,
                TokenKind::FileName | TokenKind::Identifier | TokenKind::QuotedString
            ) {
                self.report_at(NetlistError::unexpected("library file name", token.text.clone()), token);
                continue;
            }
            self.current().libraries.push(token.text.clone());
            if let Err(err) = self.ctx.include_library(&token.text, kind) {
                self.report_at(err, token);
            }
        }
    }

    fn parse_declaration(&mut self, command: &Token, args: &[Token]) {
        let keyword = command.text.trim_start_matches('.').to_string();
        if args.is_empty() {
            self.report_at(NetlistError::malformed(keyword, "missing identifier"), command);
            return;
        }
        for token in args {
            if !token.is_node_name() {
                self.report_at(NetlistError::unexpected("identifier", token.text.clone()), token);
                continue;
            }
            let declaration = Declaration {
                name: token.text.clone(),
                origin: self.origin(token),
            };
            let def = self.current();
            match keyword.as_str() {
                "source" => def.sources.push(declaration),
                "detector" => def.detectors.push(declaration),
                _ => def.lgrefs.push(declaration),
            }
        }
    }

    fn parse_end(&mut self) {
        self.ended = true;
        self.skip_depth = 0;
    }

    fn parse_element(&mut self, line: &[Token]) {
        let head = &line[0];
        let ref_des = head.text.clone();
        let Some(device) = DeviceKind::from_ref_des(&ref_des) else {
            self.report_at(NetlistError::UnknownDevice { ref_des }, head);
            return;
        };

        let parsed = if device == DeviceKind::Subcircuit {
            self.parse_instance_fields(&ref_des, device, line)
        } else {
            self.parse_element_fields(&ref_des, device, line)
        };
        let Some(mut element) = parsed else {
            return;
        };

        for token in line.iter().skip_while(|t| !matches!(t.kind, TokenKind::ParamDef { .. })) {
            match &token.kind {
                TokenKind::ParamDef { name, value } => {
                    element.params.insert(name.clone(), value.clone());
                }
                _ => self.report_at(NetlistError::unexpected("parameter definition", token.text.clone()), token),
            }
        }
        element.origin = self.origin(head);

        if self.current().elements.contains_key(&ref_des) {
            self.report_at(NetlistError::DuplicateElement { ref_des }, head);
            return;
        }
        self.current().elements.insert(ref_des, element);
    }

    fn new_element(&self, ref_des: &str, device: DeviceKind, model_name: String, origin: Origin) -> Element {
        Element {
            ref_des: ref_des.to_string(),
            device,
            model: ModelRef::Unresolved(model_name.clone()),
            model_name,
            nodes: Vec::new(),
            refs: Vec::new(),
            params: Default::default(),
            origin,
        }
    }

    /// `X<name> <nodes...> <subckt> [params...]`
    fn parse_instance_fields(&mut self, ref_des: &str, device: DeviceKind, line: &[Token]) -> Option<Element> {
        let head = &line[0];
        let positional: Vec<&Token> = line[1..]
            .iter()
            .take_while(|t| !matches!(t.kind, TokenKind::ParamDef { .. }))
            .collect();

        let Some((name_tok, node_toks)) = positional.split_last() else {
            self.report_at(NetlistError::incomplete(ref_des, "missing sub-circuit name"), head);
            return None;
        };
        if name_tok.kind != TokenKind::Identifier {
            self.report_at(NetlistError::unexpected("sub-circuit name", name_tok.text.clone()), name_tok);
            return None;
        }

        let mut element = self.new_element(ref_des, device, name_tok.text.clone(), self.origin(head));
        for token in node_toks {
            if !token.is_node_name() {
                self.report_at(NetlistError::unexpected("node name", token.text.clone()), token);
                return None;
            }
            element.nodes.push(token.text.clone());
        }
        Some(element)
    }

    /// `<refDes> <nodes...> <refs...> <model or value> [params...]`
    fn parse_element_fields(&mut self, ref_des: &str, device: DeviceKind, line: &[Token]) -> Option<Element> {
        let head = &line[0];
        let proto = device.prototype();
        let node_count = proto.nodes.unwrap_or(0);
        let mut fields = line[1..]
            .iter()
            .take_while(|t| !matches!(t.kind, TokenKind::ParamDef { .. }));

        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            match fields.next() {
                Some(token) if token.is_node_name() => nodes.push(token.text.clone()),
                Some(token) => {
                    self.report_at(NetlistError::unexpected("node name", token.text.clone()), token);
                    return None;
                }
                None => {
                    let message = format!("expected {} nodes, found {}", node_count, nodes.len());
                    self.report_at(NetlistError::incomplete(ref_des, message), head);
                    return None;
                }
            }
        }

        let mut refs = Vec::with_capacity(proto.refs);
        for _ in 0..proto.refs {
            match fields.next() {
                Some(token) if token.kind == TokenKind::Identifier => refs.push(token.text.clone()),
                Some(token) => {
                    self.report_at(NetlistError::unexpected("element reference", token.text.clone()), token);
                    return None;
                }
                None => {
                    let message = format!("expected {} element references, found {}", proto.refs, refs.len());
                    self.report_at(NetlistError::incomplete(ref_des, message), head);
                    return None;
                }
            }
        }

        let default_model = device.default_model().map(|m| m.name().to_string()).unwrap_or_default();
        let mut value = None;
        let model_name = match fields.next() {
            Some(token) if token.kind == TokenKind::Identifier => token.text.clone(),
            Some(token) => match token.value() {
                Some(expr) => {
                    value = Some(expr);
                    default_model
                }
                None => {
                    self.report_at(NetlistError::unexpected("model name or value", token.text.clone()), token);
                    return None;
                }
            },
            None if proto.value_required => {
                self.report_at(NetlistError::incomplete(ref_des, "missing model name or value"), head);
                return None;
            }
            None => default_model,
        };

        if let Some(extra) = fields.next() {
            self.report_at(NetlistError::unexpected("field", extra.text.clone()), extra);
            return None;
        }

        let mut element = self.new_element(ref_des, device, model_name, self.origin(head));
        element.nodes = nodes;
        element.refs = refs;
        if let Some(expr) = value {
            element.params.insert("value".to_string(), expr);
        }
        Some(element)
    }

    /// Close everything left open and register the root definition.
    fn finish(&mut self) {
        while self.ctx.hierarchy.len() > 1 {
            let name = self.current().name.clone();
            let origin = self.current().origin.clone();
            self.report(NetlistError::UnterminatedSubcircuit { name }, origin);
            self.close_subckt();
        }
        if !self.ended && self.kind == SourceKind::Netlist {
            self.report(NetlistError::MissingEnd, None);
        }
        if let Some(root) = self.ctx.hierarchy.pop() {
            tracing::debug!(
                root = %root.name,
                elements = root.elements.len(),
                subcircuits = root.subcircuits.len(),
                errors = self.errors,
                "pass 1 done"
            );
            self.ctx.forest.insert(root.path.clone(), root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerConfig;
    use crate::devices::ModelKind;
    use crate::expr::Expr;

    fn parse(text: &str) -> (CompilerContext, usize) {
        let mut ctx = CompilerContext::new(CompilerConfig::default());
        let errors = parse_source(&mut ctx, text, Arc::from("<test>"), "", SourceKind::Netlist);
        (ctx, errors)
    }

    fn root(ctx: &CompilerContext) -> &CircuitDefinition {
        &ctx.forest[""]
    }

    #[test]
    fn test_elements_and_title() {
        let (ctx, errors) = parse(
            "\"RC network\"\n\
             R1 in out 1k\n\
             C1 out 0 C value=100n\n\
             V1 in 0 V value=1 dc=2\n\
             .end\n",
        );
        assert_eq!(errors, 0);
        let main = root(&ctx);
        assert_eq!(main.title, "RC network");
        assert_eq!(main.elements.len(), 3);

        let r1 = &main.elements["R1"];
        assert_eq!(r1.device, DeviceKind::Resistor);
        assert_eq!(r1.nodes, vec!["in", "out"]);
        assert_eq!(r1.model_name, ModelKind::R.name());
        assert_eq!(r1.params["value"], Expr::Number(1000.0));

        let v1 = &main.elements["V1"];
        assert_eq!(v1.model, ModelRef::Unresolved("V".into()));
        assert_eq!(v1.params.len(), 2);
    }

    #[test]
    fn test_nested_subcircuits() {
        let (ctx, errors) = parse(
            "title\n\
             .subckt amp in out gain=10\n\
             .subckt stage a b\n\
             R1 a b 1k\n\
             .ends\n\
             E1 out 0 in 0 {gain}\n\
             .ends amp\n\
             X1 1 2 amp gain=5\n\
             .end\n",
        );
        assert_eq!(errors, 0);
        let amp = &ctx.forest["amp"];
        assert_eq!(amp.nodes, vec!["in", "out"]);
        assert_eq!(amp.formals["gain"], Expr::Number(10.0));
        assert_eq!(amp.subcircuits, vec!["stage"]);
        assert!(ctx.forest["amp/stage"].elements.contains_key("R1"));

        let x1 = &root(&ctx).elements["X1"];
        assert_eq!(x1.model_name, "amp");
        assert_eq!(x1.nodes, vec!["1", "2"]);
        assert_eq!(x1.params["gain"], Expr::Number(5.0));
    }

    #[test]
    fn test_hierarchy_loop_rejected() {
        let (ctx, errors) = parse(
            "title\n\
             .subckt A p q\n\
             R1 p q 1\n\
             .subckt A x y\n\
             R2 x y 2\n\
             .ends\n\
             .ends\n\
             .end\n",
        );
        assert_eq!(errors, 1);
        assert!(matches!(
            ctx.diagnostics.items()[0].error,
            NetlistError::HierarchyLoop { ref name } if name == "A"
        ));
        let a = &ctx.forest["A"];
        assert_eq!(a.errors, 1);
        assert!(a.elements.contains_key("R1"));
        assert!(!a.elements.contains_key("R2"));
        assert!(!ctx.forest.contains_key("A/A"));
    }

    #[test]
    fn test_incomplete_elements() {
        let (ctx, errors) = parse("title\nR1 1\nC2 1 0\nQ1 c b e s\nZ1 1 0 1\n.end\n");
        assert_eq!(errors, 3);
        let main = root(&ctx);
        assert!(main.elements.contains_key("Q1"));
        assert_eq!(main.elements["Q1"].model_name, "Q");
        assert_eq!(main.errors, 3);
    }

    #[test]
    fn test_coupling_refs() {
        let (ctx, errors) = parse("title\nL1 1 0 1m\nL2 2 0 1m\nK1 L1 L2 0.9\n.end\n");
        assert_eq!(errors, 0);
        let k = &root(&ctx).elements["K1"];
        assert!(k.nodes.is_empty());
        assert_eq!(k.refs, vec!["L1", "L2"]);
    }

    #[test]
    fn test_commands() {
        let (ctx, errors) = parse(
            "title\n\
             .param a=1 b={a*2}\n\
             .model Rfast R noisetemp=300\n\
             .source V1\n\
             .detector V_out\n\
             .lgref E1\n\
             .backanno\n\
             .end\n\
             R9 1 0 1\n",
        );
        assert_eq!(errors, 0);
        let main = root(&ctx);
        assert_eq!(main.params.len(), 2);
        assert_eq!(main.models["Rfast"].base, "R");
        assert_eq!(main.sources[0].name, "V1");
        assert_eq!(main.detectors[0].name, "V_out");
        assert_eq!(main.lgrefs[0].name, "E1");
        assert_eq!((main.lgrefs[0].origin.line, main.lgrefs[0].origin.column), (6, 8));
        assert!(main.elements.is_empty());
        // unknown command is only a warning
        assert_eq!(ctx.diagnostics.items().len(), 1);
    }

    #[test]
    fn test_structure_errors() {
        let (ctx, errors) = parse(
            "title\n\
             R1 1 0 1\n\
             R1 2 0 1\n\
             .model m R\n\
             .model m R\n\
             .ends\n\
             .subckt open a b\n",
        );
        // duplicate element, duplicate model, stray .ends, unterminated
        assert_eq!(errors, 4);
        assert!(ctx.forest.contains_key("open"));
        assert!(ctx
            .diagnostics
            .items()
            .iter()
            .any(|d| matches!(d.error, NetlistError::MissingEnd)));
    }

    #[test]
    fn test_missing_title() {
        let (_, errors) = parse("* only a comment\n");
        assert_eq!(errors, 1);
    }
}
