//! Error types and diagnostics for the netlist compiler.
//!
//! Compilation never aborts on a bad line. Every problem is recorded as a
//! [`Diagnostic`] wrapping a [`NetlistError`] and counted against the circuit
//! definition that owns it. Only failures that leave nothing to compile (the
//! top-level file cannot be read) are returned as `Err`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias using [`NetlistError`].
pub type Result<T> = std::result::Result<T, NetlistError>;

/// Unified error type for all netlist compiler diagnostics.
#[derive(Error, Debug)]
pub enum NetlistError {
    // ============ Lexical Errors ============
    /// Character that cannot start any token
    #[error("illegal character '{ch}'")]
    IllegalCharacter { ch: char },

    /// Malformed numeric literal
    #[error("malformed numeric literal '{text}'")]
    MalformedNumber { text: String },

    /// Brace expression that does not parse
    #[error("invalid expression '{{{text}}}': {message}")]
    InvalidExpression { text: String, message: String },

    /// '{' without matching '}'
    #[error("unterminated expression, missing '}}'")]
    UnterminatedExpression,

    /// Quote without matching quote
    #[error("unterminated quoted string")]
    UnterminatedString,

    /// `name=` with nothing usable after it
    #[error("missing value for parameter '{name}'")]
    MissingParamValue { name: String },

    // ============ Structural Errors ============
    /// Netlist without a title line
    #[error("missing circuit title")]
    MissingTitle,

    /// Element line lacking nodes, references or value
    #[error("incomplete specification of element '{ref_des}': {message}")]
    IncompleteElement { ref_des: String, message: String },

    /// Element whose first letter is not a known device
    #[error("unknown device type for element '{ref_des}'")]
    UnknownDevice { ref_des: String },

    /// Token that does not fit the line grammar
    #[error("unexpected {what} '{text}'")]
    UnexpectedToken { what: String, text: String },

    /// Dot command not understood
    #[error("unknown command '.{command}'")]
    UnknownCommand { command: String },

    /// Dot command with bad arguments
    #[error("malformed '.{command}' command: {message}")]
    MalformedCommand { command: String, message: String },

    /// `.subckt` re-opening a definition that is already open
    #[error("hierarchy loop: sub-circuit '{name}' is already open")]
    HierarchyLoop { name: String },

    /// `.ends` with no open sub-circuit
    #[error("'.ends' without matching '.subckt'")]
    UnmatchedEnds,

    /// `.subckt` still open at end of input
    #[error("sub-circuit '{name}' is not terminated with '.ends'")]
    UnterminatedSubcircuit { name: String },

    /// No `.end` command
    #[error("missing '.end' command")]
    MissingEnd,

    /// Same reference designator used twice in one definition
    #[error("duplicate element '{ref_des}'")]
    DuplicateElement { ref_des: String },

    /// Same model name defined twice in one definition
    #[error("duplicate model definition '{name}'")]
    DuplicateModel { name: String },

    /// Same sub-circuit name defined twice in one scope
    #[error("duplicate sub-circuit definition '{name}'")]
    DuplicateSubcircuit { name: String },

    /// Expanded element name already present in the flat circuit
    #[error("element name collision '{ref_des}' during expansion")]
    NameCollision { ref_des: String },

    /// Flattening went deeper than the configured limit
    #[error("hierarchy of '{ref_des}' exceeds depth {limit} (recursive instantiation?)")]
    DepthLimit { ref_des: String, limit: usize },

    /// Flattening performed more expansions than the configured cap
    #[error("expansion aborted after {limit} sub-circuit expansions")]
    ExpansionLimit { limit: usize },

    // ============ Reference Errors ============
    /// Cross-reference to an element that does not exist
    #[error("element '{ref_des}' references unknown element '{target}'")]
    UnknownReference { ref_des: String, target: String },

    /// Model name found nowhere
    #[error("unknown model or sub-circuit '{model}' for element '{ref_des}'")]
    UnknownModel { ref_des: String, model: String },

    /// Sub-circuit instance naming an unknown sub-circuit
    #[error("unknown sub-circuit '{name}' instantiated by '{ref_des}'")]
    UnknownSubcircuit { ref_des: String, name: String },

    /// Model that exists but is not valid for the device
    #[error("model '{model}' cannot be used with device '{device}' ('{ref_des}')")]
    ModelNotAllowed {
        ref_des: String,
        model: String,
        device: char,
    },

    /// `.model` based on something that is not a primitive model
    #[error("model '{model}' is based on unknown primitive '{base}'")]
    UnknownModelBase { model: String, base: String },

    /// `.model` parameter not defined by its base primitive
    #[error("parameter '{param}' is not a parameter of model '{model}' (base '{base}')")]
    IllegalModelParam {
        model: String,
        base: String,
        param: String,
    },

    /// Element parameter not defined by its model
    #[error("parameter '{param}' is not a parameter of model '{model}' ('{ref_des}')")]
    IllegalElementParam {
        ref_des: String,
        model: String,
        param: String,
    },

    /// Instance parameter not a formal parameter of the prototype
    #[error("'{param}' is not a parameter of sub-circuit '{subckt}' ('{ref_des}')")]
    IllegalInstanceParam {
        ref_des: String,
        subckt: String,
        param: String,
    },

    /// Instance node count differs from the prototype interface
    #[error("'{ref_des}' connects {found} nodes but sub-circuit '{subckt}' has {expected}")]
    PortCountMismatch {
        ref_des: String,
        subckt: String,
        expected: usize,
        found: usize,
    },

    /// Laplace variable used where the model forbids it
    #[error("Laplace variable '{variable}' not allowed in parameter '{param}' of '{owner}'")]
    LaplaceNotAllowed {
        owner: String,
        param: String,
        variable: String,
    },

    /// Library file not found in any search location
    #[error("library file '{path}' not found")]
    LibraryNotFound { path: String },

    /// Library file found but unreadable
    #[error("cannot read library file '{path}': {message}")]
    LibraryRead { path: String, message: String },

    /// Explicit reference to the built-in library
    #[error("library '{name}' is built in and always available; reference ignored")]
    BuiltinLibraryReference { name: String },

    // ============ Finalization Errors ============
    /// Circuit without the ground node
    #[error("circuit has no ground node '{ground}'")]
    MissingGround { ground: String },

    /// `.source` naming something that is not an independent source
    #[error("'{name}' is not an independent source")]
    UnknownSource { name: String },

    /// `.detector` naming something that is not a dependent variable
    #[error("'{name}' is not a dependent variable and cannot be a detector")]
    UnknownDetector { name: String },

    /// `.lgref` naming something that is not a controlled source
    #[error("'{name}' is not a controlled source and cannot be a loop gain reference")]
    UnknownLoopGainReference { name: String },

    /// Parameter left without a definition
    #[error("undefined parameter '{name}'")]
    UndefinedParameter { name: String },

    // ============ I/O Errors ============
    /// Error reading the top-level netlist file
    #[error("Failed to read netlist file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification of diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorClass {
    Lexical,
    Structural,
    Reference,
    Finalization,
    Io,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lexical => "lexical",
            Self::Structural => "structural",
            Self::Reference => "reference",
            Self::Finalization => "finalization",
            Self::Io => "io",
        };
        write!(f, "{}", s)
    }
}

/// How serious a diagnostic is. Only errors are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl NetlistError {
    /// Create an incomplete element error
    pub fn incomplete(ref_des: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IncompleteElement {
            ref_des: ref_des.into(),
            message: message.into(),
        }
    }

    /// Create an unexpected token error
    pub fn unexpected(what: impl Into<String>, text: impl Into<String>) -> Self {
        Self::UnexpectedToken {
            what: what.into(),
            text: text.into(),
        }
    }

    /// Create a malformed command error
    pub fn malformed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedCommand {
            command: command.into(),
            message: message.into(),
        }
    }

    /// The class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        use NetlistError::*;
        match self {
            IllegalCharacter { .. }
            | MalformedNumber { .. }
            | InvalidExpression { .. }
            | UnterminatedExpression
            | UnterminatedString
            | MissingParamValue { .. } => ErrorClass::Lexical,
            MissingTitle
            | IncompleteElement { .. }
            | UnknownDevice { .. }
            | UnexpectedToken { .. }
            | UnknownCommand { .. }
            | MalformedCommand { .. }
            | HierarchyLoop { .. }
            | UnmatchedEnds
            | UnterminatedSubcircuit { .. }
            | MissingEnd
            | DuplicateElement { .. }
            | DuplicateModel { .. }
            | DuplicateSubcircuit { .. }
            | NameCollision { .. }
            | DepthLimit { .. }
            | ExpansionLimit { .. } => ErrorClass::Structural,
            UnknownReference { .. }
            | UnknownModel { .. }
            | UnknownSubcircuit { .. }
            | ModelNotAllowed { .. }
            | UnknownModelBase { .. }
            | IllegalModelParam { .. }
            | IllegalElementParam { .. }
            | IllegalInstanceParam { .. }
            | PortCountMismatch { .. }
            | LaplaceNotAllowed { .. }
            | LibraryNotFound { .. }
            | LibraryRead { .. }
            | BuiltinLibraryReference { .. } => ErrorClass::Reference,
            MissingGround { .. }
            | UnknownSource { .. }
            | UnknownDetector { .. }
            | UnknownLoopGainReference { .. }
            | UndefinedParameter { .. } => ErrorClass::Finalization,
            FileReadError { .. } => ErrorClass::Io,
        }
    }

    /// Default severity of this error.
    pub fn severity(&self) -> Severity {
        use NetlistError::*;
        match self {
            MissingEnd
            | UnknownCommand { .. }
            | BuiltinLibraryReference { .. }
            | UnknownSource { .. }
            | UnknownDetector { .. }
            | UnknownLoopGainReference { .. } => Severity::Warning,
            UndefinedParameter { .. } => Severity::Info,
            _ => Severity::Error,
        }
    }
}

/// Location of a construct in its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Label of the source (file path or `<netlist>`)
    pub file: Arc<str>,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

impl Origin {
    pub fn new(file: Arc<str>, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One reported problem.
#[derive(Debug)]
pub struct Diagnostic {
    pub error: NetlistError,
    pub severity: Severity,
    pub origin: Option<Origin>,
    /// Text of the offending source line, if known
    pub source_line: Option<String>,
}

impl Diagnostic {
    /// Render the diagnostic with the source line and a caret under the
    /// offending column.
    pub fn render(&self) -> String {
        let mut out = format!("{}[{}]: {}", self.severity, self.error.class(), self.error);
        if let Some(origin) = &self.origin {
            out.push_str(&format!("\n --> {}", origin));
            if let Some(text) = &self.source_line {
                let number = origin.line.to_string();
                let pad = " ".repeat(number.len());
                let caret_pad: String = text
                    .chars()
                    .take(origin.column.saturating_sub(1))
                    .map(|c| if c == '\t' { '\t' } else { ' ' })
                    .collect();
                out.push_str(&format!("\n{} |\n{} | {}\n{} | {}^", pad, number, text, pad, caret_pad));
            }
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Collects diagnostics together with the source texts needed to render them.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    sources: BTreeMap<Arc<str>, Vec<String>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the text of a source so that its lines can be quoted.
    pub fn add_source(&mut self, file: Arc<str>, text: &str) {
        self.sources
            .insert(file, text.lines().map(str::to_string).collect());
    }

    /// Record `error` with its default severity.
    ///
    /// Returns the severity so callers can bump their error counter.
    pub fn report(&mut self, error: NetlistError, origin: Option<Origin>) -> Severity {
        let severity = error.severity();
        self.report_with(error, severity, origin)
    }

    /// Record `error` with an explicit severity.
    pub fn report_with(
        &mut self,
        error: NetlistError,
        severity: Severity,
        origin: Option<Origin>,
    ) -> Severity {
        let source_line = origin.as_ref().and_then(|o| {
            self.sources
                .get(&o.file)
                .and_then(|lines| lines.get(o.line.wrapping_sub(1)))
                .cloned()
        });
        let diagnostic = Diagnostic {
            error,
            severity,
            origin,
            source_line,
        };
        match severity {
            Severity::Error => tracing::error!("{}", diagnostic.render()),
            Severity::Warning => tracing::warn!("{}", diagnostic.render()),
            Severity::Info => tracing::info!("{}", diagnostic.render()),
        }
        self.items.push(diagnostic);
        severity
    }

    /// All diagnostics in report order.
    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    /// Number of diagnostics with error severity.
    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Drop all diagnostics and sources.
    pub fn clear(&mut self) {
        self.items.clear();
        self.sources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_caret() {
        let mut diags = Diagnostics::new();
        let file: Arc<str> = Arc::from("amp.cir");
        diags.add_source(file.clone(), "title\nR1 1 2 foo\n");
        diags.report(
            NetlistError::UnknownModel {
                ref_des: "R1".into(),
                model: "foo".into(),
            },
            Some(Origin::new(file, 2, 8)),
        );
        let text = diags.items()[0].render();
        assert!(text.starts_with("error[reference]: unknown model or sub-circuit 'foo'"));
        assert!(text.contains(" --> amp.cir:2:8"));
        assert!(text.contains("2 | R1 1 2 foo"));
        assert!(text.ends_with("\n  |        ^"));
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn test_warnings_not_counted() {
        let mut diags = Diagnostics::new();
        let sev = diags.report(NetlistError::MissingEnd, None);
        assert_eq!(sev, Severity::Warning);
        diags.report(NetlistError::UndefinedParameter { name: "x".into() }, None);
        assert_eq!(diags.error_count(), 0);
        assert_eq!(diags.items().len(), 2);
    }
}
