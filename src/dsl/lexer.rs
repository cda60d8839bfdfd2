//! Lexer (tokenizer) for netlist text.
//!
//! The lexer knows nothing about circuits. It turns text into tokens and
//! [`tokenize`] groups them into logical lines, splicing `+` continuation
//! lines onto the line before them.

use crate::error::NetlistError;
use crate::expr::{numeric_prefix_len, Expr};

/// Magnitude suffixes and their decimal exponents. Suffixes are a single,
/// case-sensitive letter: `m` is milli and `M` is mega.
pub const SCALE_SUFFIXES: &[(char, i32)] = &[
    ('y', -24),
    ('z', -21),
    ('a', -18),
    ('f', -15),
    ('p', -12),
    ('n', -9),
    ('u', -6),
    ('m', -3),
    ('k', 3),
    ('M', 6),
    ('G', 9),
    ('T', 12),
    ('P', 15),
];

fn scale_exponent(c: char) -> Option<i32> {
    SCALE_SUFFIXES
        .iter()
        .find(|(s, _)| *s == c)
        .map(|(_, e)| *e)
}

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The token's text; numeric literals hold their canonical form
    pub text: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

/// Token types in netlist text.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A name (element, node, model, sub-circuit)
    Identifier,
    /// Text between double quotes, or a title line
    QuotedString,
    /// A dot command, text includes the leading '.'
    Command,
    /// `name=value`
    ParamDef { name: String, value: Expr },
    /// Integer literal
    Integer,
    /// Decimal literal
    Float,
    /// Literal with an exponent
    Scientific,
    /// Literal with a magnitude suffix, text holds the exponent form
    Scaled,
    /// `{...}` expression, text holds the normalized expression
    Expression(Expr),
    /// Path-like word (`lib/opamps.lib`)
    FileName,
    /// '+' continuation marker at line start
    Plus,
    /// Comment text
    Comment,
    /// End of a physical line
    Newline,
}

impl Token {
    /// Numeric value of a numeric literal token.
    pub fn number(&self) -> Option<f64> {
        match self.kind {
            TokenKind::Integer | TokenKind::Float | TokenKind::Scientific | TokenKind::Scaled => {
                self.text.parse().ok()
            }
            _ => None,
        }
    }

    /// Expression value of a numeric literal or brace expression.
    pub fn value(&self) -> Option<Expr> {
        match &self.kind {
            TokenKind::Expression(expr) => Some(expr.clone()),
            _ => self.number().map(Expr::Number),
        }
    }

    /// Tokens usable as a node name.
    pub fn is_node_name(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier | TokenKind::Integer)
    }
}

/// A lexical error with its position.
#[derive(Debug)]
pub struct LexError {
    pub error: NetlistError,
    pub line: usize,
    pub column: usize,
}

/// Result of tokenizing a complete text.
#[derive(Debug, Default)]
pub struct Tokenized {
    /// Logical lines; the first one holds the title token
    pub lines: Vec<Vec<Token>>,
    pub errors: Vec<LexError>,
}

impl Tokenized {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// Lexer for tokenizing netlist input.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    at_line_start: bool,
    /// Whether a token other than '+' has been produced on this physical line
    line_has_tokens: bool,
    title_pending: bool,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
            at_line_start: true,
            line_has_tokens: false,
            title_pending: true,
            errors: Vec::new(),
        }
    }

    /// Consume the lexer, returning its errors.
    pub fn into_errors(self) -> Vec<LexError> {
        self.errors
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
            self.line_has_tokens = false;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn advance_by(&mut self, bytes: usize) {
        let end = self.pos + bytes;
        while self.pos < end {
            self.advance();
        }
    }

    fn error(&mut self, error: NetlistError, line: usize, column: usize) {
        self.errors.push(LexError {
            error,
            line,
            column,
        });
    }

    fn rest_of_line(&self) -> &'a str {
        let rest = self.rest();
        let end = rest.find('\n').unwrap_or(rest.len());
        &rest[..end]
    }

    fn skip_to_eol(&mut self) -> &'a str {
        let text = self.rest_of_line();
        self.advance_by(text.len());
        text
    }

    fn make(&self, kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Token {
        Token {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    /// Get the next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Option<Token> {
        loop {
            let ch = self.peek_char()?;
            let line = self.line;
            let column = self.column;

            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
                continue;
            }

            if ch == '\n' {
                self.advance();
                return Some(self.make(TokenKind::Newline, "\n", line, column));
            }

            if self.at_line_start {
                self.at_line_start = false;
                let text = self.rest_of_line().trim();
                if ch == '*' {
                    let text = self.skip_to_eol();
                    return Some(self.make(TokenKind::Comment, text, line, column));
                }
                if self.title_pending && !text.is_empty() && ch != ';' {
                    self.title_pending = false;
                    self.line_has_tokens = true;
                    let raw = self.skip_to_eol().trim();
                    let title = raw
                        .strip_prefix('"')
                        .and_then(|t| t.strip_suffix('"'))
                        .unwrap_or(raw);
                    return Some(self.make(TokenKind::QuotedString, title, line, column));
                }
                if ch == '+' {
                    self.advance();
                    return Some(self.make(TokenKind::Plus, "+", line, column));
                }
            }

            let first_on_line = !self.line_has_tokens;
            self.line_has_tokens = true;

            let token = match ch {
                ';' => {
                    let text = self.skip_to_eol();
                    self.make(TokenKind::Comment, text, line, column)
                }
                '"' => match self.read_quoted(line, column) {
                    Some(text) => self.make(TokenKind::QuotedString, text, line, column),
                    None => continue,
                },
                '{' => match self.read_brace(line, column) {
                    Some((text, expr)) => self.make(TokenKind::Expression(expr), text, line, column),
                    None => continue,
                },
                '.' if first_on_line && self.peek_nth(1).is_some_and(|c| c.is_ascii_alphabetic()) => {
                    self.advance();
                    let name = self.read_word();
                    self.make(TokenKind::Command, format!(".{}", name.to_lowercase()), line, column)
                }
                _ if self.starts_number() => match self.read_number(line, column) {
                    Some((kind, text)) => self.make(kind, text, line, column),
                    None => continue,
                },
                _ if ch.is_alphabetic() || ch == '_' => self.read_word_token(line, column)?,
                '.' | '/' | '\\' | '~' => {
                    let text = self.read_path();
                    self.make(TokenKind::FileName, text, line, column)
                }
                _ => {
                    self.advance();
                    self.error(NetlistError::IllegalCharacter { ch }, line, column);
                    continue;
                }
            };
            return Some(token);
        }
    }

    fn starts_number(&self) -> bool {
        let mut chars = self.rest().chars();
        let mut c = chars.next();
        if matches!(c, Some('-') | Some('+')) {
            c = chars.next();
        }
        match c {
            Some(d) if d.is_ascii_digit() => true,
            Some('.') => chars.next().is_some_and(|d| d.is_ascii_digit()),
            _ => false,
        }
    }

    fn read_word(&mut self) -> String {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.advance_by(len);
        rest[..len].to_string()
    }

    fn read_path(&mut self) -> String {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '/' | '\\' | '-' | '~' | ':')))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.advance_by(len);
        rest[..len].to_string()
    }

    fn read_word_token(&mut self, line: usize, column: usize) -> Option<Token> {
        let word_start = self.pos;
        let word = self.read_word();

        // name=value, spaces around '=' allowed
        let after = self.rest();
        let trimmed = after.trim_start_matches([' ', '\t']);
        if trimmed.starts_with('=') && !trimmed.starts_with("==") {
            self.advance_by(after.len() - trimmed.len() + 1);
            while matches!(self.peek_char(), Some(' ') | Some('\t')) {
                self.advance();
            }
            return match self.read_param_value(&word, line, column) {
                Some(value) => {
                    let text = format!("{}={}", word, value);
                    Some(self.make(TokenKind::ParamDef { name: word, value }, text, line, column))
                }
                None => self.next_token(),
            };
        }

        // path-like word: lib/amps.lib, models.lib
        if matches!(self.peek_char(), Some('.') | Some('/') | Some('\\'))
            && self
                .peek_nth(1)
                .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '/'))
        {
            self.pos = word_start;
            self.column -= word.chars().count();
            let text = self.read_path();
            return Some(self.make(TokenKind::FileName, text, line, column));
        }

        Some(self.make(TokenKind::Identifier, word, line, column))
    }

    fn read_param_value(&mut self, name: &str, line: usize, column: usize) -> Option<Expr> {
        let vline = self.line;
        let vcol = self.column;
        match self.peek_char() {
            Some('{') => self.read_brace(vline, vcol).map(|(_, expr)| expr),
            Some('"') => {
                let text = self.read_quoted(vline, vcol)?;
                match Expr::parse(&normalize_scale_suffixes(&text)) {
                    Ok(expr) => Some(expr),
                    Err(e) => {
                        self.error(
                            NetlistError::InvalidExpression {
                                text,
                                message: e.message,
                            },
                            vline,
                            vcol,
                        );
                        None
                    }
                }
            }
            Some(c) if c.is_alphabetic() || c == '_' => Some(Expr::Symbol(self.read_word())),
            _ if self.starts_number() => {
                let (_, text) = self.read_number(vline, vcol)?;
                text.parse::<f64>().ok().map(Expr::Number)
            }
            _ => {
                self.error(
                    NetlistError::MissingParamValue {
                        name: name.to_string(),
                    },
                    line,
                    column,
                );
                None
            }
        }
    }

    fn read_quoted(&mut self, line: usize, column: usize) -> Option<String> {
        self.advance();
        let rest = self.rest_of_line();
        match rest.find('"') {
            Some(end) => {
                let text = rest[..end].to_string();
                self.advance_by(end + 1);
                Some(text)
            }
            None => {
                self.skip_to_eol();
                self.error(NetlistError::UnterminatedString, line, column);
                None
            }
        }
    }

    fn read_brace(&mut self, line: usize, column: usize) -> Option<(String, Expr)> {
        self.advance();
        let rest = self.rest_of_line();
        let Some(end) = rest.find('}') else {
            self.skip_to_eol();
            self.error(NetlistError::UnterminatedExpression, line, column);
            return None;
        };
        let raw = &rest[..end];
        self.advance_by(end + 1);

        let normalized = normalize_scale_suffixes(raw);
        match Expr::parse(&normalized) {
            Ok(expr) => Some((normalized, expr)),
            Err(e) => {
                self.error(
                    NetlistError::InvalidExpression {
                        text: raw.trim().to_string(),
                        message: e.message,
                    },
                    line,
                    column,
                );
                None
            }
        }
    }

    fn read_number(&mut self, line: usize, column: usize) -> Option<(TokenKind, String)> {
        let rest = self.rest();
        let sign_len = if rest.starts_with(['-', '+']) { 1 } else { 0 };
        let body = &rest[sign_len..];
        let len = numeric_prefix_len(body);
        let literal = &rest[..sign_len + len];
        let has_exponent = body[..len].contains(['e', 'E']);
        self.advance_by(sign_len + len);

        if let Some(exp) = self.peek_char().and_then(scale_exponent) {
            self.advance();
            if has_exponent {
                self.error(
                    NetlistError::MalformedNumber {
                        text: format!("{}{}", literal, &self.input[self.pos - 1..self.pos]),
                    },
                    line,
                    column,
                );
                return None;
            }
            return Some((TokenKind::Scaled, format!("{}e{}", literal, exp)));
        }

        let kind = if has_exponent {
            TokenKind::Scientific
        } else if literal.contains('.') {
            TokenKind::Float
        } else {
            TokenKind::Integer
        };
        Some((kind, literal.to_string()))
    }
}

/// Rewrite numeric sub-literals with a magnitude suffix into exponent form,
/// e.g. `R*1k+2.2u` becomes `R*1e3+2.2e-6`.
pub fn normalize_scale_suffixes(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        let starts_literal = !prev.is_some_and(|p| p.is_alphanumeric() || p == '_' || p == '.')
            && rest.starts_with(|c: char| c.is_ascii_digit() || c == '.');
        let len = if starts_literal { numeric_prefix_len(rest) } else { 0 };

        if len > 0 {
            let literal = &rest[..len];
            out.push_str(literal);
            i += len;
            let has_exponent = literal.contains(['e', 'E']);
            if let Some(c) = text[i..].chars().next() {
                if let Some(exp) = scale_exponent(c).filter(|_| !has_exponent) {
                    out.push_str(&format!("e{}", exp));
                    i += c.len_utf8();
                    prev = Some('0');
                    continue;
                }
            }
            prev = literal.chars().last();
            continue;
        }

        let c = rest.chars().next().unwrap_or(' ');
        out.push(c);
        prev = Some(c);
        i += c.len_utf8();
    }

    out
}

/// Tokenize a complete text into logical lines.
///
/// Comment and newline tokens are dropped; a line starting with `+` is
/// appended to the logical line before it.
pub fn tokenize(text: &str) -> Tokenized {
    let mut lexer = Lexer::new(text);
    let mut lines: Vec<Vec<Token>> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut continuation = false;
    let mut stray_plus = Vec::new();

    while let Some(token) = lexer.next_token() {
        match token.kind {
            TokenKind::Comment => {}
            TokenKind::Newline => {
                if !current.is_empty() {
                    if continuation {
                        match lines.last_mut() {
                            Some(prev) => prev.append(&mut current),
                            None => lines.push(std::mem::take(&mut current)),
                        }
                    } else {
                        lines.push(std::mem::take(&mut current));
                    }
                }
                continuation = false;
            }
            TokenKind::Plus => {
                if lines.is_empty() {
                    stray_plus.push((token.line, token.column));
                }
                continuation = true;
            }
            _ => current.push(token),
        }
    }
    if !current.is_empty() {
        match lines.last_mut() {
            Some(prev) if continuation => prev.append(&mut current),
            _ => lines.push(current),
        }
    }

    let mut errors = lexer.into_errors();
    for (line, column) in stray_plus {
        errors.push(LexError {
            error: NetlistError::unexpected("continuation", "+"),
            line,
            column,
        });
    }

    Tokenized { lines, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Symbolic;
    use approx::assert_relative_eq;

    fn body_tokens(input: &str) -> Vec<Token> {
        let text = format!("title\n{}", input);
        let t = tokenize(&text);
        assert!(t.errors.is_empty(), "unexpected errors: {:?}", t.errors);
        t.lines.into_iter().skip(1).flatten().collect()
    }

    #[test]
    fn test_scale_suffixes() {
        for (suffix, exp) in SCALE_SUFFIXES {
            let toks = body_tokens(&format!("R1 1 2 3.3{}", suffix));
            let tok = &toks[3];
            assert_eq!(tok.kind, TokenKind::Scaled);
            assert_relative_eq!(
                tok.number().unwrap(),
                3.3 * 10f64.powi(*exp),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn test_canonical_forms() {
        let toks = body_tokens("R1 1 2 1k 2.2u 1e-3 0.5 42");
        assert_eq!(toks[3].text, "1e3");
        assert_relative_eq!(toks[3].number().unwrap(), 1000.0);
        assert_eq!(toks[4].text, "2.2e-6");
        assert_eq!(toks[5].kind, TokenKind::Scientific);
        assert_eq!(toks[6].kind, TokenKind::Float);
        assert_eq!(toks[7].kind, TokenKind::Integer);
    }

    #[test]
    fn test_single_letter_suffix_rule() {
        let toks = body_tokens("R1 1 2 10meg");
        assert_eq!(toks[3].kind, TokenKind::Scaled);
        assert_relative_eq!(toks[3].number().unwrap(), 10e-3);
        assert_eq!(toks[4].kind, TokenKind::Identifier);
        assert_eq!(toks[4].text, "eg");
    }

    #[test]
    fn test_continuation_splicing() {
        let one = tokenize("t\nR1 1 2 R value=1k dcvar=0.01\n");
        let split = tokenize("t\nR1 1 2\n+ R value=1k\n* a comment\n+ dcvar=0.01\n");
        let strip = |t: &Tokenized| -> Vec<Vec<(TokenKind, String)>> {
            t.lines
                .iter()
                .map(|l| l.iter().map(|tok| (tok.kind.clone(), tok.text.clone())).collect())
                .collect()
        };
        assert_eq!(strip(&one), strip(&split));
        assert_eq!(split.lines.len(), 2);
    }

    #[test]
    fn test_title_line_verbatim() {
        let t = tokenize("* header comment\n\"My (first) RC network\"\nR1 1 0 1k\n");
        assert_eq!(t.lines[0].len(), 1);
        assert_eq!(t.lines[0][0].kind, TokenKind::QuotedString);
        assert_eq!(t.lines[0][0].text, "My (first) RC network");
        assert!(t.errors.is_empty());
    }

    #[test]
    fn test_brace_expression_normalized() {
        let toks = body_tokens("R1 1 2 {R_a*1k + 2.2u/s}");
        assert_eq!(toks[3].text, "R_a*1e3 + 2.2e-6/s");
        match &toks[3].kind {
            TokenKind::Expression(e) => {
                let syms: Vec<_> = e.free_symbols().into_iter().collect();
                assert_eq!(syms, vec!["R_a", "s"]);
            }
            other => panic!("expected expression, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_expression_recovers() {
        let t = tokenize("t\nR1 1 2 {a+*} value=3\n");
        assert_eq!(t.error_count(), 1);
        let line = &t.lines[1];
        assert_eq!(line.len(), 4);
        assert!(matches!(line[3].kind, TokenKind::ParamDef { .. }));
    }

    #[test]
    fn test_param_def_token() {
        let toks = body_tokens(".param a = 2k b={a/2} c=d");
        assert_eq!(toks[0].kind, TokenKind::Command);
        assert_eq!(toks[0].text, ".param");
        match &toks[1].kind {
            TokenKind::ParamDef { name, value } => {
                assert_eq!(name, "a");
                assert_eq!(value.as_number(), Some(2000.0));
            }
            other => panic!("expected param def, got {:?}", other),
        }
        assert!(matches!(&toks[2].kind, TokenKind::ParamDef { name, .. } if name == "b"));
        assert!(matches!(&toks[3].kind, TokenKind::ParamDef { value: Expr::Symbol(s), .. } if s == "d"));
    }

    #[test]
    fn test_illegal_character_skipped() {
        let t = tokenize("t\nR1 1 2 @ 1k\n");
        assert_eq!(t.error_count(), 1);
        assert_eq!(t.errors[0].line, 2);
        assert_eq!(t.errors[0].column, 8);
        assert_eq!(t.lines[1].len(), 4);
    }

    #[test]
    fn test_filenames_and_inline_comments() {
        let toks = body_tokens(".lib lib/opamps.lib ; the op amps\n.include models.lib");
        assert_eq!(toks[1].kind, TokenKind::FileName);
        assert_eq!(toks[1].text, "lib/opamps.lib");
        assert_eq!(toks.len(), 4);
        assert_eq!(toks[3].text, "models.lib");
    }

    #[test]
    fn test_normalize_leaves_identifiers() {
        assert_eq!(normalize_scale_suffixes("R1k*2k"), "R1k*2e3");
        assert_eq!(normalize_scale_suffixes("1e3*x"), "1e3*x");
        assert_eq!(normalize_scale_suffixes(".5m"), ".5e-3");
    }
}
