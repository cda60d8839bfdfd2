//! Parameter expressions.
//!
//! The compiler never evaluates parameter values. It only asks an expression
//! for its free symbols and substitutes symbols by other expressions. That
//! contract is the [`Symbolic`] trait; [`Expr`] is the implementation used by
//! the tokenizer for literals and `{...}` expressions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

/// Minimal contract a parameter value has to satisfy.
pub trait Symbolic: Clone + PartialEq + fmt::Debug + fmt::Display {
    /// Names of all symbols appearing in the expression.
    fn free_symbols(&self) -> BTreeSet<String>;

    /// Replace every symbol found in `bindings` by its bound expression.
    fn subst(&self, bindings: &BTreeMap<String, Self>) -> Self;

    /// Check whether `name` appears as a free symbol.
    fn contains_symbol(&self, name: &str) -> bool {
        self.free_symbols().contains(name)
    }
}

/// Error produced when expression text cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid expression at offset {offset}: {message}")]
pub struct ExprError {
    /// Byte offset into the expression text
    pub offset: usize,
    pub message: String,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Pow => 4,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
        }
    }
}

const UNARY_PRECEDENCE: u8 = 3;

/// An immutable symbolic expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// Named parameter or variable
    Symbol(String),
    /// Unary minus
    Neg(Box<Expr>),
    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Function application; the function name is not a free symbol
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Create a symbol expression.
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    /// Parse expression text such as `2*pi*f*C + 1e-3`.
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let tokens = scan(text)?;
        let mut parser = ExprParser {
            tokens,
            pos: 0,
            len: text.len(),
        };
        let expr = parser.parse_expr(0)?;
        match parser.peek() {
            None => Ok(expr),
            Some((offset, tok)) => Err(ExprError {
                offset: *offset,
                message: format!("unexpected {}", tok.describe()),
            }),
        }
    }

    /// Numeric value if the expression is a plain literal.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Neg(inner) => inner.as_number().map(|v| -v),
            _ => None,
        }
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Symbol(name) => {
                out.insert(name.clone());
            }
            Self::Neg(inner) => inner.collect_symbols(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_symbols(out);
                rhs.collect_symbols(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_symbols(out);
                }
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Binary { op, .. } => op.precedence(),
            Self::Neg(_) => UNARY_PRECEDENCE,
            _ => u8::MAX,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl Symbolic for Expr {
    fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn subst(&self, bindings: &BTreeMap<String, Self>) -> Self {
        if bindings.is_empty() {
            return self.clone();
        }
        match self {
            Self::Number(_) => self.clone(),
            Self::Symbol(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            Self::Neg(inner) => Self::Neg(Box::new(inner.subst(bindings))),
            Self::Binary { op, lhs, rhs } => Self::Binary {
                op: *op,
                lhs: Box::new(lhs.subst(bindings)),
                rhs: Box::new(rhs.subst(bindings)),
            },
            Self::Call { name, args } => Self::Call {
                name: name.clone(),
                args: args.iter().map(|a| a.subst(bindings)).collect(),
            },
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => fmt_number(*v, f),
            Self::Symbol(name) => write!(f, "{}", name),
            Self::Neg(inner) => {
                write!(f, "-")?;
                inner.fmt_operand(f, UNARY_PRECEDENCE + 1)
            }
            Self::Binary { op, lhs, rhs } => {
                let p = op.precedence();
                // '^' is right associative, the others left associative
                let (lmin, rmin) = if *op == BinaryOp::Pow { (p + 1, p) } else { (p, p + 1) };
                lhs.fmt_operand(f, lmin)?;
                write!(f, "{}", op.symbol())?;
                rhs.fmt_operand(f, rmin)
            }
            Self::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn fmt_number(v: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        write!(f, "{}", v as i64)
    } else if v != 0.0 && (v.abs() < 1e-3 || v.abs() >= 1e15) {
        write!(f, "{:e}", v)
    } else {
        write!(f, "{}", v)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Number(f64),
    Ident(String),
    Op(char),
    Pow,
    LParen,
    RParen,
    Comma,
}

impl ExprToken {
    fn describe(&self) -> String {
        match self {
            Self::Number(v) => format!("number '{}'", v),
            Self::Ident(s) => format!("identifier '{}'", s),
            Self::Op(c) => format!("operator '{}'", c),
            Self::Pow => "operator '^'".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::Comma => "','".to_string(),
        }
    }
}

fn scan(text: &str) -> Result<Vec<(usize, ExprToken)>, ExprError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                let end = numeric_prefix_len(&text[i..]);
                if end == 0 {
                    return Err(ExprError {
                        offset: i,
                        message: "malformed number".to_string(),
                    });
                }
                i += end;
                let value = text[start..i].parse::<f64>().map_err(|_| ExprError {
                    offset: start,
                    message: format!("malformed number '{}'", &text[start..i]),
                })?;
                tokens.push((start, ExprToken::Number(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((start, ExprToken::Ident(text[start..i].to_string())));
            }
            '*' if bytes.get(i + 1) == Some(&b'*') => {
                tokens.push((i, ExprToken::Pow));
                i += 2;
            }
            '^' => {
                tokens.push((i, ExprToken::Pow));
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                tokens.push((i, ExprToken::Op(c)));
                i += 1;
            }
            '(' => {
                tokens.push((i, ExprToken::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, ExprToken::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((i, ExprToken::Comma));
                i += 1;
            }
            other => {
                return Err(ExprError {
                    offset: i,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
    }

    Ok(tokens)
}

/// Length of the longest prefix of `text` that is a decimal or scientific
/// literal (`12`, `1.5`, `.5`, `2e-3`). Returns 0 when there is none.
pub(crate) fn numeric_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut digits = 0;

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return 0;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    i
}

struct ExprParser {
    tokens: Vec<(usize, ExprToken)>,
    pos: usize,
    len: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&(usize, ExprToken)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<(usize, ExprToken)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error_here(&self, message: impl Into<String>) -> ExprError {
        ExprError {
            offset: self.peek().map(|(o, _)| *o).unwrap_or(self.len),
            message: message.into(),
        }
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let op = match self.peek() {
                Some((_, ExprToken::Op('+'))) => BinaryOp::Add,
                Some((_, ExprToken::Op('-'))) => BinaryOp::Sub,
                Some((_, ExprToken::Op('*'))) => BinaryOp::Mul,
                Some((_, ExprToken::Op('/'))) => BinaryOp::Div,
                Some((_, ExprToken::Pow)) => BinaryOp::Pow,
                _ => break,
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.next();
            let next_min = if op == BinaryOp::Pow { prec } else { prec + 1 };
            let rhs = self.parse_expr(next_min)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some((_, ExprToken::Op('-'))) => {
                let operand = self.parse_expr(UNARY_PRECEDENCE + 1)?;
                Ok(match operand {
                    Expr::Number(v) => Expr::Number(-v),
                    other => Expr::Neg(Box::new(other)),
                })
            }
            Some((_, ExprToken::Op('+'))) => self.parse_expr(UNARY_PRECEDENCE + 1),
            Some((_, ExprToken::Number(v))) => Ok(Expr::Number(v)),
            Some((_, ExprToken::Ident(name))) => {
                if matches!(self.peek(), Some((_, ExprToken::LParen))) {
                    self.next();
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Symbol(name))
                }
            }
            Some((_, ExprToken::LParen)) => {
                let inner = self.parse_expr(0)?;
                match self.next() {
                    Some((_, ExprToken::RParen)) => Ok(inner),
                    _ => Err(self.error_here("expected ')'")),
                }
            }
            Some((offset, tok)) => Err(ExprError {
                offset,
                message: format!("unexpected {}", tok.describe()),
            }),
            None => Err(self.error_here("unexpected end of expression")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some((_, ExprToken::RParen))) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            match self.next() {
                Some((_, ExprToken::Comma)) => continue,
                Some((_, ExprToken::RParen)) => return Ok(args),
                _ => return Err(self.error_here("expected ',' or ')' in argument list")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let e = Expr::parse("a + b * c ^ 2").unwrap();
        assert_eq!(e.to_string(), "a+b*c^2");
        let e = Expr::parse("(a + b) * c").unwrap();
        assert_eq!(e.to_string(), "(a+b)*c");
    }

    #[test]
    fn test_free_symbols_skip_function_names() {
        let e = Expr::parse("sqrt(k*T/q) + 2*pi*f").unwrap();
        let syms: Vec<_> = e.free_symbols().into_iter().collect();
        assert_eq!(syms, vec!["T", "f", "k", "pi", "q"]);
    }

    #[test]
    fn test_subst() {
        let e = Expr::parse("R*2").unwrap();
        let mut bindings = BTreeMap::new();
        bindings.insert("R".to_string(), Expr::parse("R_X1").unwrap());
        assert_eq!(e.subst(&bindings).to_string(), "R_X1*2");
        assert!(e.contains_symbol("R"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("a +").is_err());
        assert!(Expr::parse("(a").is_err());
        assert!(Expr::parse("2 3").is_err());
        assert!(Expr::parse("a $ b").is_err());
    }

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(Expr::parse("-1e-3").unwrap(), Expr::Number(-1e-3));
        assert_eq!(Expr::parse("-x").unwrap().to_string(), "-x");
    }
}
