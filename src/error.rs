//! Error type for the core: `CompileError` and friends.
//!
//! Modeled on `prqlc_parser::err::error`: a `Reason` enum carrying the
//! message shape, an optional associated expression, and a small builder
//! trait (`WithErrorInfo`) so call sites can read `foo().with_expr(e)`
//! left-to-right instead of constructing the struct inline.

use std::fmt;

use crate::expr::Expr;

/// A single compile error, optionally anchored to the expression that
/// caused it (§6.4).
#[derive(Debug, Clone)]
pub struct CompileError {
    pub reason: Reason,
    pub source_expr: Option<Expr>,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Reason {
    Simple(String),
    NotFound { name: String, namespace: &'static str },
    Unsupported { what: String },
    Bug { details: String },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Simple(s) => f.write_str(s),
            Reason::NotFound { name, namespace } => {
                write!(f, "{namespace} `{name}` not found")
            }
            Reason::Unsupported { what } => write!(f, "unsupported: {what}"),
            Reason::Bug { details } => write!(f, "internal error: {details}"),
        }
    }
}

impl CompileError {
    pub fn new(reason: Reason) -> Self {
        CompileError {
            reason,
            source_expr: None,
            hints: Vec::new(),
        }
    }

    pub fn new_simple<S: ToString>(reason: S) -> Self {
        CompileError::new(Reason::Simple(reason.to_string()))
    }

    pub fn not_found<S: ToString>(name: S, namespace: &'static str) -> Self {
        CompileError::new(Reason::NotFound {
            name: name.to_string(),
            namespace,
        })
    }

    pub fn unsupported<S: ToString>(what: S) -> Self {
        CompileError::new(Reason::Unsupported {
            what: what.to_string(),
        })
    }

    pub fn bug<S: ToString>(details: S) -> Self {
        CompileError::new(Reason::Bug {
            details: details.to_string(),
        })
    }

    /// §6.4: `WriteTo` contract — `in expression:\n\t<expr>\n<message>\n`
    /// when an expression is associated, otherwise just the message.
    pub fn write_to(&self, w: &mut impl fmt::Write) -> fmt::Result {
        if let Some(e) = &self.source_expr {
            writeln!(w, "in expression:")?;
            writeln!(w, "\t{e}")?;
        }
        writeln!(w, "{}", self.reason)?;
        for hint in &self.hints {
            writeln!(w, "hint: {hint}")?;
        }
        Ok(())
    }

    pub fn message(&self) -> String {
        let mut s = String::new();
        // write_to on a String never fails
        self.write_to(&mut s).ok();
        s
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for CompileError {}

/// Multiple accumulated errors from one lowering walk (§7: "lowering
/// collects the first error and surfaces it ... with a count of additional
/// errors").
#[derive(Debug, Clone, Default)]
pub struct CompileErrors(pub Vec<CompileError>);

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_first() {
            None => write!(f, "no errors"),
            Some((first, rest)) => {
                write!(f, "{first}")?;
                if !rest.is_empty() {
                    write!(f, "\n(+{} more error(s))", rest.len())?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CompileErrors {}

impl From<CompileError> for CompileErrors {
    fn from(e: CompileError) -> Self {
        CompileErrors(vec![e])
    }
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

/// Builder trait for attaching context to an in-flight error, mirroring
/// `prqlc_parser::err::error::WithErrorInfo`.
pub trait WithErrorInfo: Sized {
    fn with_expr(self, expr: &Expr) -> Self;
    fn push_hint<S: Into<String>>(self, hint: S) -> Self;
}

impl WithErrorInfo for CompileError {
    fn with_expr(mut self, expr: &Expr) -> Self {
        self.source_expr = Some(expr.clone());
        self
    }

    fn push_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hints.push(hint.into());
        self
    }
}

impl<T> WithErrorInfo for Result<T, CompileError> {
    fn with_expr(self, expr: &Expr) -> Self {
        self.map_err(|e| e.with_expr(expr))
    }

    fn push_hint<S: Into<String>>(self, hint: S) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }
}
