//! Type inference against a schema hint (§3.3, §4.7 `check`).
//!
//! A deliberately small type lattice: just enough to catch the shapes of
//! ill-typed expression the core is required to reject (dot on non-struct,
//! index on non-list, incompatible arithmetic/comparison operands,
//! references to unbound names). `Ty::Any` is the escape hatch for
//! undeclared/unknown schema, matching how a real executor would treat a
//! missing schema hint as "accept anything".

use std::collections::HashMap;

use crate::error::{CompileError, Reason};

use super::{BinOp, Expr, ExprKind, Literal, UnOp};

#[derive(Debug, Clone, PartialEq)]
pub enum Ty {
    Int,
    Float,
    Str,
    Bool,
    Timestamp,
    Struct(Vec<(String, Ty)>),
    List(Box<Ty>),
    Null,
    Missing,
    /// Unknown/unconstrained — the schema hint had no opinion.
    Any,
}

impl Ty {
    fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float | Ty::Any)
    }

    fn field(&self, name: &str) -> Option<Ty> {
        match self {
            Ty::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, t)| t.clone()),
            Ty::Any => Some(Ty::Any),
            _ => None,
        }
    }

    fn elem(&self) -> Option<Ty> {
        match self {
            Ty::List(t) => Some((**t).clone()),
            Ty::Any => Some(Ty::Any),
            _ => None,
        }
    }

    /// Whether two types are compatible operands for arithmetic/comparison
    /// (identical, or either side unconstrained).
    fn compatible(&self, other: &Ty) -> bool {
        if matches!(self, Ty::Any) || matches!(other, Ty::Any) {
            return true;
        }
        // NULL/MISSING are compatible with anything, matching three-valued
        // SQL/PartiQL comparison semantics.
        if matches!(self, Ty::Null | Ty::Missing) || matches!(other, Ty::Null | Ty::Missing) {
            return true;
        }
        self == other
    }
}

/// Maps identifier names visible at a given step to their type, built by
/// `check::schema_hint_for` by walking the parent chain (§4.7).
#[derive(Debug, Clone, Default)]
pub struct SchemaHint {
    pub bindings: HashMap<String, Ty>,
}

impl SchemaHint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, ty: Ty) -> Self {
        self.bindings.insert(name.into(), ty);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Ty> {
        self.bindings.get(name)
    }
}

/// Type inference assumes the name has already been resolved structurally
/// (§4.1's binding walk catches undefined variables; this only rejects
/// shapes that are ill-typed given a *known* schema). A name absent from
/// the hint — including when the environment declared no schema for the
/// table at all — infers as `Ty::Any` rather than erroring.
pub fn infer_type(expr: &Expr, hint: &SchemaHint) -> Result<Ty, CompileError> {
    match &expr.kind {
        ExprKind::Ident(name) => Ok(hint.get(name).cloned().unwrap_or(Ty::Any)),
        ExprKind::ColumnRef(name) => Ok(hint.get(name).cloned().unwrap_or(Ty::Any)),
        ExprKind::Literal(l) => Ok(match l {
            Literal::Int(_) => Ty::Int,
            Literal::Float(_) => Ty::Float,
            Literal::Str(_) => Ty::Str,
            Literal::Bool(_) => Ty::Bool,
            Literal::Null => Ty::Null,
            Literal::Missing => Ty::Missing,
            Literal::Timestamp(_) => Ty::Timestamp,
        }),
        ExprKind::Path(base, field) => {
            let base_ty = infer_type(base, hint)?;
            base_ty
                .field(field)
                .ok_or_else(|| CompileError::new_simple(format!("ill-typed: `{field}` is not a field of a struct")))
        }
        ExprKind::Index(base, idx) => {
            let base_ty = infer_type(base, hint)?;
            let idx_ty = infer_type(idx, hint)?;
            if !idx_ty.is_numeric() {
                return Err(CompileError::new_simple("ill-typed: index must be an integer"));
            }
            base_ty
                .elem()
                .ok_or_else(|| CompileError::new_simple("ill-typed: cannot index a non-list value"))
        }
        ExprKind::Unary { op, expr: inner } => {
            let t = infer_type(inner, hint)?;
            match op {
                UnOp::Neg if t.is_numeric() || matches!(t, Ty::Null | Ty::Missing) => Ok(t),
                UnOp::Neg => Err(CompileError::new_simple("ill-typed: `-` requires a numeric operand")),
                UnOp::Not => Ok(Ty::Bool),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = infer_type(lhs, hint)?;
            let r = infer_type(rhs, hint)?;
            if !l.compatible(&r) {
                return Err(CompileError::new_simple(format!(
                    "ill-typed: incompatible operand types for `{}`",
                    op.as_sql()
                )));
            }
            if op.is_comparison() {
                Ok(Ty::Bool)
            } else if *op == BinOp::Concat {
                Ok(Ty::Str)
            } else if l.is_numeric() || r.is_numeric() {
                Ok(if l == Ty::Float || r == Ty::Float { Ty::Float } else { l })
            } else {
                Err(CompileError::new_simple(format!(
                    "ill-typed: `{}` requires numeric operands",
                    op.as_sql()
                )))
            }
        }
        ExprKind::Logical { args, .. } => {
            for a in args {
                infer_type(a, hint)?;
            }
            Ok(Ty::Bool)
        }
        ExprKind::IsType { expr, .. } => {
            infer_type(expr, hint)?;
            Ok(Ty::Bool)
        }
        ExprKind::Aggregate { op, arg, .. } => {
            use crate::expr::AggOp;
            let arg_ty = match arg {
                Some(a) => infer_type(a, hint)?,
                None => Ty::Any,
            };
            Ok(match op {
                AggOp::Count | AggOp::SumCount | AggOp::ApproxCountDistinct => Ty::Int,
                AggOp::SumInt => Ty::Int,
                _ => arg_ty,
            })
        }
        ExprKind::Case { branches, default } => {
            for (cond, res) in branches {
                let cond_ty = infer_type(cond, hint)?;
                if !matches!(cond_ty, Ty::Bool | Ty::Any) {
                    return Err(CompileError::new_simple("ill-typed: CASE condition must be boolean"));
                }
                infer_type(res, hint)?;
            }
            if let Some(d) = default {
                infer_type(d, hint)?;
            }
            Ok(Ty::Any)
        }
        ExprKind::Subquery(_) => Ok(Ty::Any),
        ExprKind::Builtin(_) => Ok(Ty::Any),
    }
}

pub fn reason_undefined(name: &str) -> Reason {
    Reason::NotFound {
        name: name.to_string(),
        namespace: "variable",
    }
}
