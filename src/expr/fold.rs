//! Bottom-up rewrite ("fold") of [`Expr`] trees, shaped after
//! `prqlc::ir::rq::fold::RqFold`: a trait with a default implementation per
//! node kind, so callers only override the variants they care about
//! (substituting an alias, folding constants, rewriting replacement
//! indices, ...).

use super::*;

pub trait ExprFold {
    fn fold_expr(&mut self, expr: Expr) -> Expr {
        fold_expr(self, expr)
    }
    fn fold_kind(&mut self, kind: ExprKind) -> ExprKind {
        fold_kind(self, kind)
    }
}

pub fn fold_expr<F: ?Sized + ExprFold>(fold: &mut F, mut expr: Expr) -> Expr {
    expr.kind = fold.fold_kind(expr.kind);
    expr
}

pub fn fold_kind<F: ?Sized + ExprFold>(fold: &mut F, kind: ExprKind) -> ExprKind {
    match kind {
        ExprKind::Ident(_) | ExprKind::ColumnRef(_) | ExprKind::Literal(_) => kind,
        ExprKind::Path(base, field) => ExprKind::Path(Box::new(fold.fold_expr(*base)), field),
        ExprKind::Index(base, idx) => {
            ExprKind::Index(Box::new(fold.fold_expr(*base)), Box::new(fold.fold_expr(*idx)))
        }
        ExprKind::Unary { op, expr } => ExprKind::Unary {
            op,
            expr: Box::new(fold.fold_expr(*expr)),
        },
        ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
            op,
            lhs: Box::new(fold.fold_expr(*lhs)),
            rhs: Box::new(fold.fold_expr(*rhs)),
        },
        ExprKind::Logical { op, args } => ExprKind::Logical {
            op,
            args: args.into_iter().map(|a| fold.fold_expr(a)).collect(),
        },
        ExprKind::IsType { expr, kind, negated } => ExprKind::IsType {
            expr: Box::new(fold.fold_expr(*expr)),
            kind,
            negated,
        },
        ExprKind::Aggregate { op, arg, distinct, filter, over } => ExprKind::Aggregate {
            op,
            arg: arg.map(|a| Box::new(fold.fold_expr(*a))),
            distinct,
            filter: filter.map(|e| Box::new(fold.fold_expr(*e))),
            over: over.map(|w| {
                Box::new(Window {
                    partition_by: w.partition_by.into_iter().map(|e| fold.fold_expr(e)).collect(),
                })
            }),
        },
        ExprKind::Case { branches, default } => ExprKind::Case {
            branches: branches
                .into_iter()
                .map(|(c, r)| (fold.fold_expr(c), fold.fold_expr(r)))
                .collect(),
            default: default.map(|d| Box::new(fold.fold_expr(*d))),
        },
        ExprKind::Subquery(sel) => ExprKind::Subquery(sel),
        ExprKind::Builtin(b) => ExprKind::Builtin(fold_builtin(fold, b)),
    }
}

fn fold_builtin<F: ?Sized + ExprFold>(fold: &mut F, b: Builtin) -> Builtin {
    match b {
        Builtin::HashReplacement { index, kind, key_label, outer_key, default } => {
            Builtin::HashReplacement {
                index,
                kind,
                key_label,
                outer_key: Box::new(fold.fold_expr(*outer_key)),
                default: Box::new(fold.fold_expr(*default)),
            }
        }
        Builtin::InReplacement { value, index } => Builtin::InReplacement {
            value: Box::new(fold.fold_expr(*value)),
            index,
        },
        Builtin::MakeList(items) => {
            Builtin::MakeList(items.into_iter().map(|e| fold.fold_expr(e)).collect())
        }
        Builtin::MakeStruct(fields) => Builtin::MakeStruct(
            fields.into_iter().map(|(k, v)| (k, fold.fold_expr(v))).collect(),
        ),
        Builtin::InSubquery { value, subquery } => Builtin::InSubquery {
            value: Box::new(fold.fold_expr(*value)),
            subquery,
        },
        other @ (Builtin::ScalarReplacement(_)
        | Builtin::ListReplacement(_)
        | Builtin::StructReplacement(_)
        | Builtin::PartitionValue(_)) => other,
    }
}

/// One-shot bottom-up rewrite with a closure, for call sites that don't want
/// to define a whole `ExprFold` impl (e.g. single-substitution callers like
/// `flattenBind`, §4.1 step 3).
pub fn rewrite_bottom_up(expr: Expr, f: &mut impl FnMut(Expr) -> Expr) -> Expr {
    struct ClosureFold<'a, G: FnMut(Expr) -> Expr>(&'a mut G);
    impl<G: FnMut(Expr) -> Expr> ExprFold for ClosureFold<'_, G> {
        fn fold_expr(&mut self, expr: Expr) -> Expr {
            let expr = fold_expr(self, expr);
            (self.0)(expr)
        }
    }
    let mut cf = ClosureFold(f);
    cf.fold_expr(expr)
}
