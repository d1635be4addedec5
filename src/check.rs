//! Type-checking entry points (§4.7).
//!
//! `check(step, expr)` runs type inference under a schema-hint built from
//! the step's parent chain; `checkNoAggregateInCondition` and
//! `checkAggregateWorkInProgress` are the two extra structural rules the
//! spec singles out by name.

use crate::error::{CompileError, WithErrorInfo};
use crate::expr::{infer_type, Expr, ExprKind, SchemaHint, Ty};
use crate::ir::{IterTableData, Step};

/// Builds a schema hint for `step` by walking from `IterTable.schema`
/// outward; each `Bind` rebinds the names it introduces to the inferred
/// type of their defining expression (§4.7: "schema flows from
/// `IterTable.schema` outward; each `Bind` rebinds").
pub fn schema_hint_for(step: &Step) -> SchemaHint {
    match step {
        Step::IterTable(t) => iter_table_hint(t),
        Step::UnionMap { inner, .. } => iter_table_hint(inner),
        Step::DummyOutput | Step::NoOutput => SchemaHint::new(),
        Step::IterValue { parent, binding, .. } => {
            let mut hint = schema_hint_for(parent);
            hint.bindings.insert(binding.clone(), Ty::Any);
            hint
        }
        Step::Bind { parent, bindings, .. } => {
            let parent_hint = schema_hint_for(parent);
            let mut hint = parent_hint.clone();
            for (e, name) in bindings {
                let ty = infer_type(e, &parent_hint).unwrap_or(Ty::Any);
                hint.bindings.insert(name.clone(), ty);
            }
            hint
        }
        Step::Aggregate { parent, aggregates, group_by } => {
            let parent_hint = schema_hint_for(parent);
            let mut hint = SchemaHint::new();
            for (e, name) in group_by.iter().chain(aggregates.iter()) {
                let ty = infer_type(e, &parent_hint).unwrap_or(Ty::Any);
                hint.bindings.insert(name.clone(), ty);
            }
            hint
        }
        other => other.parent().map(schema_hint_for).unwrap_or_default(),
    }
}

fn iter_table_hint(t: &IterTableData) -> SchemaHint {
    t.schema_hint.clone().unwrap_or_default()
}

/// `check(step, expr)`: infers `expr`'s type under `step`'s schema hint,
/// converting inference failures into a `CompileError` anchored to `expr`.
pub fn check(step: &Step, expr: &Expr) -> Result<Ty, CompileError> {
    let hint = schema_hint_for(step);
    infer_type(expr, &hint).with_expr(expr)
}

/// `checkNoAggregateInCondition`: forbids aggregates in WHERE (§4.7).
pub fn check_no_aggregate_in_condition(expr: &Expr) -> Result<(), CompileError> {
    if contains_aggregate(expr) {
        return Err(CompileError::new_simple(
            "aggregate functions are not allowed in WHERE",
        )
        .with_expr(expr));
    }
    Ok(())
}

pub fn contains_aggregate(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Aggregate { .. } => true,
        _ => expr.children().iter().any(|c| contains_aggregate(c)),
    }
}

/// `checkAggregateWorkInProgress`: forbids aggregates with windows outside
/// window-eligible positions, and rejects unsupported window/filter
/// combinations (a window aggregate combined with DISTINCT is not
/// representable by `hoistWindows`, §4.1 step 4).
pub fn check_aggregate_work_in_progress(expr: &Expr, allow_window: bool) -> Result<(), CompileError> {
    if let ExprKind::Aggregate { over, distinct, .. } = &expr.kind {
        if over.is_some() {
            if !allow_window {
                return Err(CompileError::new_simple("window function in non-window position").with_expr(expr));
            }
            if *distinct {
                return Err(CompileError::unsupported(
                    "window aggregate combined with DISTINCT is not supported",
                )
                .with_expr(expr));
            }
        }
    }
    for child in expr.children() {
        check_aggregate_work_in_progress(child, allow_window)?;
    }
    Ok(())
}

/// `nested aggregate`: refuses any aggregate nested inside another
/// aggregate unless the outer is a window aggregate (§4.2 step 1).
pub fn check_no_nested_aggregate(expr: &Expr) -> Result<(), CompileError> {
    fn walk(expr: &Expr, inside_non_window_agg: bool) -> Result<(), CompileError> {
        if let ExprKind::Aggregate { arg, over, .. } = &expr.kind {
            if inside_non_window_agg {
                return Err(CompileError::new_simple("nested aggregate").with_expr(expr));
            }
            let is_window = over.is_some();
            if let Some(a) = arg {
                walk(a, !is_window)?;
            }
            return Ok(());
        }
        for child in expr.children() {
            walk(child, inside_non_window_agg)?;
        }
        Ok(())
    }
    walk(expr, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::AggOp;

    #[test]
    fn detects_nested_aggregate() {
        let inner = Expr::new(ExprKind::Aggregate {
            op: AggOp::Count,
            arg: Some(Box::new(Expr::ident("y"))),
            distinct: false,
            filter: None,
            over: None,
        });
        let outer = Expr::new(ExprKind::Aggregate {
            op: AggOp::Sum,
            arg: Some(Box::new(inner)),
            distinct: false,
            filter: None,
            over: None,
        });
        assert!(check_no_nested_aggregate(&outer).is_err());
    }

    #[test]
    fn rejects_aggregate_in_where() {
        let cond = Expr::new(ExprKind::Aggregate {
            op: AggOp::Avg,
            arg: Some(Box::new(Expr::ident("x"))),
            distinct: false,
            filter: None,
            over: None,
        });
        assert!(check_no_aggregate_in_condition(&cond).is_err());
    }
}
