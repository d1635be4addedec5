//! Generic walk over a `Step` chain, applying a per-expression callback to
//! every expression carried by every step kind. Structural optimizer passes
//! (filter push-down, projection elimination, ...) pattern-match on `Step`
//! directly since they need bespoke logic; this module exists for the
//! passes that only need to touch expressions uniformly (`simplify`,
//! replacement-index rewriting in `mergereplacements`).

use crate::expr::Expr;

use super::{OrderKey, Step};

/// Applies `f` to every expression directly owned by `step` (not
/// recursing into `step`'s parent — callers walk the chain themselves via
/// `for_each_step_mut`).
pub fn map_own_exprs(step: &mut Step, f: &mut impl FnMut(&mut Expr)) {
    match step {
        Step::IterTable(t) => {
            if let Some(e) = &mut t.filter {
                f(e);
            }
        }
        Step::IterValue { value, filter, .. } => {
            f(value);
            if let Some(e) = filter {
                f(e);
            }
        }
        Step::Filter { predicate, .. } => f(predicate),
        Step::Bind { bindings, .. } => {
            for (e, _) in bindings {
                f(e);
            }
        }
        Step::Aggregate { aggregates, group_by, .. } => {
            for (e, _) in aggregates {
                f(e);
            }
            for (e, _) in group_by {
                f(e);
            }
        }
        Step::Distinct { keys, .. } => {
            for e in keys {
                f(e);
            }
        }
        Step::Order { keys, .. } => {
            for OrderKey { expr, .. } in keys {
                f(expr);
            }
        }
        Step::EquiJoin { left_key, right_key, .. } => {
            f(left_key);
            f(right_key);
        }
        Step::UnionMap { partition_keys: Some(keys), .. } => {
            for e in keys {
                f(e);
            }
        }
        Step::DummyOutput
        | Step::NoOutput
        | Step::Limit { .. }
        | Step::Unpivot { .. }
        | Step::UnpivotAtDistinct { .. }
        | Step::OutputPart { .. }
        | Step::OutputIndex { .. }
        | Step::UnionMap { partition_keys: None, .. } => {}
    }
}

/// Walks every step from `top` to the leaf (not descending into nested
/// traces such as `EquiJoin.build` or `UnionMap.child` — callers that need
/// that do so explicitly since those are independent `Trace`s with their
/// own replacement lists).
pub fn for_each_step_mut(top: &mut Step, f: &mut impl FnMut(&mut Step)) {
    f(top);
    if let Some(p) = top.parent_mut() {
        for_each_step_mut(p, f);
    }
}

pub fn for_each_expr_mut(top: &mut Step, f: &mut impl FnMut(&mut Expr)) {
    for_each_step_mut(top, &mut |step| map_own_exprs(step, f));
}
