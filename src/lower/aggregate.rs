//! Window-function hoisting and aggregate splitting (§4.1 step 4, §4.2).

use crate::error::{CompileError, Result};
use crate::expr::rewrite_bottom_up;
use crate::expr::{AggOp, Builtin, Expr, ExprKind};
use crate::ir::Trace;
use crate::utils::NameGenerator;

/// Whether `expr` contains an aggregate that is not itself a window
/// aggregate (used to decide whether a clause needs `splitAggregate`).
pub fn contains_aggregate_non_window(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Aggregate { over, .. } => over.is_none(),
        _ => expr.children().iter().any(|c| contains_aggregate_non_window(c)),
    }
}

/// `splitAggregate` (§4.2): lifts every non-window aggregate expression in
/// projection/HAVING/ORDER-BY to a generated result name, rewrites GROUP BY
/// references, and pushes an `Aggregate` step.
pub fn split_aggregate(
    trace: &mut Trace,
    group_by: &[crate::ast::GroupByItem],
    final_columns: &mut [(String, Expr)],
    having: &mut Option<Expr>,
    order_by: &mut [(Expr, bool, Option<bool>)],
    ng: &mut NameGenerator,
) -> Result<(), CompileError> {
    for (_, e) in final_columns.iter() {
        reject_nested_aggregate(e)?;
    }
    if let Some(h) = having.as_ref() {
        reject_nested_aggregate(h)?;
    }

    // Step 3: group-by expressions get a name (explicit alias or synthetic),
    // resolved first so step 2's aggregate-lifting sees them as already
    // bound and doesn't re-lift an aggregate that happens to equal a group
    // expression.
    let mut groups: Vec<(Expr, String)> = Vec::with_capacity(group_by.len());
    for (i, g) in group_by.iter().enumerate() {
        let name = g.alias.clone().unwrap_or_else(|| format!("$_g{i}"));
        groups.push((g.expr.clone(), name));
    }

    // Step 2: lift every (non-window) aggregate expression to `$_0_<k>`,
    // deduping structurally equal aggregates onto one name.
    let mut aggregates: Vec<(Expr, String)> = Vec::new();
    let mut lift = |e: &Expr| -> Expr {
        lift_aggregates_and_groups(e, &groups, &mut aggregates, ng)
    };

    for (_, e) in final_columns.iter_mut() {
        *e = lift(e);
    }
    if let Some(h) = having.as_mut() {
        *h = lift(h);
    }
    for (e, ..) in order_by.iter_mut() {
        *e = lift(e);
    }

    trace.push_step(|parent| crate::ir::Step::Aggregate {
        parent,
        aggregates,
        group_by: groups,
    });
    Ok(())
}

fn reject_nested_aggregate(expr: &Expr) -> Result<(), CompileError> {
    fn walk(expr: &Expr, inside_non_window: bool) -> Result<(), CompileError> {
        if let ExprKind::Aggregate { arg, over, .. } = &expr.kind {
            if inside_non_window {
                return Err(CompileError::new_simple("nested aggregate"));
            }
            if let Some(a) = arg {
                walk(a, over.is_none())?;
            }
            return Ok(());
        }
        for c in expr.children() {
            walk(c, inside_non_window)?;
        }
        Ok(())
    }
    walk(expr, false)
}

/// Replaces every group-by-equivalent sub-expression with a reference to its
/// generated group name, and every remaining (non-window) aggregate with a
/// reference to a generated aggregate-result name, deduping structurally
/// identical aggregates onto a shared name.
fn lift_aggregates_and_groups(
    expr: &Expr,
    groups: &[(Expr, String)],
    aggregates: &mut Vec<(Expr, String)>,
    ng: &mut NameGenerator,
) -> Expr {
    if let Some((_, name)) = groups.iter().find(|(g, _)| g.struct_eq(expr)) {
        return Expr::ident(name.clone());
    }
    if matches!(&expr.kind, ExprKind::Aggregate { over, .. } if over.is_none()) {
        if let Some((_, name)) = aggregates.iter().find(|(a, _)| a.struct_eq(expr)) {
            return Expr::ident(name.clone());
        }
        let name = format!("$_0_{}", aggregates.len());
        aggregates.push((expr.clone(), name.clone()));
        return Expr::ident(name);
    }
    // Recurse into children, rebuilding the node with lifted children.
    rewrite_bottom_up(expr.clone(), &mut |e| {
        if let Some((_, name)) = groups.iter().find(|(g, _)| g.struct_eq(&e)) {
            return Expr::ident(name.clone());
        }
        e
    })
}

/// `hoistWindows` (§4.1 step 4): for each window aggregate, synthesize a
/// correlated scalar sub-query computing the aggregate grouped by the
/// window's partition expressions, and replace the call with a
/// `HASH_REPLACEMENT` over that sub-query.
///
/// The synthesized sub-query itself is left to the caller to build and
/// append to `replacements`; this function only identifies the rewrite
/// sites and their default values, returning the rewritten expression plus
/// the list of (partition_exprs, inner_aggregate, key_label) that must each
/// become one replacement trace.
pub fn hoist_windows(expr: &Expr, ng: &mut NameGenerator) -> (Expr, Vec<WindowSite>) {
    let mut sites = Vec::new();
    let rewritten = rewrite_bottom_up(expr.clone(), &mut |e| {
        if let ExprKind::Aggregate { op, arg, over: Some(window), distinct, filter } = &e.kind {
            if !window.partition_by.is_empty() {
                let key_label = ng.gen();
                let default = op.window_default();
                let site = WindowSite {
                    op: *op,
                    arg: arg.clone().map(|a| *a),
                    distinct: *distinct,
                    filter: filter.clone().map(|f| *f),
                    partition_by: window.partition_by.clone(),
                    key_label: key_label.clone(),
                };
                let index = sites.len();
                sites.push(site);
                let outer_key = combine_partition_key(&window.partition_by);
                return Expr::new(ExprKind::Builtin(Builtin::HashReplacement {
                    index,
                    kind: "scalar".to_string(),
                    key_label,
                    outer_key: Box::new(outer_key),
                    default: Box::new(default),
                }));
            }
        }
        e
    });
    (rewritten, sites)
}

pub(crate) fn combine_partition_key(parts: &[Expr]) -> Expr {
    if parts.len() == 1 {
        parts[0].clone()
    } else {
        Expr::new(ExprKind::Builtin(Builtin::MakeList(parts.to_vec())))
    }
}

/// A window aggregate rewrite site identified by `hoist_windows`, carrying
/// enough information for the caller to build the correlated replacement
/// trace (`SELECT AGG(x) AS $__val FROM <same FROM+WHERE+GROUP> GROUP BY
/// partition_expr AS $__key`).
pub struct WindowSite {
    pub op: AggOp,
    pub arg: Option<Expr>,
    pub distinct: bool,
    pub filter: Option<Expr>,
    pub partition_by: Vec<Expr>,
    pub key_label: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn lifts_single_aggregate() {
        let mut ng = NameGenerator::new("$_");
        let e = Expr::new(ExprKind::Aggregate {
            op: AggOp::Sum,
            arg: Some(Box::new(Expr::ident("x"))),
            distinct: false,
            filter: None,
            over: None,
        });
        let mut aggregates = Vec::new();
        let lifted = lift_aggregates_and_groups(&e, &[], &mut aggregates, &mut ng);
        assert_eq!(aggregates.len(), 1);
        assert!(matches!(lifted.kind, ExprKind::Ident(n) if n == "$_0_0"));
    }

    #[test]
    fn dedups_structurally_equal_aggregates() {
        let mut ng = NameGenerator::new("$_");
        let mk = || {
            Expr::new(ExprKind::Aggregate {
                op: AggOp::Sum,
                arg: Some(Box::new(Expr::ident("x"))),
                distinct: false,
                filter: None,
                over: None,
            })
        };
        let mut aggregates = Vec::new();
        let a = lift_aggregates_and_groups(&mk(), &[], &mut aggregates, &mut ng);
        let b = lift_aggregates_and_groups(&mk(), &[], &mut aggregates, &mut ng);
        assert_eq!(aggregates.len(), 1);
        assert_eq!(a.to_string(), b.to_string());
    }
}
