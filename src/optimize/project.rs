//! Projection passes: `projectpushdown`, `liftprojectagg`, `projectelim`
//! (§4.4).

use std::collections::{HashMap, HashSet};

use crate::expr::rewrite_bottom_up;
use crate::expr::{collect_idents, Expr, ExprKind};
use crate::ir::{IterTableData, Step, Trace};

/// `projectpushdown`: a `Bind` whose parent is another step that only
/// reads expressions (`Filter`, `Aggregate`, `Distinct`, `Order`) can have
/// its bindings substituted into that parent and be removed, as long as the
/// parent doesn't shadow a name the `Bind` also renames. This crate applies
/// the narrower, always-safe case: an *incomplete* `Bind` (one that still
/// passes through unmentioned names) sitting directly below an `Aggregate`
/// or `Filter` is inlined by substitution.
pub fn projectpushdown(trace: &mut Trace) {
    walk(&mut trace.top);
}

fn walk(step: &mut Step) {
    try_inline_child_bind(step);
    if let Some(p) = step.parent_mut() {
        walk(p);
    }
}

fn try_inline_child_bind(step: &mut Step) {
    let can_inline = matches!(
        step,
        Step::Filter { parent, .. } | Step::Aggregate { parent, .. } | Step::Distinct { parent, .. } | Step::Order { parent, .. }
            if matches!(parent.as_ref(), Step::Bind { complete: false, .. })
    );
    if !can_inline {
        return;
    }
    let parent_slot = step.parent_mut().unwrap();
    let Step::Bind { parent: bind_parent, bindings, .. } = std::mem::replace(parent_slot, Step::NoOutput) else {
        unreachable!()
    };
    let defined: HashMap<String, Expr> = bindings.into_iter().map(|(e, n)| (n, e)).collect();
    *parent_slot = *bind_parent;
    substitute_in_step(step, &defined);
}

fn substitute_in_step(step: &mut Step, defined: &HashMap<String, Expr>) {
    crate::ir::fold::map_own_exprs(step, &mut |e| {
        *e = substitute(e.clone(), defined);
    });
}

fn substitute(expr: Expr, defined: &HashMap<String, Expr>) -> Expr {
    rewrite_bottom_up(expr, &mut |e| match &e.kind {
        ExprKind::Ident(name) => defined.get(name).cloned().unwrap_or(e),
        _ => e,
    })
}

/// `liftprojectagg`: a `Bind` that sits directly atop an `Aggregate` and
/// only renames (or passes through) aggregate/group results, rather than
/// computing something new, is folded into the `Aggregate`'s own names.
pub fn liftprojectagg(trace: &mut Trace) {
    walk_lift(&mut trace.top);
}

fn is_liftable_bind_over_aggregate(step: &Step) -> bool {
    matches!(step, Step::Bind { parent, bindings, complete: true }
        if matches!(parent.as_ref(), Step::Aggregate { .. })
            && bindings.iter().all(|(e, _)| matches!(&e.kind, ExprKind::Ident(_))))
}

fn walk_lift(step: &mut Step) {
    if is_liftable_bind_over_aggregate(step) {
        let Step::Bind { parent, bindings, .. } = std::mem::replace(step, Step::NoOutput) else {
            unreachable!()
        };
        let Step::Aggregate { parent: agg_parent, aggregates, group_by } = *parent else {
            unreachable!()
        };
        let rename_of = |old: &str| -> Option<String> {
            bindings.iter().find_map(|(e, new_name)| match &e.kind {
                ExprKind::Ident(n) if n == old => Some(new_name.clone()),
                _ => None,
            })
        };
        let aggregates = aggregates
            .into_iter()
            .map(|(e, n)| (e, rename_of(&n).unwrap_or(n)))
            .collect();
        let group_by = group_by
            .into_iter()
            .map(|(e, n)| (e, rename_of(&n).unwrap_or(n)))
            .collect();
        *step = Step::Aggregate { parent: agg_parent, aggregates, group_by };
        return walk_lift(step);
    }
    if let Some(p) = step.parent_mut() {
        walk_lift(p);
    }
}

/// `projectelim` (§4.4, §9): narrow each leaf `IterTable`'s referenced-field
/// set to the names actually consulted by the rest of the chain. A `*`
/// binding anywhere downstream (an explicit wildcard `Bind`, or an
/// `IterTable`/`UnionMap` that already declared itself wildcard) disables
/// pruning for that leaf.
pub fn projectelim(trace: &mut Trace) {
    let mut used: HashSet<String> = HashSet::new();
    let mut saw_wildcard = false;
    collect_used_names(&trace.top, &mut used, &mut saw_wildcard);
    if saw_wildcard {
        return;
    }
    narrow_leaves(&mut trace.top, &used);
}

fn collect_used_names(step: &Step, used: &mut HashSet<String>, saw_wildcard: &mut bool) {
    crate::ir::fold::map_own_exprs(&mut step.clone(), &mut |e| {
        if matches!(&e.kind, ExprKind::Ident(n) if n == "*") {
            *saw_wildcard = true;
        }
        let mut idents = Vec::new();
        collect_idents(e, &mut idents);
        used.extend(idents);
    });
    if let Some(p) = step.parent() {
        collect_used_names(p, used, saw_wildcard);
    }
}

fn narrow_leaves(step: &mut Step, used: &HashSet<String>) {
    if let Step::IterTable(t) = step {
        narrow_one(t, used);
        return;
    }
    if let Some(p) = step.parent_mut() {
        narrow_leaves(p, used);
    }
}

fn narrow_one(t: &mut IterTableData, used: &HashSet<String>) {
    let mut fields: Vec<String> = used.iter().filter(|n| *n != "*").cloned().collect();
    fields.sort();
    fields.dedup();
    t.fields = fields;
    t.wildcard = false;
}
