//! The optimizer (§4.4): a fixed sequence of whole-trace rewrite passes.
//!
//! Shaped after `prqlc::sql::srq::preprocess`/`postprocess`: each pass is a
//! small, independently testable function over the IR, run in a fixed
//! order by `optimize()`. Every pass also recurses into `replacements` (and
//! an `EquiJoin`'s build-side trace), since those are themselves full
//! `Trace`s with their own step chains.

mod aggregate;
mod filter;
mod partition;
mod project;
mod replacements;

use crate::env::Environment;
use crate::expr::{rewrite_bottom_up, simplify as simplify_expr, BinOp, Builtin, Expr, ExprKind};
use crate::ir::{class_of, Step, Trace, LARGE_SIZE};

/// Runs the fixed pass sequence (§4.4 table) over `trace` and every nested
/// trace it owns. All passes preserve the query's observable result set.
pub fn optimize(trace: &mut Trace, env: &dyn Environment) {
    optimize_with_large_size(trace, env, LARGE_SIZE);
}

/// As [`optimize`], but with the large-size cardinality threshold (§3.5)
/// overridden instead of defaulting to [`LARGE_SIZE`].
pub fn optimize_with_large_size(trace: &mut Trace, env: &dyn Environment, large_size: i64) {
    for_each_nested_trace(trace, &mut |t| optimize_one(t, env, large_size));
}

/// Runs `pass` over `trace` and logs at debug level whether it changed
/// anything, using a cheap `Debug`-fingerprint comparison (the same
/// stand-in for structural-equality `replacements::mergereplacements`
/// already relies on) rather than threading a changed-bit through every
/// pass function.
macro_rules! log_pass {
    ($name:expr, $trace:expr, $body:expr) => {{
        let before = format!("{:?}", $trace.top);
        $body;
        if format!("{:?}", $trace.top) == before {
            log::debug!("pass {}: no change", $name);
        } else {
            log::debug!("pass {}: rewrote trace", $name);
        }
    }};
}

pub(crate) fn optimize_one(trace: &mut Trace, env: &dyn Environment, large_size: i64) {
    log_pass!("simplify", trace, simplify(trace));
    log_pass!("aggelim", trace, aggregate::aggelim(trace, env));
    log_pass!("aggfilter", trace, aggregate::aggfilter(trace));
    log_pass!("orderelim", trace, orderelim(trace, large_size));
    log_pass!("projectpushdown", trace, project::projectpushdown(trace));
    log_pass!("liftprojectagg", trace, project::liftprojectagg(trace));
    log_pass!("countdistinct2count", trace, aggregate::countdistinct2count(trace));
    log_pass!("filterelim", trace, filter::filterelim(trace));
    log_pass!("filterpushdown", trace, filter::filterpushdown(trace));
    log_pass!("projectpushdown", trace, project::projectpushdown(trace));
    log_pass!("projectelim", trace, project::projectelim(trace));
    log_pass!("limitpushdown", trace, limitpushdown(trace));
    log_pass!("flatten", trace, flatten(trace));
    log_pass!("mergereplacements", trace, replacements::mergereplacements(trace));
    log_pass!("partition", trace, partition::partition(trace, env, large_size));
    log_pass!("strengthReduce", trace, strength_reduce(trace));
    log_pass!("simplify", trace, simplify(trace));
}

/// Applies `f` to `trace` and recursively to every nested trace reachable
/// from it (replacement sub-traces, an `EquiJoin`'s build side, a
/// `UnionMap`'s child) — depth-first, innermost first, matching the order
/// a real optimizer would want: inner traces stabilize before the outer
/// trace's passes reason about their cardinality.
pub(crate) fn for_each_nested_trace(trace: &mut Trace, f: &mut impl FnMut(&mut Trace)) {
    for r in &mut trace.replacements {
        for_each_nested_trace(r, f);
    }
    walk_nested_in_step(&mut trace.top, f);
    f(trace);
}

fn walk_nested_in_step(step: &mut Step, f: &mut impl FnMut(&mut Trace)) {
    if let Step::EquiJoin { build, .. } = step {
        for_each_nested_trace(build, f);
    }
    if let Step::UnionMap { child, .. } = step {
        for_each_nested_trace(child, f);
    }
    if let Some(p) = step.parent_mut() {
        walk_nested_in_step(p, f);
    }
}

/// `simplify` (§4.4): constant folding and logical simplification applied
/// to every expression in every step.
fn simplify(trace: &mut Trace) {
    crate::ir::fold::for_each_expr_mut(&mut trace.top, &mut |e| {
        *e = simplify_expr(e);
    });
}

/// `orderelim` (§4.4): ORDER BY is pure overhead once cardinality is ≤ One.
fn orderelim(trace: &mut Trace, large_size: i64) {
    if !matches!(trace.top, Step::Order { .. }) {
        return;
    }
    let Step::Order { parent, .. } = &trace.top else { return };
    if class_of(parent, large_size).is_at_most_one() {
        log::trace!("orderelim: dropping Order over an at-most-one-row parent");
        let Step::Order { parent, .. } = std::mem::replace(&mut trace.top, Step::NoOutput) else {
            unreachable!()
        };
        trace.top = *parent;
    }
}

/// `limitpushdown` (§4.4): a `Bind` preserves row count, so `Limit(Bind(x))`
/// and `Bind(Limit(x))` are equivalent; push `Limit` below `Bind` so it
/// limits as early as possible.
fn limitpushdown(trace: &mut Trace) {
    crate::ir::fold::for_each_step_mut(&mut trace.top, &mut |step| {
        if let Step::Limit { parent, count, offset } = step {
            if matches!(**parent, Step::Bind { .. }) {
                let Step::Bind { parent: bind_parent, bindings, complete } =
                    std::mem::replace(parent.as_mut(), Step::NoOutput)
                else {
                    unreachable!()
                };
                let new_limit = Step::Limit { parent: bind_parent, count: *count, offset: *offset };
                *step = Step::Bind { parent: Box::new(new_limit), bindings, complete };
            }
        }
    });
}

/// `flatten` (§4.4): re-apply scalar-binding flatten (§4.1 step 3) within
/// each `Bind`.
fn flatten(trace: &mut Trace) {
    crate::ir::fold::for_each_step_mut(&mut trace.top, &mut |step| {
        if let Step::Bind { bindings, .. } = step {
            let named: Vec<(String, crate::expr::Expr)> =
                bindings.iter().map(|(e, n)| (n.clone(), e.clone())).collect();
            let flattened = crate::lower::flatten_bind(&named);
            *bindings = flattened.into_iter().map(|(n, e)| (e, n)).collect();
        }
    });
}

/// `strengthReduce` (§4.4): rule-driven fixed-point pass. Rule (a):
/// `Distinct[x]` immediately atop `Unpivot AT x` (no AS) collapses to
/// `UnpivotAtDistinct x`. Rule (b): an `IterValue` over `LIST_REPLACEMENT(i)`
/// immediately filtered on equality against a column known-unique in
/// replacement `i` specializes to an `IN_REPLACEMENT` filter plus a
/// `HASH_REPLACEMENT` substitution for the projected dot expression.
fn strength_reduce(trace: &mut Trace) {
    loop {
        let mut changed = false;
        rewrite_unpivot_distinct(&mut trace.top, &mut changed);
        rewrite_unique_replacement(trace, &mut changed);
        if !changed {
            break;
        }
    }
}

fn rewrite_unique_replacement(trace: &mut Trace, changed: &mut bool) {
    let replacements = trace.replacements.clone();
    rewrite_unique_replacement_step(&mut trace.top, &replacements, changed);
}

/// Walks leaf-to-root (via the recursive call into `parent_mut` first), then
/// applies any pending binding substitution discovered deeper in the chain
/// to this step's own expressions before bubbling it further up — the
/// substitution is discovered at the `Filter`/`IterValue` pair but must
/// reach every step between there and the root that still projects
/// `binding.field`.
fn rewrite_unique_replacement_step(
    step: &mut Step,
    replacements: &[Trace],
    changed: &mut bool,
) -> Option<(String, String, Expr)> {
    let mut pending = step.parent_mut().and_then(|p| rewrite_unique_replacement_step(p, replacements, changed));
    if let Some((binding, field, replacement)) = &pending {
        substitute_path_ident(step, binding, field, replacement);
    }

    if let Step::Filter { parent, predicate } = step {
        if let Step::IterValue { parent: inner, value, binding, filter: None, .. } = parent.as_mut() {
            if let ExprKind::Builtin(Builtin::ListReplacement(index)) = &value.kind {
                let index = *index;
                if let Some((field, outer_expr)) = unique_equality(predicate, binding, index, replacements) {
                    let binding_name = binding.clone();
                    let inner_parent = std::mem::replace(inner.as_mut(), Step::NoOutput);
                    let in_repl = Expr::new(ExprKind::Builtin(Builtin::InReplacement {
                        value: Box::new(outer_expr.clone()),
                        index,
                    }));
                    let hash_repl = Expr::new(ExprKind::Builtin(Builtin::HashReplacement {
                        index,
                        kind: "scalar".to_string(),
                        key_label: field.clone(),
                        outer_key: Box::new(outer_expr),
                        default: Box::new(Expr::null()),
                    }));
                    *step = Step::Filter { parent: Box::new(inner_parent), predicate: in_repl };
                    log::trace!("strengthReduce: IterValue[LIST_REPLACEMENT] + unique equality -> IN_REPLACEMENT");
                    *changed = true;
                    pending = Some((binding_name, field, hash_repl));
                }
            }
        }
    }

    pending
}

/// `predicate` is `binding.field = outer` or `outer = binding.field`, where
/// `field` is known-unique in `replacements[index]`.
fn unique_equality(
    predicate: &Expr,
    binding: &str,
    index: usize,
    replacements: &[Trace],
) -> Option<(String, Expr)> {
    let ExprKind::Binary { op: BinOp::Eq, lhs, rhs } = &predicate.kind else { return None };
    let as_field = |e: &Expr| -> Option<String> {
        let ExprKind::Path(base, field) = &e.kind else { return None };
        matches!(&base.kind, ExprKind::Ident(n) if n == binding).then(|| field.clone())
    };
    let (field, outer) = as_field(lhs)
        .map(|f| (f, rhs.as_ref().clone()))
        .or_else(|| as_field(rhs).map(|f| (f, lhs.as_ref().clone())))?;
    let repl = replacements.get(index)?;
    column_unique_in_replacement(repl, &field).then_some((field, outer))
}

/// A column is known-unique in a replacement trace if that trace's chain
/// contains a `Distinct` whose sole key is that column — the same signal
/// `lower::decorrelate` relies on to guarantee a join key is unique.
fn column_unique_in_replacement(repl: &Trace, field: &str) -> bool {
    fn walk(step: &Step, field: &str) -> bool {
        let is_match = matches!(step, Step::Distinct { keys, .. }
            if matches!(keys.as_slice(), [k] if matches!(&k.kind, ExprKind::Ident(n) | ExprKind::ColumnRef(n) if n == field)));
        is_match || step.parent().is_some_and(|p| walk(p, field))
    }
    walk(&repl.top, field)
}

fn substitute_path_ident(step: &mut Step, binding: &str, field: &str, replacement: &Expr) {
    crate::ir::fold::map_own_exprs(step, &mut |e| {
        *e = rewrite_bottom_up(e.clone(), &mut |inner| {
            if let ExprKind::Path(base, f) = &inner.kind {
                if f == field && matches!(&base.kind, ExprKind::Ident(n) if n == binding) {
                    return replacement.clone();
                }
            }
            inner
        });
    });
}

fn rewrite_unpivot_distinct(step: &mut Step, changed: &mut bool) {
    let collapse = matches!(step, Step::Distinct { keys, parent, .. }
        if matches!(keys.as_slice(), [key] if matches!(parent.as_ref(),
            Step::Unpivot { as_name: None, at_name: Some(at), .. }
                if matches!(&key.kind, crate::expr::ExprKind::Ident(n) if n == at))));
    if collapse {
        let Step::Distinct { parent, .. } = std::mem::replace(step, Step::NoOutput) else {
            unreachable!()
        };
        let Step::Unpivot { parent: inner, at_name: Some(at), .. } = *parent else {
            unreachable!()
        };
        *step = Step::UnpivotAtDistinct { parent: inner, at_name: at };
        log::trace!("strengthReduce: Distinct[at] over Unpivot AT -> UnpivotAtDistinct");
        *changed = true;
        return;
    }
    if let Some(p) = step.parent_mut() {
        rewrite_unpivot_distinct(p, changed);
    }
}
