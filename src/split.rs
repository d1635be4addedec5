//! `Split` (§4.5): rewrites an optimized trace into a parallel mapping
//! pipeline (left in place, mutated into `trace`) plus a serial reduction
//! pipeline (returned). Modeled on `prqlc::sql::pq::anchor`'s walk-and-decide
//! shape, retargeted from "which nested SELECT does this transform belong
//! to" to "mapping side or reduction side".

use crate::env::Environment;
use crate::expr::{AggOp, Expr, ExprKind, Literal};
use crate::ir::{Step, Trace, LARGE_SIZE};
use crate::optimize;

/// Destructively splits `trace.top` into a mapping pipeline (the new
/// `trace.top`) and returns the corresponding reduction trace. `trace`'s
/// `replacements` are left untouched — window/scalar-subquery replacements
/// run once, centrally, ahead of the map/reduce split.
pub fn split(trace: &mut Trace, env: &dyn Environment) -> Trace {
    split_with_large_size(trace, env, LARGE_SIZE)
}

/// As [`split`], but with the large-size cardinality threshold (§3.5)
/// overridden instead of defaulting to [`LARGE_SIZE`].
pub fn split_with_large_size(trace: &mut Trace, env: &dyn Environment, large_size: i64) -> Trace {
    let nodes = unchain(std::mem::replace(&mut trace.top, Step::NoOutput));
    log::debug!("split: {} step(s) to place", nodes.len());
    let (mapping, reduction) = split_nodes(nodes);
    log::debug!(
        "split: mapping={:?} reduction={:?}",
        mapping.step_kind_name(),
        reduction.step_kind_name()
    );

    trace.top = mapping;
    let mut reduce_trace = Trace::new(reduction);

    postprocess_reduction(&mut reduce_trace, env, large_size);
    reduce_trace
}

/// One step, stripped of its parent link (which `unchain` already severed).
fn unchain(step: Step) -> Vec<Step> {
    let mut out = Vec::new();
    let mut current = step;
    loop {
        let (shell, parent) = sever(current);
        out.push(shell);
        match parent {
            Some(p) => current = *p,
            None => break,
        }
    }
    out
}

/// Splits a node into (parent-less shell, original parent), for every
/// non-leaf `Step` variant.
fn sever(step: Step) -> (Step, Option<Box<Step>>) {
    match step {
        Step::IterTable(_) | Step::DummyOutput | Step::NoOutput | Step::UnionMap { .. } => (step, None),
        Step::IterValue { parent, value, binding, filter, fields } => {
            (Step::IterValue { parent: Box::new(Step::NoOutput), value, binding, filter, fields }, Some(parent))
        }
        Step::Filter { parent, predicate } => {
            (Step::Filter { parent: Box::new(Step::NoOutput), predicate }, Some(parent))
        }
        Step::Bind { parent, bindings, complete } => {
            (Step::Bind { parent: Box::new(Step::NoOutput), bindings, complete }, Some(parent))
        }
        Step::Aggregate { parent, aggregates, group_by } => {
            (Step::Aggregate { parent: Box::new(Step::NoOutput), aggregates, group_by }, Some(parent))
        }
        Step::Distinct { parent, keys } => {
            (Step::Distinct { parent: Box::new(Step::NoOutput), keys }, Some(parent))
        }
        Step::Order { parent, keys } => (Step::Order { parent: Box::new(Step::NoOutput), keys }, Some(parent)),
        Step::Limit { parent, count, offset } => {
            (Step::Limit { parent: Box::new(Step::NoOutput), count, offset }, Some(parent))
        }
        Step::EquiJoin { parent, build, left_key, right_key, build_name } => (
            Step::EquiJoin { parent: Box::new(Step::NoOutput), build, left_key, right_key, build_name },
            Some(parent),
        ),
        Step::Unpivot { parent, as_name, at_name } => {
            (Step::Unpivot { parent: Box::new(Step::NoOutput), as_name, at_name }, Some(parent))
        }
        Step::UnpivotAtDistinct { parent, at_name } => {
            (Step::UnpivotAtDistinct { parent: Box::new(Step::NoOutput), at_name }, Some(parent))
        }
        Step::OutputPart { parent, basename } => {
            (Step::OutputPart { parent: Box::new(Step::NoOutput), basename }, Some(parent))
        }
        Step::OutputIndex { parent, table_path, basename } => (
            Step::OutputIndex { parent: Box::new(Step::NoOutput), table_path, basename },
            Some(parent),
        ),
    }
}

fn attach(mut shell: Step, parent: Step) -> Step {
    if let Some(slot) = shell.parent_mut() {
        *slot = Box::new(parent);
    }
    shell
}

/// Walks `nodes` (leaf-first) building the mapping chain in place and the
/// reduction chain alongside it, per the §4.5 algorithm table.
fn split_nodes(mut nodes: Vec<Step>) -> (Step, Step) {
    // The leaf is always first.
    let leaf = nodes.remove(0);
    let leaf_table = match leaf {
        Step::IterTable(t) => t,
        other => {
            // A non-IterTable leaf (NoOutput/DummyOutput/UnionMap) has
            // nothing to partition; the whole trace is already
            // "reduction-shaped".
            let mut mapping = other;
            for n in nodes {
                mapping = attach(n, mapping);
            }
            return (mapping.clone(), mapping);
        }
    };

    let mut mapping = Step::IterTable(leaf_table.clone());
    let mut reduction = Step::UnionMap {
        inner: leaf_table,
        // Filled in by the caller once the mapping chain is complete.
        child: Box::new(Trace::new(Step::NoOutput)),
        partition_keys: None,
    };
    let mut in_reduction = false;
    let mut directly_above_leaf = true;

    let mut iter = nodes.into_iter().peekable();
    while let Some(node) = iter.next() {
        if in_reduction {
            reduction = attach(node, reduction);
            continue;
        }
        match node {
            Step::Limit { count, offset, .. } => {
                mapping = Step::Limit { parent: Box::new(mapping), count, offset };
                reduction = Step::Limit { parent: Box::new(reduction), count, offset };
            }
            Step::Distinct { keys, .. } => {
                mapping = Step::Distinct { parent: Box::new(mapping), keys: keys.clone() };
                reduction = Step::Distinct { parent: Box::new(reduction), keys };
            }
            Step::Order { keys, .. } => {
                let next_is_limit = matches!(iter.peek(), Some(Step::Limit { .. }));
                if directly_above_leaf && next_is_limit {
                    let Step::Limit { count, offset, .. } = iter.next().unwrap() else { unreachable!() };
                    mapping = Step::Limit {
                        parent: Box::new(Step::Order { parent: Box::new(mapping), keys: keys.clone() }),
                        count: count + offset,
                        offset: 0,
                    };
                    reduction = Step::Limit {
                        parent: Box::new(Step::Order { parent: Box::new(reduction), keys }),
                        count,
                        offset,
                    };
                } else {
                    reduction = Step::Order { parent: Box::new(reduction), keys };
                }
            }
            Step::Aggregate { aggregates, group_by, .. } => {
                let (map_aggs, reduce_aggs, post) = reduce_aggregate(aggregates);
                mapping = Step::Aggregate {
                    parent: Box::new(mapping),
                    aggregates: map_aggs,
                    group_by: group_by.clone(),
                };
                reduction = Step::Aggregate {
                    parent: Box::new(reduction),
                    aggregates: reduce_aggs,
                    group_by: group_by.clone(),
                };
                if let Some(bindings) = post {
                    let mut all = bindings;
                    for (_, name) in &group_by {
                        all.push((Expr::ident(name.clone()), name.clone()));
                    }
                    reduction = Step::Bind { parent: Box::new(reduction), bindings: all, complete: true };
                }
                in_reduction = true;
            }
            Step::OutputIndex { table_path, basename, .. } => {
                reduction = Step::OutputIndex { parent: Box::new(reduction), table_path, basename: basename.clone() };
                mapping = Step::OutputPart { parent: Box::new(mapping), basename };
                in_reduction = true;
            }
            Step::UnpivotAtDistinct { at_name, .. } => {
                mapping = Step::UnpivotAtDistinct { parent: Box::new(mapping), at_name: at_name.clone() };
                reduction = Step::Distinct { parent: Box::new(reduction), keys: vec![Expr::ident(at_name)] };
            }
            other => {
                mapping = attach(other, mapping);
            }
        }
        directly_above_leaf = false;
    }

    let mapping_for_trace = mapping.clone();
    let reduction = match reduction {
        Step::UnionMap { inner, partition_keys, .. } => {
            Step::UnionMap { inner, child: Box::new(Trace::new(mapping)), partition_keys }
        }
        // Aggregate/OutputIndex always wraps the UnionMap further up, so
        // `reduction` is only still a bare UnionMap when the mapping
        // pipeline never triggered a mode transition at all.
        other => wrap_union(other, mapping),
    };
    (mapping_for_trace, reduction)
}

/// Wires the finished mapping chain into the reduction chain's innermost
/// `UnionMap` (there is exactly one, at the leaf).
fn wrap_union(reduction: Step, mapping: Step) -> Step {
    fn go(step: Step, mapping: &Step) -> Step {
        match step {
            Step::UnionMap { inner, partition_keys, .. } => Step::UnionMap {
                inner,
                child: Box::new(Trace::new(mapping.clone())),
                partition_keys,
            },
            other => attach_rec(other, mapping),
        }
    }
    fn attach_rec(mut step: Step, mapping: &Step) -> Step {
        if let Some(slot) = step.parent_mut() {
            let inner = std::mem::replace(slot.as_mut(), Step::NoOutput);
            *slot = Box::new(go(inner, mapping));
        }
        step
    }
    go(reduction, &mapping)
}

/// `reduceAggregate` (§4.5): returns (mapping-side aggregates, reduction-side
/// aggregates, optional reduction-side post-projection for `AVG`).
#[allow(clippy::type_complexity)]
fn reduce_aggregate(
    aggregates: Vec<(Expr, String)>,
) -> (Vec<(Expr, String)>, Vec<(Expr, String)>, Option<Vec<(Expr, String)>>) {
    let mut mapping = Vec::new();
    let mut reduction = Vec::new();
    let mut post: Vec<(Expr, String)> = Vec::new();

    for (expr, name) in aggregates {
        let ExprKind::Aggregate { op, arg, distinct, filter, .. } = expr.kind else {
            // Already-lowered, non-aggregate expression sharing this slot
            // (shouldn't happen post-splitAggregate); pass through unchanged
            // on both sides.
            mapping.push((expr.clone(), name.clone()));
            reduction.push((Expr::ident(name.clone()), name));
            continue;
        };

        match op {
            AggOp::Count => {
                mapping.push((mk_agg(AggOp::Count, arg, distinct, filter), name.clone()));
                reduction.push((mk_agg(AggOp::SumCount, Some(Box::new(Expr::ident(name.clone()))), false, None), name));
            }
            AggOp::Sum => {
                mapping.push((mk_agg(AggOp::SumPartial, arg, distinct, filter), name.clone()));
                reduction.push((mk_agg(AggOp::SumMerge, Some(Box::new(Expr::ident(name.clone()))), false, None), name));
            }
            AggOp::Min
            | AggOp::Max
            | AggOp::Earliest
            | AggOp::Latest
            | AggOp::BitAnd
            | AggOp::BitOr
            | AggOp::BitXor
            | AggOp::BoolAnd
            | AggOp::BoolOr
            | AggOp::SumInt
            | AggOp::SumCount => {
                mapping.push((mk_agg(op, arg, distinct, filter), name.clone()));
                reduction.push((mk_agg(op, Some(Box::new(Expr::ident(name.clone()))), false, None), name));
            }
            AggOp::Avg => {
                let sum_name = format!("{name}$sum");
                let count_name = format!("{name}$count");
                let count_arg = arg.as_ref().map(|a| {
                    Box::new(Expr::binary(crate::expr::BinOp::Add, (**a).clone(), Expr::lit(Literal::Int(0))))
                });
                mapping.push((mk_agg(AggOp::SumPartial, arg, distinct, filter.clone()), sum_name.clone()));
                mapping.push((mk_agg(AggOp::Count, count_arg, distinct, filter), count_name.clone()));
                reduction.push((mk_agg(AggOp::SumMerge, Some(Box::new(Expr::ident(sum_name.clone()))), false, None), sum_name.clone()));
                reduction.push((mk_agg(AggOp::SumCount, Some(Box::new(Expr::ident(count_name.clone()))), false, None), count_name.clone()));
                post.push((
                    Expr::new(ExprKind::Case {
                        branches: vec![(
                            Expr::binary(crate::expr::BinOp::Eq, Expr::ident(count_name.clone()), Expr::lit(Literal::Int(0))),
                            Expr::null(),
                        )],
                        default: Some(Box::new(Expr::binary(
                            crate::expr::BinOp::Div,
                            Expr::ident(sum_name.clone()),
                            Expr::ident(count_name.clone()),
                        ))),
                    }),
                    name,
                ));
            }
            AggOp::ApproxCountDistinct | AggOp::SnellerDatashape => {
                mapping.push((mk_agg(op, arg, distinct, filter), name.clone()));
                reduction.push((mk_agg(op, Some(Box::new(Expr::ident(name.clone()))), false, None), name));
            }
            AggOp::SumMerge | AggOp::SumPartial => {
                // Already a split-phase op; the aggregate should never
                // reach `Split` in this shape.
                mapping.push((mk_agg(op, arg, distinct, filter), name.clone()));
                reduction.push((Expr::ident(name.clone()), name));
            }
        }
    }

    (mapping, reduction, if post.is_empty() { None } else { Some(post) })
}

fn mk_agg(op: AggOp, arg: Option<Box<Expr>>, distinct: bool, filter: Option<Box<Expr>>) -> Expr {
    Expr::new(ExprKind::Aggregate { op, arg, distinct, filter, over: None })
}

/// Post-split cleanup on the reduction trace: push ORDER BY down past
/// `Filter`/`Bind` when doing so doesn't change the output's row order (a
/// `Bind` only renames/recomputes columns, a `Filter` only removes rows —
/// neither reorders), then re-run limit/project push-down.
fn postprocess_reduction(reduce_trace: &mut Trace, env: &dyn Environment, large_size: i64) {
    log::debug!("split: postprocessing reduction trace");
    push_order_down(&mut reduce_trace.top);
    optimize::optimize_with_large_size(reduce_trace, env, large_size);
}

fn push_order_down(step: &mut Step) {
    let should_swap = matches!(step, Step::Order { parent, .. }
        if matches!(parent.as_ref(), Step::Filter { .. } | Step::Bind { .. }));
    if should_swap {
        let Step::Order { parent, keys } = std::mem::replace(step, Step::NoOutput) else {
            unreachable!()
        };
        match *parent {
            Step::Filter { parent: inner, predicate } => {
                let new_order = Step::Order { parent: inner, keys };
                *step = Step::Filter { parent: Box::new(new_order), predicate };
            }
            Step::Bind { parent: inner, bindings, complete } => {
                let new_order = Step::Order { parent: inner, keys };
                *step = Step::Bind { parent: Box::new(new_order), bindings, complete };
            }
            _ => unreachable!(),
        }
        return push_order_down(step);
    }
    if let Some(p) = step.parent_mut() {
        push_order_down(p);
    }
}
