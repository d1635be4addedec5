//! Aggregate-related passes: `aggelim`, `aggfilter`, `countdistinct2count`
//! (§4.4).

use std::collections::HashMap;

use crate::env::Environment;
use crate::expr::{rewrite_bottom_up, AggOp, Expr, ExprKind};
use crate::ir::{Step, Trace};

/// `aggelim` (§9 "index-driven aggregate elimination", §8.3 S2): an
/// `EARLIEST`/`LATEST` aggregate with no GROUP BY, over a leaf `IterTable`
/// whose index reports a time range for the aggregated path, folds to the
/// index's bound directly — the `Aggregate` and its `IterTable` leaf
/// disappear entirely, replaced by `DummyOutput`.
pub fn aggelim(trace: &mut Trace, env: &dyn Environment) {
    let Step::Aggregate { parent, aggregates, group_by } = &trace.top else { return };
    if !group_by.is_empty() {
        return;
    }
    if !matches!(parent.as_ref(), Step::IterTable(t) if t.has_index) {
        return;
    }
    let Step::IterTable(table) = parent.as_ref() else { unreachable!() };
    let Some(index) = env.index(&table.table) else { return };

    let mut folded = Vec::with_capacity(aggregates.len());
    for (e, name) in aggregates {
        let ExprKind::Aggregate { op, arg: Some(arg), .. } = &e.kind else { return };
        let Some(path) = path_segments(arg) else { return };
        let Some((min, max)) = index.time_range(&path) else { return };
        let value = match op {
            AggOp::Earliest => min,
            AggOp::Latest => max,
            _ => return,
        };
        folded.push((Expr::lit(value), name.clone()));
    }

    trace.top = Step::Bind {
        parent: Box::new(Step::DummyOutput),
        bindings: folded.into_iter().map(|(e, n)| (e, n)).collect(),
        complete: true,
    };
}

fn path_segments(expr: &Expr) -> Option<Vec<String>> {
    fn walk(expr: &Expr, out: &mut Vec<String>) -> bool {
        match &expr.kind {
            ExprKind::Ident(n) => {
                out.push(n.clone());
                true
            }
            ExprKind::Path(base, field) => {
                if walk(base, out) {
                    out.push(field.clone());
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
    let mut segs = Vec::new();
    if walk(expr, &mut segs) {
        Some(segs)
    } else {
        None
    }
}

/// `aggfilter` (§4.4): if every aggregate in an `Aggregate` step shares the
/// same `FILTER (WHERE p)`, hoist `p` into a preceding `Filter` and clear the
/// per-aggregate filters. Also dedups structurally equivalent aggregates,
/// rewriting downstream references to the kept name.
pub fn aggfilter(trace: &mut Trace) {
    walk(&mut trace.top);
}

fn walk(step: &mut Step) -> Option<HashMap<String, String>> {
    let own_rename = if matches!(step, Step::Aggregate { .. }) {
        hoist_filter_and_dedup(step)
    } else {
        None
    };
    let deeper_rename = step.parent_mut().and_then(walk);
    let rename = match (own_rename, deeper_rename) {
        (None, None) => None,
        (Some(r), None) | (None, Some(r)) => Some(r),
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Some(a)
        }
    };
    if let Some(rename) = &rename {
        substitute_idents_in_step(step, rename);
    }
    rename
}

/// Hoists a shared per-aggregate `FILTER` and dedups structurally-identical
/// aggregates in place, returning a rename map (dropped name -> kept name)
/// for any duplicates found.
fn hoist_filter_and_dedup(step: &mut Step) -> Option<HashMap<String, String>> {
    let Step::Aggregate { parent, aggregates, .. } = step else { unreachable!() };

    if !aggregates.is_empty() {
        let shared_filter = aggregates.iter().try_fold(None::<&Expr>, |acc, (e, _)| {
            let ExprKind::Aggregate { filter: Some(f), .. } = &e.kind else { return Err(()) };
            match acc {
                None => Ok(Some(f.as_ref())),
                Some(prev) if prev.struct_eq(f) => Ok(Some(prev)),
                Some(_) => Err(()),
            }
        });
        if let Ok(Some(predicate)) = shared_filter {
            let predicate = predicate.clone();
            let old_parent = std::mem::replace(parent.as_mut(), Step::NoOutput);
            *parent = Box::new(Step::Filter { parent: Box::new(old_parent), predicate });
            for (e, _) in aggregates.iter_mut() {
                if let ExprKind::Aggregate { filter, .. } = &mut e.kind {
                    *filter = None;
                }
            }
        }
    }

    let mut rename = HashMap::new();
    let mut kept: Vec<(Expr, String)> = Vec::with_capacity(aggregates.len());
    for (e, name) in aggregates.drain(..) {
        match kept.iter().find(|(ke, _)| ke.struct_eq(&e)) {
            Some((_, kept_name)) => {
                rename.insert(name, kept_name.clone());
            }
            None => kept.push((e, name)),
        }
    }
    *aggregates = kept;

    if rename.is_empty() {
        None
    } else {
        Some(rename)
    }
}

fn substitute_idents_in_step(step: &mut Step, rename: &HashMap<String, String>) {
    crate::ir::fold::map_own_exprs(step, &mut |e| {
        *e = rewrite_bottom_up(e.clone(), &mut |inner| match &inner.kind {
            ExprKind::Ident(name) => rename.get(name).map(|n| Expr::ident(n.clone())).unwrap_or(inner),
            _ => inner,
        });
    });
}

/// `countdistinct2count` (§4.4, §9): `COUNT(DISTINCT x)` with no other
/// aggregates sharing the group is equivalent to a plain `COUNT(x)` run
/// over a `Distinct[x, group_keys...]` inserted below the `Aggregate`.
pub fn countdistinct2count(trace: &mut Trace) {
    walk_cd(&mut trace.top);
}

fn walk_cd(step: &mut Step) {
    let rewrite = matches!(step, Step::Aggregate { aggregates, .. }
        if aggregates.len() == 1
            && matches!(&aggregates[0].0.kind, ExprKind::Aggregate { op: AggOp::Count, arg: Some(_), distinct: true, .. }));
    if rewrite {
        let Step::Aggregate { parent, aggregates, group_by } = std::mem::replace(step, Step::NoOutput) else {
            unreachable!()
        };
        let (agg_expr, agg_name) = aggregates.into_iter().next().unwrap();
        let ExprKind::Aggregate { arg: Some(arg), .. } = agg_expr.kind else { unreachable!() };

        let mut distinct_keys: Vec<Expr> = group_by.iter().map(|(e, _)| e.clone()).collect();
        distinct_keys.push(*arg.clone());

        let distinct_step = Step::Distinct { parent, keys: distinct_keys };
        let new_count = Expr::new(ExprKind::Aggregate {
            op: AggOp::Count,
            arg: Some(arg),
            distinct: false,
            filter: None,
            over: None,
        });
        *step = Step::Aggregate {
            parent: Box::new(distinct_step),
            aggregates: vec![(new_count, agg_name)],
            group_by,
        };
        return;
    }
    if let Some(p) = step.parent_mut() {
        walk_cd(p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IterTableData;

    fn agg(op: AggOp, arg: &str, filter: Option<Expr>) -> Expr {
        Expr::new(ExprKind::Aggregate {
            op,
            arg: Some(Box::new(Expr::ident(arg))),
            distinct: false,
            filter: filter.map(Box::new),
            over: None,
        })
    }

    #[test]
    fn hoists_shared_filter_above_aggregate() {
        let p = Expr::binary(crate::expr::BinOp::Gt, Expr::ident("x"), Expr::lit(crate::expr::Literal::Int(0)));
        let mut trace = Trace::new(Step::Aggregate {
            parent: Box::new(Step::IterTable(IterTableData::new("foo"))),
            aggregates: vec![
                (agg(AggOp::Sum, "x", Some(p.clone())), "s".to_string()),
                (agg(AggOp::Count, "y", Some(p.clone())), "c".to_string()),
            ],
            group_by: vec![],
        });

        aggfilter(&mut trace);

        let Step::Aggregate { parent, aggregates, .. } = &trace.top else {
            panic!("expected Aggregate at top, got {:?}", trace.top)
        };
        let Step::Filter { predicate, .. } = parent.as_ref() else {
            panic!("expected a hoisted Filter below the Aggregate, got {:?}", parent)
        };
        assert!(predicate.struct_eq(&p));
        for (e, _) in aggregates {
            let ExprKind::Aggregate { filter, .. } = &e.kind else { unreachable!() };
            assert!(filter.is_none(), "per-aggregate filter should have been cleared");
        }
    }

    #[test]
    fn dedups_structurally_identical_aggregates_and_renames_consumers() {
        let trace_top = Step::Bind {
            parent: Box::new(Step::Aggregate {
                parent: Box::new(Step::IterTable(IterTableData::new("foo"))),
                aggregates: vec![
                    (agg(AggOp::Sum, "x", None), "s1".to_string()),
                    (agg(AggOp::Sum, "x", None), "s2".to_string()),
                ],
                group_by: vec![],
            }),
            bindings: vec![(Expr::ident("s1"), "a".to_string()), (Expr::ident("s2"), "b".to_string())],
            complete: true,
        };
        let mut trace = Trace::new(trace_top);

        aggfilter(&mut trace);

        let Step::Bind { parent, bindings, .. } = &trace.top else {
            panic!("expected Bind at top, got {:?}", trace.top)
        };
        let Step::Aggregate { aggregates, .. } = parent.as_ref() else {
            panic!("expected Aggregate below Bind, got {:?}", parent)
        };
        assert_eq!(aggregates.len(), 1, "duplicate aggregate should have been dropped");
        for (e, name) in bindings {
            assert!(matches!(&e.kind, ExprKind::Ident(n) if n == "s1"), "expected both bindings to reference the kept aggregate name, got {e} for {name}");
        }
    }
}
