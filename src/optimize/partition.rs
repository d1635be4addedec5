//! `partition` (§4.4, §8.3 S5): promote GROUP BY columns that are index
//! partition keys into a `UnionMap` over partition values, eliminating (or
//! narrowing) the in-memory `Aggregate`'s own GROUP BY.

use crate::env::Environment;
use crate::expr::{Builtin, Expr, ExprKind};
use crate::ir::{Step, Trace};

pub fn partition(trace: &mut Trace, env: &dyn Environment, large_size: i64) {
    try_partition(&mut trace.top, env, large_size);
}

fn try_partition(step: &mut Step, env: &dyn Environment, large_size: i64) {
    let split = match step {
        Step::Aggregate { parent, group_by, .. } => match parent.as_ref() {
            Step::IterTable(t) => env.index(&t.table).map(|index| {
                group_by
                    .iter()
                    .cloned()
                    .partition::<Vec<_>, _>(|(e, _)| matches!(&e.kind, ExprKind::Ident(n) if index.has_partition(n)))
            }),
            _ => None,
        },
        _ => None,
    };

    if let Some((partitioned, kept)) = split {
        if !partitioned.is_empty() {
            do_partition(step, partitioned, kept, env, large_size);
            return;
        }
    }
    if let Some(p) = step.parent_mut() {
        try_partition(p, env, large_size);
    }
}

fn do_partition(
    step: &mut Step,
    partitioned: Vec<(Expr, String)>,
    kept: Vec<(Expr, String)>,
    env: &dyn Environment,
    large_size: i64,
) {
    let Step::Aggregate { parent, aggregates, .. } = std::mem::replace(step, Step::NoOutput) else {
        unreachable!()
    };
    let Step::IterTable(mut t) = *parent else { unreachable!() };
    t.partitioned = true;

    let partition_keys: Vec<Expr> = partitioned.iter().map(|(e, _)| e.clone()).collect();

    let mut inner_trace = Trace::new(Step::Aggregate {
        parent: Box::new(Step::IterTable(t.clone())),
        aggregates: aggregates.clone(),
        group_by: kept,
    });
    // Re-run projection/filter passes against the new leaf shape, per the
    // spec's "re-run filter/project passes on the child".
    super::optimize_one(&mut inner_trace, env, large_size);

    let union = Step::UnionMap {
        inner: t,
        child: Box::new(inner_trace),
        partition_keys: Some(partition_keys),
    };

    let mut bindings: Vec<(Expr, String)> = aggregates
        .iter()
        .map(|(_, name)| (Expr::ident(name.clone()), name.clone()))
        .collect();
    for (i, (_, name)) in partitioned.iter().enumerate() {
        bindings.push((Expr::new(ExprKind::Builtin(Builtin::PartitionValue(i))), name.clone()));
    }

    *step = Step::Bind { parent: Box::new(union), bindings, complete: true };
}
