//! `filterelim` and `filterpushdown` (§4.4).

use crate::expr::{Expr, LogicalOp};
use crate::ir::Step;
use crate::ir::Trace;

/// `filterelim`: `FILTER TRUE` is a no-op and is dropped; `FILTER FALSE`
/// means the whole trace produces nothing, collapsing everything below it
/// to `NoOutput`.
pub fn filterelim(trace: &mut Trace) {
    walk(&mut trace.top);
}

fn walk(step: &mut Step) {
    if let Step::Filter { predicate, .. } = step {
        if predicate.is_literal_bool(false) {
            *step = Step::NoOutput;
            return;
        }
        if predicate.is_literal_bool(true) {
            let Step::Filter { parent, .. } = std::mem::replace(step, Step::NoOutput) else {
                unreachable!()
            };
            *step = *parent;
            return walk(step);
        }
    }
    if let Some(p) = step.parent_mut() {
        walk(p);
    }
}

/// `filterpushdown` (§9): a `Filter` sitting directly atop a leaf
/// `IterTable` is folded into that leaf's own `filter` field (AND-combined
/// with whatever's already there), since the storage layer can apply a
/// predicate at scan time. The `Filter` step itself is then removed.
pub fn filterpushdown(trace: &mut Trace) {
    walk_push(&mut trace.top);
}

fn walk_push(step: &mut Step) {
    if let Step::Filter { parent, .. } = step {
        if matches!(parent.as_ref(), Step::IterTable(_)) {
            let Step::Filter { parent, predicate } = std::mem::replace(step, Step::NoOutput) else {
                unreachable!()
            };
            let Step::IterTable(mut t) = *parent else { unreachable!() };
            t.filter = Some(match t.filter.take() {
                Some(existing) => Expr::logical(LogicalOp::And, vec![existing, predicate]),
                None => predicate,
            });
            *step = Step::IterTable(t);
            return;
        }
    }
    if let Some(p) = step.parent_mut() {
        walk_push(p);
    }
}
