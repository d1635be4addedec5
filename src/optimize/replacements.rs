//! `mergereplacements` (§4.4, §8.2 idempotency property): structurally
//! identical replacement sub-traces are deduplicated, with every reference
//! to a merged-away index rewritten to point at the surviving one.

use crate::expr::rewrite_bottom_up;
use crate::expr::{Builtin, Expr, ExprKind};
use crate::ir::Trace;

pub fn mergereplacements(trace: &mut Trace) {
    if trace.replacements.len() < 2 {
        return;
    }
    // A cheap stand-in for deep structural equality of two traces: compare
    // their `Debug` rendering, which is stable and captures every field.
    let mut keep: Vec<usize> = Vec::new();
    let mut remap: Vec<usize> = vec![0; trace.replacements.len()];
    let fingerprints: Vec<String> = trace.replacements.iter().map(|t| format!("{t:?}")).collect();
    for (i, fp) in fingerprints.iter().enumerate() {
        if let Some(pos) = keep.iter().position(|&k| &fingerprints[k] == fp) {
            remap[i] = pos;
        } else {
            remap[i] = keep.len();
            keep.push(i);
        }
    }
    if keep.len() == trace.replacements.len() {
        return;
    }
    let old = std::mem::take(&mut trace.replacements);
    trace.replacements = keep.into_iter().map(|i| old[i].clone()).collect();
    crate::ir::fold::for_each_expr_mut(&mut trace.top, &mut |e| {
        *e = rewrite_indices(e.clone(), &remap);
    });
}

fn rewrite_indices(expr: Expr, remap: &[usize]) -> Expr {
    rewrite_bottom_up(expr, &mut |e| match e.kind {
        ExprKind::Builtin(Builtin::HashReplacement { index, kind, key_label, outer_key, default }) => {
            Expr::new(ExprKind::Builtin(Builtin::HashReplacement {
                index: remap[index],
                kind,
                key_label,
                outer_key,
                default,
            }))
        }
        ExprKind::Builtin(Builtin::ScalarReplacement(i)) => {
            Expr::new(ExprKind::Builtin(Builtin::ScalarReplacement(remap[i])))
        }
        ExprKind::Builtin(Builtin::ListReplacement(i)) => {
            Expr::new(ExprKind::Builtin(Builtin::ListReplacement(remap[i])))
        }
        ExprKind::Builtin(Builtin::StructReplacement(i)) => {
            Expr::new(ExprKind::Builtin(Builtin::StructReplacement(remap[i])))
        }
        ExprKind::Builtin(Builtin::InReplacement { value, index }) => {
            Expr::new(ExprKind::Builtin(Builtin::InReplacement { value, index: remap[index] }))
        }
        ExprKind::Builtin(Builtin::PartitionValue(i)) => {
            Expr::new(ExprKind::Builtin(Builtin::PartitionValue(remap[i])))
        }
        other => Expr::new(other),
    })
}
