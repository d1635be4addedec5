//! Sub-query hoisting and decorrelation (§4.1 step 14, §4.3).
//!
//! Every embedded `SELECT` found while walking the finished trace's
//! expressions is built as its own `Trace` against the (structurally
//! simplified) set of names the enclosing trace already projects, then
//! folded into a replacement plus a placeholder builtin the way
//! `prqlc::sql::srq::preprocess` folds a relation into a CTE reference.

use std::collections::HashSet;

use crate::ast::Select;
use crate::env::Environment;
use crate::error::CompileError;
use crate::expr::rewrite_bottom_up;
use crate::expr::{collect_idents, Builtin, Expr, ExprKind, IsTypeKind, LogicalOp};
use crate::ir::{cardinality::SizeClass, IterTableData, Step, Trace};
use crate::utils::NameGenerator;

/// Walks every expression reachable from `trace.top`, replacing each
/// embedded `ExprKind::Subquery`/`Builtin::InSubquery` with a reference to a
/// newly appended replacement trace (§4.1 step 14).
pub fn hoist(
    trace: &mut Trace,
    env: &dyn Environment,
    ng: &mut NameGenerator,
    _outer_scope: Option<&HashSet<String>>,
    large_size: i64,
) {
    let outer_names = outer_visible_names(trace);
    let mut top = std::mem::replace(&mut trace.top, Step::NoOutput);
    crate::ir::fold::for_each_expr_mut(&mut top, &mut |e| {
        take_expr(e, |owned| {
            rewrite_bottom_up(owned, &mut |inner| match &inner.kind {
                ExprKind::Subquery(sel) => {
                    let sel = sel.clone();
                    replace_scalar_subquery(&sel, trace, env, ng, &outer_names, large_size)
                }
                ExprKind::Builtin(Builtin::InSubquery { value, subquery }) => {
                    let value = value.clone();
                    let subquery = subquery.clone();
                    replace_in_subquery(*value, &subquery, trace, env, ng, &outer_names, large_size)
                }
                _ => inner,
            })
        });
    });
    crate::ir::fold::for_each_expr_mut(&mut top, &mut |e| {
        take_expr(e, |owned| canonicalize_missing_checks(owned, trace));
    });
    trace.top = top;
}

/// §4.3 special canonicalization: `HASH_REPLACEMENT(i, 'scalar', ...) IS
/// [NOT] MISSING` becomes `[NOT] IN_REPLACEMENT(outer-key, i)` once the
/// child trace's final Bind is narrowed to just the key — the
/// existence-check shape produced by lowering a `NOT EXISTS`/`NOT IN`
/// pattern (§8.3 S6).
fn canonicalize_missing_checks(expr: Expr, trace: &mut Trace) -> Expr {
    rewrite_bottom_up(expr, &mut |e| {
        if let ExprKind::IsType { expr: inner, kind: IsTypeKind::Missing, negated } = &e.kind {
            if let ExprKind::Builtin(Builtin::HashReplacement { index, kind, key_label, outer_key, .. }) = &inner.kind
            {
                if kind == "scalar" {
                    if let Some(repl) = trace.replacements.get_mut(*index) {
                        narrow_to_key(&mut repl.top, key_label);
                    }
                    let in_repl = Expr::new(ExprKind::Builtin(Builtin::InReplacement {
                        value: outer_key.clone(),
                        index: *index,
                    }));
                    return if *negated { in_repl } else { Expr::not(in_repl) };
                }
            }
        }
        e
    })
}

fn narrow_to_key(top: &mut Step, key_label: &str) {
    if let Step::Bind { bindings, .. } = top {
        bindings.retain(|(_, name)| name == key_label);
    }
}

fn take_expr(slot: &mut Expr, f: impl FnOnce(Expr) -> Expr) {
    let owned = std::mem::replace(slot, Expr::null());
    *slot = f(owned);
}

/// Names the enclosing trace itself projects, used as a cheap stand-in for
/// "names bound in the parent's scope" when deciding which side of a
/// correlation-candidate equality is the outer reference (§9 "Correlation
/// detection"). A full symbol table keyed by FROM alias is out of scope for
/// this simplified standalone `expr` AST; this heuristic is exact for the
/// sibling-column shape `SELECT x, (SELECT ... WHERE x = y ...) FROM foo`.
fn outer_visible_names(trace: &Trace) -> HashSet<String> {
    let mut idents = Vec::new();
    for (_, e) in &trace.r#final {
        collect_idents(e, &mut idents);
    }
    idents.into_iter().collect()
}

fn replace_scalar_subquery(
    sel: &Select,
    trace: &mut Trace,
    env: &dyn Environment,
    ng: &mut NameGenerator,
    outer_names: &HashSet<String>,
    large_size: i64,
) -> Expr {
    let mut child = super::build_select(sel, env, ng, None, &HashSet::new(), large_size);
    if let Some(e) = child.first_error() {
        trace.push_error(e.clone());
        return Expr::null();
    }

    let correlation = match decorrelate(&mut child, outer_names) {
        Ok(c) => c,
        Err(e) => {
            trace.push_error(e);
            return Expr::null();
        }
    };

    let class = child.size_class(large_size);
    let index = trace.replacements.len();
    let expr = match (class, &correlation) {
        (SizeClass::Zero, _) => {
            trace.replacements.push(child);
            return Expr::null();
        }
        (c, Some((key_label, outer_key))) if c.is_at_most_one() => {
            let kind = if is_single_column(&child) { "scalar" } else { "struct" };
            Expr::new(ExprKind::Builtin(Builtin::HashReplacement {
                index,
                kind: kind.to_string(),
                key_label: key_label.clone(),
                outer_key: Box::new(outer_key.clone()),
                default: Box::new(Expr::null()),
            }))
        }
        (c, Some((key_label, outer_key))) if c.is_bounded() => Expr::new(ExprKind::Builtin(Builtin::HashReplacement {
            index,
            kind: "joinlist".to_string(),
            key_label: key_label.clone(),
            outer_key: Box::new(outer_key.clone()),
            default: Box::new(Expr::null()),
        })),
        (c, None) if c.is_at_most_one() && is_single_column(&child) => {
            Expr::new(ExprKind::Builtin(Builtin::ScalarReplacement(index)))
        }
        (c, None) if c.is_at_most_one() => Expr::new(ExprKind::Builtin(Builtin::StructReplacement(index))),
        (c, None) if c.is_bounded() => Expr::new(ExprKind::Builtin(Builtin::ListReplacement(index))),
        _ => {
            trace.push_error(CompileError::unsupported(
                "scalar sub-query of unbounded size (use LIMIT)",
            ));
            return Expr::null();
        }
    };
    trace.replacements.push(child);
    expr
}

fn replace_in_subquery(
    value: Expr,
    sel: &Select,
    trace: &mut Trace,
    env: &dyn Environment,
    ng: &mut NameGenerator,
    outer_names: &HashSet<String>,
    large_size: i64,
) -> Expr {
    let mut child = super::build_select(sel, env, ng, None, &HashSet::new(), large_size);
    if let Some(e) = child.first_error() {
        trace.push_error(e.clone());
        return Expr::null();
    }
    if !is_single_column(&child) {
        trace.push_error(CompileError::new_simple("IN sub-query column arity must be 1"));
        return Expr::null();
    }

    let correlation = match decorrelate(&mut child, outer_names) {
        Ok(c) => c,
        Err(e) => {
            trace.push_error(e);
            return Expr::null();
        }
    };

    let class = child.size_class(large_size);
    if matches!(class, SizeClass::Zero) {
        trace.replacements.push(child);
        return Expr::bool_lit(false);
    }
    if !class.is_bounded() {
        trace.push_error(CompileError::unsupported("IN sub-query of unbounded size (use LIMIT)"));
        return Expr::null();
    }

    let index = trace.replacements.len();
    let outer_key = match &correlation {
        Some((_, outer_key)) => outer_key.clone(),
        None => value,
    };
    trace.replacements.push(child);
    Expr::new(ExprKind::Builtin(Builtin::InReplacement { value: Box::new(outer_key), index }))
}

fn is_single_column(trace: &Trace) -> bool {
    trace.r#final.len() == 1
}

/// `decorrelate` (§4.3 step 2): detects the single supported correlation
/// shape — exactly one free identifier related to a local column by a
/// top-level equality conjunct in the leaf's filter — and rewrites it away.
/// Returns `Ok(None)` when the sub-query is not correlated (a no-op, §8.2),
/// `Ok(Some((key_label, outer_key)))` once rewritten, or `Err` for
/// unsupported correlation shapes.
fn decorrelate(child: &mut Trace, outer_names: &HashSet<String>) -> Result<Option<(String, Expr)>, CompileError> {
    let mut chain = flatten(std::mem::replace(&mut child.top, Step::NoOutput));

    // Reject LIMIT > 1 up front (§4.3 step 2).
    for step in &chain {
        if let Step::Limit { count, .. } = step {
            if *count > 1 {
                child.top = relink(chain);
                return Err(CompileError::unsupported("cannot support correlated reference (LIMIT > 1)"));
            }
        }
    }

    let filter_pos = chain.iter().position(|s| matches!(s, Step::Filter { .. }));
    let Some(pos) = filter_pos else {
        child.top = relink(chain);
        return Ok(None);
    };

    let predicate = match &chain[pos] {
        Step::Filter { predicate, .. } => predicate.clone(),
        _ => unreachable!(),
    };
    let mut conjuncts = split_conjuncts(&predicate);
    let correlated_positions: Vec<usize> = conjuncts
        .iter()
        .enumerate()
        .filter(|(_, c)| correlation_pair(c, outer_names).is_some())
        .map(|(i, _)| i)
        .collect();

    if correlated_positions.is_empty() {
        child.top = relink(chain);
        return Ok(None);
    }
    if correlated_positions.len() > 1 {
        child.top = relink(chain);
        return Err(CompileError::unsupported("cannot support correlated reference (multiple correlated conjuncts)"));
    }

    let (outer_key, inner_key_name) = correlation_pair(&conjuncts[correlated_positions[0]], outer_names).unwrap();
    conjuncts.remove(correlated_positions[0]);

    // Drop or narrow the Filter step.
    if conjuncts.is_empty() {
        chain.remove(pos);
    } else {
        let rebuilt = if conjuncts.len() == 1 {
            conjuncts.into_iter().next().unwrap()
        } else {
            Expr::logical(LogicalOp::And, conjuncts)
        };
        if let Step::Filter { predicate, .. } = &mut chain[pos] {
            *predicate = rebuilt;
        }
    }

    // Drop any LIMIT (count <= 1) — distinct now governs cardinality.
    chain.retain(|s| !matches!(s, Step::Limit { .. }));

    // Insert `Distinct[inner_key]` immediately below the terminal Bind, and
    // expose the key under `key_label` in that Bind. Only one correlated
    // conjunct is ever accepted (checked above), so the key namespace never
    // needs more than one generated name per child trace (§4.3 S3/S6).
    let key_label = "$_0_0".to_string();
    let key_expr = Expr::ident(inner_key_name);
    let last = chain.len() - 1;
    match &mut chain[last] {
        Step::Bind { bindings, .. } => bindings.push((key_expr.clone(), key_label.clone())),
        _ => {
            return Err(CompileError::bug("decorrelate expected a terminal Bind"));
        }
    }
    chain.insert(last, Step::Distinct { parent: Box::new(Step::NoOutput), keys: vec![key_expr] });

    child.top = relink(chain);
    Ok(Some((key_label, outer_key)))
}

/// `x = y` where exactly one side is a bare identifier in `outer_names`;
/// returns `(outer_side_expr, inner_side_name)`.
fn correlation_pair(expr: &Expr, outer_names: &HashSet<String>) -> Option<(Expr, String)> {
    if let ExprKind::Binary { op: crate::expr::BinOp::Eq, lhs, rhs } = &expr.kind {
        let lhs_outer = matches!(&lhs.kind, ExprKind::Ident(n) if outer_names.contains(n));
        let rhs_outer = matches!(&rhs.kind, ExprKind::Ident(n) if outer_names.contains(n));
        if lhs_outer && !rhs_outer {
            if let ExprKind::Ident(n) = &rhs.kind {
                return Some(((**lhs).clone(), n.clone()));
            }
        }
        if rhs_outer && !lhs_outer {
            if let ExprKind::Ident(n) = &lhs.kind {
                return Some(((**rhs).clone(), n.clone()));
            }
        }
    }
    None
}

fn split_conjuncts(expr: &Expr) -> Vec<Expr> {
    match &expr.kind {
        ExprKind::Logical { op: LogicalOp::And, args } => args.clone(),
        _ => vec![expr.clone()],
    }
}

/// Flattens a parent-linked `Step` chain into a `Vec` ordered leaf-first,
/// severing each node's `parent` box (replaced with a `NoOutput`
/// placeholder) so the pieces can be filtered/spliced before `relink`
/// reassembles them.
fn flatten(step: Step) -> Vec<Step> {
    let mut out = Vec::new();
    let mut cur = step;
    loop {
        let has_parent = cur.parent().is_some();
        if !has_parent {
            out.push(cur);
            break;
        }
        let (node, parent) = sever(cur);
        out.push(node);
        cur = *parent;
    }
    out.reverse();
    out
}

fn sever(step: Step) -> (Step, Box<Step>) {
    match step {
        Step::IterValue { parent, value, binding, filter, fields } => {
            (Step::IterValue { parent: Box::new(Step::NoOutput), value, binding, filter, fields }, parent)
        }
        Step::Filter { parent, predicate } => (Step::Filter { parent: Box::new(Step::NoOutput), predicate }, parent),
        Step::Bind { parent, bindings, complete } => {
            (Step::Bind { parent: Box::new(Step::NoOutput), bindings, complete }, parent)
        }
        Step::Aggregate { parent, aggregates, group_by } => {
            (Step::Aggregate { parent: Box::new(Step::NoOutput), aggregates, group_by }, parent)
        }
        Step::Distinct { parent, keys } => (Step::Distinct { parent: Box::new(Step::NoOutput), keys }, parent),
        Step::Order { parent, keys } => (Step::Order { parent: Box::new(Step::NoOutput), keys }, parent),
        Step::Limit { parent, count, offset } => {
            (Step::Limit { parent: Box::new(Step::NoOutput), count, offset }, parent)
        }
        Step::EquiJoin { parent, build, left_key, right_key, build_name } => (
            Step::EquiJoin { parent: Box::new(Step::NoOutput), build, left_key, right_key, build_name },
            parent,
        ),
        Step::Unpivot { parent, as_name, at_name } => {
            (Step::Unpivot { parent: Box::new(Step::NoOutput), as_name, at_name }, parent)
        }
        Step::UnpivotAtDistinct { parent, at_name } => {
            (Step::UnpivotAtDistinct { parent: Box::new(Step::NoOutput), at_name }, parent)
        }
        Step::OutputPart { parent, basename } => {
            (Step::OutputPart { parent: Box::new(Step::NoOutput), basename }, parent)
        }
        Step::OutputIndex { parent, table_path, basename } => (
            Step::OutputIndex { parent: Box::new(Step::NoOutput), table_path, basename },
            parent,
        ),
        leaf => (leaf, Box::new(Step::NoOutput)),
    }
}

fn relink(mut nodes: Vec<Step>) -> Step {
    let mut top = nodes.remove(0);
    for node in nodes {
        top = attach(node, Box::new(top));
    }
    top
}

fn attach(node: Step, parent: Box<Step>) -> Step {
    match node {
        Step::IterValue { value, binding, filter, fields, .. } => {
            Step::IterValue { parent, value, binding, filter, fields }
        }
        Step::Filter { predicate, .. } => Step::Filter { parent, predicate },
        Step::Bind { bindings, complete, .. } => Step::Bind { parent, bindings, complete },
        Step::Aggregate { aggregates, group_by, .. } => Step::Aggregate { parent, aggregates, group_by },
        Step::Distinct { keys, .. } => Step::Distinct { parent, keys },
        Step::Order { keys, .. } => Step::Order { parent, keys },
        Step::Limit { count, offset, .. } => Step::Limit { parent, count, offset },
        Step::EquiJoin { build, left_key, right_key, build_name, .. } => {
            Step::EquiJoin { parent, build, left_key, right_key, build_name }
        }
        Step::Unpivot { as_name, at_name, .. } => Step::Unpivot { parent, as_name, at_name },
        Step::UnpivotAtDistinct { at_name, .. } => Step::UnpivotAtDistinct { parent, at_name },
        Step::OutputPart { basename, .. } => Step::OutputPart { parent, basename },
        Step::OutputIndex { table_path, basename, .. } => Step::OutputIndex { parent, table_path, basename },
        leaf => leaf,
    }
}
