//! AST → Trace lowering (§4.1): `build`.
//!
//! Shaped after `prqlc::semantic::lowering::Lowerer`: one function per
//! binding-order clause (FROM, WHERE, GROUP BY/aggregate, HAVING, SELECT,
//! ORDER BY, LIMIT/OFFSET), threading a `NameGenerator` for synthetic
//! binding names the way the teacher threads its `IdGenerator<CId>`.

pub mod aggregate;
pub mod subquery;

use std::collections::{HashMap, HashSet};

use crate::ast::{self, Column, Distinct, FromExpr, JoinKind, Query, Select};
use crate::check::{self, check_no_aggregate_in_condition};
use crate::env::Environment;
use crate::error::{CompileError, WithErrorInfo};
use crate::expr::rewrite_bottom_up;
use crate::expr::simplify;
use crate::expr::{collect_idents, reason_undefined, Builtin, Expr, ExprKind};
use crate::ir::{cardinality, IterTableData, OrderKey, Step, Trace, LARGE_SIZE};
use crate::utils::NameGenerator;

/// `build(query, env) -> Trace` (§4.1). Errors accumulate on the returned
/// trace rather than short-circuiting the call, matching §7's "lowering
/// collects the first error and surfaces it... as soon as the current
/// sub-walk completes".
pub fn build(query: &Query, env: &dyn Environment) -> Trace {
    build_with_large_size(query, env, LARGE_SIZE)
}

/// As [`build`], but with the large-size cardinality threshold (§3.5)
/// overridden instead of defaulting to [`LARGE_SIZE`] — the knob
/// `BuildOptions::large_size` exposes at the crate root.
pub fn build_with_large_size(query: &Query, env: &dyn Environment, large_size: i64) -> Trace {
    let mut ng = NameGenerator::new("$_");
    let ctes = HashMap::new();
    build_with_ctes(&query.body, &query.with, env, &mut ng, &ctes, None, large_size)
}

#[allow(clippy::too_many_arguments)]
fn build_with_ctes(
    sel: &Select,
    with: &[ast::Cte],
    env: &dyn Environment,
    ng: &mut NameGenerator,
    outer_ctes: &HashMap<String, Select>,
    outer_scope: Option<&HashSet<String>>,
    large_size: i64,
) -> Trace {
    let mut ctes = outer_ctes.clone();
    for cte in with {
        let body = substitute_ctes(&cte.body, &ctes);
        ctes.insert(cte.name.clone(), body);
    }
    let live_ctes: HashSet<String> = ctes.keys().cloned().collect();
    let sel = substitute_ctes(sel, &ctes);
    build_select(&sel, env, ng, outer_scope, &live_ctes, large_size)
}

/// `replaceTables` (§4.1 step 1): replace every `FromExpr::Table` whose name
/// matches a bound CTE with a deep copy of that CTE's (already-substituted)
/// body. A FROM alias reusing a CTE name is left to `build_select`'s FROM
/// walk to reject as shadowing.
fn substitute_ctes(sel: &Select, ctes: &HashMap<String, Select>) -> Select {
    let mut sel = sel.clone();
    sel.from = sel.from.map(|f| substitute_ctes_from(f, ctes));
    sel
}

fn substitute_ctes_from(from: FromExpr, ctes: &HashMap<String, Select>) -> FromExpr {
    match from {
        FromExpr::Table { name, alias } => {
            if let Some(body) = ctes.get(&name) {
                FromExpr::Subquery {
                    body: Box::new(body.clone()),
                    alias: alias.unwrap_or(name),
                }
            } else {
                FromExpr::Table { name, alias }
            }
        }
        FromExpr::Subquery { body, alias } => FromExpr::Subquery {
            body: Box::new(substitute_ctes(&body, ctes)),
            alias,
        },
        FromExpr::Join { left, right, kind, on } => FromExpr::Join {
            left: Box::new(substitute_ctes_from(*left, ctes)),
            right: Box::new(substitute_ctes_from(*right, ctes)),
            kind,
            on,
        },
        FromExpr::Unpivot { input, as_name, at_name } => FromExpr::Unpivot {
            input: Box::new(substitute_ctes_from(*input, ctes)),
            as_name,
            at_name,
        },
    }
}

/// `pickOutputs` (§4.1 step 2): every column gets a unique result name;
/// implicit positional names (`_1`, `_2`, ...) disambiguate by column
/// ordinal suffix when they collide with an explicit alias.
fn pick_outputs(columns: &[Column]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let mut name = col
            .alias
            .clone()
            .unwrap_or_else(|| format!("_{}", i + 1));
        while used.contains(&name) {
            name = format!("{name}_{}", i + 1);
        }
        used.insert(name.clone());
        names.push(name);
    }
    names
}

/// `flattenBind` (§4.1 step 3): given `e1 AS a1, e2 AS a2, ...`, rewrite
/// each later `e_k` by substituting each prior alias with the expression it
/// was bound to. Duplicate aliases collapse to the most recent definition.
pub fn flatten_bind(bindings: &[(String, Expr)]) -> Vec<(String, Expr)> {
    let mut defined: HashMap<String, Expr> = HashMap::new();
    let mut out = Vec::with_capacity(bindings.len());
    for (name, expr) in bindings {
        let flattened = substitute_names(expr.clone(), &defined);
        let flattened = simplify(&flattened);
        defined.insert(name.clone(), flattened.clone());
        out.push((name.clone(), flattened));
    }
    out
}

fn substitute_names(expr: Expr, defined: &HashMap<String, Expr>) -> Expr {
    rewrite_bottom_up(expr, &mut |e| match &e.kind {
        ExprKind::Ident(name) => defined.get(name).cloned().unwrap_or(e),
        _ => e,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_select(
    sel: &Select,
    env: &dyn Environment,
    ng: &mut NameGenerator,
    outer_scope: Option<&HashSet<String>>,
    live_ctes: &HashSet<String>,
    large_size: i64,
) -> Trace {
    let mut trace = match &sel.from {
        Some(from) => build_from(from, env, ng, outer_scope, live_ctes, large_size),
        None => Trace::new(Step::DummyOutput),
    };
    if trace.first_error().is_some() {
        return trace;
    }

    // WHERE (§4.1 step 8).
    if let Some(cond) = &sel.r#where {
        if let Err(e) = check_no_aggregate_in_condition(cond) {
            trace.push_error(e);
            return trace;
        }
        if let Err(e) = check::check_aggregate_work_in_progress(cond, false) {
            trace.push_error(e);
            return trace;
        }
        if let Err(e) = check_expr_against(&trace, cond) {
            trace.push_error(e);
            return trace;
        }
        let cond = simplify(cond);
        push_filter(&mut trace, cond);
    }

    // Binding resolution + type-checking (§4.1 step 15, §8.1): every
    // identifier referenced by a raw SELECT column or GROUP BY expression
    // must resolve against the FROM/WHERE trace and type-check under its
    // schema hint. HAVING and ORDER BY are intentionally not checked here —
    // they may legitimately reference a SELECT-list output alias that only
    // exists after the final projection, not a binding in this row scope.
    for c in &sel.columns {
        if let Err(e) = check::check_aggregate_work_in_progress(&c.expr, true) {
            trace.push_error(e);
            return trace;
        }
        if let Err(e) = check_expr_against(&trace, &c.expr) {
            trace.push_error(e);
            return trace;
        }
    }
    for g in &sel.group_by {
        if let Err(e) = check_expr_against(&trace, &g.expr) {
            trace.push_error(e);
            return trace;
        }
    }
    for o in &sel.order_by {
        if let Err(e) = check::check_aggregate_work_in_progress(&o.expr, true) {
            trace.push_error(e);
            return trace;
        }
    }
    if let Some(h) = &sel.having {
        if let Err(e) = check::check_aggregate_work_in_progress(h, false) {
            trace.push_error(e);
            return trace;
        }
    }

    // Aggregate split (§4.1 step 9, §4.2) when grouping/aggregating is
    // present anywhere in projection, HAVING, or ORDER BY.
    let needs_split = sel.having.is_some()
        || !sel.group_by.is_empty()
        || sel.columns.iter().any(|c| aggregate::contains_aggregate_non_window(&c.expr))
        || sel
            .order_by
            .iter()
            .any(|o| aggregate::contains_aggregate_non_window(&o.expr));

    let output_names = pick_outputs(&sel.columns);
    let mut final_columns: Vec<(String, Expr)> = sel
        .columns
        .iter()
        .zip(output_names.iter())
        .map(|(c, n)| (n.clone(), c.expr.clone()))
        .collect();
    let mut having = sel.having.clone();
    let mut order_by: Vec<(Expr, bool, Option<bool>)> = sel
        .order_by
        .iter()
        .map(|o| (o.expr.clone(), o.desc, o.nulls_first))
        .collect();

    if needs_split {
        match aggregate::split_aggregate(
            &mut trace,
            &sel.group_by,
            &mut final_columns,
            &mut having,
            &mut order_by,
            ng,
        ) {
            Ok(()) => {}
            Err(e) => {
                trace.push_error(e);
                return trace;
            }
        }
        if let Some(h) = having.take() {
            push_filter(&mut trace, h);
        }
    }

    // Window-function hoisting (§4.1 step 4): each window aggregate becomes
    // a correlated `HASH_REPLACEMENT` over a synthesized sub-query grouped
    // by its own PARTITION BY, built against the trace as it stood right
    // after FROM+WHERE(+GROUP BY, if the outer query aggregates) so each
    // window sees the same rows the surrounding clause does.
    let window_source = trace.clone();
    for (_, e) in final_columns.iter_mut() {
        hoist_windows_into(e, &window_source, &mut trace, ng);
    }
    for (e, ..) in order_by.iter_mut() {
        hoist_windows_into(e, &window_source, &mut trace, ng);
    }

    // DISTINCT (§4.1 step 10).
    match &sel.distinct {
        Distinct::None => {}
        Distinct::All => {
            let keys: Vec<Expr> = final_columns.iter().map(|(_, e)| e.clone()).collect();
            trace.push_step(|parent| Step::Distinct { parent, keys });
        }
        Distinct::On(keys) => {
            let keys = keys.clone();
            trace.push_step(|parent| Step::Distinct { parent, keys });
        }
    }

    // ORDER BY (§4.1 step 11).
    if !order_by.is_empty() {
        let class = trace.size_class(large_size);
        if !class.is_bounded() && sel.limit.is_none() {
            trace.push_error(CompileError::unsupported(
                "ORDER BY on unbounded cardinality requires a LIMIT",
            ));
            return trace;
        }
        let keys = order_by
            .into_iter()
            .map(|(expr, desc, nulls_first)| OrderKey { expr, desc, nulls_first })
            .collect();
        trace.push_step(|parent| Step::Order { parent, keys });
    }

    // LIMIT/OFFSET (§4.1 step 12).
    if let Some(limit) = sel.limit {
        if limit < 0 {
            trace.push_error(CompileError::new_simple("negative limit is not supported"));
            return trace;
        }
        let offset = sel.offset.unwrap_or(0);
        if offset < 0 {
            trace.push_error(CompileError::new_simple("negative offset is not supported"));
            return trace;
        }
        if limit + offset > large_size && !sel.order_by.is_empty() {
            trace.push_error(CompileError::unsupported(
                "LIMIT+OFFSET past the large-size threshold after ORDER BY",
            ));
            return trace;
        }
        trace.push_step(|parent| Step::Limit { parent, count: limit, offset });
    } else if sel.offset.is_some() {
        trace.push_error(CompileError::new_simple("OFFSET without LIMIT is not supported"));
        return trace;
    }

    // Final projection (§4.1 step 13).
    let bindings = flatten_bind(&final_columns);
    let bindings: Vec<(Expr, String)> = bindings.into_iter().map(|(n, e)| (e, n)).collect();
    trace.r#final = bindings.iter().map(|(e, n)| (n.clone(), e.clone())).collect();
    trace.push_step(|parent| Step::Bind { parent, bindings, complete: true });

    // Sub-query hoisting and decorrelation (§4.1 step 14, §4.3).
    subquery::hoist(&mut trace, env, ng, outer_scope, large_size);

    // Post-check (§4.1 step 15) already enforced inline above for ORDER BY
    // and LIMIT/OFFSET; nothing further to check once hoisting succeeds.
    trace
}

fn push_filter(trace: &mut Trace, predicate: Expr) {
    trace.push_step(|parent| Step::Filter { parent, predicate });
}

/// Rewrites every window aggregate in `expr` via [`aggregate::hoist_windows`],
/// appending one replacement sub-trace per site to `trace.replacements` and
/// remapping the freshly-minted `HASH_REPLACEMENT` indices (which
/// `hoist_windows` numbers from zero, local to this single call) onto their
/// actual position in the shared replacement list.
fn hoist_windows_into(expr: &mut Expr, window_source: &Trace, trace: &mut Trace, ng: &mut NameGenerator) {
    let (rewritten, sites) = aggregate::hoist_windows(expr, ng);
    if sites.is_empty() {
        return;
    }
    let base = trace.replacements.len();
    for site in &sites {
        trace.replacements.push(build_window_replacement(window_source, site));
    }
    *expr = rewrite_bottom_up(rewritten, &mut |e| match e.kind {
        ExprKind::Builtin(Builtin::HashReplacement { index, kind, key_label, outer_key, default }) => {
            Expr::new(ExprKind::Builtin(Builtin::HashReplacement {
                index: base + index,
                kind,
                key_label,
                outer_key,
                default,
            }))
        }
        other => Expr::new(other),
    });
}

/// Builds the correlated sub-query for one window site: `SELECT AGG(x) AS
/// $__val FROM <window_source> GROUP BY partition_expr AS <key_label>`
/// (§4.1 step 4).
fn build_window_replacement(window_source: &Trace, site: &aggregate::WindowSite) -> Trace {
    let mut wt = window_source.clone();
    let key_expr = aggregate::combine_partition_key(&site.partition_by);
    let agg_expr = Expr::new(ExprKind::Aggregate {
        op: site.op,
        arg: site.arg.clone().map(Box::new),
        distinct: site.distinct,
        filter: site.filter.clone().map(Box::new),
        over: None,
    });
    wt.push_step(|parent| Step::Aggregate {
        parent,
        aggregates: vec![(agg_expr, "$__val".to_string())],
        group_by: vec![(key_expr, site.key_label.clone())],
    });
    let bindings = vec![
        (Expr::ident("$__val"), "$__val".to_string()),
        (Expr::ident(site.key_label.clone()), site.key_label.clone()),
    ];
    wt.r#final = bindings.iter().map(|(e, n)| (n.clone(), e.clone())).collect();
    wt.push_step(|parent| Step::Bind { parent, bindings, complete: true });
    wt
}

#[allow(clippy::too_many_arguments)]
fn build_from(
    from: &FromExpr,
    env: &dyn Environment,
    ng: &mut NameGenerator,
    outer_scope: Option<&HashSet<String>>,
    live_ctes: &HashSet<String>,
    large_size: i64,
) -> Trace {
    match from {
        FromExpr::Table { name, alias } => {
            let mut data = IterTableData::new(name.clone());
            match env.schema(name) {
                Some(hint) => {
                    data.fields = hint.bindings.keys().cloned().collect();
                    data.wildcard = false;
                    data.schema_hint = Some(hint);
                }
                None => {
                    // No declared schema for this table: every field is
                    // potentially live until `projectelim` narrows it down
                    // to what the rest of the chain actually references.
                    data.wildcard = true;
                }
            }
            data.has_index = env.index(name).is_some();
            let mut trace = Trace::new(Step::IterTable(data));
            // §7 "CTE binding shadowed by alias": by the time this arm
            // runs, `substitute_ctes_from` has already turned every
            // `Table` node whose *name* matches a live CTE into a
            // `Subquery`, so the only remaining shadowing case is a FROM
            // alias that reuses a live CTE's name.
            if let Some(a) = alias {
                if live_ctes.contains(a) {
                    trace.push_error(CompileError::new_simple(format!(
                        "FROM alias `{a}` shadows a CTE binding of the same name"
                    )));
                }
            }
            trace
        }
        FromExpr::Subquery { body, alias: _ } => {
            build_with_ctes(body, &[], env, ng, &HashMap::new(), outer_scope, large_size)
        }
        FromExpr::Join { left, right, kind, on } => {
            let mut trace = build_from(left, env, ng, outer_scope, live_ctes, large_size);
            if trace.first_error().is_some() {
                return trace;
            }
            match kind {
                JoinKind::Cross => {
                    let right_trace = build_from(right, env, ng, outer_scope, live_ctes, large_size);
                    let binding = ng.gen();
                    trace.push_step(|parent| Step::IterValue {
                        parent,
                        value: Expr::ident(format!("<{}>", right_trace.top.step_kind_name())),
                        binding,
                        filter: None,
                        fields: Vec::new(),
                    });
                }
                JoinKind::Inner => {
                    let (left_key, right_key) = match on {
                        Some(keys) => keys.clone(),
                        None => {
                            trace.push_error(CompileError::unsupported(
                                "non-equi INNER JOIN is not supported",
                            ));
                            return trace;
                        }
                    };
                    let build_trace = build_from(right, env, ng, outer_scope, live_ctes, large_size);
                    let build_name = match &**right {
                        FromExpr::Table { name, alias } => Some(alias.clone().unwrap_or_else(|| name.clone())),
                        _ => None,
                    };
                    trace.push_step(|parent| Step::EquiJoin {
                        parent,
                        build: Box::new(build_trace),
                        left_key,
                        right_key,
                        build_name,
                    });
                }
                JoinKind::Other => {
                    trace.push_error(CompileError::unsupported(
                        "only INNER (equi) and CROSS joins are supported",
                    ));
                }
            }
            trace
        }
        FromExpr::Unpivot { input, as_name, at_name } => {
            if as_name.is_none() && at_name.is_none() {
                let mut trace = build_from(input, env, ng, outer_scope, live_ctes, large_size);
                trace.push_error(CompileError::new_simple("UNPIVOT requires AS, AT, or both"));
                return trace;
            }
            if as_name == at_name && as_name.is_some() {
                let mut trace = build_from(input, env, ng, outer_scope, live_ctes, large_size);
                trace.push_error(CompileError::new_simple("UNPIVOT AS and AT must name different bindings"));
                return trace;
            }
            let mut trace = build_from(input, env, ng, outer_scope, live_ctes, large_size);
            let as_name = as_name.clone();
            let at_name = at_name.clone();
            trace.push_step(|parent| Step::Unpivot { parent, as_name, at_name });
            trace
        }
    }
}

/// Undefined-identifier detection plus type-checking for an expression
/// evaluated in `trace`'s row scope (§4.1 "undefined variable reference",
/// "ill-typed expression"; §8.1 "every binding referenced anywhere in the
/// trace resolves to some ancestor step's output"). `*` is the wildcard
/// sigil (§9), never a real binding, and is skipped.
fn check_expr_against(trace: &Trace, expr: &Expr) -> Result<(), CompileError> {
    let mut idents = Vec::new();
    collect_idents(expr, &mut idents);
    for name in idents {
        if name == "*" {
            continue;
        }
        if trace.resolve(&name).is_none() {
            return Err(CompileError::new(reason_undefined(&name)).with_expr(expr));
        }
    }
    check::check(&trace.top, expr)?;
    Ok(())
}

/// Free-variable detection used by `decorrelate` (§4.3, §9): identifiers in
/// `expr` that do not resolve against `trace.top`.
pub fn free_vars(expr: &Expr, trace: &Trace) -> Vec<String> {
    let mut idents = Vec::new();
    collect_idents(expr, &mut idents);
    idents.into_iter().filter(|n| trace.resolve(n).is_none()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Cte, Query, Select};
    use crate::env::empty;
    use crate::expr::{BinOp, Literal};

    fn col(expr: Expr, alias: Option<&str>) -> Column {
        Column { expr, alias: alias.map(str::to_string) }
    }

    #[test]
    fn constant_projection() {
        let sel = Select {
            columns: vec![
                col(Expr::lit(Literal::Int(3)), None),
                col(
                    Expr::binary(
                        BinOp::Concat,
                        Expr::lit(Literal::Str("foo".into())),
                        Expr::lit(Literal::Str("bar".into())),
                    ),
                    None,
                ),
            ],
            ..Select::default()
        };
        let query = Query { with: vec![], body: sel };
        let trace = build(&query, &empty());
        assert!(trace.errors.is_empty());
        assert_eq!(crate::describe::describe(&trace), "[{}]\nPROJECT 3 AS _1, 'foo' || 'bar' AS _2\n");
    }

    #[test]
    fn pick_outputs_disambiguates() {
        let cols = vec![col(Expr::ident("x"), Some("y")), col(Expr::ident("z"), Some("y"))];
        assert_eq!(pick_outputs(&cols), vec!["y".to_string(), "y_2".to_string()]);
    }

    #[test]
    fn cte_is_substituted_into_from() {
        let cte_body = Select {
            from: Some(FromExpr::Table { name: "bar".into(), alias: None }),
            columns: vec![col(Expr::ident("x"), Some("x"))],
            ..Select::default()
        };
        let outer = Select {
            from: Some(FromExpr::Table { name: "foo".into(), alias: None }),
            columns: vec![col(Expr::ident("x"), Some("x"))],
            ..Select::default()
        };
        let query = Query {
            with: vec![Cte { name: "foo".into(), body: cte_body }],
            body: outer,
        };
        let trace = build(&query, &empty());
        assert!(trace.errors.is_empty());
    }
}
