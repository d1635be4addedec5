//! End-to-end scenarios (§8.3), driving the full `build` -> `optimize`
//! pipeline the way the teacher's integration tests drive
//! `parse -> resolve_and_lower -> sql::compile`. Since no parser lives in
//! this crate (§6.1, out of scope), each scenario constructs the `ast::Query`
//! directly rather than parsing surface syntax.

use pirql::ast::{Column, FromExpr, GroupByItem, JoinKind, Query, Select};
use pirql::describe::describe;
use pirql::env::{TestEnvironment, TestIndex};
use pirql::expr::{AggOp, BinOp, Expr, ExprKind, Literal};
use pirql::ir::Step;
use pirql::lower;
use pirql::optimize;

fn select(from: FromExpr, columns: Vec<Column>) -> Query {
    Query {
        with: Vec::new(),
        body: Select { from: Some(from), columns, ..Select::default() },
    }
}

fn col(expr: Expr) -> Column {
    Column { expr, alias: None }
}

/// S1 — constant projection: `select 3, 'foo' || 'bar'`.
#[test]
fn s1_constant_projection() {
    let query = Query {
        with: Vec::new(),
        body: Select {
            from: None,
            columns: vec![
                col(Expr::lit(Literal::Int(3))),
                col(Expr::binary(
                    BinOp::Concat,
                    Expr::lit(Literal::Str("foo".to_string())),
                    Expr::lit(Literal::Str("bar".to_string())),
                )),
            ],
            ..Select::default()
        },
    };
    let env = TestEnvironment::default();
    let mut trace = lower::build(&query, &env);
    assert!(trace.first_error().is_none());
    optimize::optimize(&mut trace, &env);

    let out = describe(&trace);
    assert!(out.starts_with("[{}]\n"));
    assert!(out.contains("PROJECT"));
    // Constant-folded by `simplify`: the concatenation collapses to one literal.
    assert!(out.contains("'foobar'"), "expected folded concat in: {out}");
}

/// S3 — correlated scalar subquery decorrelates to a `HASH_REPLACEMENT`.
#[test]
fn s3_correlated_subquery_decorrelation() {
    let inner = Select {
        from: Some(FromExpr::Table { name: "bar".to_string(), alias: None }),
        columns: vec![col(Expr::ident("z"))],
        r#where: Some(Expr::binary(BinOp::Eq, Expr::ident("x"), Expr::ident("y"))),
        limit: Some(1),
        ..Select::default()
    };
    let query = select(
        FromExpr::Table { name: "foo".to_string(), alias: None },
        vec![
            col(Expr::ident("x")),
            Column {
                expr: Expr::new(ExprKind::Subquery(Box::new(inner))),
                alias: Some("z".to_string()),
            },
        ],
    );
    let env = TestEnvironment::default();
    let mut trace = lower::build(&query, &env);
    assert!(trace.first_error().is_none(), "{:?}", trace.first_error());
    optimize::optimize(&mut trace, &env);

    assert_eq!(trace.replacements.len(), 1);
    let out = describe(&trace);
    // §8.3 S3's literal expected output.
    assert_eq!(
        out,
        "WITH (\n\
         \tITERATE bar FIELDS [y, z]\n\
         \tFILTER DISTINCT [y]\n\
         \tPROJECT z AS z, y AS $_0_0\n\
         ) AS REPLACEMENT(0)\n\
         ITERATE foo FIELDS [x]\n\
         PROJECT x AS x, HASH_REPLACEMENT(0, 'scalar', '$_0_0', x) AS z\n"
    );
}

/// S5 — partition promotion: a GROUP BY over a partitioned column collapses
/// into a `UnionMap` with no inner GROUP BY.
#[test]
fn s5_partition_promotion() {
    let query = Query {
        with: Vec::new(),
        body: Select {
            from: Some(FromExpr::Table { name: "tbl".to_string(), alias: None }),
            columns: vec![
                col(Expr::new(ExprKind::Aggregate {
                    op: AggOp::Sum,
                    arg: Some(Box::new(Expr::ident("x"))),
                    distinct: false,
                    filter: None,
                    over: None,
                })),
                col(Expr::new(ExprKind::Aggregate {
                    op: AggOp::Count,
                    arg: Some(Box::new(Expr::ident("y"))),
                    distinct: false,
                    filter: None,
                    over: None,
                })),
                col(Expr::ident("z")),
            ],
            group_by: vec![GroupByItem { expr: Expr::ident("z"), alias: None }],
            ..Select::default()
        },
    };
    let mut env = TestEnvironment::default();
    let mut index = TestIndex::default();
    index.partitions.insert("z".to_string());
    env.indexes.insert("tbl".to_string(), index);

    let mut trace = lower::build(&query, &env);
    assert!(trace.first_error().is_none(), "{:?}", trace.first_error());
    optimize::optimize(&mut trace, &env);

    assert!(matches!(trace.top, Step::Bind { .. }));
    let out = describe(&trace);
    // §8.3 S5's expected shape: one outer `UNION MAP tbl PARTITION BY z (...)`
    // with no inner GROUP BY, `SUM(x), COUNT(y)` aggregated together, and
    // `PARTITION_VALUE(0)` standing in for the promoted group key.
    assert!(out.contains("UNION MAP tbl PARTITION BY z"), "got: {out}");
    assert!(out.contains("PARTITION_VALUE(0)"), "got: {out}");
    let agg_line = out.lines().find(|l| l.contains("AGGREGATE")).unwrap_or_else(|| panic!("no AGGREGATE line in: {out}"));
    assert!(agg_line.contains("SUM(x)") && agg_line.contains("COUNT(y)"), "got: {agg_line}");
    assert!(!agg_line.contains(" BY "), "expected no inner GROUP BY, got: {agg_line}");
}

/// S6 — `NOT EXISTS`-shaped `IS MISSING` canonicalizes to `IN_REPLACEMENT`.
#[test]
fn s6_not_exists_canonicalization() {
    let inner = Select {
        from: Some(FromExpr::Table { name: "other".to_string(), alias: None }),
        columns: vec![col(Expr::bool_lit(true))],
        r#where: Some(Expr::binary(BinOp::Eq, Expr::ident("key"), Expr::ident("x"))),
        limit: Some(1),
        ..Select::default()
    };
    let missing = Expr::new(ExprKind::IsType {
        expr: Box::new(Expr::new(ExprKind::Subquery(Box::new(inner)))),
        kind: pirql::expr::IsTypeKind::Missing,
        negated: false,
    });
    let query = select(
        FromExpr::Table { name: "input".to_string(), alias: None },
        vec![
            col(Expr::ident("x")),
            Column { expr: missing, alias: Some("no_other".to_string()) },
        ],
    );
    let env = TestEnvironment::default();
    let mut trace = lower::build(&query, &env);
    assert!(trace.first_error().is_none(), "{:?}", trace.first_error());
    optimize::optimize(&mut trace, &env);

    let out = describe(&trace);
    // §8.3 S6: "the replacement is `FILTER DISTINCT [key] / PROJECT key AS
    // $_0_0`, and the outer projection uses `!(IN_REPLACEMENT(x, 0)) AS
    // no_other`."
    assert!(out.contains("FILTER DISTINCT [key]"), "got: {out}");
    assert!(out.contains("PROJECT key AS $_0_0"), "got: {out}");
    assert!(out.contains("!(IN_REPLACEMENT(x, 0)) AS no_other"), "got: {out}");
}

/// A basic equi-join lowers to an `EquiJoin` step and describes as `JOIN`.
#[test]
fn equi_join_lowers_and_describes() {
    let query = select(
        FromExpr::Join {
            left: Box::new(FromExpr::Table { name: "a".to_string(), alias: None }),
            right: Box::new(FromExpr::Table { name: "b".to_string(), alias: Some("b".to_string()) }),
            kind: JoinKind::Inner,
            on: Some((Expr::ident("a_id"), Expr::ident("b_id"))),
        },
        vec![col(Expr::ident("a_id"))],
    );
    let env = TestEnvironment::default();
    let mut trace = lower::build(&query, &env);
    assert!(trace.first_error().is_none(), "{:?}", trace.first_error());
    optimize::optimize(&mut trace, &env);

    let out = describe(&trace);
    assert!(out.contains("JOIN b ON a_id = b_id"), "got: {out}");
}

/// `mergereplacements` deduplicates two structurally identical replacement
/// sub-traces onto a single shared index (§8.2 idempotency property).
#[test]
fn mergereplacements_dedupes_identical_replacements() {
    let make_inner = || Select {
        from: Some(FromExpr::Table { name: "bar".to_string(), alias: None }),
        columns: vec![col(Expr::ident("z"))],
        r#where: Some(Expr::binary(BinOp::Eq, Expr::ident("x"), Expr::ident("y"))),
        limit: Some(1),
        ..Select::default()
    };
    let query = select(
        FromExpr::Table { name: "foo".to_string(), alias: None },
        vec![
            Column {
                expr: Expr::new(ExprKind::Subquery(Box::new(make_inner()))),
                alias: Some("z1".to_string()),
            },
            Column {
                expr: Expr::new(ExprKind::Subquery(Box::new(make_inner()))),
                alias: Some("z2".to_string()),
            },
        ],
    );
    let env = TestEnvironment::default();
    let mut trace = lower::build(&query, &env);
    assert!(trace.first_error().is_none(), "{:?}", trace.first_error());
    optimize::optimize(&mut trace, &env);

    assert_eq!(trace.replacements.len(), 1, "identical subqueries should merge onto one replacement");
}
