//! Failure scenarios (§8.4): inputs that must surface as a `CompileError`
//! on the trace rather than lower successfully. Table-driven with `rstest`,
//! matching the teacher's own error-path test style.

use pirql::ast::{Column, Cte, FromExpr, GroupByItem, OrderItem, Query, Select};
use pirql::env::TestEnvironment;
use pirql::expr::{AggOp, BinOp, Expr, SchemaHint, Ty};
use pirql::lower;
use rstest::rstest;

fn select(body: Select) -> Query {
    Query { with: Vec::new(), body }
}

fn table(name: &str) -> FromExpr {
    FromExpr::Table { name: name.to_string(), alias: None }
}

fn col(expr: Expr) -> Column {
    Column { expr, alias: None }
}

fn agg(op: AggOp, arg: Expr) -> Expr {
    Expr::new(pirql::expr::ExprKind::Aggregate {
        op,
        arg: Some(Box::new(arg)),
        distinct: false,
        filter: None,
        over: None,
    })
}

#[rstest]
#[case::nested_aggregate(
    select(Select {
        from: Some(table("table")),
        columns: vec![col(agg(AggOp::Sum, agg(AggOp::Count, Expr::ident("y"))))],
        ..Select::default()
    }),
    "nested aggregate",
)]
#[case::order_by_requires_limit(
    select(Select {
        from: Some(table("foo")),
        columns: vec![col(Expr::ident("x")), col(Expr::ident("y")), col(Expr::ident("z"))],
        order_by: vec![OrderItem { expr: Expr::ident("x"), desc: false, nulls_first: None }],
        ..Select::default()
    }),
    "requires a LIMIT",
)]
#[case::negative_limit(
    select(Select {
        from: Some(table("tbl")),
        columns: vec![col(Expr::ident("x"))],
        limit: Some(-1),
        ..Select::default()
    }),
    "negative limit",
)]
#[case::aggregate_in_where(
    select(Select {
        from: Some(table("table")),
        columns: vec![col(Expr::ident("x"))],
        r#where: Some(Expr::binary(
            BinOp::Gt,
            agg(AggOp::Avg, Expr::ident("x")),
            Expr::lit(pirql::expr::Literal::Float("1.5".to_string())),
        )),
        ..Select::default()
    }),
    "aggregate functions are not allowed in WHERE",
)]
#[case::correlated_limit_two(
    select(Select {
        from: Some(table("foo")),
        columns: vec![
            col(Expr::ident("x")),
            col(Expr::new(pirql::expr::ExprKind::Subquery(Box::new(Select {
                from: Some(table("bar")),
                columns: vec![col(Expr::ident("z"))],
                r#where: Some(Expr::binary(BinOp::Eq, Expr::ident("x"), Expr::ident("y"))),
                limit: Some(2),
                ..Select::default()
            })))),
        ],
        ..Select::default()
    }),
    "cannot support correlated reference",
)]
fn rejects(#[case] query: Query, #[case] expected_substring: &str) {
    let env = TestEnvironment::default();
    let trace = lower::build(&query, &env);
    let err = trace.first_error().unwrap_or_else(|| panic!("expected an error containing {expected_substring:?}, got none"));
    let message = format!("{err}");
    assert!(
        message.contains(expected_substring),
        "expected error containing {expected_substring:?}, got {message:?}"
    );
}

/// §4.1 "ill-typed expression (against schema)": `x.y` where the schema
/// declares `x` as `Int`, which has no fields to dot into.
#[test]
fn dotted_path_on_non_struct_is_ill_typed() {
    let query = select(Select {
        from: Some(table("foo")),
        columns: vec![col(Expr::path(Expr::ident("x"), "y"))],
        ..Select::default()
    });
    let env = TestEnvironment::new().with_schema("foo", SchemaHint::new().with("x", Ty::Int));
    let trace = lower::build(&query, &env);
    let err = trace.first_error().expect("expected an ill-typed-field error");
    assert!(format!("{err}").contains("not a field of a struct"));
}

/// §4.1 "undefined variable reference": a column absent from a declared
/// schema resolves to nothing up the binding chain.
#[test]
fn undeclared_column_is_undefined() {
    let query = select(Select {
        from: Some(table("foo")),
        columns: vec![col(Expr::ident("bogus_col"))],
        ..Select::default()
    });
    let env = TestEnvironment::new().with_schema("foo", SchemaHint::new().with("x", Ty::Int));
    let trace = lower::build(&query, &env);
    let err = trace.first_error().expect("expected an undefined-variable error");
    assert!(format!("{err}").contains("bogus_col") && format!("{err}").contains("not found"));
}

/// §7 "CTE binding shadowed by alias": a FROM alias reusing a live CTE's
/// name must be rejected rather than silently shadowing it.
#[test]
fn from_alias_shadowing_a_cte_is_rejected() {
    let query = Query {
        with: vec![Cte {
            name: "foo".to_string(),
            body: Select {
                from: Some(table("bar")),
                columns: vec![col(Expr::ident("z"))],
                ..Select::default()
            },
        }],
        body: Select {
            from: Some(FromExpr::Table { name: "baz".to_string(), alias: Some("foo".to_string()) }),
            columns: vec![col(Expr::ident("x"))],
            ..Select::default()
        },
    };
    let env = TestEnvironment::default();
    let trace = lower::build(&query, &env);
    let err = trace.first_error().expect("expected a CTE-shadowing error");
    assert!(format!("{err}").contains("shadows a CTE"));
}

/// GROUP BY with a nested aggregate surfaces the same "nested aggregate"
/// rejection as a bare projection (§4.2 step 1 runs over group-by-adjacent
/// clauses too).
#[test]
fn nested_aggregate_in_having_also_rejected() {
    let query = select(Select {
        from: Some(table("table")),
        columns: vec![col(Expr::ident("g"))],
        group_by: vec![GroupByItem { expr: Expr::ident("g"), alias: None }],
        having: Some(Expr::binary(
            BinOp::Gt,
            agg(AggOp::Sum, agg(AggOp::Count, Expr::ident("y"))),
            Expr::lit(pirql::expr::Literal::Int(1)),
        )),
        ..Select::default()
    });
    let env = TestEnvironment::default();
    let trace = lower::build(&query, &env);
    let err = trace.first_error().expect("expected a nested-aggregate error");
    assert!(format!("{err}").contains("nested aggregate"));
}
