//! `Describe(writer)` (§6.3): a human-readable pretty-print of a trace, one
//! line per step, indented under `WITH (…) AS REPLACEMENT(i)` blocks.
//! Modeled on the `Display`-oriented generation style of
//! `prqlc::sql::gen_query`, adapted from "emit SQL tokens" to "emit one
//! line per IR step".

use std::fmt::{self, Write};

use crate::expr::{Expr, ExprKind, Literal};
use crate::ir::{IterTableData, OrderKey, Step, Trace};

/// A small set of SQL reserved words the core happens to synthesize as
/// default output names (`min`, `max`, `avg`, ...). Quoting only these
/// (rather than every identifier) matches the literal expectations in
/// §8.3 while keeping ordinary names like `x`/`y`/`z` unquoted.
const RESERVED_WORDS: &[&str] = &[
    "min", "max", "avg", "sum", "count", "order", "group", "select", "from", "where", "limit",
    "offset", "filter", "distinct", "join", "on", "as", "by", "having",
];

fn quote_name(name: &str) -> String {
    if RESERVED_WORDS.contains(&name.to_ascii_lowercase().as_str()) {
        format!("\"{name}\"")
    } else {
        name.to_string()
    }
}

pub fn describe(trace: &Trace) -> String {
    let mut out = String::new();
    write_trace(&mut out, trace, 0).expect("writing to a String never fails");
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn write_trace(out: &mut String, trace: &Trace, depth: usize) -> fmt::Result {
    for (i, repl) in trace.replacements.iter().enumerate() {
        indent(out, depth);
        writeln!(out, "WITH (")?;
        write_trace(out, repl, depth + 1)?;
        indent(out, depth);
        writeln!(out, ") AS REPLACEMENT({i})")?;
    }

    let mut lines = Vec::new();
    collect_lines(&trace.top, &mut lines);
    for line in &lines {
        indent(out, depth);
        out.push_str(line);
        out.push('\n');
    }
    Ok(())
}

/// Collects one text line per step, leaf-to-root.
fn collect_lines(top: &Step, lines: &mut Vec<String>) {
    if let Some(p) = top.parent() {
        collect_lines(p, lines);
    }
    lines.push(step_line(top));
}

fn step_line(step: &Step) -> String {
    match step {
        Step::IterTable(t) => iter_table_line(t, t.partitioned),
        Step::IterValue { value, binding, filter, .. } => {
            let mut s = format!("ITERATE VALUE {value} AS {binding}");
            if let Some(f) = filter {
                write!(s, " FILTER {f}").ok();
            }
            s
        }
        Step::DummyOutput => "[{}]".to_string(),
        Step::NoOutput => "NO OUTPUT".to_string(),
        Step::Filter { predicate, .. } => format!("FILTER {predicate}"),
        Step::Bind { bindings, .. } => {
            if bindings.len() == 1 && matches!(&bindings[0].0.kind, ExprKind::Ident(n) if n == "*") {
                "PROJECT *".to_string()
            } else {
                format!("PROJECT {}", format_bindings(bindings))
            }
        }
        Step::Aggregate { aggregates, group_by, .. } => {
            let mut s = format!("AGGREGATE {}", format_bindings(aggregates));
            if !group_by.is_empty() {
                write!(s, " BY {}", format_bindings(group_by)).ok();
            }
            s
        }
        Step::Distinct { keys, .. } => format!("FILTER DISTINCT [{}]", join_exprs(keys)),
        Step::Order { keys, .. } => format!("ORDER BY {}", format_order_keys(keys)),
        Step::Limit { count, offset, .. } => {
            if *offset != 0 {
                format!("LIMIT {count} OFFSET {offset}")
            } else {
                format!("LIMIT {count}")
            }
        }
        Step::EquiJoin { left_key, right_key, build_name, .. } => format!(
            "JOIN {} ON {left_key} = {right_key}",
            build_name.clone().unwrap_or_else(|| "<subquery>".to_string())
        ),
        Step::Unpivot { as_name, at_name, .. } => {
            let mut s = "UNPIVOT".to_string();
            if let Some(n) = as_name {
                write!(s, " AS {n}").ok();
            }
            if let Some(n) = at_name {
                write!(s, " AT {n}").ok();
            }
            s
        }
        Step::UnpivotAtDistinct { at_name, .. } => format!("UNPIVOT_AT_DISTINCT {at_name}"),
        Step::OutputPart { basename, .. } => format!("OUTPUT PART {basename}"),
        Step::OutputIndex { table_path, basename, .. } => {
            format!("OUTPUT INDEX {table_path} AT {basename}")
        }
        Step::UnionMap { inner, child, partition_keys } => {
            let mut s = format!("UNION MAP {}", inner.table);
            if let Some(keys) = partition_keys {
                write!(s, " PARTITION BY {}", join_exprs(keys)).ok();
            }
            s.push_str(" (\n");
            let child_desc = describe(child);
            for line in child_desc.lines() {
                s.push('\t');
                s.push_str(line);
                s.push('\n');
            }
            s.push(')');
            s
        }
    }
}

fn iter_table_line(t: &IterTableData, partitioned: bool) -> String {
    let verb = if partitioned { "ITERATE PART" } else { "ITERATE" };
    let mut s = format!("{verb} {}", t.table);
    if !t.wildcard && !t.fields.is_empty() {
        let mut fields = t.fields.clone();
        fields.sort();
        fields.dedup();
        write!(s, " FIELDS [{}]", fields.join(", ")).ok();
    }
    if let Some(f) = &t.filter {
        write!(s, " FILTER {f}").ok();
    }
    s
}

fn format_bindings(bindings: &[(Expr, String)]) -> String {
    bindings
        .iter()
        .map(|(e, name)| format!("{e} AS {}", quote_name(name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_order_keys(keys: &[OrderKey]) -> String {
    keys.iter()
        .map(|k| {
            let mut s = format!("{} {}", k.expr, if k.desc { "DESC" } else { "ASC" });
            if let Some(nulls_first) = k.nulls_first {
                write!(s, " NULLS {}", if nulls_first { "FIRST" } else { "LAST" }).ok();
            }
            s
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_exprs(exprs: &[Expr]) -> String {
    exprs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

/// Renders a literal the way `Display for Literal` does; exposed so
/// `describe` and error messages agree on literal formatting.
pub fn format_literal(lit: &Literal) -> String {
    lit.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, Literal};
    use crate::ir::IterTableData;

    #[test]
    fn constant_projection() {
        let trace = Trace {
            top: Step::Bind {
                parent: Box::new(Step::DummyOutput),
                bindings: vec![
                    (Expr::lit(Literal::Int(3)), "_1".to_string()),
                    (
                        Expr::binary(
                            BinOp::Concat,
                            Expr::lit(Literal::Str("foo".to_string())),
                            Expr::lit(Literal::Str("bar".to_string())),
                        ),
                        "_2".to_string(),
                    ),
                ],
                complete: true,
            },
            replacements: vec![],
            r#final: vec![],
            errors: vec![],
            correlated: false,
        };
        assert_eq!(describe(&trace), "[{}]\nPROJECT 3 AS _1, 'foo' || 'bar' AS _2\n");
    }

    #[test]
    fn iterate_with_fields() {
        let t = IterTableData {
            fields: vec!["b".into(), "a".into()],
            ..IterTableData::new("foo")
        };
        let trace = Trace::new(Step::IterTable(t));
        assert_eq!(describe(&trace), "ITERATE foo FIELDS [a, b]\n");
    }
}
