//! The input AST (§6.1): productions the out-of-scope parser hands to
//! `build()`. Kept intentionally small — this module exists only so the
//! crate is self-contained; a real deployment plugs in the actual parser's
//! node types here.

use std::fmt;

use crate::expr::Expr;

#[derive(Debug, Clone)]
pub struct Query {
    pub with: Vec<Cte>,
    pub body: Select,
}

#[derive(Debug, Clone)]
pub struct Cte {
    pub name: String,
    pub body: Select,
}

#[derive(Debug, Clone, Default)]
pub struct Select {
    pub from: Option<FromExpr>,
    pub r#where: Option<Expr>,
    pub group_by: Vec<GroupByItem>,
    pub having: Option<Expr>,
    pub columns: Vec<Column>,
    pub distinct: Distinct,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct GroupByItem {
    pub expr: Expr,
    /// `GROUP BY ... AS alias` (§9 "supported by accident").
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub enum Distinct {
    #[default]
    None,
    All,
    On(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub expr: Expr,
    pub desc: bool,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone)]
pub enum FromExpr {
    Table {
        name: String,
        alias: Option<String>,
    },
    Subquery {
        body: Box<Select>,
        alias: String,
    },
    Join {
        left: Box<FromExpr>,
        right: Box<FromExpr>,
        kind: JoinKind,
        /// Equi-join condition's two sides, already split, or `None` for
        /// `CROSS JOIN`.
        on: Option<(Expr, Expr)>,
    },
    Unpivot {
        input: Box<FromExpr>,
        as_name: Option<String>,
        at_name: Option<String>,
    },
}

/// A compact one-line rendering, used where a sub-query appears nested
/// inside an expression's `Display` (`ExprKind::Subquery`,
/// `Builtin::InSubquery`) — not a SQL pretty-printer in its own right.
impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        let cols = self
            .columns
            .iter()
            .map(|c| match &c.alias {
                Some(a) => format!("{} AS {a}", c.expr),
                None => c.expr.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{cols}")?;
        if let Some(from) = &self.from {
            write!(f, " FROM {from}")?;
        }
        if let Some(w) = &self.r#where {
            write!(f, " WHERE {w}")?;
        }
        Ok(())
    }
}

impl fmt::Display for FromExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FromExpr::Table { name, alias } => match alias {
                Some(a) => write!(f, "{name} AS {a}"),
                None => write!(f, "{name}"),
            },
            FromExpr::Subquery { body, alias } => write!(f, "({body}) AS {alias}"),
            FromExpr::Join { left, right, kind, on } => {
                let kw = match kind {
                    JoinKind::Inner => "JOIN",
                    JoinKind::Cross => "CROSS JOIN",
                    JoinKind::Other => "JOIN",
                };
                write!(f, "{left} {kw} {right}")?;
                if let Some((l, r)) = on {
                    write!(f, " ON {l} = {r}")?;
                }
                Ok(())
            }
            FromExpr::Unpivot { input, as_name, at_name } => {
                write!(f, "{input} UNPIVOT")?;
                if let Some(n) = as_name {
                    write!(f, " AS {n}")?;
                }
                if let Some(n) = at_name {
                    write!(f, " AT {n}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Cross,
    /// Any join kind the core does not support (LEFT/RIGHT/FULL/non-equi
    /// INNER); carried only so `build` can report a precise error instead
    /// of failing to parse (§7 "unsupported join kind").
    Other,
}
