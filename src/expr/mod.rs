//! The expression AST the core consumes (§3.3).
//!
//! This is nominally an "external" library — the core only relies on the
//! interface described in §3.3 (deep copy, structural equality, walk,
//! rewrite, simplify, type inference) — but since no upstream parser crate
//! is part of this workspace, a concrete implementation lives here so the
//! crate is self-contained and testable. Shaped after `prqlc::ir::rq::Expr`:
//! a thin `{ kind, span }` wrapper around a tagged-variant `ExprKind`.

mod fold;
mod infer;
mod simplify;

pub use fold::{rewrite_bottom_up, ExprFold};
pub use infer::{infer_type, reason_undefined, SchemaHint, Ty};
pub use simplify::simplify;

use std::fmt;

use enum_as_inner::EnumAsInner;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Option<Span>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr { kind, span: None }
    }

    pub fn ident<S: Into<String>>(name: S) -> Self {
        Expr::new(ExprKind::Ident(name.into()))
    }

    pub fn path(base: Expr, field: impl Into<String>) -> Self {
        Expr::new(ExprKind::Path(Box::new(base), field.into()))
    }

    pub fn lit(lit: Literal) -> Self {
        Expr::new(ExprKind::Literal(lit))
    }

    pub fn bool_lit(b: bool) -> Self {
        Expr::lit(Literal::Bool(b))
    }

    pub fn null() -> Self {
        Expr::lit(Literal::Null)
    }

    pub fn missing() -> Self {
        Expr::lit(Literal::Missing)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn logical(op: LogicalOp, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Logical { op, args })
    }

    pub fn not(e: Expr) -> Self {
        Expr::new(ExprKind::Unary {
            op: UnOp::Not,
            expr: Box::new(e),
        })
    }

    pub fn is_literal_bool(&self, want: bool) -> bool {
        matches!(&self.kind, ExprKind::Literal(Literal::Bool(b)) if *b == want)
    }

    pub fn is_literal_null(&self) -> bool {
        matches!(&self.kind, ExprKind::Literal(Literal::Null))
    }

    /// Structural equality, ignoring spans (§3.3 "structural equality").
    pub fn struct_eq(&self, other: &Expr) -> bool {
        self.kind == other.kind
    }

    /// Direct children, used by `walk`/`rewrite_bottom_up` defaults and by
    /// free-variable collection.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Ident(_) | ExprKind::Literal(_) | ExprKind::ColumnRef(_) => vec![],
            ExprKind::Path(base, _) => vec![base],
            ExprKind::Index(base, idx) => vec![base, idx],
            ExprKind::Unary { expr, .. } => vec![expr],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Logical { args, .. } => args.iter().collect(),
            ExprKind::IsType { expr, .. } => vec![expr],
            ExprKind::Aggregate { arg, filter, over, .. } => {
                let mut v = vec![];
                if let Some(a) = arg {
                    v.push(a.as_ref());
                }
                if let Some(f) = filter {
                    v.push(f.as_ref());
                }
                if let Some(w) = over {
                    v.extend(w.partition_by.iter());
                }
                v
            }
            ExprKind::Case { branches, default } => {
                let mut v = vec![];
                for (c, r) in branches {
                    v.push(c);
                    v.push(r);
                }
                if let Some(d) = default {
                    v.push(d.as_ref());
                }
                v
            }
            ExprKind::Subquery(_) => vec![],
            ExprKind::Builtin(b) => b.children(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum Literal {
    Int(i64),
    Float(String),
    Str(String),
    Bool(bool),
    Null,
    Missing,
    /// Stored pre-formatted (ISO-8601); the core never does timestamp
    /// arithmetic itself (§1: out of scope), only passes values through.
    Timestamp(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(s) => write!(f, "{s}"),
            Literal::Str(s) => write!(f, "'{s}'"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Null => write!(f, "NULL"),
            Literal::Missing => write!(f, "MISSING"),
            Literal::Timestamp(s) => write!(f, "`{s}`"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Concat => "||",
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum IsTypeKind {
    Null,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AggOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Earliest,
    Latest,
    BitAnd,
    BitOr,
    BitXor,
    BoolAnd,
    BoolOr,
    /// Distributive integer-domain sum used by the AVG split (§4.5, §9).
    SumInt,
    /// Reduction-phase merge of partial sums (§4.5 reduceAggregate).
    SumMerge,
    /// Mapping-phase partial sum (§4.5 reduceAggregate).
    SumPartial,
    /// Reduction-phase merge of partial counts (§4.5, §6.5 reserved name).
    SumCount,
    ApproxCountDistinct,
    SnellerDatashape,
}

impl AggOp {
    /// The name as it appears in `Describe` output (§6.3) and SQL-ish
    /// surface text; partial/merge split forms use dotted names
    /// (`SUM.PARTIAL`, `SUM.MERGE`) while the rest use underscores, matching
    /// the literal expectations in §8.3's scenarios.
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggOp::Count => "COUNT",
            AggOp::Sum => "SUM",
            AggOp::Avg => "AVG",
            AggOp::Min => "MIN",
            AggOp::Max => "MAX",
            AggOp::Earliest => "EARLIEST",
            AggOp::Latest => "LATEST",
            AggOp::BitAnd => "BIT_AND",
            AggOp::BitOr => "BIT_OR",
            AggOp::BitXor => "BIT_XOR",
            AggOp::BoolAnd => "BOOL_AND",
            AggOp::BoolOr => "BOOL_OR",
            AggOp::SumInt => "SUM_INT",
            AggOp::SumMerge => "SUM.MERGE",
            AggOp::SumPartial => "SUM.PARTIAL",
            AggOp::SumCount => "SUM_COUNT",
            AggOp::ApproxCountDistinct => "APPROX_COUNT_DISTINCT",
            AggOp::SnellerDatashape => "SNELLER_DATASHAPE",
        }
    }

    /// §4.1 step 4 "Default is `0` for COUNT, `NULL` otherwise" default
    /// used by window hoisting's `HASH_REPLACEMENT(..., default)`.
    pub fn window_default(&self) -> Expr {
        match self {
            AggOp::Count | AggOp::SumCount => Expr::lit(Literal::Int(0)),
            _ => Expr::null(),
        }
    }

    /// Whether this op is distributive across a partition (mapping phase
    /// uses the same op as reduction, per §4.5 reduceAggregate).
    pub fn is_distributive(&self) -> bool {
        matches!(
            self,
            AggOp::Min
                | AggOp::Max
                | AggOp::Earliest
                | AggOp::Latest
                | AggOp::BitAnd
                | AggOp::BitOr
                | AggOp::BitXor
                | AggOp::BoolAnd
                | AggOp::BoolOr
                | AggOp::SumInt
                | AggOp::SumCount
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Window {
    pub partition_by: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, EnumAsInner)]
pub enum ExprKind {
    Ident(String),
    /// Already-resolved reference to a binding produced by some ancestor
    /// step; introduced during lowering/optimization once a name has been
    /// bound to a concrete origin, analogous to `prqlc::ir::rq::ColumnRef`.
    ColumnRef(String),
    Path(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Literal(Literal),
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        args: Vec<Expr>,
    },
    IsType {
        expr: Box<Expr>,
        kind: IsTypeKind,
        negated: bool,
    },
    Aggregate {
        op: AggOp,
        arg: Option<Box<Expr>>,
        distinct: bool,
        filter: Option<Box<Expr>>,
        over: Option<Box<Window>>,
    },
    Case {
        branches: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
    },
    /// An embedded `SELECT` sub-query in scalar/struct/list expression
    /// position (§3.3), resolved away by `lower::hoist` into a replacement
    /// before the IR reaches the optimizer.
    Subquery(Box<crate::ast::Select>),
    Builtin(Builtin),
}

impl fmt::Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprKind::Ident(n) => write!(f, "{n}"),
            ExprKind::ColumnRef(n) => write!(f, "{n}"),
            ExprKind::Path(base, field) => write!(f, "{base}.{field}"),
            ExprKind::Index(base, idx) => write!(f, "{base}[{idx}]"),
            ExprKind::Literal(l) => write!(f, "{l}"),
            ExprKind::Unary { op: UnOp::Neg, expr } => write!(f, "-{expr}"),
            ExprKind::Unary { op: UnOp::Not, expr } => write!(f, "!({expr})"),
            ExprKind::Binary { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.as_sql()),
            ExprKind::Logical { op, args } => {
                let sep = match op {
                    LogicalOp::And => " AND ",
                    LogicalOp::Or => " OR ",
                };
                write!(f, "({})", args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(sep))
            }
            ExprKind::IsType { expr, kind, negated } => {
                let kw = match kind {
                    IsTypeKind::Null => "NULL",
                    IsTypeKind::Missing => "MISSING",
                };
                write!(f, "{expr} IS {}{kw}", if *negated { "NOT " } else { "" })
            }
            ExprKind::Aggregate { op, arg, distinct, .. } => {
                let d = if *distinct { "DISTINCT " } else { "" };
                match arg {
                    Some(a) => write!(f, "{}({d}{a})", op.sql_name()),
                    None => write!(f, "{}()", op.sql_name()),
                }
            }
            ExprKind::Case { branches, default } => {
                write!(f, "CASE ")?;
                for (c, r) in branches {
                    write!(f, "WHEN {c} THEN {r} ")?;
                }
                if let Some(d) = default {
                    write!(f, "ELSE {d} ")?;
                }
                write!(f, "END")
            }
            ExprKind::Subquery(sel) => write!(f, "({sel})"),
            ExprKind::Builtin(b) => write!(f, "{b}"),
        }
    }
}

/// §6.5: built-in expression names reserved by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum Builtin {
    HashReplacement {
        index: usize,
        kind: String,
        key_label: String,
        outer_key: Box<Expr>,
        default: Box<Expr>,
    },
    ScalarReplacement(usize),
    ListReplacement(usize),
    StructReplacement(usize),
    InReplacement {
        value: Box<Expr>,
        index: usize,
    },
    PartitionValue(usize),
    MakeList(Vec<Expr>),
    MakeStruct(Vec<(String, Expr)>),
    /// `x IN (SELECT ...)`; resolved by `lower::decorrelate` into a
    /// `HashReplacement`/`InReplacement` pair when the sub-query is
    /// correlated, otherwise left as a direct semi-join condition.
    InSubquery {
        value: Box<Expr>,
        subquery: Box<crate::ast::Select>,
    },
}

impl Builtin {
    fn children(&self) -> Vec<&Expr> {
        match self {
            Builtin::HashReplacement { outer_key, default, .. } => vec![outer_key, default],
            Builtin::ScalarReplacement(_)
            | Builtin::ListReplacement(_)
            | Builtin::StructReplacement(_)
            | Builtin::PartitionValue(_) => vec![],
            Builtin::InReplacement { value, .. } => vec![value],
            Builtin::MakeList(items) => items.iter().collect(),
            Builtin::MakeStruct(fields) => fields.iter().map(|(_, e)| e).collect(),
            Builtin::InSubquery { value, .. } => vec![value.as_ref()],
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Builtin::HashReplacement { index, kind, key_label, outer_key, default } => {
                if default.is_literal_null() {
                    write!(f, "HASH_REPLACEMENT({index}, '{kind}', '{key_label}', {outer_key})")
                } else {
                    write!(
                        f,
                        "HASH_REPLACEMENT({index}, '{kind}', '{key_label}', {outer_key}, {default})"
                    )
                }
            }
            Builtin::ScalarReplacement(i) => write!(f, "SCALAR_REPLACEMENT({i})"),
            Builtin::ListReplacement(i) => write!(f, "LIST_REPLACEMENT({i})"),
            Builtin::StructReplacement(i) => write!(f, "STRUCT_REPLACEMENT({i})"),
            Builtin::InReplacement { value, index } => write!(f, "IN_REPLACEMENT({value}, {index})"),
            Builtin::PartitionValue(i) => write!(f, "PARTITION_VALUE({i})"),
            Builtin::MakeList(items) => write!(
                f,
                "MAKE_LIST({})",
                items.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
            ),
            Builtin::MakeStruct(fields) => write!(
                f,
                "MAKE_STRUCT({})",
                fields
                    .iter()
                    .map(|(k, v)| format!("'{k}': {v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Builtin::InSubquery { value, subquery } => write!(f, "IN_SUBQUERY({value}, {subquery})"),
        }
    }
}

/// Depth-first pre-order walk; the visitor decides whether to descend into
/// a node's children by returning `true` (§3.3, §9 "Visitor/rewriter
/// polymorphism").
pub trait ExprVisitor {
    /// Returns whether to descend into `expr`'s children.
    fn visit(&mut self, expr: &Expr) -> bool;
}

pub fn walk(visitor: &mut impl ExprVisitor, expr: &Expr) {
    if visitor.visit(expr) {
        for child in expr.children() {
            walk(visitor, child);
        }
    }
}

/// Collects identifiers that are not bound anywhere within the expression
/// itself (i.e. candidate free variables). Binding resolution against a
/// scope happens in `lower`; this only gathers referenced head names.
pub fn collect_idents(expr: &Expr, out: &mut Vec<String>) {
    struct Collector<'a>(&'a mut Vec<String>);
    impl ExprVisitor for Collector<'_> {
        fn visit(&mut self, expr: &Expr) -> bool {
            match &expr.kind {
                ExprKind::Ident(name) => {
                    self.0.push(name.clone());
                    false
                }
                ExprKind::Path(base, _) => {
                    // only the head of a dotted path is a free variable
                    walk(self, base);
                    false
                }
                _ => true,
            }
        }
    }
    walk(&mut Collector(out), expr);
}

pub fn path_head(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Ident(n) => Some(n),
        ExprKind::Path(base, _) => path_head(base),
        ExprKind::Index(base, _) => path_head(base),
        _ => None,
    }
}
