//! The Trace/Step intermediate representation (§3.1-3.2).
//!
//! Shaped after `prqlc::ir::rq`: a strictly-typed AST for describing
//! relational pipelines. The teacher represents a pipeline as `Vec<Transform>`
//! inside a `Relation`; the spec instead asks for an explicit parent-linked
//! chain (§3.1 "singly-linked list of Step nodes ordered leaf-to-root by the
//! parent() link"), so `Step` here owns its parent by value (`Box<Step>`)
//! the way the teacher's `RelationKind::Pipeline` owns its `Vec<Transform>`,
//! just reassociated as a cons-list instead of a vec.

mod cardinality;
pub mod fold;

pub use cardinality::{class_of, SizeClass, LARGE_SIZE};

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::expr::{Expr, SchemaHint};

/// A linear plan pipeline plus an ordered list of replacement sub-traces
/// (§3.1).
#[derive(Debug, Clone)]
pub struct Trace {
    /// The most recently appended Step (the root); traversal walks parent
    /// pointers to the leaf.
    pub top: Step,

    /// Sub-traces executed first, consumed via placeholder expressions.
    pub replacements: Vec<Trace>,

    /// Output binding list (name -> expression) representing the last
    /// projection observed during lowering.
    pub r#final: Vec<(String, Expr)>,

    /// Accumulated during lowering.
    pub errors: Vec<CompileError>,

    /// Set for a trace built while lowering a correlated sub-query: the
    /// leaf `IterTable`'s free-variable set contained at least one name that
    /// resolved in the parent trace's scope. Decorrelation clears this once
    /// it rewrites the correlation away; a trace that remains correlated
    /// after `decorrelate()` could not be decorrelated and must already
    /// have failed to build (§4.3).
    pub correlated: bool,
}

impl Trace {
    pub fn new(leaf: Step) -> Self {
        Trace {
            top: leaf,
            replacements: Vec::new(),
            r#final: Vec::new(),
            errors: Vec::new(),
            correlated: false,
        }
    }

    pub fn push_error(&mut self, e: CompileError) {
        self.errors.push(e);
    }

    pub fn first_error(&self) -> Option<&CompileError> {
        self.errors.first()
    }

    /// Replace the root step via a closure, the idiomatic way to "append a
    /// step" to an owned parent-linked chain: `trace.top = Step::Filter {
    /// parent: Box::new(trace.top), ... }` would move out of a borrow, so
    /// call sites use this helper instead.
    pub fn push_step(&mut self, build: impl FnOnce(Box<Step>) -> Step) {
        let old_top = std::mem::replace(&mut self.top, Step::NoOutput);
        self.top = build(Box::new(old_top));
    }

    /// Binding resolution `get(name) -> (origin_step, expression)`, walking
    /// the parent chain from `self.top` (§3.2).
    pub fn resolve(&self, name: &str) -> Option<Expr> {
        self.top.resolve(name)
    }

    pub fn size_class(&self, large_size: i64) -> SizeClass {
        class_of(&self.top, large_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
    pub expr: Expr,
    pub desc: bool,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct IterTableData {
    pub table: String,
    pub filter: Option<Expr>,
    pub schema_hint: Option<SchemaHint>,
    pub has_index: bool,
    /// Set of field names materially referenced by later steps, narrowed by
    /// `projectelim` (§4.4).
    pub fields: Vec<String>,
    pub wildcard: bool,
    pub partitioned: bool,
    /// Free variables found while resolving paths against this leaf's
    /// scope; used by `decorrelate` (§4.3, §9 "Correlation detection").
    pub free_vars: Vec<String>,
}

impl IterTableData {
    pub fn new(table: impl Into<String>) -> Self {
        IterTableData {
            table: table.into(),
            filter: None,
            schema_hint: None,
            has_index: false,
            fields: Vec::new(),
            wildcard: false,
            partitioned: false,
            free_vars: Vec::new(),
        }
    }
}

/// A node in a Trace; one operation in the pipeline (§3.2).
#[derive(Debug, Clone, EnumAsInner)]
pub enum Step {
    IterTable(IterTableData),
    IterValue {
        parent: Box<Step>,
        value: Expr,
        binding: String,
        filter: Option<Expr>,
        fields: Vec<String>,
    },
    DummyOutput,
    NoOutput,
    Filter {
        parent: Box<Step>,
        predicate: Expr,
    },
    Bind {
        parent: Box<Step>,
        bindings: Vec<(Expr, String)>,
        complete: bool,
    },
    Aggregate {
        parent: Box<Step>,
        aggregates: Vec<(Expr, String)>,
        group_by: Vec<(Expr, String)>,
    },
    Distinct {
        parent: Box<Step>,
        keys: Vec<Expr>,
    },
    Order {
        parent: Box<Step>,
        keys: Vec<OrderKey>,
    },
    Limit {
        parent: Box<Step>,
        count: i64,
        offset: i64,
    },
    EquiJoin {
        parent: Box<Step>,
        build: Box<Trace>,
        left_key: Expr,
        right_key: Expr,
        build_name: Option<String>,
    },
    Unpivot {
        parent: Box<Step>,
        as_name: Option<String>,
        at_name: Option<String>,
    },
    UnpivotAtDistinct {
        parent: Box<Step>,
        at_name: String,
    },
    OutputPart {
        parent: Box<Step>,
        basename: String,
    },
    OutputIndex {
        parent: Box<Step>,
        table_path: String,
        basename: String,
    },
    UnionMap {
        inner: IterTableData,
        child: Box<Trace>,
        partition_keys: Option<Vec<Expr>>,
    },
}

impl Step {
    /// `parent()`: the step one hop closer to the leaf, or `None` for a
    /// true leaf (§3.1 invariant: leaf is `IterTable`, `NoOutput`,
    /// `DummyOutput`, or `UnionMap`).
    pub fn parent(&self) -> Option<&Step> {
        match self {
            Step::IterTable(_) | Step::DummyOutput | Step::NoOutput | Step::UnionMap { .. } => None,
            Step::IterValue { parent, .. }
            | Step::Filter { parent, .. }
            | Step::Bind { parent, .. }
            | Step::Aggregate { parent, .. }
            | Step::Distinct { parent, .. }
            | Step::Order { parent, .. }
            | Step::Limit { parent, .. }
            | Step::EquiJoin { parent, .. }
            | Step::Unpivot { parent, .. }
            | Step::UnpivotAtDistinct { parent, .. }
            | Step::OutputPart { parent, .. }
            | Step::OutputIndex { parent, .. } => Some(parent),
        }
    }

    pub fn parent_mut(&mut self) -> Option<&mut Step> {
        match self {
            Step::IterTable(_) | Step::DummyOutput | Step::NoOutput | Step::UnionMap { .. } => None,
            Step::IterValue { parent, .. }
            | Step::Filter { parent, .. }
            | Step::Bind { parent, .. }
            | Step::Aggregate { parent, .. }
            | Step::Distinct { parent, .. }
            | Step::Order { parent, .. }
            | Step::Limit { parent, .. }
            | Step::EquiJoin { parent, .. }
            | Step::Unpivot { parent, .. }
            | Step::UnpivotAtDistinct { parent, .. }
            | Step::OutputPart { parent, .. }
            | Step::OutputIndex { parent, .. } => Some(parent),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.parent().is_none()
    }

    /// `get(name) -> (origin_step, expression)` (§3.2), returning just the
    /// expression since callers that need the origin step already have it
    /// (they're walking the chain themselves).
    ///
    /// `Aggregate.complete==true` hides upstream bindings except group keys
    /// and aggregate results; `Bind.complete==true` with explicit bindings
    /// hides upstream bindings except those re-exported. The wildcard
    /// binding `*` marks the parent chain as "all fields live" for field
    /// pruning but does not itself resolve a name.
    pub fn resolve(&self, name: &str) -> Option<Expr> {
        match self {
            Step::Bind { parent, bindings, complete } => {
                if let Some((e, _)) = bindings.iter().find(|(_, n)| n == name) {
                    return Some(e.clone());
                }
                if *complete {
                    None
                } else {
                    parent.resolve(name)
                }
            }
            Step::Aggregate { parent: _, aggregates, group_by } => {
                if let Some((e, _)) = group_by.iter().find(|(_, n)| n == name) {
                    return Some(e.clone());
                }
                if let Some((e, _)) = aggregates.iter().find(|(_, n)| n == name) {
                    return Some(e.clone());
                }
                // `complete` hides every upstream binding except group keys
                // and aggregate results (§3.2) — no fallthrough to parent.
                None
            }
            Step::IterTable(t) => {
                if t.wildcard || t.fields.iter().any(|f| f == name) {
                    Some(Expr::ident(name))
                } else {
                    None
                }
            }
            Step::IterValue { parent, binding, .. } => {
                if binding == name {
                    Some(Expr::ident(name))
                } else {
                    parent.resolve(name)
                }
            }
            Step::UnionMap { inner, .. } => {
                if inner.wildcard || inner.fields.iter().any(|f| f == name) {
                    Some(Expr::ident(name))
                } else {
                    None
                }
            }
            Step::DummyOutput | Step::NoOutput => None,
            other => other.parent().and_then(|p| p.resolve(name)),
        }
    }

    pub fn step_kind_name(&self) -> &'static str {
        match self {
            Step::IterTable(_) => "IterTable",
            Step::IterValue { .. } => "IterValue",
            Step::DummyOutput => "DummyOutput",
            Step::NoOutput => "NoOutput",
            Step::Filter { .. } => "Filter",
            Step::Bind { .. } => "Bind",
            Step::Aggregate { .. } => "Aggregate",
            Step::Distinct { .. } => "Distinct",
            Step::Order { .. } => "Order",
            Step::Limit { .. } => "Limit",
            Step::EquiJoin { .. } => "EquiJoin",
            Step::Unpivot { .. } => "Unpivot",
            Step::UnpivotAtDistinct { .. } => "UnpivotAtDistinct",
            Step::OutputPart { .. } => "OutputPart",
            Step::OutputIndex { .. } => "OutputIndex",
            Step::UnionMap { .. } => "UnionMap",
        }
    }
}
