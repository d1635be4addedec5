//! The `Environment` interface (§6.2): schema and index lookups the
//! lowering/optimization passes call into. The storage layer and its index
//! are external collaborators (§1); this module only defines the trait
//! boundary and a minimal in-memory implementation used by tests.

use std::collections::HashMap;

use crate::expr::{SchemaHint, Ty};

/// `env.schema(table) -> Hint?` and `env.index(table) -> Index?` (§6.2).
///
/// Called only from the single lowering/optimizer thread, and never after
/// `build` returns (§5).
pub trait Environment {
    fn schema(&self, table: &str) -> Option<SchemaHint>;
    fn index(&self, table: &str) -> Option<&dyn Index>;
}

/// Opaque handle exposing partition/time-range probes (§6.2).
pub trait Index {
    /// `time_range(path) -> (min, max, ok)`.
    fn time_range(&self, path: &[String]) -> Option<(crate::expr::Literal, crate::expr::Literal)>;

    fn has_partition(&self, field: &str) -> bool;
}

/// A small in-memory environment for tests and for embedding this crate
/// without a real catalog, modeled the way `prqlc`'s test harness builds
/// ad hoc `RootModule`s for fixtures.
#[derive(Default)]
pub struct TestEnvironment {
    pub schemas: HashMap<String, SchemaHint>,
    pub indexes: HashMap<String, TestIndex>,
}

#[derive(Default, Clone)]
pub struct TestIndex {
    pub time_ranges: HashMap<Vec<String>, (crate::expr::Literal, crate::expr::Literal)>,
    pub partitions: std::collections::HashSet<String>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, table: impl Into<String>, hint: SchemaHint) -> Self {
        self.schemas.insert(table.into(), hint);
        self
    }

    pub fn with_index(mut self, table: impl Into<String>, index: TestIndex) -> Self {
        self.indexes.insert(table.into(), index);
        self
    }
}

impl TestIndex {
    pub fn with_time_range(
        mut self,
        path: Vec<String>,
        min: crate::expr::Literal,
        max: crate::expr::Literal,
    ) -> Self {
        self.time_ranges.insert(path, (min, max));
        self
    }

    pub fn with_partition(mut self, field: impl Into<String>) -> Self {
        self.partitions.insert(field.into());
        self
    }
}

impl Index for TestIndex {
    fn time_range(&self, path: &[String]) -> Option<(crate::expr::Literal, crate::expr::Literal)> {
        self.time_ranges.get(path).cloned()
    }

    fn has_partition(&self, field: &str) -> bool {
        self.partitions.contains(field)
    }
}

impl Environment for TestEnvironment {
    fn schema(&self, table: &str) -> Option<SchemaHint> {
        self.schemas.get(table).cloned()
    }

    fn index(&self, table: &str) -> Option<&dyn Index> {
        self.indexes.get(table).map(|i| i as &dyn Index)
    }
}

/// Convenience: an environment with no schema/index information at all,
/// useful for scenarios that don't rely on type checking or partitioning.
pub fn empty() -> TestEnvironment {
    TestEnvironment::new()
}

#[allow(dead_code)]
fn _assert_object_safe(_: &dyn Environment) {}
#[allow(dead_code)]
fn _ty_unused(_: &Ty) {}
