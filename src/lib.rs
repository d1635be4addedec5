//! # pirql
//!
//! Plan IR for a columnar SQL/PartiQL analytical engine.
//!
//! Takes a query AST (§6.1, produced by an external parser this crate does
//! not implement) and an [`env::Environment`] (the external catalog/index)
//! and lowers it to a [`ir::Trace`]: a linear pipeline of [`ir::Step`]s plus
//! an ordered list of replacement sub-traces. From there the fixed
//! optimizer pass sequence (§4.4) rewrites the trace in place, and the
//! map/reduce splitter (§4.5) tears it into a parallel mapping pipeline and
//! a serial reduction pipeline.
//!
//! You probably want to start with [compile].
//!
//! ```ascii
//!           Query AST
//!               │
//!     (lower)   │ lower::build
//!               ▼
//!             Trace            (unoptimized IR, §3.1-3.2)
//!               │
//!  (optimize)   │ optimize::optimize
//!               ▼
//!             Trace            (optimized IR)
//!               │
//!     (split)   │ split::split
//!               ▼
//!       Trace   +   Trace      (mapping pipeline, reduction pipeline)
//! ```

#![forbid(unsafe_code)]

pub mod ast;
pub mod builtins;
pub mod check;
pub mod describe;
pub mod env;
pub mod error;
pub mod expr;
pub mod ir;
pub mod lower;
pub mod optimize;
pub mod split;
pub mod utils;

pub use error::{CompileError, CompileErrors, Reason, Result, WithErrorInfo};
pub use ir::{SizeClass, Trace, LARGE_SIZE};

/// Compilation options (§A.4): lets a consumer inspect the IR at an earlier
/// stage (skip the optimizer, or the splitter) and override the
/// [`LARGE_SIZE`] cardinality threshold the same way a test fixture might
/// want a much smaller "large" boundary than production data.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Run the fixed optimizer pass sequence (§4.4) after lowering.
    ///
    /// Defaults to true.
    pub optimize: bool,

    /// Run the map/reduce splitter (§4.5) after optimizing.
    ///
    /// Defaults to true. Has no effect if `optimize` is false — splitting
    /// an unoptimized trace is not a supported combination.
    pub split: bool,

    /// The `LargeSize` cardinality threshold (§3.5) used throughout
    /// lowering, optimization, and splitting.
    ///
    /// Defaults to [`LARGE_SIZE`].
    pub large_size: i64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions { optimize: true, split: true, large_size: LARGE_SIZE }
    }
}

impl BuildOptions {
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn no_optimize(self) -> Self {
        self.with_optimize(false)
    }

    pub fn with_split(mut self, split: bool) -> Self {
        self.split = split;
        self
    }

    pub fn no_split(self) -> Self {
        self.with_split(false)
    }

    pub fn with_large_size(mut self, large_size: i64) -> Self {
        self.large_size = large_size;
        self
    }
}

/// The result of [compile]: the (possibly split) reduction trace, plus the
/// mapping trace when splitting ran.
///
/// When `options.split` is false (or `options.optimize` is false, which
/// implies it), `mapping` is `None` and `reduction` is the lowered (and
/// possibly optimized) trace as a whole — there is no map/reduce split to
/// report.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub mapping: Option<Trace>,
    pub reduction: Trace,
}

/// Compile a query AST into a query plan.
///
/// This is a wrapper for:
/// - [`lower::build`] — build the unoptimized [`Trace`] (§4.1-4.3).
/// - [`optimize::optimize`] — run the fixed optimizer pass sequence (§4.4).
/// - [`split::split`] — split into a mapping and a reduction trace (§4.5).
///
/// Errors accumulated during lowering surface as the first error on the
/// returned trace (§7); this wrapper does not itself fail, matching
/// `lower::build`'s own "errors accumulate on the trace" contract. Callers
/// that want a `Result` should check `trace.first_error()` themselves, or
/// use [`compile_checked`].
pub fn compile(
    query: &ast::Query,
    env: &dyn env::Environment,
    options: &BuildOptions,
) -> CompileOutput {
    let mut trace = lower::build_with_large_size(query, env, options.large_size);

    if !options.optimize || trace.first_error().is_some() {
        return CompileOutput { mapping: None, reduction: trace };
    }
    optimize::optimize_with_large_size(&mut trace, env, options.large_size);

    if !options.split {
        return CompileOutput { mapping: None, reduction: trace };
    }
    let reduction = split::split_with_large_size(&mut trace, env, options.large_size);
    CompileOutput { mapping: Some(trace), reduction }
}

/// As [compile], but surfaces lowering/optimization errors as a `Result`
/// rather than requiring the caller to inspect `trace.first_error()`.
pub fn compile_checked(
    query: &ast::Query,
    env: &dyn env::Environment,
    options: &BuildOptions,
) -> Result<CompileOutput, CompileErrors> {
    let out = compile(query, env, options);
    let trace = out.mapping.as_ref().unwrap_or(&out.reduction);
    if trace.errors.is_empty() {
        Ok(out)
    } else {
        Err(CompileErrors(trace.errors.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Column, FromExpr, Query, Select};
    use crate::env::TestEnvironment;
    use crate::expr::Expr;

    fn query_from(table: &str) -> Query {
        Query {
            with: Vec::new(),
            body: Select {
                from: Some(FromExpr::Table { name: table.to_string(), alias: None }),
                columns: vec![Column { expr: Expr::ident("x"), alias: None }],
                ..Select::default()
            },
        }
    }

    #[test]
    fn compile_runs_full_pipeline_by_default() {
        let query = query_from("events");
        let env = TestEnvironment::default();
        let out = compile(&query, &env, &BuildOptions::default());
        assert!(out.reduction.first_error().is_none());
        assert!(out.mapping.is_some());
    }

    #[test]
    fn no_optimize_skips_split_too() {
        let query = query_from("events");
        let env = TestEnvironment::default();
        let out = compile(&query, &env, &BuildOptions::default().no_optimize());
        assert!(out.mapping.is_none());
    }

    #[test]
    fn no_split_keeps_single_trace() {
        let query = query_from("events");
        let env = TestEnvironment::default();
        let out = compile(&query, &env, &BuildOptions::default().no_split());
        assert!(out.mapping.is_none());
    }

    #[test]
    fn compile_checked_surfaces_lowering_errors() {
        let query = Query {
            with: Vec::new(),
            body: Select { from: None, offset: Some(5), ..Select::default() },
        };
        let env = TestEnvironment::default();
        let result = compile_checked(&query, &env, &BuildOptions::default());
        assert!(result.is_err());
    }
}
