//! Cardinality analysis (§3.5, §4.6): a coarse upper bound on a trace's
//! output row count, used both as an optimizer input (partition promotion,
//! ORDER BY elimination) and as a safety check (unbounded ORDER BY, runaway
//! scalar sub-queries).

use super::Step;

pub const LARGE_SIZE: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SizeClass {
    Zero,
    One,
    ExactSmall,
    ColumnCardinality,
    ExactLarge,
    Unknown,
}

impl SizeClass {
    pub fn is_at_most_one(&self) -> bool {
        matches!(self, SizeClass::Zero | SizeClass::One)
    }

    pub fn is_bounded(&self) -> bool {
        !matches!(self, SizeClass::Unknown | SizeClass::ExactLarge)
    }
}

fn of_limit(count: i64, large_size: i64) -> SizeClass {
    if count == 0 {
        SizeClass::Zero
    } else if count == 1 {
        SizeClass::One
    } else if count < large_size {
        SizeClass::ExactSmall
    } else {
        SizeClass::ExactLarge
    }
}

/// Walk the trace leaf-to-root tracking a running class initialized to
/// `Unknown`, `min`-ing in each step's implied class (§4.6).
pub fn class_of(top: &Step, large_size: i64) -> SizeClass {
    // Collect root-to-leaf, then fold leaf-to-root as the spec describes.
    let mut chain = vec![top];
    while let Some(p) = chain.last().unwrap().parent() {
        chain.push(p);
    }
    let mut running = SizeClass::Unknown;
    for step in chain.into_iter().rev() {
        let implied = implied_class(step, large_size);
        if let Some(implied) = implied {
            running = running.min(implied);
        }
        if running == SizeClass::Zero {
            // NoOutput short-circuits: nothing downstream can enlarge it.
            return SizeClass::Zero;
        }
    }
    running
}

fn implied_class(step: &Step, large_size: i64) -> Option<SizeClass> {
    match step {
        Step::Limit { count, .. } => Some(of_limit(*count, large_size)),
        Step::NoOutput => Some(SizeClass::Zero),
        Step::DummyOutput => Some(SizeClass::One),
        Step::Aggregate { group_by, .. } => Some(if group_by.is_empty() {
            SizeClass::One
        } else {
            SizeClass::ColumnCardinality
        }),
        Step::Distinct { .. } => Some(SizeClass::ColumnCardinality),
        Step::UnionMap { child, .. } => {
            let child_class = class_of(&child.top, large_size);
            Some(match child_class {
                SizeClass::Zero => SizeClass::Zero,
                SizeClass::One | SizeClass::ColumnCardinality | SizeClass::ExactSmall => {
                    SizeClass::ColumnCardinality
                }
                SizeClass::ExactLarge | SizeClass::Unknown => SizeClass::Unknown,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IterTableData;

    #[test]
    fn limit_one_is_one() {
        let top = Step::Limit {
            parent: Box::new(Step::IterTable(IterTableData::new("t"))),
            count: 1,
            offset: 0,
        };
        assert_eq!(class_of(&top, LARGE_SIZE), SizeClass::One);
    }

    #[test]
    fn no_output_short_circuits_to_zero_even_under_later_steps() {
        let top = Step::Filter {
            parent: Box::new(Step::NoOutput),
            predicate: crate::expr::Expr::bool_lit(true),
        };
        assert_eq!(class_of(&top, LARGE_SIZE), SizeClass::Zero);
    }

    #[test]
    fn plain_scan_is_unknown() {
        let top = Step::IterTable(IterTableData::new("t"));
        assert_eq!(class_of(&top, LARGE_SIZE), SizeClass::Unknown);
    }

    #[test]
    fn monotone_under_limit_then_aggregate() {
        let scan = Step::IterTable(IterTableData::new("t"));
        let agg = Step::Aggregate {
            parent: Box::new(scan),
            aggregates: vec![],
            group_by: vec![],
        };
        assert_eq!(class_of(&agg, LARGE_SIZE), SizeClass::One);
    }
}
