//! Push-based consumption of analyzer results, per SPEC_FULL.md §4.5 and
//! §9's "do not replace with an eagerly materialized list" design note.

use crate::analysis::AnalysisResult;

/// Receives analyzer results one at a time. Returning `false` stops the
/// analyzer immediately — it will not call `accept` again for that
/// `analyze` invocation, and will not evaluate any further rules.
pub trait ResultSink {
    fn accept(&mut self, result: &AnalysisResult) -> bool;
}

/// Any `FnMut(&AnalysisResult) -> bool` is a sink. This is the preferred way
/// to consume results when all you need is a local accumulator (see
/// [`crate::heuristic::exponential`]) — no struct, no shared state.
impl<F> ResultSink for F
where
    F: FnMut(&AnalysisResult) -> bool,
{
    fn accept(&mut self, result: &AnalysisResult) -> bool {
        self(result)
    }
}

/// Gathers every result into a `Vec`, for diagnostic reporting. Never
/// short-circuits — not for use on the search hot path.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub results: Vec<AnalysisResult>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for CollectingSink {
    fn accept(&mut self, result: &AnalysisResult) -> bool {
        self.results.push(result.clone());
        true
    }
}

/// Stops at the first result above `AlertLevel::None`. Used by
/// [`crate::analysis::is_optimal`], which only cares whether such a result
/// exists, not what it is.
#[derive(Debug, Default)]
pub struct CountingSink {
    pub violation_found: bool,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for CountingSink {
    fn accept(&mut self, result: &AnalysisResult) -> bool {
        if result.level > crate::analysis::AlertLevel::None {
            self.violation_found = true;
            false
        } else {
            true
        }
    }
}
