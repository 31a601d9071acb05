// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::location::SourceLocation;

/// A boolean condition of a policy body evaluated to `result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageHit {
    pub statement_index: usize,
    pub result: bool,
    pub start_line: u32,
    pub end_line: u32,
    pub start_char: u32,
    pub end_char: u32,
}

impl CoverageHit {
    pub fn new(statement_index: usize, result: bool, location: &SourceLocation) -> Self {
        Self {
            statement_index,
            result,
            start_line: location.start_line,
            end_line: location.end_line,
            start_char: location.start_char,
            end_char: location.end_char,
        }
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.start_line, self.start_char, self.end_line, self.end_char)
    }
}

/// Hit log owned by one compiled policy.
///
/// Conditions may record from concurrent evaluations; hits recorded
/// concurrently are kept in no particular order.
#[derive(Debug, Default)]
pub struct CoverageRecorder {
    hits: Mutex<Vec<CoverageHit>>,
}

impl CoverageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, statement_index: usize, result: bool, location: &SourceLocation) {
        self.hits
            .lock()
            .push(CoverageHit::new(statement_index, result, location));
    }

    /// Hits recorded since the previous call. The buffer is empty afterwards.
    pub fn collect_and_clear(&self) -> Vec<CoverageHit> {
        core::mem::take(&mut *self.hits.lock())
    }

    pub fn clear(&self) {
        self.hits.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.hits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionCoverage {
    pub statement_index: usize,
    pub location: SourceLocation,
    pub true_hits: usize,
    pub false_hits: usize,
}

impl ConditionCoverage {
    pub fn is_fully_covered(&self) -> bool {
        self.true_hits > 0 && self.false_hits > 0
    }
}

/// Per-condition aggregate of hits, keyed by the condition's start position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub conditions: BTreeMap<u64, ConditionCoverage>,
}

impl CoverageSummary {
    pub fn from_hits(hits: &[CoverageHit]) -> Self {
        let mut summary = Self::default();
        summary.add_hits(hits);
        summary
    }

    pub fn add_hits(&mut self, hits: &[CoverageHit]) {
        for hit in hits {
            let location = hit.location();
            let entry = self
                .conditions
                .entry(location.position_key())
                .or_insert_with(|| ConditionCoverage {
                    statement_index: hit.statement_index,
                    location,
                    ..ConditionCoverage::default()
                });
            if hit.result {
                entry.true_hits += 1;
            } else {
                entry.false_hits += 1;
            }
        }
    }

    /// Fraction of condition outcomes (true and false per condition) observed.
    pub fn branch_coverage(&self) -> f64 {
        if self.conditions.is_empty() {
            return 0.0;
        }
        let covered: usize = self
            .conditions
            .values()
            .map(|c| usize::from(c.true_hits > 0) + usize::from(c.false_hits > 0))
            .sum();
        covered as f64 / (2 * self.conditions.len()) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_and_clear_drains() {
        let recorder = CoverageRecorder::new();
        let loc = SourceLocation::new(3, 4, 3, 10);
        recorder.record_hit(0, true, &loc);
        recorder.record_hit(0, false, &loc);
        let hits = recorder.collect_and_clear();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].result);
        assert!(!hits[1].result);
        assert!(recorder.collect_and_clear().is_empty());
    }

    #[test]
    fn clear_discards() {
        let recorder = CoverageRecorder::new();
        recorder.record_hit(1, true, &SourceLocation::default());
        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn concurrent_recording() {
        let recorder = std::sync::Arc::new(CoverageRecorder::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let r = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        r.record_hit(i, i % 2 == 0, &SourceLocation::default());
                    }
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().is_ok());
        }
        assert_eq!(recorder.collect_and_clear().len(), 400);
    }

    #[test]
    fn summary_merges_by_position() {
        let a = SourceLocation::new(1, 0, 1, 5);
        let b = SourceLocation::new(2, 4, 2, 9);
        let hits = [
            CoverageHit::new(0, true, &a),
            CoverageHit::new(0, false, &a),
            CoverageHit::new(1, true, &b),
            CoverageHit::new(1, true, &b),
        ];
        let summary = CoverageSummary::from_hits(&hits);
        assert_eq!(summary.conditions.len(), 2);
        let first = &summary.conditions[&a.position_key()];
        assert!(first.is_fully_covered());
        let second = &summary.conditions[&b.position_key()];
        assert_eq!((second.true_hits, second.false_hits), (2, 0));
        assert!((summary.branch_coverage() - 0.75).abs() < f64::EPSILON);
    }
}
