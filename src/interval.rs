use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Half-open interval `[start, end)` over absolute instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl TimeInterval {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        debug_assert!(start < end, "interval start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: OffsetDateTime) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection of two intervals, or None when they do not overlap.
    pub fn intersect(&self, other: &TimeInterval) -> Option<TimeInterval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then(|| TimeInterval::new(start, end))
    }
}

/// One clause of the decomposed overlap predicate. A store that filters rows
/// with indexed range comparisons evaluates the disjunction of all three
/// clauses; the result is identical to [`TimeInterval::overlaps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapClause {
    /// Existing interval covers the query start: `e.start <= q.start < e.end`.
    CoversQueryStart,
    /// Existing interval covers the query end: `e.start < q.end <= e.end`.
    CoversQueryEnd,
    /// Existing interval lies fully inside the query range.
    ContainedInQuery,
}

impl OverlapClause {
    pub const ALL: [OverlapClause; 3] = [
        OverlapClause::CoversQueryStart,
        OverlapClause::CoversQueryEnd,
        OverlapClause::ContainedInQuery,
    ];

    pub fn matches(&self, existing: &TimeInterval, query: &TimeInterval) -> bool {
        match self {
            OverlapClause::CoversQueryStart => {
                existing.start <= query.start && query.start < existing.end
            }
            OverlapClause::CoversQueryEnd => {
                existing.start < query.end && query.end <= existing.end
            }
            OverlapClause::ContainedInQuery => {
                query.start <= existing.start && existing.end <= query.end
            }
        }
    }
}

/// Decomposed form of the overlap test, provably equivalent to the single
/// predicate. Used by the store's range scans so that read-path and
/// write-path filtering share one semantics.
pub fn overlaps_decomposed(existing: &TimeInterval, query: &TimeInterval) -> bool {
    OverlapClause::ALL.iter().any(|c| c.matches(existing, query))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut merged: Vec<TimeInterval> = Vec::new();
    for &iv in sorted {
        if let Some(last) = merged.last_mut()
            && iv.start <= last.end
        {
            last.end = last.end.max(iv.end);
            continue;
        }
        merged.push(iv);
    }
    merged
}

/// Subtract `to_remove` (sorted, disjoint) from each interval in `base`.
/// A removal strictly inside a base interval splits it in two.
pub fn subtract_intervals(base: &[TimeInterval], to_remove: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeInterval::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeInterval::new(current_start, current_end));
        }
    }

    result
}
