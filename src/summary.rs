//! Descriptive statistics for the cohort tables: median/IQR numerics and categorical
//! counts, with missing values carried alongside rather than silently dropped.

use noisy_float::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// Median and interquartile range of the recorded values, with the missing count.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NumericSummary {
    pub n: usize,
    pub missing: usize,
    pub median: Option<f64>,
    pub q1: Option<f64>,
    pub q3: Option<f64>,
}

impl NumericSummary {
    pub fn of(values: impl Iterator<Item = Option<f64>>) -> Self {
        let mut kept = Vec::new();
        let mut missing = 0usize;
        for value in values {
            match value.and_then(R64::try_new) {
                Some(value) => kept.push(value),
                None => missing += 1,
            }
        }
        kept.sort_unstable();
        Self {
            n: kept.len(),
            missing,
            median: percentile(&kept, 0.5),
            q1: percentile(&kept, 0.25),
            q3: percentile(&kept, 0.75),
        }
    }

    /// `median [q1, q3]`, or a dash when nothing was recorded.
    pub fn for_display(&self) -> String {
        match (self.median, self.q1, self.q3) {
            (Some(median), Some(q1), Some(q3)) => {
                format!("{:.1} [{:.1}, {:.1}]", median, q1, q3)
            }
            _ => "-".to_string(),
        }
    }
}

/// Linear-interpolated percentile over an already-sorted slice.
fn percentile(sorted: &[R64], fraction: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let scaled = fraction * (sorted.len() - 1) as f64;
    let lo = sorted[scaled.floor() as usize].raw();
    let hi = sorted[scaled.ceil() as usize].raw();
    Some(lo + (hi - lo) * (scaled - scaled.floor()))
}

/// Count occurrences per category. B-tree so the rendering order is predictable; missing
/// values are returned separately so tables can put them last.
pub fn count_categories<'a>(
    values: impl Iterator<Item = Option<&'a str>>,
) -> (BTreeMap<String, usize>, usize) {
    let mut map = BTreeMap::new();
    let mut missing = 0usize;
    for value in values {
        match value {
            Some(value) => *map.entry(value.to_string()).or_insert(0) += 1,
            None => missing += 1,
        }
    }
    (map, missing)
}
