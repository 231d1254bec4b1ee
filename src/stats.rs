//! Statistics kernel (`spec.md` §4.2, component C2).
//!
//! Deliberately implemented over plain `i64`/`f64` arithmetic rather than
//! `hdrhistogram::Histogram` (the teacher crate's usual tool for latency
//! distributions): histogram bucketing trades exactness for memory bounds,
//! which would break the elementwise invariants this system relies on
//! (`diff == tail - norm` to the nanosecond, a single-trace group having
//! `stddev == 0` exactly). See `DESIGN.md` for the full rationale.

use crate::error::{Result, TprofError};
use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// `{count, mean, stddev, p50, p99}` computed over a sample of nanosecond
/// durations. Defined only for `count >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub count: usize,
    pub mean: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p99: f64,
}

impl Stat {
    /// Computes count, mean, the 50th/99th percentile (linear
    /// interpolation, matching `numpy.percentile`'s default) and sample
    /// standard deviation (`stddev == 0` when `count == 1`).
    pub fn from_samples(samples: &[i64]) -> Result<Self> {
        if samples.is_empty() {
            return Err(TprofError::EmptyPopulation);
        }
        let count = samples.len();
        let sum: i64 = samples.iter().sum();
        let mean = sum as f64 / count as f64;

        let stddev = if count > 1 {
            let sum_sq: f64 = samples
                .iter()
                .map(|&v| {
                    let d = v as f64 - mean;
                    d * d
                })
                .sum();
            (sum_sq / (count as f64 - 1.0)).sqrt()
        } else {
            0.0
        };

        let mut sorted: Vec<i64> = samples.to_vec();
        sorted.sort_unstable();
        let p50 = percentile(&sorted, 50.0);
        let p99 = percentile(&sorted, 99.0);

        Ok(Stat {
            count,
            mean,
            stddev,
            p50,
            p99,
        })
    }

    /// `mean * count`, the severity metric used throughout the pipeline to
    /// rank operations and diffs by total time contributed.
    pub fn weighted(&self) -> f64 {
        self.mean * self.count as f64
    }
}

impl Sub for Stat {
    type Output = Stat;

    /// Elementwise subtraction. Meaningful only between stats produced over
    /// the same metric; does not renormalize `count`.
    fn sub(self, rhs: Stat) -> Stat {
        Stat {
            count: self.count,
            mean: self.mean - rhs.mean,
            stddev: self.stddev - rhs.stddev,
            p50: self.p50 - rhs.p50,
            p99: self.p99 - rhs.p99,
        }
    }
}

/// Linear-interpolation percentile over an already-sorted slice.
fn percentile(sorted: &[i64], pct: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo] as f64
    } else {
        let frac = rank - lo as f64;
        sorted[lo] as f64 + frac * (sorted[hi] as f64 - sorted[lo] as f64)
    }
}

/// Elementwise `tail - norm` over two `(name, Stat)` lists, keeping only
/// names present in both, sorted by resulting mean descending. Shared by the
/// per-operation diffs (layers 1/2) and the per-subspan diff (layer 4).
pub fn diff_sorted_by_mean_desc(norm: &[(String, Stat)], tail: &[(String, Stat)]) -> Vec<(String, Stat)> {
    let tail_index: std::collections::HashMap<&str, usize> = tail
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.as_str(), i))
        .collect();
    let mut diff = Vec::new();
    for (name, norm_stat) in norm {
        if let Some(&i) = tail_index.get(name.as_str()) {
            diff.push((name.clone(), tail[i].1 - *norm_stat));
        }
    }
    diff.sort_by(|a, b| b.1.mean.partial_cmp(&a.1.mean).unwrap());
    diff
}
