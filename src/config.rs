//! Explicit, constructor-supplied configuration.
//!
//! Every analyzer in this crate takes a [`Config`] by reference at the call
//! site instead of reading module-level globals, per the "Global module
//! state" design note: the abbreviation map and tail cutoff that the
//! original tool kept as ambient app/module state are threaded through
//! explicitly here.

use std::collections::BTreeMap;

/// Full service/operation name -> abbreviated display name.
pub type AbbrevMap = BTreeMap<String, String>;

/// Per-layer fan-out cap used by the report engine (`spec.md` §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutCaps {
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
    pub l4: usize,
}

impl Default for FanOutCaps {
    fn default() -> Self {
        Self {
            l1: 10,
            l2: 2,
            l3: 2,
            l4: 2,
        }
    }
}

/// Pipeline-wide configuration, analogous to the original tool's `App`
/// object plus the report engine's constructor parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Percentile boundary separating `norm` from `tail`, in `[0, 100]`.
    pub tail_cutoff: u8,
    /// Service/operation name abbreviation map applied at ingestion.
    pub abbrev: AbbrevMap,
    /// Per-layer fan-out caps applied by the report engine.
    pub fan_out: FanOutCaps,
    /// A tail self-time mean must exceed this multiple of the norm mean to
    /// be classified `is_tail` at L2 (`spec.md` §4.7, default 4).
    pub tail_multiple: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tail_cutoff: 90,
            abbrev: AbbrevMap::new(),
            fan_out: FanOutCaps::default(),
            tail_multiple: 4.0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tail_cutoff(mut self, tail_cutoff: u8) -> Self {
        assert!(tail_cutoff <= 100, "tail_cutoff must be in [0, 100]");
        self.tail_cutoff = tail_cutoff;
        self
    }

    pub fn with_abbrev(mut self, abbrev: AbbrevMap) -> Self {
        self.abbrev = abbrev;
        self
    }

    pub fn with_fan_out(mut self, fan_out: FanOutCaps) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_tail_multiple(mut self, tail_multiple: f64) -> Self {
        self.tail_multiple = tail_multiple;
        self
    }

    /// Index into a sorted-by-duration trace population separating `norm`
    /// (`[0, k)`) from `tail` (`[k, N)`).
    pub fn cutoff_index(&self, n: usize) -> usize {
        (self.tail_cutoff as f64 / 100.0 * n as f64).floor() as usize
    }
}
