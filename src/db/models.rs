use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operator directives pending for a disk, stored as a bit set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directives {
    pub force_full: bool,
    pub force_bump: bool,
    pub force_no_bump: bool,
    pub force_level_1: bool,
}

impl Directives {
    const FORCE_FULL: i64 = 1;
    const FORCE_BUMP: i64 = 2;
    const FORCE_NO_BUMP: i64 = 4;
    const FORCE_LEVEL_1: i64 = 8;

    pub const fn from_bits(bits: i64) -> Self {
        Self {
            force_full: bits & Self::FORCE_FULL != 0,
            force_bump: bits & Self::FORCE_BUMP != 0,
            force_no_bump: bits & Self::FORCE_NO_BUMP != 0,
            force_level_1: bits & Self::FORCE_LEVEL_1 != 0,
        }
    }

    #[cfg(test)]
    pub const fn bits(self) -> i64 {
        let mut bits = 0;
        if self.force_full {
            bits |= Self::FORCE_FULL;
        }
        if self.force_bump {
            bits |= Self::FORCE_BUMP;
        }
        if self.force_no_bump {
            bits |= Self::FORCE_NO_BUMP;
        }
        if self.force_level_1 {
            bits |= Self::FORCE_LEVEL_1;
        }
        bits
    }
}

/// Recent dump performance; negative entries are unknown. Index 0 is newest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Perf {
    /// KB/s.
    pub rate: [f64; 3],
    /// Compressed / native size.
    pub comp: [f64; 3],
}

impl Default for Perf {
    fn default() -> Self {
        Self { rate: [-1.0; 3], comp: [-1.0; 3] }
    }
}

/// Weighted average of the known entries (3, 2, 1), or `default` if none are known.
pub fn perf_average(values: &[f64; 3], default: f64) -> f64 {
    let mut sum = 0.0;
    let mut weight = 0.0;
    for (i, v) in values.iter().enumerate() {
        if *v >= 0.0 {
            let w = (values.len() - i) as f64;
            sum += v * w;
            weight += w;
        }
    }
    if weight == 0.0 {
        default
    } else {
        sum / weight
    }
}

/// The most recent dump at one level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStats {
    pub size: u64,
    pub csize: u64,
    pub secs: u64,
    /// Unix seconds; `None` if this level was never dumped.
    pub date: Option<i64>,
    pub label: Option<String>,
}

/// One completed dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub level: u32,
    pub size: u64,
    pub csize: u64,
    pub secs: u64,
    pub date: i64,
}

/// Everything known about a disk's past dumps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub directives: Directives,
    pub levels: BTreeMap<u32, LevelStats>,
    pub full: Perf,
    pub incr: Perf,
    pub last_level: Option<u32>,
    pub consecutive_runs: Option<u32>,
    /// Oldest first.
    pub history: Vec<HistoryEntry>,
}

impl HistoryRecord {
    pub fn level(&self, level: u32) -> Option<&LevelStats> {
        self.levels.get(&level)
    }

    /// Date of the most recent dump at `level`.
    pub fn level_date(&self, level: u32) -> Option<i64> {
        self.level(level).and_then(|stats| stats.date)
    }

    pub fn level_size(&self, level: u32) -> u64 {
        self.level(level).map_or(0, |stats| stats.size)
    }

    pub fn level_label(&self, level: u32) -> Option<&str> {
        self.level(level).and_then(|stats| stats.label.as_deref()).filter(|l| !l.is_empty())
    }
}

/// A volume in the tape rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeEntry {
    pub label: String,
    /// 1 = most recently written.
    pub position: u32,
    /// `YYYYMMDD` or `YYYYMMDDhhmmss`.
    pub datestamp: String,
    pub reuse: bool,
}
