use crate::db::{Directives, HistoryRecord};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::fmt;

/// Candidate levels tracked per disk at once.
pub(crate) const MAX_LEVELS: usize = 3;

/// Highest dump level plus one.
pub(crate) const DUMP_LEVELS: u32 = 400;

/// Runs before a tape reuse that trigger an overwrite warning.
pub(crate) const RUNS_REDZONE: i64 = 5;

/// Fraction of the balanced size tolerated before promotions stop.
pub(crate) const PROMOTE_THRESHOLD: f64 = 0.05;

/// KB/s assumed when no dump rate history exists.
pub(crate) const DEFAULT_DUMPRATE: f64 = 1024.0;

/// Dump strategy configured for a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Standard,
    NoFull,
    NoInc,
    IncrOnly,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::NoFull => "nofull",
            Self::NoInc => "noinc",
            Self::IncrOnly => "incronly",
        }
    }

    /// Strategies that never plan a full dump of their own.
    pub const fn skips_fulls(self) -> bool {
        matches!(self, Self::NoFull | Self::IncrOnly)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Strategy {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "standard" => Ok(Self::Standard),
            "nofull" => Ok(Self::NoFull),
            "noinc" => Ok(Self::NoInc),
            "incronly" => Ok(Self::IncrOnly),
            _ => Err(format!("invalid strategy: {s}")),
        }
    }
}

/// Where compression happens, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Client,
    Server,
}

impl Compression {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Compression {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "none" => Ok(Self::None),
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            _ => Err(format!("invalid compression: {s}")),
        }
    }
}

/// Where encryption happens, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    None,
    Client,
    Server,
}

impl Encryption {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Encryption {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "none" => Ok(Self::None),
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            _ => Err(format!("invalid encryption: {s}")),
        }
    }
}

/// Holding disk usage for a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingPolicy {
    Never,
    Auto,
    Required,
}

impl HoldingPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Auto => "auto",
            Self::Required => "required",
        }
    }
}

impl fmt::Display for HoldingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for HoldingPolicy {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "never" => Ok(Self::Never),
            "auto" => Ok(Self::Auto),
            "required" => Ok(Self::Required),
            _ => Err(format!("invalid holding policy: {s}")),
        }
    }
}

/// Where a size estimate may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    Client,
    Server,
    Calcsize,
}

impl EstimateMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Calcsize => "calcsize",
        }
    }
}

impl fmt::Display for EstimateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for EstimateMethod {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            "calcsize" => Ok(Self::Calcsize),
            _ => Err(format!("invalid estimate method: {s}")),
        }
    }
}

/// Thresholds deciding when an incremental moves up a level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BumpPolicy {
    pub percent: u32,
    pub size_kb: u64,
    pub mult: f64,
    pub days: u32,
}

/// One client filesystem to protect, as loaded from the disk list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUnit {
    pub host: String,
    pub name: String,
    pub device: Option<String>,
    pub program: String,
    pub strategy: Strategy,
    pub dumpcycle: u32,
    pub priority: i32,
    pub compress: Compression,
    pub encrypt: Encryption,
    /// Assumed compression ratio for (full, incremental) without history.
    pub comprate: (f64, f64),
    pub bump: BumpPolicy,
    pub skip_full: bool,
    pub skip_incr: bool,
    pub maxpromoteday: i32,
    pub splitsize: u64,
    pub allow_split: bool,
    pub estimate: Vec<EstimateMethod>,
    pub spindle: i32,
    pub maxdumps: u32,
    pub directtcp: bool,
    pub holding: HoldingPolicy,
    /// Whether the disk takes part in tonight's run.
    pub todo: bool,
}

impl DiskUnit {
    pub fn new(host: &str, name: &str, dumpcycle: u32, bump: BumpPolicy) -> Self {
        Self {
            host: host.to_string(),
            name: name.to_string(),
            device: None,
            program: "GNUTAR".to_string(),
            strategy: Strategy::Standard,
            dumpcycle,
            priority: 1,
            compress: Compression::None,
            encrypt: Encryption::None,
            comprate: (0.5, 0.5),
            bump,
            skip_full: false,
            skip_incr: false,
            maxpromoteday: 10000,
            splitsize: 0,
            allow_split: false,
            estimate: vec![EstimateMethod::Client],
            spindle: -1,
            maxdumps: 1,
            directtcp: false,
            holding: HoldingPolicy::Auto,
            todo: true,
        }
    }

    pub fn uses_estimate(&self, method: EstimateMethod) -> bool {
        self.estimate.contains(&method)
    }

    /// First client-side method in the list, if any.
    pub fn client_method(&self) -> Option<EstimateMethod> {
        self.estimate.iter().copied().find(|m| *m != EstimateMethod::Server)
    }

    /// Whether the disk contributes to the full-dump balance.
    pub const fn takes_fulls(&self) -> bool {
        !(self.skip_full || self.strategy.skips_fulls())
    }
}

/// Outcome of asking for one level's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SizeEstimate {
    /// Requested, no answer yet.
    Pending,
    Sized(u64),
    /// The client withdrew the level.
    Removed,
    /// The request ended before an answer arrived.
    TimedOut,
}

/// One candidate level for a disk.
#[derive(Debug, Clone)]
pub(crate) struct LevelEstimate {
    pub level: u32,
    /// Watermark sent to the client: most recent lower-level dump.
    pub dumpdate: String,
    pub size: SizeEstimate,
    /// Size derived without history.
    pub guessed: bool,
    csize: OnceCell<u64>,
}

impl LevelEstimate {
    pub(crate) fn requested(level: u32, dumpdate: String) -> Self {
        Self { level, dumpdate, size: SizeEstimate::Pending, guessed: false, csize: OnceCell::new() }
    }

    pub(crate) fn set_size(&mut self, size: SizeEstimate, guessed: bool) {
        self.size = size;
        self.guessed = guessed;
        self.csize = OnceCell::new();
    }

    pub(crate) const fn native_size(&self) -> Option<u64> {
        match self.size {
            SizeEstimate::Sized(kb) => Some(kb),
            _ => None,
        }
    }
}

/// Progress of a disk through the estimate exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiskState {
    Ready,
    Active,
    PartiallyDone,
    Done,
}

/// Index of a host in the scheduler context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HostId(pub usize);

/// The working unit threaded through every queue, one per disk.
#[derive(Debug)]
pub(crate) struct EstimateRecord {
    pub disk: DiskUnit,
    pub host: HostId,
    pub state: DiskState,
    pub got_estimate: u32,
    pub dump_priority: i32,
    pub levels: Vec<LevelEstimate>,
    /// Slot chosen for tonight.
    pub dump: Option<usize>,
    /// Slot used if the run must fall back to degraded mode.
    pub degraded: Option<usize>,
    pub degraded_reason: Option<String>,
    pub last_level: Option<u32>,
    pub last_lev0size: u64,
    /// Days until a full is due; zero or less means due now.
    pub next_level0: i32,
    pub level_days: u32,
    pub promote: i32,
    pub fullrate: f64,
    pub incrrate: f64,
    pub fullcomp: f64,
    pub incrcomp: f64,
    pub errstr: Option<String>,
    pub directives: Directives,
    /// Date of the last full, unix seconds.
    pub lev0_date: Option<i64>,
    pub history: Option<HistoryRecord>,
}

impl EstimateRecord {
    pub(crate) fn new(disk: DiskUnit, host: HostId) -> Self {
        let priority = disk.priority;
        Self {
            disk,
            host,
            state: DiskState::Ready,
            got_estimate: 0,
            dump_priority: priority,
            levels: Vec::with_capacity(MAX_LEVELS),
            dump: None,
            degraded: None,
            degraded_reason: None,
            last_level: None,
            last_lev0size: 0,
            next_level0: 0,
            level_days: 0,
            promote: 0,
            fullrate: -1.0,
            incrrate: -1.0,
            fullcomp: -1.0,
            incrcomp: -1.0,
            errstr: None,
            directives: Directives::default(),
            lev0_date: None,
            history: None,
        }
    }

    /// Slot index of a usable estimate for `level`.
    pub(crate) fn estimate(&self, level: u32) -> Option<usize> {
        self.levels
            .iter()
            .position(|est| est.level == level && matches!(est.size, SizeEstimate::Sized(_)))
    }

    pub(crate) fn slot_for_level(&self, level: u32) -> Option<usize> {
        self.levels.iter().position(|est| est.level == level)
    }

    /// Native size of a usable estimate for `level`.
    pub(crate) fn native_size_at(&self, level: u32) -> Option<u64> {
        self.estimate(level).and_then(|slot| self.levels[slot].native_size())
    }

    /// On-media size of a slot, computed once from the compression ratio.
    pub(crate) fn on_media_size(&self, slot: usize) -> Option<u64> {
        let est = self.levels.get(slot)?;
        let native = est.native_size()?;
        Some(*est.csize.get_or_init(|| {
            if self.disk.compress == Compression::None {
                return native;
            }
            let ratio = if est.level == 0 { self.fullcomp } else { self.incrcomp };
            let ratio = ratio.min(1.1);
            let size = (native as f64 * ratio) as i64;
            size.max(1) as u64
        }))
    }

    /// On-media size of a usable estimate for `level`.
    pub(crate) fn on_media_size_at(&self, level: u32) -> Option<u64> {
        self.estimate(level).and_then(|slot| self.on_media_size(slot))
    }

    pub(crate) fn dump_level(&self) -> Option<u32> {
        self.dump.map(|slot| self.levels[slot].level)
    }

    /// On-media size of the chosen dump, zero when nothing is chosen.
    pub(crate) fn dump_csize(&self) -> u64 {
        self.dump.and_then(|slot| self.on_media_size(slot)).unwrap_or(0)
    }

    pub(crate) fn has_positive_estimate(&self) -> bool {
        self.levels.iter().any(|est| matches!(est.size, SizeEstimate::Sized(kb) if kb > 0))
    }

    /// Mark every still-pending slot as timed out, returning their levels.
    pub(crate) fn expire_pending(&mut self) -> Vec<u32> {
        let mut expired = Vec::new();
        for est in &mut self.levels {
            if est.size == SizeEstimate::Pending {
                est.set_size(SizeEstimate::TimedOut, false);
                expired.push(est.level);
            }
        }
        expired
    }

    pub(crate) fn is_new(&self) -> bool {
        self.last_level.is_none()
    }
}
