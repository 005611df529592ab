use super::defaults::{
    DEFAULT_BUMPDAYS, DEFAULT_BUMPMULT, DEFAULT_BUMPPERCENT, DEFAULT_BUMPSIZE_KB,
    DEFAULT_CONFIG_NAME, DEFAULT_CONFIG_PATH, DEFAULT_CTIMEOUT_SECS, DEFAULT_DB_PATH,
    DEFAULT_DISKLIST_PATH, DEFAULT_DUMPCYCLE, DEFAULT_ESTIMATE_PORT, DEFAULT_ETIMEOUT_SECS,
    DEFAULT_TAPECYCLE, DEFAULT_TAPE_BLOCKSIZE_KB, DEFAULT_TAPE_FILEMARK_KB,
    DEFAULT_TAPE_LENGTH_KB,
};
use crate::planner::BumpPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub config_path: String,
    pub db_path: String,
    pub disklist_path: String,
    /// Configuration name sent to clients that understand `config=`.
    pub config_name: String,
    pub dumpcycle: u32,
    /// 0 = same as dumpcycle, -1 = guess from the tape list.
    pub runspercycle: i32,
    pub tapecycle: u32,
    pub runtapes: u32,
    /// Explicit per-run capacity in KB; <= 0 means "use tape length x runtapes".
    pub maxdumpsize: i64,
    pub tape_length_kb: u64,
    pub tape_filemark_kb: u64,
    pub tape_blocksize_kb: u64,
    /// Seconds per requested estimate; a negative value is an absolute per-host timeout.
    pub etimeout: i64,
    pub ctimeout: u64,
    /// Percentage of holding space reserved for degraded mode. 100 means
    /// tape positions, not dates, decide the last level.
    pub reserve: u32,
    pub usetimestamps: bool,
    /// Whether forced full dumps may be delayed when nothing else makes the run fit.
    pub delay_forced_fulls: bool,
    pub estimate_port: u16,
    /// Bump defaults inherited by disks in the disk list.
    pub bump: BumpPolicy,
    /// Run timestamp override (like a `--starttime` argument).
    pub timestamp: Option<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            disklist_path: DEFAULT_DISKLIST_PATH.to_string(),
            config_name: DEFAULT_CONFIG_NAME.to_string(),
            dumpcycle: DEFAULT_DUMPCYCLE,
            runspercycle: 0,
            tapecycle: DEFAULT_TAPECYCLE,
            runtapes: 1,
            maxdumpsize: -1,
            tape_length_kb: DEFAULT_TAPE_LENGTH_KB,
            tape_filemark_kb: DEFAULT_TAPE_FILEMARK_KB,
            tape_blocksize_kb: DEFAULT_TAPE_BLOCKSIZE_KB,
            etimeout: DEFAULT_ETIMEOUT_SECS,
            ctimeout: DEFAULT_CTIMEOUT_SECS,
            reserve: 100,
            usetimestamps: true,
            delay_forced_fulls: true,
            estimate_port: DEFAULT_ESTIMATE_PORT,
            bump: BumpPolicy {
                percent: DEFAULT_BUMPPERCENT,
                size_kb: DEFAULT_BUMPSIZE_KB,
                mult: DEFAULT_BUMPMULT,
                days: DEFAULT_BUMPDAYS,
            },
            timestamp: None,
        }
    }
}

impl PlannerConfig {
    /// Load configuration, merging defaults with config file values and env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DP_CONFIG_PATH") {
            config.config_path = path;
        }

        let cfg_path = Path::new(&config.config_path);
        if cfg_path.exists() {
            let contents = fs::read_to_string(cfg_path)
                .with_context(|| format!("Failed to read config file: {}", config.config_path))?;
            config.parse_ini(&contents);
        }

        if let Ok(path) = std::env::var("DP_DB_PATH") {
            config.db_path = path;
        }
        if let Ok(path) = std::env::var("DP_DISKLIST_PATH") {
            config.disklist_path = path;
        }
        if let Ok(stamp) = std::env::var("DP_TIMESTAMP") {
            config.timestamp = Some(stamp);
        }

        config.validate()?;
        Ok(config)
    }

    /// Timeout for the capability probe sent before any estimate request.
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.ctimeout)
    }

    /// Timeout for an estimate request covering `levels` (disk, level) pairs.
    pub fn estimate_timeout(&self, levels: usize) -> Duration {
        if self.etimeout < 0 {
            Duration::from_secs(self.etimeout.unsigned_abs())
        } else {
            Duration::from_secs(self.etimeout.unsigned_abs().saturating_mul(levels as u64))
        }
    }
}
