use super::settings::PlannerConfig;
use anyhow::Result;

impl PlannerConfig {
    /// Validate configuration values are sane.
    pub(crate) fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.dumpcycle >= 1, "dumpcycle must be >= 1");
        anyhow::ensure!(self.runspercycle >= -1, "runspercycle must be >= -1");
        anyhow::ensure!(self.runtapes >= 1, "runtapes must be >= 1");
        anyhow::ensure!(self.tape_length_kb > 0, "tape length must be > 0");
        anyhow::ensure!(self.reserve <= 100, "reserve must be between 0 and 100");
        anyhow::ensure!(self.etimeout != 0, "etimeout must not be 0");
        anyhow::ensure!(self.estimate_port > 0, "estimate port must be > 0");
        anyhow::ensure!(self.bump.percent <= 100, "bumppercent must be between 0 and 100");
        anyhow::ensure!(self.bump.mult >= 1.0, "bumpmult must be >= 1.0");
        anyhow::ensure!(self.bump.days >= 1, "bumpdays must be >= 1");
        Ok(())
    }
}
