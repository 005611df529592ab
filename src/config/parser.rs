use super::settings::PlannerConfig;
use std::str::FromStr;
use tracing::warn;

fn parse_into<T: FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse() {
        Ok(v) => *slot = v,
        Err(_) => warn!("Ignoring unparsable value for {}: {:?}", key, value),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "yes" | "true" | "1" | "on")
}

impl PlannerConfig {
    /// Parse the simple KEY="VALUE" config format.
    pub(crate) fn parse_ini(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "CONFIG_NAME" => self.config_name = value.to_string(),
                "DB_PATH" => self.db_path = value.to_string(),
                "DISKLIST_PATH" => self.disklist_path = value.to_string(),
                "DUMPCYCLE" => parse_into(key, value, &mut self.dumpcycle),
                "RUNSPERCYCLE" => parse_into(key, value, &mut self.runspercycle),
                "TAPECYCLE" => parse_into(key, value, &mut self.tapecycle),
                "RUNTAPES" => parse_into(key, value, &mut self.runtapes),
                "MAXDUMPSIZE" => parse_into(key, value, &mut self.maxdumpsize),
                "TAPE_LENGTH" => parse_into(key, value, &mut self.tape_length_kb),
                "TAPE_FILEMARK" => parse_into(key, value, &mut self.tape_filemark_kb),
                "TAPE_BLOCKSIZE" => parse_into(key, value, &mut self.tape_blocksize_kb),
                "ETIMEOUT" => parse_into(key, value, &mut self.etimeout),
                "CTIMEOUT" => parse_into(key, value, &mut self.ctimeout),
                "RESERVE" => parse_into(key, value, &mut self.reserve),
                "ESTIMATE_PORT" => parse_into(key, value, &mut self.estimate_port),
                "BUMPPERCENT" => parse_into(key, value, &mut self.bump.percent),
                "BUMPSIZE" => parse_into(key, value, &mut self.bump.size_kb),
                "BUMPMULT" => parse_into(key, value, &mut self.bump.mult),
                "BUMPDAYS" => parse_into(key, value, &mut self.bump.days),
                "USETIMESTAMPS" => self.usetimestamps = parse_flag(value),
                "DELAY_FORCED_FULLS" => self.delay_forced_fulls = parse_flag(value),
                _ => {} // Ignore unknown keys
            }
        }
    }
}
