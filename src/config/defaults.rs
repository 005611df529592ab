/// Default path of the planner configuration file.
pub(super) const DEFAULT_CONFIG_PATH: &str = "/etc/dump-planner/planner.cfg";

/// Default path for the SQLite history store.
pub(super) const DEFAULT_DB_PATH: &str = "/var/lib/dump-planner/history.db";

/// Default path of the disk list.
pub(super) const DEFAULT_DISKLIST_PATH: &str = "/etc/dump-planner/disklist";

/// Default configuration name announced to clients.
pub(super) const DEFAULT_CONFIG_NAME: &str = "daily";

/// Days over which every disk should receive a full dump.
pub(super) const DEFAULT_DUMPCYCLE: u32 = 10;

/// Number of tapes in rotation.
pub(super) const DEFAULT_TAPECYCLE: u32 = 15;

/// Tape geometry (KB). The length is deliberately tiny so an unconfigured
/// installation schedules almost nothing rather than overrunning media.
pub(super) const DEFAULT_TAPE_LENGTH_KB: u64 = 2000;
pub(super) const DEFAULT_TAPE_FILEMARK_KB: u64 = 1;
pub(super) const DEFAULT_TAPE_BLOCKSIZE_KB: u64 = 32;

/// Seconds allowed per requested estimate (negative = absolute per host).
pub(super) const DEFAULT_ETIMEOUT_SECS: i64 = 300;

/// Seconds allowed for the capability probe.
pub(super) const DEFAULT_CTIMEOUT_SECS: u64 = 30;

/// Default TCP port of the estimate service on clients.
pub(super) const DEFAULT_ESTIMATE_PORT: u16 = 10080;

/// Global bump defaults, inherited by every disk that does not override them.
pub(super) const DEFAULT_BUMPPERCENT: u32 = 0;
pub(super) const DEFAULT_BUMPSIZE_KB: u64 = 10 * 1024;
pub(super) const DEFAULT_BUMPMULT: f64 = 1.5;
pub(super) const DEFAULT_BUMPDAYS: u32 = 2;
