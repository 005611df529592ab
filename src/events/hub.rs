use serde::Serialize;
use tokio::sync::broadcast;

/// Operator-facing notices produced while planning a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    /// A disk has no history yet.
    DiskAdded { host: String, disk: String },

    /// A pending operator directive changed tonight's plan.
    DirectiveApplied { host: String, disk: String, message: String },

    /// The tape holding a disk's last dump at `level` is about to be reused.
    OverwriteWarning {
        host: String,
        disk: String,
        level: u32,
        label: String,
        /// 0 means this run.
        runs: i64,
    },

    /// An incremental moved up a level.
    Bumped { host: String, disk: String, level: u32 },

    /// A disk got no usable estimate and will not be dumped.
    EstimateFailed { host: String, disk: String, level: u32, reason: String },

    /// A dump was downgraded or dropped to make the run fit.
    Delayed { host: String, disk: String, level: u32, deleted: bool, reason: String },

    /// A disk was left out on purpose.
    Skipped { host: String, disk: String, level: u32, reason: String },

    /// A future full dump was pulled into tonight.
    Promoted { host: String, disk: String, days_ahead: i32, special: bool },

    /// Anything else the operator should read.
    Warning { message: String },

    /// The schedule has been produced.
    RunFinished { scheduled: u32, failed: u32, skipped: u32, total_size_kb: u64 },
}

impl Event {
    /// Short type name for this event variant.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::DiskAdded { .. } => "disk_added",
            Self::DirectiveApplied { .. } => "directive_applied",
            Self::OverwriteWarning { .. } => "overwrite_warning",
            Self::Bumped { .. } => "bumped",
            Self::EstimateFailed { .. } => "estimate_failed",
            Self::Delayed { .. } => "delayed",
            Self::Skipped { .. } => "skipped",
            Self::Promoted { .. } => "promoted",
            Self::Warning { .. } => "warning",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

/// The central event broadcast hub.
///
/// The planner publishes; the binary subscribes and forwards to the log.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Event>,
}

impl EventHub {
    /// Create a new EventHub with the given channel capacity.
    ///
    /// Subscribers that fall more than `capacity` events behind receive
    /// `Lagged` and miss the intermediate events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Having none is fine.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}
