use super::error::{PlannerError, PlannerResult};
use super::queue::{QueueKind, Queues, RecordId};
use super::tapelist::TapeList;
use super::types::{DiskUnit, EstimateRecord, HostId};
use crate::config::PlannerConfig;
use crate::events::{Event, EventHub};
use crate::gather::FeatureSet;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::{info, warn};

/// Media geometry for tonight's run, all in KB.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Capacity {
    /// Usable space for the whole run.
    pub tape_length: u64,
    /// Length of one volume.
    pub volume_length: u64,
    pub runtapes: u32,
    pub blocksize: u64,
    pub filemark: u64,
}

impl Capacity {
    pub(crate) fn from_config(config: &PlannerConfig) -> Self {
        let runtapes = config.runtapes.max(1);
        let tape_length = if config.maxdumpsize > 0 {
            info!("tape_length is set from maxdumpsize ({} KB)", config.maxdumpsize);
            config.maxdumpsize.unsigned_abs()
        } else {
            let length = config.tape_length_kb.saturating_mul(u64::from(runtapes));
            info!(
                "tape_length is set from tape length ({} KB) * runtapes ({}) == {} KB",
                config.tape_length_kb, runtapes, length
            );
            length
        };
        Self {
            tape_length,
            volume_length: config.tape_length_kb,
            runtapes,
            blocksize: config.tape_blocksize_kb,
            filemark: config.tape_filemark_kb,
        }
    }

    /// Fixed cost of writing one dump file.
    pub(crate) const fn per_dump_overhead(&self) -> u64 {
        self.blocksize + self.filemark
    }

    /// An empty tape still has a label and an end mark.
    pub(crate) const fn empty_tape(&self) -> u64 {
        2 * self.per_dump_overhead()
    }

    /// Cost of scheduling a dump of `csize` KB.
    pub(crate) const fn dump_cost(&self, csize: u64) -> u64 {
        self.blocksize + csize + self.filemark
    }

    /// Largest dump a single disk may produce in one run.
    pub(crate) fn run_ceiling(&self, disk: &DiskUnit) -> u64 {
        if disk.splitsize > 0 || disk.allow_split {
            self.volume_length.saturating_mul(u64::from(self.runtapes))
        } else {
            self.volume_length
        }
    }
}

/// Priority descending, then chosen on-media size descending.
pub(crate) fn schedule_order(a: &EstimateRecord, b: &EstimateRecord) -> Ordering {
    b.dump_priority.cmp(&a.dump_priority).then_with(|| b.dump_csize().cmp(&a.dump_csize()))
}

/// Host progress through the estimate exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostState {
    Ready,
    Active,
    Done,
}

#[derive(Debug)]
pub(crate) struct HostEntry {
    pub name: String,
    pub state: HostState,
    /// Unknown until the capability probe has been answered.
    pub features: Option<FeatureSet>,
    pub disks: Vec<RecordId>,
    pub maxdumps: u32,
}

/// Running sizes of the schedule, in KB.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Totals {
    pub total_size: u64,
    pub total_lev0: u64,
    pub balanced_size: f64,
    pub balance_threshold: f64,
}

/// A disk deliberately left out of tonight's run.
#[derive(Debug, Clone)]
pub(crate) struct SkippedDisk {
    pub record: RecordId,
    pub level: u32,
    pub reason: String,
}

/// All mutable state of one planning run.
pub(crate) struct SchedulerContext {
    pub config: PlannerConfig,
    pub capacity: Capacity,
    pub records: Vec<EstimateRecord>,
    pub queues: Queues,
    pub hosts: Vec<HostEntry>,
    pub tapes: TapeList,
    /// Run identifier written on every output line.
    pub timestamp: String,
    pub today: DateTime<Utc>,
    pub runs_per_cycle: u32,
    pub totals: Totals,
    pub skipped: Vec<SkippedDisk>,
    pub events: EventHub,
}

impl SchedulerContext {
    /// Build the context for the `todo` disks of `disks`.
    pub(crate) fn new(
        config: PlannerConfig,
        disks: Vec<DiskUnit>,
        tapes: TapeList,
        today: DateTime<Utc>,
        events: EventHub,
    ) -> PlannerResult<Self> {
        if disks.is_empty() {
            return Err(PlannerError::EmptyDisklist);
        }

        let capacity = Capacity::from_config(&config);
        let timestamp = config.timestamp.clone().unwrap_or_else(|| {
            if config.usetimestamps {
                today.format("%Y%m%d%H%M%S").to_string()
            } else {
                today.format("%Y%m%d").to_string()
            }
        });

        let runs_per_cycle = match config.runspercycle {
            0 => config.dumpcycle,
            -1 => tapes.guess_runs(config.dumpcycle, today),
            n => u32::try_from(n).unwrap_or(1),
        }
        .max(1);
        if config.tapecycle <= runs_per_cycle {
            warn!(
                "tapecycle ({}) <= runspercycle ({}), the last full dumps will be overwritten",
                config.tapecycle, runs_per_cycle
            );
        }

        let mut ctx = Self {
            config,
            capacity,
            records: Vec::new(),
            queues: Queues::new(),
            hosts: Vec::new(),
            tapes,
            timestamp,
            today,
            runs_per_cycle,
            totals: Totals::default(),
            skipped: Vec::new(),
            events,
        };

        for disk in disks.into_iter().filter(|d| d.todo) {
            let host = ctx.host_id_for(&disk.host);
            let id = ctx.queues.register();
            let entry = &mut ctx.hosts[host.0];
            entry.disks.push(id);
            entry.maxdumps = entry.maxdumps.max(disk.maxdumps);
            ctx.records.push(EstimateRecord::new(disk, host));
        }

        if ctx.records.is_empty() {
            return Err(PlannerError::EmptyDisklist);
        }
        Ok(ctx)
    }

    fn host_id_for(&mut self, name: &str) -> HostId {
        if let Some(idx) = self.hosts.iter().position(|h| h.name == name) {
            return HostId(idx);
        }
        self.hosts.push(HostEntry {
            name: name.to_string(),
            state: HostState::Ready,
            features: None,
            disks: Vec::new(),
            maxdumps: 1,
        });
        HostId(self.hosts.len() - 1)
    }

    pub(crate) fn record(&self, id: RecordId) -> &EstimateRecord {
        &self.records[id.0]
    }

    pub(crate) fn record_mut(&mut self, id: RecordId) -> &mut EstimateRecord {
        &mut self.records[id.0]
    }

    pub(crate) fn record_ids(&self) -> impl Iterator<Item = RecordId> {
        (0..self.records.len()).map(RecordId)
    }

    pub(crate) fn host_name(&self, id: RecordId) -> &str {
        &self.hosts[self.record(id).host.0].name
    }

    pub(crate) fn disk_name(&self, id: RecordId) -> &str {
        &self.record(id).disk.name
    }

    pub(crate) fn publish(&self, event: Event) {
        self.events.publish(event);
    }

    pub(crate) fn schedule_order(&self, a: RecordId, b: RecordId) -> Ordering {
        schedule_order(self.record(a), self.record(b))
    }

    /// Insert into the scheduled queue at its sorted position.
    pub(crate) fn insert_scheduled(&mut self, id: RecordId) -> PlannerResult<()> {
        let records = &self.records;
        self.queues.insert_sorted(QueueKind::Scheduled, id, |a, b| {
            schedule_order(&records[a.0], &records[b.0])
        })?;
        Ok(())
    }

    /// Re-sort a scheduled record after its chosen dump changed.
    pub(crate) fn resort_scheduled(&mut self, id: RecordId) -> PlannerResult<()> {
        self.queues.remove(QueueKind::Scheduled, id)?;
        self.insert_scheduled(id)
    }

    /// Move a record that is on `from` to the failed queue with `reason`.
    pub(crate) fn fail_from(
        &mut self,
        id: RecordId,
        from: QueueKind,
        reason: impl Into<String>,
    ) -> PlannerResult<()> {
        self.queues.move_to(id, from, QueueKind::Failed)?;
        self.record_mut(id).errstr = Some(reason.into());
        Ok(())
    }

    /// Put a record that is on no queue onto the failed queue.
    pub(crate) fn fail_unqueued(&mut self, id: RecordId, reason: impl Into<String>) -> PlannerResult<()> {
        self.queues.enqueue(QueueKind::Failed, id)?;
        self.record_mut(id).errstr = Some(reason.into());
        Ok(())
    }

    /// Record an explicit skip; the record stays off every queue.
    pub(crate) fn skip(&mut self, id: RecordId, level: u32, reason: &str) {
        info!("{}:{} lev {} skipped: {}", self.host_name(id), self.disk_name(id), level, reason);
        self.publish(Event::Skipped {
            host: self.host_name(id).to_string(),
            disk: self.disk_name(id).to_string(),
            level,
            reason: reason.to_string(),
        });
        self.skipped.push(SkippedDisk { record: id, level, reason: reason.to_string() });
    }
}
