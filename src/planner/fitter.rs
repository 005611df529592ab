//! Fitting the schedule onto tonight's media.
//!
//! Passes run in order: oversize dumps, fulls, forced fulls (when allowed),
//! incrementals. Every change is recorded on a before-image log which is then
//! replayed newest first to undo whatever turned out not to be needed.

use super::context::SchedulerContext;
use super::error::{PlannerError, PlannerResult};
use super::queue::{QueueKind, RecordId};
use crate::events::Event;
use crate::gather::protocol::quote_string;
use tracing::{debug, info, warn};

/// A record's schedule entry as it was before the fitter changed it.
#[derive(Debug, Clone)]
pub(crate) struct BeforeImage {
    pub record: RecordId,
    /// Dropped from the schedule rather than downgraded.
    pub deleted: bool,
    pub slot: usize,
    pub level: u32,
    pub nsize: u64,
    pub csize: u64,
    pub message: String,
}

/// Undo log of the fitting passes, oldest change first.
#[derive(Debug, Default)]
pub(crate) struct BeforeImageLog {
    images: Vec<BeforeImage>,
}

impl BeforeImageLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.images.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &BeforeImage> {
        self.images.iter()
    }

    fn push(&mut self, image: BeforeImage) {
        self.images.push(image);
    }

    /// Undo changes, newest first, while the restored dump still fits.
    ///
    /// Every image is resolved: reinstated ones are applied, the rest are
    /// returned as final. The log is empty afterwards, so a second call is a
    /// no-op.
    pub(crate) fn reinstate(&mut self, ctx: &mut SchedulerContext) -> PlannerResult<Vec<BeforeImage>> {
        let tape_length = ctx.capacity.tape_length;
        let mut kept = Vec::new();

        while let Some(bi) = self.images.pop() {
            let on_schedule = ctx.queues.queue_of(bi.record) == Some(QueueKind::Scheduled);
            let new_total = if bi.deleted {
                (!on_schedule).then(|| ctx.totals.total_size + ctx.capacity.dump_cost(bi.csize))
            } else {
                on_schedule.then(|| {
                    (ctx.totals.total_size + bi.csize).saturating_sub(ctx.record(bi.record).dump_csize())
                })
            };
            let ceiling = ctx.capacity.run_ceiling(&ctx.record(bi.record).disk);

            match new_total {
                Some(total) if total <= tape_length && bi.csize <= ceiling => {
                    debug!(
                        "reinstate: {}:{} level {} ({} KB native, {} KB on media), new total {} KB",
                        ctx.host_name(bi.record),
                        ctx.disk_name(bi.record),
                        bi.level,
                        bi.nsize,
                        bi.csize,
                        total
                    );
                    ctx.totals.total_size = total;
                    ctx.record_mut(bi.record).dump = Some(bi.slot);
                    if bi.deleted {
                        ctx.insert_scheduled(bi.record)?;
                    } else {
                        ctx.resort_scheduled(bi.record)?;
                    }
                    if bi.level == 0 {
                        ctx.totals.total_lev0 += bi.csize;
                    }
                }
                Some(_) | None => kept.push(bi),
            }
        }

        kept.reverse();
        Ok(kept)
    }
}

fn scheduled_csize(ctx: &SchedulerContext, id: RecordId) -> String {
    format!("{} KB,", ctx.record(id).dump_csize())
}

/// Remove or downgrade one scheduled dump, logging its before-image.
fn delay_one_dump(
    ctx: &mut SchedulerContext,
    log: &mut BeforeImageLog,
    id: RecordId,
    delete: bool,
    reasons: &[&str],
) -> PlannerResult<()> {
    let rec = ctx.record(id);
    let slot = rec.dump.ok_or(PlannerError::WrongQueue { record: id.0, expected: QueueKind::Scheduled })?;
    let level = rec.levels[slot].level;
    let nsize = rec.levels[slot].native_size().unwrap_or(0);
    let csize = rec.dump_csize();
    let degraded = rec.degraded;

    let message = format!(
        "{} {} {} {} {}",
        ctx.host_name(id),
        quote_string(ctx.disk_name(id)),
        ctx.timestamp,
        level,
        quote_string(&format!("[{}]", reasons.join(" ")))
    );
    debug!("delay: {}", message);

    ctx.totals.total_size = ctx.totals.total_size.saturating_sub(ctx.capacity.dump_cost(csize));
    if level == 0 {
        ctx.totals.total_lev0 = ctx.totals.total_lev0.saturating_sub(csize);
    }
    log.push(BeforeImage { record: id, deleted: delete, slot, level, nsize, csize, message });

    match (delete, degraded) {
        (false, Some(fallback)) => {
            ctx.record_mut(id).dump = Some(fallback);
            let new_csize = ctx.record(id).dump_csize();
            ctx.totals.total_size += ctx.capacity.dump_cost(new_csize);
            ctx.resort_scheduled(id)?;
        }
        (true, _) | (false, None) => {
            ctx.queues.remove(QueueKind::Scheduled, id)?;
            ctx.record_mut(id).errstr = Some(reasons.join(" "));
        }
    }
    Ok(())
}

/// Why a full cannot simply fall back to its incremental, if it cannot.
fn cannot_degrade(ctx: &SchedulerContext, id: RecordId) -> Option<&'static str> {
    let rec = ctx.record(id);
    if rec.disk.skip_incr {
        Some("but cannot incremental dump skip-incr disk")
    } else if rec.is_new() {
        Some("but cannot incremental dump new disk")
    } else if rec.degraded.is_none() {
        Some("but no incremental estimate")
    } else {
        None
    }
}

/// Handle dumps that cannot fit in one run whatever else happens.
fn delay_oversize(ctx: &mut SchedulerContext, log: &mut BeforeImageLog) -> PlannerResult<()> {
    for id in ctx.queues.ids(QueueKind::Scheduled) {
        let rec = ctx.record(id);
        let csize = rec.dump_csize();
        let ceiling = ctx.capacity.run_ceiling(&rec.disk);
        if csize <= ceiling {
            continue;
        }

        if ctx.capacity.runtapes > 1 && rec.disk.splitsize == 0 && !rec.disk.allow_split {
            warn!(
                "{}:{} ({} KB) does not fit on one volume; a splitsize would let it span {} volumes",
                ctx.host_name(id),
                ctx.disk_name(id),
                csize,
                ctx.capacity.runtapes
            );
        }

        let (delete, message) = if rec.dump_level() == Some(0) {
            match cannot_degrade(ctx, id) {
                Some(reason) => (true, reason),
                None => {
                    let degr_csize = rec.degraded.and_then(|slot| rec.on_media_size(slot)).unwrap_or(0);
                    if degr_csize > ctx.capacity.volume_length {
                        (true, "incremental dump also larger than tape")
                    } else {
                        (false, "full dump delayed, doing incremental")
                    }
                }
            }
        } else {
            (true, "skipping incremental")
        };

        let size = scheduled_csize(ctx, id);
        delay_one_dump(ctx, log, id, delete, &["dump larger than available tape space,", &size, message])?;
    }
    Ok(())
}

/// Lowest priority, oldest full without a force-full directive.
fn next_full_to_delay(ctx: &SchedulerContext) -> Option<RecordId> {
    ctx.queues
        .ids(QueueKind::Scheduled)
        .into_iter()
        .filter(|&id| {
            let rec = ctx.record(id);
            rec.dump_level() == Some(0) && !rec.directives.force_full
        })
        .min_by_key(|&id| {
            let rec = ctx.record(id);
            (rec.dump_priority, rec.lev0_date.unwrap_or(i64::MAX))
        })
}

fn delay_fulls(ctx: &mut SchedulerContext, log: &mut BeforeImageLog) -> PlannerResult<()> {
    while ctx.totals.total_size > ctx.capacity.tape_length {
        let Some(id) = next_full_to_delay(ctx) else {
            break;
        };
        let (delete, message) = match cannot_degrade(ctx, id) {
            Some(reason) => (true, reason),
            None => (false, "full dump delayed, doing incremental"),
        };
        let size = scheduled_csize(ctx, id);
        delay_one_dump(ctx, log, id, delete, &["dumps too big,", &size, message])?;
    }
    Ok(())
}

/// The full kept whatever happens: highest priority, then oldest.
fn preserved_full(ctx: &SchedulerContext) -> Option<RecordId> {
    ctx.queues
        .ids(QueueKind::Scheduled)
        .into_iter()
        .filter(|&id| ctx.record(id).dump_level() == Some(0))
        .min_by_key(|&id| {
            let rec = ctx.record(id);
            (-rec.dump_priority, rec.lev0_date.unwrap_or(i64::MAX))
        })
}

fn delay_forced_fulls(ctx: &mut SchedulerContext, log: &mut BeforeImageLog) -> PlannerResult<()> {
    let preserve = preserved_full(ctx);
    let mut cur = ctx.queues.tail(QueueKind::Scheduled);
    while let Some(id) = cur {
        if ctx.totals.total_size <= ctx.capacity.tape_length {
            break;
        }
        cur = ctx.queues.prev(id);
        let rec = ctx.record(id);
        if Some(id) == preserve || rec.dump_level() != Some(0) || !rec.directives.force_full {
            continue;
        }
        let (delete, message) = match cannot_degrade(ctx, id) {
            Some(reason) => (true, reason),
            None => (false, "full dump delayed"),
        };
        let size = scheduled_csize(ctx, id);
        delay_one_dump(ctx, log, id, delete, &["dumps too big,", &size, message])?;
    }
    Ok(())
}

fn delay_incrementals(ctx: &mut SchedulerContext, log: &mut BeforeImageLog) -> PlannerResult<()> {
    let mut cur = ctx.queues.tail(QueueKind::Scheduled);
    while let Some(id) = cur {
        if ctx.totals.total_size <= ctx.capacity.tape_length {
            break;
        }
        cur = ctx.queues.prev(id);
        if ctx.record(id).dump_level() == Some(0) {
            continue;
        }
        let size = scheduled_csize(ctx, id);
        delay_one_dump(ctx, log, id, true, &["dumps way too big,", &size, "must skip incremental dumps"])?;
    }
    Ok(())
}

/// Downgrade or drop dumps until the schedule fits, recording each change.
pub(crate) fn delay_dumps(ctx: &mut SchedulerContext, log: &mut BeforeImageLog) -> PlannerResult<()> {
    delay_oversize(ctx, log)?;
    delay_fulls(ctx, log)?;
    if ctx.config.delay_forced_fulls && ctx.totals.total_size > ctx.capacity.tape_length {
        delay_forced_fulls(ctx, log)?;
    }
    delay_incrementals(ctx, log)
}

/// Report the changes that stand: dropped dumps fail, downgrades are noted.
fn settle(ctx: &mut SchedulerContext, images: Vec<BeforeImage>) -> PlannerResult<()> {
    for bi in images {
        let host = ctx.host_name(bi.record).to_string();
        let disk = ctx.disk_name(bi.record).to_string();
        info!("{}", bi.message);
        ctx.publish(Event::Delayed {
            host,
            disk,
            level: bi.level,
            deleted: bi.deleted,
            reason: bi.message.clone(),
        });
        if ctx.queues.queue_of(bi.record).is_none() {
            ctx.queues.enqueue(QueueKind::Failed, bi.record)?;
        }
    }
    Ok(())
}

/// Shrink the schedule until it fits on tonight's media.
///
/// Fails when nothing at all can be scheduled or the total still does not fit.
pub(crate) fn fit(ctx: &mut SchedulerContext) -> PlannerResult<()> {
    let tape_length = ctx.capacity.tape_length;
    let had_dumps = !ctx.queues.is_empty(QueueKind::Scheduled);
    let mut log = BeforeImageLog::new();

    info!("Fitting schedule: total size {} KB, tape length {} KB", ctx.totals.total_size, tape_length);
    delay_dumps(ctx, &mut log)?;

    let delayed = log.len();
    let deleted = log.iter().filter(|bi| bi.deleted).count();
    let kept = if log.is_empty() { Vec::new() } else { log.reinstate(ctx)? };
    info!(
        "Fitting done: {} change(s), {} deletion(s), {} reinstated",
        delayed,
        deleted,
        delayed - kept.len()
    );
    settle(ctx, kept)?;

    if had_dumps && ctx.queues.is_empty(QueueKind::Scheduled) {
        return Err(PlannerError::Unfittable("no dump fits on tonight's media".to_string()));
    }
    if ctx.totals.total_size > tape_length {
        return Err(PlannerError::Unfittable(format!(
            "total size {} KB exceeds tape length {} KB",
            ctx.totals.total_size, tape_length
        )));
    }
    Ok(())
}
