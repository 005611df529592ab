use super::context::SchedulerContext;
use super::error::PlannerResult;
use super::queue::{QueueKind, RecordId};
use super::types::{BumpPolicy, EstimateRecord, Strategy, DUMP_LEVELS, PROMOTE_THRESHOLD};
use crate::events::Event;
use tracing::{debug, info, warn};

/// Size reduction (KB) an incremental must offer before moving up from `level`.
///
/// `size_level0` only scales the threshold when it is above 1 MB.
pub(crate) fn bump_threshold(level: u32, size_level0: u64, policy: &BumpPolicy) -> u64 {
    let mut bump = if policy.percent != 0 && size_level0 > 1024 {
        size_level0 as f64 * f64::from(policy.percent) / 100.0
    } else {
        policy.size_kb as f64
    };
    for _ in 1..level {
        bump *= policy.mult;
    }
    bump as u64
}

/// Outcome of choosing an incremental level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LevelPick {
    /// A slot holding a usable estimate.
    Usable(usize),
    /// The level to use has no estimate.
    Unmeasured(u32),
    /// The disk has no incremental level at all.
    Missing,
}

fn pick_at(rec: &EstimateRecord, level: u32) -> LevelPick {
    rec.estimate(level).map_or(LevelPick::Unmeasured(level), LevelPick::Usable)
}

/// Level-0 size used to scale the bump threshold: tonight's estimate if
/// there is one, else the last full's size.
fn bump_base_size(rec: &EstimateRecord) -> u64 {
    rec.native_size_at(0)
        .or_else(|| rec.history.as_ref().map(|h| h.level_size(0)))
        .unwrap_or(0)
}

/// Choose the incremental level for tonight.
pub(crate) fn pick_incremental_level(ctx: &SchedulerContext, id: RecordId) -> LevelPick {
    let rec = ctx.record(id);

    let Some(last) = rec.last_level else {
        return match rec.estimate(0) {
            Some(slot) if rec.levels[slot].native_size() > Some(0) => LevelPick::Usable(slot),
            _ => LevelPick::Missing,
        };
    };

    if last == 0 {
        debug!("picklev: last night 0, so tonight level 1");
        return pick_at(rec, 1);
    }
    if rec.disk.strategy == Strategy::NoFull {
        debug!("picklev: no-full set, so always level 1");
        return pick_at(rec, 1);
    }

    let Some(base) = rec.estimate(last) else {
        if let Some(slot) = rec.estimate(last + 1) {
            if rec.levels[slot].native_size() > Some(0) {
                debug!("picklev: bumping to level {}", last + 1);
                return LevelPick::Usable(slot);
            }
        }
        debug!("picklev: no estimate for level {}, so no incs", last);
        return LevelPick::Unmeasured(last);
    };

    let base_size = rec.levels[base].native_size().unwrap_or(0);
    let thresh = bump_threshold(last, bump_base_size(rec), &rec.disk.bump);
    debug!(
        "pick: size {} level {} days {} (thresh {}K, {} days)",
        base_size, last, rec.level_days, thresh, rec.disk.bump.days
    );

    if last == DUMP_LEVELS - 1 || rec.level_days < rec.disk.bump.days || base_size <= thresh {
        return LevelPick::Usable(base);
    }

    let Some(bumped) = rec.estimate(last + 1) else {
        return LevelPick::Usable(base);
    };
    let bump_size = rec.levels[bumped].native_size().unwrap_or(0);
    if base_size.saturating_sub(bump_size) <= thresh {
        debug!("pick: next size {}... not bumped", bump_size);
        return LevelPick::Usable(base);
    }

    info!(
        "Incremental of {}:{} bumped to level {}.",
        ctx.host_name(id),
        ctx.disk_name(id),
        last + 1
    );
    ctx.publish(Event::Bumped {
        host: ctx.host_name(id).to_string(),
        disk: ctx.disk_name(id).to_string(),
        level: last + 1,
    });
    LevelPick::Usable(bumped)
}

/// Slot for a pick, stepping one level up when the picked level is unmeasured.
fn resolve_pick(rec: &EstimateRecord, pick: LevelPick) -> Option<usize> {
    match pick {
        LevelPick::Usable(slot) => Some(slot),
        LevelPick::Unmeasured(level) => rec.estimate(level + 1),
        LevelPick::Missing => None,
    }
}

/// Decide tonight's level and the degraded-mode fallback of one estimated
/// record, then insert it into the schedule.
pub(crate) fn analyze_estimate(ctx: &mut SchedulerContext, id: RecordId) -> PlannerResult<()> {
    let rec = ctx.record(id);
    debug!(
        "pondering {}:{}... next_level0 {} last_level {:?}",
        ctx.host_name(id),
        ctx.disk_name(id),
        rec.next_level0,
        rec.last_level
    );

    let due = rec.next_level0 <= 0 || (rec.last_level == Some(0) && rec.directives.force_no_bump);
    let mut degraded = None;
    let mut degraded_reason: Option<&'static str> = None;

    let dump = if due {
        match rec.estimate(0) {
            Some(full) => {
                if rec.levels[full].native_size() == Some(0) {
                    warn!(
                        "{}:{} level 0 estimate is 0 KB, using it anyway",
                        ctx.host_name(id),
                        ctx.disk_name(id)
                    );
                }
                if rec.is_new() || rec.disk.skip_incr {
                    let kind = if rec.disk.skip_incr { "skip-incr" } else { "new" };
                    debug!("({} disk, can't switch to degraded mode)", kind);
                    if rec.disk.skip_incr {
                        degraded_reason = Some("skip-incr disk can't be dumped in degraded mode");
                    }
                } else {
                    degraded = resolve_pick(rec, pick_incremental_level(ctx, id))
                        .filter(|&slot| rec.levels[slot].level > 0);
                    if degraded.is_none() {
                        degraded_reason = Some(
                            "an incremental estimate could not be performed, so disk cannot be dumped in degraded mode",
                        );
                    }
                }
                Some(full)
            }
            None => {
                debug!("(no estimate for level 0, picking an incr level)");
                resolve_pick(rec, pick_incremental_level(ctx, id))
            }
        }
    } else {
        debug!("(not due for a full dump, picking an incr level)");
        degraded_reason = Some("a full is not planned, so can't dump in degraded mode");
        let last = rec.last_level;
        let picked = match pick_incremental_level(ctx, id) {
            LevelPick::Usable(slot) => Some(slot),
            _ => None,
        };
        picked
            .or_else(|| last.and_then(|l| rec.estimate(l)))
            .or_else(|| rec.estimate(last.map_or(0, |l| l + 1)))
            .or_else(|| rec.estimate(0))
    };

    let Some(dump) = dump else {
        warn!("{}:{} no valid estimate", ctx.host_name(id), ctx.disk_name(id));
        for est in &rec.levels {
            debug!("    level: {}  size: {:?}", est.level, est.size);
        }
        return ctx.fail_unqueued(id, "no estimate");
    };

    let rec = ctx.record_mut(id);
    rec.dump = Some(dump);
    rec.degraded = degraded;
    if rec.degraded_reason.is_none() {
        rec.degraded_reason = degraded_reason.map(str::to_string);
    }
    let csize = rec.dump_csize();
    let is_full = rec.dump_level() == Some(0);
    let lev0size = rec
        .disk
        .takes_fulls()
        .then(|| rec.on_media_size_at(0).unwrap_or(rec.last_lev0size));
    let strategy = rec.disk.strategy;
    let disk_cycle = u64::from(rec.disk.dumpcycle);

    ctx.insert_scheduled(id)?;

    ctx.totals.total_size += ctx.capacity.dump_cost(csize);
    if is_full {
        ctx.totals.total_lev0 += csize;
    }

    if let Some(lev0size) = lev0size {
        let conf_cycle = u64::from(ctx.config.dumpcycle);
        let runs = u64::from(ctx.runs_per_cycle.max(1));
        let share = if strategy == Strategy::NoInc {
            lev0size
        } else if disk_cycle == 0 {
            lev0size * conf_cycle / runs
        } else if disk_cycle != conf_cycle {
            lev0size * (conf_cycle / disk_cycle) / runs
        } else {
            lev0size / runs
        };
        ctx.totals.balanced_size += share as f64;
    }

    debug!(
        "{}:{} curr level {:?} csize {} total size {} total_lev0 {} balanced-lev0size {:.0}",
        ctx.host_name(id),
        ctx.disk_name(id),
        ctx.record(id).dump_level(),
        csize,
        ctx.totals.total_size,
        ctx.totals.total_lev0,
        ctx.totals.balanced_size
    );

    // The estimate succeeded but the client still reported a problem.
    if let Some(errstr) = ctx.record(id).errstr.clone() {
        let message = format!("{}:{} {}", ctx.host_name(id), ctx.disk_name(id), errstr);
        warn!("{}", message);
        ctx.publish(Event::Warning { message });
    }
    Ok(())
}

/// Analyze every record on the estimated queue, building the schedule.
pub(crate) fn analyze_estimates(ctx: &mut SchedulerContext) -> PlannerResult<()> {
    ctx.totals.total_size = ctx.capacity.empty_tape();
    ctx.totals.total_lev0 = 0;
    ctx.totals.balanced_size = 0.0;

    while let Some(id) = ctx.queues.dequeue(QueueKind::Estimated) {
        analyze_estimate(ctx, id)?;
    }

    ctx.totals.balance_threshold = ctx.totals.balanced_size * PROMOTE_THRESHOLD;
    info!(
        "Analyzing estimates done: {} scheduled, total size {} KB, total_lev0 {} KB, balanced {:.0} KB",
        ctx.queues.len(QueueKind::Scheduled),
        ctx.totals.total_size,
        ctx.totals.total_lev0,
        ctx.totals.balanced_size
    );
    Ok(())
}
