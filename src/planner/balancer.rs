//! Pulling future full dumps into tonight to even out the cycle.

use super::context::SchedulerContext;
use super::error::PlannerResult;
use super::queue::{QueueKind, RecordId};
use crate::events::Event;
use tracing::{debug, info};

/// Hill days are only tracked this far ahead.
const MAX_HILL_DAYS: u32 = 10000;

/// Slot and on-media size of a usable, non-empty level-0 estimate.
fn level0_candidate(ctx: &SchedulerContext, id: RecordId) -> Option<(usize, u64)> {
    let rec = ctx.record(id);
    if rec.dump_level() == Some(0) {
        return None;
    }
    let slot = rec.estimate(0)?;
    if rec.levels[slot].native_size()? == 0 {
        return None;
    }
    Some((slot, rec.on_media_size(slot)?))
}

/// Switch a scheduled record to its full dump.
fn promote(ctx: &mut SchedulerContext, id: RecordId, slot: usize, special: bool) -> PlannerResult<()> {
    let rec = ctx.record(id);
    let days_ahead = rec.next_level0;
    let old_csize = rec.dump_csize();
    let new_csize = rec.on_media_size(slot).unwrap_or(0);

    ctx.totals.total_size = (ctx.totals.total_size + new_csize).saturating_sub(old_csize);
    ctx.totals.total_lev0 += new_csize;

    let rec = ctx.record_mut(id);
    rec.degraded = rec.dump;
    rec.dump = Some(slot);
    rec.next_level0 = 0;
    ctx.resort_scheduled(id)?;

    let plural = if days_ahead == 1 { "" } else { "s" };
    info!(
        "Full dump of {}:{} {}promoted from {} day{} ahead.",
        ctx.host_name(id),
        ctx.disk_name(id),
        if special { "specially " } else { "" },
        days_ahead,
        plural
    );
    ctx.publish(Event::Promoted {
        host: ctx.host_name(id).to_string(),
        disk: ctx.disk_name(id).to_string(),
        days_ahead,
        special,
    });
    Ok(())
}

/// Promote the best-scoring incremental to a full. Returns whether one was.
///
/// A candidate scores higher the fewer fulls its host already does tonight
/// and the more of its host's disks fall due on the same day.
pub(crate) fn promote_highest_priority_incremental(ctx: &mut SchedulerContext) -> PlannerResult<bool> {
    let scheduled = ctx.queues.ids(QueueKind::Scheduled);
    let dumpcycle = i32::try_from(ctx.config.dumpcycle).unwrap_or(i32::MAX);
    let mut best: Option<(RecordId, usize)> = None;

    for &id in &scheduled {
        ctx.record_mut(id).promote = -1000;
        let Some((slot, lev0_csize)) = level0_candidate(ctx, id) else {
            continue;
        };
        let rec = ctx.record(id);
        if rec.next_level0 <= 0 || rec.next_level0 > rec.disk.maxpromoteday {
            continue;
        }

        let new_total = (ctx.totals.total_size + lev0_csize).saturating_sub(rec.dump_csize());
        let new_lev0 = ctx.totals.total_lev0 + lev0_csize;

        let mut nb_today = 0_i32;
        let mut nb_same_day = 0_i32;
        let mut nb_disk_today = 0_u32;
        for &other in &scheduled {
            let o = ctx.record(other);
            let full_tonight = o.dump_level() == Some(0);
            let same_day = !full_tonight && o.next_level0 == rec.next_level0;
            if full_tonight {
                nb_disk_today += 1;
            }
            if o.host == rec.host {
                if full_tonight {
                    nb_today += 1;
                } else if same_day {
                    nb_same_day += 1;
                }
            }
        }

        if new_total > ctx.capacity.tape_length {
            continue;
        }
        if new_lev0 as f64 > ctx.totals.balanced_size + ctx.totals.balance_threshold && nb_disk_today > 0 {
            continue;
        }

        let nb_today2 = nb_today * nb_today;
        if nb_today == 0 && nb_same_day > 1 {
            nb_same_day += 1;
        }
        let score = if nb_same_day >= nb_today2 {
            (nb_same_day - nb_today2).pow(2) + dumpcycle - rec.next_level0
        } else {
            -nb_today2 + dumpcycle - rec.next_level0
        };
        ctx.record_mut(id).promote = score;

        let better = best.map_or(true, |(b, _)| ctx.record(b).promote < score);
        if better {
            debug!(
                "   try {}:{} {} {} {} = {}",
                ctx.host_name(id),
                ctx.disk_name(id),
                nb_same_day,
                nb_today,
                ctx.record(id).next_level0,
                score
            );
            best = Some((id, slot));
        }
    }

    let Some((id, slot)) = best else {
        return Ok(false);
    };
    promote(ctx, id, slot, false)?;
    Ok(true)
}

#[derive(Debug, Clone, Copy, Default)]
struct DayLoad {
    disks: u32,
    size: u64,
}

/// Break up the tallest day of future fulls by promoting one of its disks.
///
/// Only runs while tonight has no full at all; returns whether a disk was
/// promoted.
pub(crate) fn promote_hills(ctx: &mut SchedulerContext) -> PlannerResult<bool> {
    if ctx.totals.total_lev0 > 0 {
        return Ok(false);
    }

    let cycle = ctx.config.dumpcycle.min(MAX_HILL_DAYS) as usize;
    let mut days = vec![DayLoad::default(); cycle];
    let scheduled = ctx.queues.ids(QueueKind::Scheduled);

    for &id in &scheduled {
        let rec = ctx.record(id);
        let day = rec.next_level0.max(0) as usize;
        if day < cycle && rec.disk.takes_fulls() {
            days[day].disks += 1;
            days[day].size += rec.last_lev0size;
        }
    }

    loop {
        let hill = days
            .iter()
            .enumerate()
            .filter(|(_, d)| d.disks > 1 && d.size > 0)
            .fold(None, |tallest: Option<(usize, u64)>, (day, d)| match tallest {
                Some((_, size)) if size >= d.size => tallest,
                _ => Some((day, d.size)),
            });
        let Some((hill_day, hill_size)) = hill else {
            return Ok(false);
        };
        debug!("hill: day {} holds {} KB of fulls", hill_day, hill_size);

        for &id in &scheduled {
            let rec = ctx.record(id);
            if rec.next_level0 != hill_day as i32
                || rec.next_level0 > rec.disk.maxpromoteday
                || !rec.disk.takes_fulls()
            {
                continue;
            }
            let Some((slot, lev0_csize)) = level0_candidate(ctx, id) else {
                continue;
            };
            let new_total = (ctx.totals.total_size + lev0_csize).saturating_sub(rec.dump_csize());
            if new_total > ctx.capacity.tape_length {
                continue;
            }
            promote(ctx, id, slot, true)?;
            return Ok(true);
        }

        days[hill_day] = DayLoad::default();
    }
}

/// Run both promotion strategies over the fitted schedule.
pub(crate) fn balance(ctx: &mut SchedulerContext) -> PlannerResult<()> {
    let mut promoted = 0;
    while ctx.totals.balanced_size - ctx.totals.total_lev0 as f64 > ctx.totals.balance_threshold
        && promote_highest_priority_incremental(ctx)?
    {
        promoted += 1;
    }
    if promote_hills(ctx)? {
        promoted += 1;
    }
    info!(
        "Balancing done: {} promotion(s), total_lev0 {} KB of balanced {:.0} KB",
        promoted, ctx.totals.total_lev0, ctx.totals.balanced_size
    );
    Ok(())
}
