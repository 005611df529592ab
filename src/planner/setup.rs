use super::context::SchedulerContext;
use super::error::PlannerResult;
use super::estimator::bump_threshold;
use super::queue::{QueueKind, RecordId};
use super::tapelist::{days_diff, TapeList};
use super::types::{
    Compression, Encryption, HoldingPolicy, LevelEstimate, Strategy, DUMP_LEVELS, MAX_LEVELS,
    RUNS_REDZONE,
};
use crate::db::{perf_average, Database, HistoryRecord};
use crate::events::Event;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Format a unix time as a client dump-date watermark (`Y:M:D:h:m:s`, UTC).
pub(crate) fn format_dumpdate(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .format("%Y:%-m:%-d:%-H:%-M:%-S")
        .to_string()
}

/// Watermark for a level-`level` dump: the newest dump at any lower level.
pub(crate) fn dumpdate_for(info: &HistoryRecord, level: u32) -> String {
    let newest = (0..level).filter_map(|l| info.level_date(l)).max().unwrap_or(0);
    format_dumpdate(newest.max(0))
}

/// Level of the last successful dump, from the record or from the per-level history.
pub(crate) fn last_level(info: &HistoryRecord, tapes: &TapeList, reserve: u32) -> Option<u32> {
    if info.last_level.is_some() {
        return info.last_level;
    }

    let lev0_date = info.level_date(0).unwrap_or(-1);
    let mut found = None;
    let mut last_date = 0;
    let mut min_pos = u32::MAX;

    for level in 0..9 {
        let date = info.level_date(level).unwrap_or(-1);
        if level > 0 && date < lev0_date {
            continue;
        }
        if reserve < 100 {
            if date > last_date {
                last_date = date;
                found = Some(level);
            }
        } else {
            let Some(tape) = info.level_label(level).and_then(|l| tapes.lookup(l)) else {
                continue;
            };
            if tape.position < min_pos {
                min_pos = tape.position;
                found = Some(level);
            }
        }
    }
    found
}

/// Days until the next full is due. Zero or negative means due tonight.
pub(crate) fn next_level0(
    strategy: Strategy,
    dumpcycle: u32,
    info: &HistoryRecord,
    today: DateTime<Utc>,
) -> i32 {
    match strategy {
        Strategy::NoFull | Strategy::IncrOnly => 1,
        Strategy::NoInc => 0,
        Strategy::Standard => match info.level_date(0) {
            None => -days_diff(0, today.timestamp()),
            Some(date) => {
                i32::try_from(dumpcycle).unwrap_or(i32::MAX) - days_diff(date, today.timestamp())
            }
        },
    }
}

/// Consecutive runs at `level`, zero unless it is the last level dumped.
pub(crate) fn runs_at(
    info: &HistoryRecord,
    level: Option<u32>,
    tapes: &TapeList,
    reserve: u32,
    runtapes: u32,
) -> u32 {
    let Some(level) = level else {
        return 0;
    };
    if last_level(info, tapes, reserve) != Some(level) {
        return 0;
    }
    if let Some(runs) = info.consecutive_runs {
        return runs;
    }
    if level == 0 {
        return 1;
    }
    let cur = info.level_label(level).and_then(|l| tapes.lookup(l));
    let old = info.level_label(level - 1).and_then(|l| tapes.lookup(l));
    match (cur, old) {
        (Some(cur), Some(old)) => old.position.saturating_sub(cur.position) / runtapes.max(1),
        _ => 0,
    }
}

/// Read every disk's history and prepare its estimate request.
pub(crate) fn setup_estimates(ctx: &mut SchedulerContext, db: &Database) -> PlannerResult<()> {
    let ids: Vec<RecordId> = ctx.record_ids().collect();
    for id in ids {
        let info = {
            let rec = ctx.record(id);
            db.get_record(ctx.host_name(id), &rec.disk.name)?
        };
        setup_estimate(ctx, id, info)?;
    }
    info!(
        "Estimates set up: {} queued, {} failed, {} skipped",
        ctx.queues.len(QueueKind::Start),
        ctx.queues.len(QueueKind::Failed),
        ctx.skipped.len()
    );
    Ok(())
}

fn directive(ctx: &SchedulerContext, id: RecordId, message: String) {
    info!("{}", message);
    ctx.publish(Event::DirectiveApplied {
        host: ctx.host_name(id).to_string(),
        disk: ctx.disk_name(id).to_string(),
        message,
    });
}

fn overwrite_warning(ctx: &SchedulerContext, id: RecordId, level: u32, label: &str, runs: i64) {
    warn!(
        "Last level {} dump of {}:{} on tape {} overwritten in {} run(s)",
        level,
        ctx.host_name(id),
        ctx.disk_name(id),
        label,
        runs
    );
    ctx.publish(Event::OverwriteWarning {
        host: ctx.host_name(id).to_string(),
        disk: ctx.disk_name(id).to_string(),
        level,
        label: label.to_string(),
        runs,
    });
}

/// Compute the history-derived fields of one record and queue it on the
/// start queue, or fail or skip it when it cannot be dumped tonight.
pub(crate) fn setup_estimate(
    ctx: &mut SchedulerContext,
    id: RecordId,
    info: Option<HistoryRecord>,
) -> PlannerResult<()> {
    let host = ctx.host_name(id).to_string();
    let name = ctx.disk_name(id).to_string();
    debug!("setting up estimates for {}:{}", host, name);

    if info.is_none() {
        info!("Adding new disk {}:{}.", host, name);
        ctx.publish(Event::DiskAdded { host: host.clone(), disk: name.clone() });
    }
    let info = info.unwrap_or_default();

    let disk = ctx.record(id).disk.clone();
    if disk.directtcp {
        let refusal = if disk.compress != Compression::None {
            Some("Can't compress directtcp data-path")
        } else if disk.encrypt != Encryption::None {
            Some("Can't encrypt directtcp data-path")
        } else if disk.holding == HoldingPolicy::Required {
            Some("Holding disk can't be use for directtcp data-path")
        } else {
            None
        };
        if let Some(reason) = refusal {
            warn!("{}:{} lev 0 skipped: {}", host, name, reason);
            return ctx.fail_unqueued(id, reason);
        }
        if disk.holding == HoldingPolicy::Auto {
            debug!("{}:{} Disabling holding disk", host, name);
            ctx.record_mut(id).disk.holding = HoldingPolicy::Never;
        }
    }

    let reserve = ctx.config.reserve;
    let conf_dumpcycle = i32::try_from(ctx.config.dumpcycle).unwrap_or(i32::MAX);
    let mut directives = info.directives;
    let mut degraded_reason: Option<String> = None;
    let mut last = last_level(&info, &ctx.tapes, reserve);
    let mut next0 = next_level0(disk.strategy, disk.dumpcycle, &info, ctx.today);

    if directives.force_full {
        if disk.strategy.skips_fulls() {
            let message = format!(
                "Cannot force full dump of {}:{} with {} option.",
                host, name, disk.strategy
            );
            warn!("{}", message);
            ctx.publish(Event::Warning { message });
            directives.force_full = false;
        } else {
            degraded_reason = Some("force-full disk can't be dumped in degraded mode".to_string());
            last = None;
            next0 = -conf_dumpcycle;
            directive(ctx, id, format!("Forcing full dump of {}:{} as directed.", host, name));
        }
    } else if disk.strategy == Strategy::NoFull {
        last = Some(1);
    }

    if last.is_some() {
        if let Some(label) = info.level_label(0) {
            let runs = ctx.tapes.when_overwrite(label);
            if runs <= RUNS_REDZONE {
                overwrite_warning(ctx, id, 0, label, runs);
            }
        }
    }
    if last.is_some_and(|l| l > 1) {
        if let Some(label) = info.level_label(1) {
            let runs = ctx.tapes.when_overwrite(label);
            if runs == 0 {
                overwrite_warning(ctx, id, 1, label, runs);
                last = Some(0);
            } else if runs <= RUNS_REDZONE {
                overwrite_warning(ctx, id, 1, label, runs);
            }
        }
    }

    let mut priority = disk.priority;
    if next0 < 0 {
        debug!("{}:{} overdue {} day(s) for level 0", host, name, -next0);
        priority = priority.saturating_sub(next0);
    } else if directives.force_full {
        priority += 1;
    }

    if disk.skip_full && disk.strategy != Strategy::NoInc {
        if next0 <= 0 {
            info!("Skipping full dump of {}:{} today.", host, name);
            ctx.skip(id, 0, "skip-full");
            return Ok(());
        }
        if last.is_none() {
            last = Some(0);
        }
        if next0 == 1 {
            let message = format!("Skipping full dump of {}:{} tomorrow.", host, name);
            warn!("{}", message);
            ctx.publish(Event::Warning { message });
        }
    }

    if disk.strategy == Strategy::IncrOnly && last.is_none() && !directives.force_full {
        warn!("{}:{} lev 1 skipped: incronly and no full dump were done", host, name);
        return ctx.fail_unqueued(id, "Skipping incronly because no full dump were done");
    }

    if disk.skip_incr && next0 > 0 {
        ctx.skip(id, 1, "skip-incr");
        return Ok(());
    }

    if last.is_none() && next0 > 0 && !disk.strategy.skips_fulls() && reserve == 100 {
        let message = format!(
            "{}:{} mismatch: no tapelist record, but curinfo next_level0: {}.",
            host, name, next0
        );
        warn!("{}", message);
        ctx.publish(Event::Warning { message });
        next0 = 0;
    }

    let level_days = runs_at(&info, last, &ctx.tapes, reserve, ctx.config.runtapes);

    // Decide which levels to ask the client about.
    let mut wanted: Vec<u32> = Vec::with_capacity(MAX_LEVELS);
    if directives.force_level_1 && disk.strategy != Strategy::NoInc {
        directive(ctx, id, format!("Forcing level 1 of {}:{} as directed.", host, name));
        wanted.push(1);
        degraded_reason
            .get_or_insert_with(|| "force-level-1 disk can't be dumped in degraded mode".to_string());
    } else {
        let full_wanted = disk.strategy == Strategy::NoInc
            || (!disk.skip_full
                && (!directives.force_bump || disk.skip_incr || last.is_none()));
        if full_wanted {
            if directives.force_bump && last.is_none() {
                directive(
                    ctx,
                    id,
                    format!("Remove force-bump command of {}:{} because it's a new disk.", host, name),
                );
            }
            match disk.strategy {
                Strategy::Standard | Strategy::NoInc => {
                    wanted.push(0);
                    if degraded_reason.is_none() {
                        if last.is_none() {
                            degraded_reason =
                                Some("new disk can't be dumped in degraded mode".to_string());
                        } else if disk.strategy == Strategy::NoInc {
                            degraded_reason =
                                Some("strategy NOINC can't be dumped in degraded mode".to_string());
                        }
                    }
                    if disk.strategy == Strategy::NoInc && disk.skip_full {
                        info!("Ignoring skip-full for {}:{} because the strategy is NOINC.", host, name);
                    }
                    if disk.strategy == Strategy::NoInc && directives.force_bump {
                        info!("Ignoring FORCE_BUMP for {}:{} because the strategy is NOINC.", host, name);
                    }
                }
                Strategy::NoFull | Strategy::IncrOnly => {}
            }
        }

        if !disk.skip_incr && disk.strategy != Strategy::NoInc {
            match last {
                None => {
                    degraded_reason
                        .get_or_insert_with(|| "new disk can't be dumped in degraded mode".to_string());
                    if disk.strategy.skips_fulls() {
                        wanted.push(1);
                    }
                }
                Some(curr) => {
                    if directives.force_no_bump {
                        if curr > 0 {
                            wanted.push(curr);
                        }
                        directive(ctx, id, format!("Preventing bump of {}:{} as directed.", host, name));
                        degraded_reason =
                            Some("force-no-bump disk can't be dumped in degraded mode".to_string());
                    } else if directives.force_bump && curr + 1 < DUMP_LEVELS {
                        wanted.push(curr + 1);
                        directive(
                            ctx,
                            id,
                            format!("Bumping of {}:{} at level {} as directed.", host, name, curr + 1),
                        );
                        degraded_reason =
                            Some("force-bump disk can't be dumped in degraded mode".to_string());
                    } else if curr == 0 {
                        wanted.push(1);
                    } else {
                        wanted.push(curr);
                        let size = info.level_size(curr);
                        let thresh = bump_threshold(curr, info.level_size(0), &disk.bump);
                        if (size == 0 || (size > thresh && level_days >= disk.bump.days))
                            && curr + 1 < DUMP_LEVELS
                        {
                            wanted.push(curr + 1);
                        }
                    }
                }
            }
        }
    }

    wanted.dedup();
    wanted.truncate(MAX_LEVELS);
    if wanted.is_empty() {
        warn!("{}:{} has no level to estimate", host, name);
        return ctx.fail_unqueued(id, "no dump level can be estimated");
    }

    let rec = ctx.record_mut(id);
    rec.dump_priority = priority;
    rec.directives = directives;
    rec.degraded_reason = degraded_reason;
    rec.last_level = last;
    rec.next_level0 = next0;
    rec.level_days = level_days;
    rec.last_lev0size = info.level(0).map_or(0, |s| s.csize);
    rec.lev0_date = info.level_date(0);
    rec.fullrate = perf_average(&info.full.rate, 0.0);
    rec.incrrate = perf_average(&info.incr.rate, 0.0);
    rec.fullcomp = perf_average(&info.full.comp, disk.comprate.0);
    rec.incrcomp = perf_average(&info.incr.comp, disk.comprate.1);
    rec.levels = wanted.iter().map(|&l| LevelEstimate::requested(l, dumpdate_for(&info, l))).collect();

    debug!(
        "setup_estimate: {}:{}: last_level {:?} next_level0 {} level_days {} getting estimates {:?}",
        host, name, last, next0, level_days, wanted
    );
    rec.history = Some(info);

    ctx.queues.enqueue(QueueKind::Start, id)?;
    Ok(())
}
