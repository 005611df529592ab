//! Schedule output for the dump driver.

use super::context::SchedulerContext;
use super::error::PlannerResult;
use super::queue::{QueueKind, RecordId};
use super::types::DEFAULT_DUMPRATE;
use crate::events::Event;
use crate::gather::protocol::quote_string;
use serde::Serialize;
use std::io::Write;
use tracing::{debug, info, warn};

/// Counts reported once the schedule is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct RunSummary {
    pub scheduled: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total_size_kb: u64,
}

fn fix_rate(rate: f64) -> f64 {
    if rate < 1.0 {
        DEFAULT_DUMPRATE
    } else {
        rate
    }
}

/// Size, time and rate of one slot, as printed.
struct SlotFigures {
    level: u32,
    dumpdate: String,
    nsize: u64,
    csize: u64,
    secs: u64,
    kps: f64,
}

fn slot_figures(ctx: &SchedulerContext, id: RecordId, slot: usize, rate: f64) -> SlotFigures {
    let rec = ctx.record(id);
    let est = &rec.levels[slot];
    let csize = rec.on_media_size(slot).unwrap_or(0);
    let kps = fix_rate(rate);
    SlotFigures {
        level: est.level,
        dumpdate: est.dumpdate.clone(),
        nsize: est.native_size().unwrap_or(0),
        csize,
        secs: (csize as f64 / kps) as u64,
        kps,
    }
}

/// The `DUMP` line of one scheduled record.
pub(crate) fn schedule_line(ctx: &SchedulerContext, id: RecordId) -> Option<String> {
    let rec = ctx.record(id);
    let slot = rec.dump?;
    let is_full = rec.levels[slot].level == 0;
    let dump = slot_figures(ctx, id, slot, if is_full { rec.fullrate } else { rec.incrrate });

    let degraded = match rec.degraded.filter(|_| is_full) {
        Some(degr_slot) if rec.on_media_size(degr_slot).is_some() => {
            let degr = slot_figures(ctx, id, degr_slot, rec.incrrate);
            format!(
                " {} {} {} {} {} {:.0}",
                degr.level, degr.dumpdate, degr.nsize, degr.csize, degr.secs, degr.kps
            )
        }
        Some(_) | None => {
            let reason = rec
                .degraded_reason
                .as_deref()
                .unwrap_or("cannot dump in degraded mode for unknown reason");
            format!(" {}", quote_string(&format!("Skipping: {reason}")))
        }
    };

    let features = ctx.hosts[rec.host.0]
        .features
        .as_ref()
        .map_or_else(|| "UNKNOWNFEATURE".to_string(), ToString::to_string);

    Some(format!(
        "DUMP {} {} {} {} {} {} {} {} {} {} {:.0}{}",
        ctx.host_name(id),
        features,
        quote_string(&rec.disk.name),
        ctx.timestamp,
        rec.dump_priority,
        dump.level,
        dump.dumpdate,
        dump.nsize,
        dump.csize,
        dump.secs,
        dump.kps,
        degraded
    ))
}

/// The `FAILED` line of one failed record.
pub(crate) fn failed_line(ctx: &SchedulerContext, id: RecordId) -> String {
    let rec = ctx.record(id);
    let reason = rec.errstr.as_deref().unwrap_or("no error indicator");
    format!(
        "FAILED {} {} {} {} {}",
        ctx.host_name(id),
        quote_string(&rec.disk.name),
        ctx.timestamp,
        rec.dump_level().unwrap_or(0),
        quote_string(&format!("[{reason}]"))
    )
}

/// Write failures then the schedule to `out`, and report the run.
pub(crate) fn emit_schedule(ctx: &SchedulerContext, out: &mut impl Write) -> PlannerResult<RunSummary> {
    let mut summary = RunSummary {
        skipped: ctx.skipped.len() as u32,
        total_size_kb: ctx.totals.total_size,
        ..RunSummary::default()
    };

    for skip in &ctx.skipped {
        debug!(
            "{}:{} level {} left out: {}",
            ctx.host_name(skip.record),
            ctx.disk_name(skip.record),
            skip.level,
            skip.reason
        );
    }

    for id in ctx.queues.ids(QueueKind::Failed) {
        let line = failed_line(ctx, id);
        warn!("{}", line);
        writeln!(out, "{line}")?;
        let rec = ctx.record(id);
        ctx.publish(Event::EstimateFailed {
            host: ctx.host_name(id).to_string(),
            disk: rec.disk.name.clone(),
            level: rec.dump_level().unwrap_or(0),
            reason: rec.errstr.clone().unwrap_or_default(),
        });
        summary.failed += 1;
    }

    for id in ctx.queues.ids(QueueKind::Scheduled) {
        let Some(line) = schedule_line(ctx, id) else {
            continue;
        };
        let rec = ctx.record(id);
        if let Some(est) = rec.dump.map(|slot| &rec.levels[slot]).filter(|est| est.guessed) {
            let message = format!(
                "no history available for {}:{}; guessing that size will be {} KB",
                ctx.host_name(id),
                quote_string(&rec.disk.name),
                est.native_size().unwrap_or(0)
            );
            warn!("{}", message);
            ctx.publish(Event::Warning { message });
        }
        info!("{}", line);
        writeln!(out, "{line}")?;
        summary.scheduled += 1;
    }
    out.flush()?;

    ctx.publish(Event::RunFinished {
        scheduled: summary.scheduled,
        failed: summary.failed,
        skipped: summary.skipped,
        total_size_kb: summary.total_size_kb,
    });
    Ok(summary)
}
