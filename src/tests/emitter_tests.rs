use super::fixtures::{context, disk, drain, estimated, test_config, STAMP};
use crate::events::Event;
use crate::gather::FeatureSet;
use crate::planner::emitter::{emit_schedule, failed_line, schedule_line};
use crate::planner::estimator::analyze_estimates;
use crate::planner::{RecordId, RunSummary, SizeEstimate};

#[test]
fn test_full_dump_line_carries_degraded_fallback() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home")]);
    estimated(&mut ctx, RecordId(0), Some(1), 0, &[(0, 40_000), (1, 5000)]);
    analyze_estimates(&mut ctx).unwrap();

    let line = schedule_line(&ctx, RecordId(0)).unwrap();
    assert_eq!(
        line,
        format!(
            "DUMP alpha UNKNOWNFEATURE /home {STAMP} 1 0 1970:1:1:0:0:0 40000 40000 39 1024 \
             1 1970:1:1:0:0:0 5000 5000 4 1024"
        )
    );
}

#[test]
fn test_incremental_line_explains_skipping() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home")]);
    estimated(&mut ctx, RecordId(0), Some(1), 4, &[(1, 5000)]);
    analyze_estimates(&mut ctx).unwrap();
    ctx.hosts[0].features = Some(FeatureSet::ours());

    let line = schedule_line(&ctx, RecordId(0)).unwrap();
    let features = FeatureSet::ours().to_hex();
    assert_eq!(
        line,
        format!(
            "DUMP alpha {features} /home {STAMP} 1 1 1970:1:1:0:0:0 5000 5000 4 1024 \
             \"Skipping: a full is not planned, so can't dump in degraded mode\""
        )
    );
}

#[test]
fn test_measured_rate_used_for_time() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home")]);
    estimated(&mut ctx, RecordId(0), Some(1), 4, &[(1, 5000)]);
    ctx.record_mut(RecordId(0)).incrrate = 500.0;
    analyze_estimates(&mut ctx).unwrap();

    let line = schedule_line(&ctx, RecordId(0)).unwrap();
    assert!(line.contains(" 5000 5000 10 500 "), "unexpected line: {line}");
}

#[test]
fn test_failed_line_quotes_reason() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/my docs")]);
    estimated(&mut ctx, RecordId(0), Some(1), 4, &[]);
    analyze_estimates(&mut ctx).unwrap();

    assert_eq!(
        failed_line(&ctx, RecordId(0)),
        format!("FAILED alpha \"/my docs\" {STAMP} 0 \"[no estimate]\"")
    );
}

#[test]
fn test_emit_writes_failures_first() {
    let disks = vec![disk("alpha", "/ok"), disk("beta", "/broken")];
    let mut ctx = context(test_config(1_000_000), disks);
    let mut events = ctx.events.subscribe();
    estimated(&mut ctx, RecordId(0), Some(1), 4, &[(1, 700)]);
    estimated(&mut ctx, RecordId(1), Some(1), 4, &[]);
    analyze_estimates(&mut ctx).unwrap();

    let mut out = Vec::new();
    let summary = emit_schedule(&ctx, &mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("FAILED beta /broken"));
    assert!(lines[1].starts_with("DUMP alpha UNKNOWNFEATURE /ok"));
    assert_eq!(summary, RunSummary { scheduled: 1, failed: 1, skipped: 0, total_size_kb: 700 });

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::EstimateFailed { disk, reason, .. } if disk == "/broken" && reason == "no estimate"
    )));
    assert!(matches!(
        events.last(),
        Some(Event::RunFinished { scheduled: 1, failed: 1, skipped: 0, total_size_kb: 700 })
    ));
}

#[test]
fn test_guessed_size_is_warned() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/fresh")]);
    let mut events = ctx.events.subscribe();
    estimated(&mut ctx, RecordId(0), None, -19000, &[(0, 3000)]);
    ctx.record_mut(RecordId(0)).levels[0].set_size(SizeEstimate::Sized(3000), true);
    analyze_estimates(&mut ctx).unwrap();

    let mut out = Vec::new();
    emit_schedule(&ctx, &mut out).unwrap();

    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        Event::Warning { message }
            if message == "no history available for alpha:/fresh; guessing that size will be 3000 KB"
    )));
}
