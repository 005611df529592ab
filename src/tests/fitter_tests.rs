use super::fixtures::{assert_sorted, context, disk, drain, estimated, scheduled_cost, test_config};
use crate::db::Directives;
use crate::events::Event;
use crate::planner::estimator::analyze_estimates;
use crate::planner::fitter::{delay_dumps, fit, BeforeImageLog};
use crate::planner::{PlannerError, QueueKind, RecordId, SchedulerContext};

/// Two fulls that both have to give way, and a large incremental.
fn crowded_run() -> SchedulerContext {
    let disks = vec![disk("alpha", "/old"), disk("beta", "/new"), {
        let mut d = disk("gamma", "/bulk");
        d.priority = 2;
        d
    }];
    let mut ctx = context(test_config(1_000_000), disks);
    estimated(&mut ctx, RecordId(0), Some(1), 0, &[(0, 40_000), (1, 5000)]);
    estimated(&mut ctx, RecordId(1), Some(1), 0, &[(0, 60_000), (1, 8000)]);
    estimated(&mut ctx, RecordId(2), Some(1), 6, &[(1, 950_000)]);
    ctx.record_mut(RecordId(0)).lev0_date = Some(1000);
    ctx.record_mut(RecordId(1)).lev0_date = Some(2000);
    analyze_estimates(&mut ctx).unwrap();
    ctx
}

#[test]
fn test_delay_fulls_then_reinstate() {
    let mut ctx = crowded_run();
    assert_eq!(ctx.totals.total_size, 1_050_000);

    fit(&mut ctx).unwrap();

    assert_eq!(ctx.totals.total_size, 998_000);
    assert_eq!(ctx.record(RecordId(0)).dump_level(), Some(0));
    assert_eq!(ctx.record(RecordId(1)).dump_level(), Some(1));
    assert_eq!(ctx.queues.len(QueueKind::Scheduled), 3);
    assert_eq!(ctx.totals.total_lev0, 40_000);
    assert_eq!(scheduled_cost(&ctx), ctx.totals.total_size);
    assert_sorted(&ctx);
}

#[test]
fn test_delay_order_oldest_full_first() {
    let mut ctx = crowded_run();
    let mut log = BeforeImageLog::new();
    delay_dumps(&mut ctx, &mut log).unwrap();

    let delayed: Vec<RecordId> = log.iter().map(|bi| bi.record).collect();
    assert_eq!(delayed, vec![RecordId(0), RecordId(1)]);
    assert!(log.iter().all(|bi| !bi.deleted && bi.level == 0));
    assert_eq!(ctx.totals.total_size, 963_000);
    let first = log.iter().next().unwrap();
    assert_eq!(
        first.message,
        "alpha /old 20240315010000 0 \"[dumps too big, 40000 KB, full dump delayed, doing incremental]\""
    );
}

#[test]
fn test_reinstatement_is_idempotent() {
    let mut ctx = crowded_run();
    let mut log = BeforeImageLog::new();
    delay_dumps(&mut ctx, &mut log).unwrap();

    let kept = log.reinstate(&mut ctx).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].record, RecordId(1));
    assert!(log.is_empty());
    let schedule = ctx.queues.ids(QueueKind::Scheduled);
    let total = ctx.totals.total_size;

    let again = log.reinstate(&mut ctx).unwrap();
    assert!(again.is_empty());
    assert_eq!(ctx.queues.ids(QueueKind::Scheduled), schedule);
    assert_eq!(ctx.totals.total_size, total);
}

#[test]
fn test_incrementals_dropped_from_tail() {
    let mut ctx = context(test_config(10_000), vec![disk("alpha", "/a"), disk("alpha", "/b")]);
    let mut events = ctx.events.subscribe();
    estimated(&mut ctx, RecordId(0), Some(1), 4, &[(1, 7000)]);
    estimated(&mut ctx, RecordId(1), Some(1), 4, &[(1, 6000)]);
    analyze_estimates(&mut ctx).unwrap();

    fit(&mut ctx).unwrap();

    assert_eq!(ctx.queues.ids(QueueKind::Scheduled), vec![RecordId(0)]);
    assert_eq!(ctx.queues.queue_of(RecordId(1)), Some(QueueKind::Failed));
    assert_eq!(
        ctx.record(RecordId(1)).errstr.as_deref(),
        Some("dumps way too big, 6000 KB, must skip incremental dumps")
    );
    assert_eq!(ctx.totals.total_size, 7000);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        Event::Delayed { disk, deleted: true, level: 1, .. } if disk == "/b"
    )));
}

#[test]
fn test_oversize_full_falls_back_to_incremental() {
    let mut ctx = context(test_config(100_000), vec![disk("alpha", "/huge")]);
    estimated(&mut ctx, RecordId(0), Some(1), 0, &[(0, 250_000), (1, 3000)]);
    analyze_estimates(&mut ctx).unwrap();

    fit(&mut ctx).unwrap();

    let rec = ctx.record(RecordId(0));
    assert_eq!(rec.dump_level(), Some(1));
    assert_eq!(ctx.totals.total_size, 3000);
    assert_eq!(ctx.totals.total_lev0, 0);
}

#[test]
fn test_oversize_new_disk_is_unfittable() {
    let mut ctx = context(test_config(100_000), vec![disk("alpha", "/huge")]);
    estimated(&mut ctx, RecordId(0), None, -19000, &[(0, 250_000)]);
    analyze_estimates(&mut ctx).unwrap();

    let err = fit(&mut ctx).unwrap_err();
    assert!(matches!(err, PlannerError::Unfittable(_)));
    assert_eq!(ctx.queues.queue_of(RecordId(0)), Some(QueueKind::Failed));
    assert_eq!(
        ctx.record(RecordId(0)).errstr.as_deref(),
        Some("dump larger than available tape space, 250000 KB, but cannot incremental dump new disk")
    );
}

#[test]
fn test_oversize_new_disk_does_not_sink_others() {
    let mut ctx = context(test_config(100_000), vec![disk("alpha", "/huge"), disk("beta", "/ok")]);
    estimated(&mut ctx, RecordId(0), None, -19000, &[(0, 250_000)]);
    estimated(&mut ctx, RecordId(1), Some(1), 3, &[(1, 20_000)]);
    analyze_estimates(&mut ctx).unwrap();

    fit(&mut ctx).unwrap();

    assert_eq!(ctx.queues.ids(QueueKind::Scheduled), vec![RecordId(1)]);
    assert_eq!(ctx.queues.ids(QueueKind::Failed), vec![RecordId(0)]);
    assert!(ctx.totals.total_size <= ctx.capacity.tape_length);
}

#[test]
fn test_forced_full_delayed_only_as_last_resort() {
    let disks = vec![disk("alpha", "/keep"), disk("alpha", "/forced"), disk("beta", "/plain")];
    let mut ctx = context(test_config(100_000), disks);
    for id in [RecordId(0), RecordId(1)] {
        ctx.record_mut(id).directives = Directives { force_full: true, ..Directives::default() };
    }
    estimated(&mut ctx, RecordId(0), Some(1), 0, &[(0, 60_000), (1, 1000)]);
    estimated(&mut ctx, RecordId(1), Some(1), 0, &[(0, 50_000), (1, 2000)]);
    estimated(&mut ctx, RecordId(2), Some(1), 0, &[(0, 30_000), (1, 3000)]);
    ctx.record_mut(RecordId(0)).dump_priority = 3;
    analyze_estimates(&mut ctx).unwrap();
    assert_eq!(ctx.totals.total_size, 140_000);

    let mut log = BeforeImageLog::new();
    delay_dumps(&mut ctx, &mut log).unwrap();

    let messages: Vec<&str> = log.iter().map(|bi| bi.message.as_str()).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("/plain") && messages[0].contains("doing incremental"));
    assert!(messages[1].contains("/forced") && messages[1].ends_with("full dump delayed]\""));
    assert_eq!(ctx.record(RecordId(0)).dump_level(), Some(0));
    assert_eq!(ctx.totals.total_size, 65_000);
}

#[test]
fn test_forced_fulls_kept_when_configured() {
    let mut config = test_config(100_000);
    config.delay_forced_fulls = false;
    let mut ctx = context(config, vec![disk("alpha", "/a"), disk("alpha", "/b")]);
    for id in [RecordId(0), RecordId(1)] {
        ctx.record_mut(id).directives = Directives { force_full: true, ..Directives::default() };
    }
    estimated(&mut ctx, RecordId(0), Some(1), 0, &[(0, 60_000), (1, 1000)]);
    estimated(&mut ctx, RecordId(1), Some(1), 0, &[(0, 60_000), (1, 1000)]);
    analyze_estimates(&mut ctx).unwrap();

    let err = fit(&mut ctx).unwrap_err();
    assert!(matches!(err, PlannerError::Unfittable(_)));
}

#[test]
fn test_fit_respects_capacity_with_overhead() {
    let mut config = test_config(15_000);
    config.tape_blocksize_kb = 32;
    config.tape_filemark_kb = 1;
    let disks = (0..6).map(|i| disk("alpha", &format!("/d{i}"))).collect();
    let mut ctx = context(config, disks);
    for i in 0..6_usize {
        let full = 4000 + 700 * i as u64;
        let next_level0 = i32::from(i % 2 == 1);
        estimated(&mut ctx, RecordId(i), Some(1), next_level0, &[(0, full), (1, full / 8)]);
    }
    analyze_estimates(&mut ctx).unwrap();

    fit(&mut ctx).unwrap();

    assert!(ctx.totals.total_size <= ctx.capacity.tape_length);
    assert_eq!(scheduled_cost(&ctx), ctx.totals.total_size);
    assert_sorted(&ctx);
    for id in (0..6).map(RecordId) {
        let queue = ctx.queues.queue_of(id);
        assert!(queue == Some(QueueKind::Scheduled) || queue == Some(QueueKind::Failed));
    }
}
