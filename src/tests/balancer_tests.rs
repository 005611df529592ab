use super::fixtures::{assert_sorted, context, disk, drain, estimated, scheduled_cost, test_config};
use crate::events::Event;
use crate::planner::balancer::{balance, promote_hills};
use crate::planner::estimator::analyze_estimates;
use crate::planner::{RecordId, SchedulerContext};

fn single_incremental(tape_length_kb: u64) -> SchedulerContext {
    let mut ctx = context(test_config(tape_length_kb), vec![disk("alpha", "/home")]);
    estimated(&mut ctx, RecordId(0), Some(1), 2, &[(0, 50_000), (1, 1000)]);
    analyze_estimates(&mut ctx).unwrap();
    ctx
}

#[test]
fn test_incremental_promoted_to_full() {
    let mut ctx = single_incremental(1_000_000);
    let mut events = ctx.events.subscribe();
    assert_eq!(ctx.totals.total_lev0, 0);

    balance(&mut ctx).unwrap();

    let rec = ctx.record(RecordId(0));
    assert_eq!(rec.dump_level(), Some(0));
    assert_eq!(rec.next_level0, 0);
    assert_eq!(rec.degraded.map(|slot| rec.levels[slot].level), Some(1));
    assert_eq!(ctx.totals.total_lev0, 50_000);
    assert_eq!(ctx.totals.total_size, 50_000);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        Event::Promoted { days_ahead: 2, special: false, .. }
    )));
}

#[test]
fn test_promotion_respects_capacity() {
    let mut ctx = single_incremental(20_000);

    balance(&mut ctx).unwrap();

    assert_eq!(ctx.record(RecordId(0)).dump_level(), Some(1));
    assert_eq!(ctx.totals.total_lev0, 0);
    assert_eq!(ctx.totals.total_size, 1000);
}

#[test]
fn test_promotion_respects_maxpromoteday() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home")]);
    ctx.record_mut(RecordId(0)).disk.maxpromoteday = 1;
    estimated(&mut ctx, RecordId(0), Some(1), 2, &[(0, 50_000), (1, 1000)]);
    analyze_estimates(&mut ctx).unwrap();

    balance(&mut ctx).unwrap();

    assert_eq!(ctx.record(RecordId(0)).dump_level(), Some(1));
}

#[test]
fn test_nearest_due_full_promoted_first() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/later"), disk("beta", "/sooner")]);
    estimated(&mut ctx, RecordId(0), Some(1), 5, &[(0, 40_000), (1, 900)]);
    estimated(&mut ctx, RecordId(1), Some(1), 2, &[(0, 40_000), (1, 800)]);
    analyze_estimates(&mut ctx).unwrap();

    balance(&mut ctx).unwrap();

    // One full already overshoots the balanced size, so only one moves.
    assert_eq!(ctx.record(RecordId(1)).dump_level(), Some(0));
    assert_eq!(ctx.record(RecordId(0)).dump_level(), Some(1));
    assert_eq!(ctx.totals.total_lev0, 40_000);
}

#[test]
fn test_hill_day_broken_up() {
    let disks = vec![disk("alpha", "/x"), disk("alpha", "/y"), disk("beta", "/z")];
    let mut ctx = context(test_config(1_000_000), disks);
    let mut events = ctx.events.subscribe();
    estimated(&mut ctx, RecordId(0), Some(1), 3, &[(0, 30_000), (1, 2000)]);
    estimated(&mut ctx, RecordId(1), Some(1), 3, &[(0, 20_000), (1, 1000)]);
    estimated(&mut ctx, RecordId(2), Some(1), 5, &[(0, 60_000), (1, 3000)]);
    ctx.record_mut(RecordId(0)).last_lev0size = 30_000;
    ctx.record_mut(RecordId(1)).last_lev0size = 20_000;
    ctx.record_mut(RecordId(2)).last_lev0size = 60_000;
    analyze_estimates(&mut ctx).unwrap();

    assert!(promote_hills(&mut ctx).unwrap());

    assert_eq!(ctx.record(RecordId(0)).dump_level(), Some(0));
    assert_eq!(ctx.record(RecordId(1)).dump_level(), Some(1));
    assert_eq!(ctx.record(RecordId(2)).dump_level(), Some(1));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        Event::Promoted { disk, days_ahead: 3, special: true, .. } if disk == "/x"
    )));

    // Tonight now has a full, so no further hill is flattened.
    assert!(!promote_hills(&mut ctx).unwrap());
}

#[test]
fn test_no_hill_without_crowded_day() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/x"), disk("alpha", "/y")]);
    estimated(&mut ctx, RecordId(0), Some(1), 3, &[(0, 30_000), (1, 2000)]);
    estimated(&mut ctx, RecordId(1), Some(1), 4, &[(0, 20_000), (1, 1000)]);
    ctx.record_mut(RecordId(0)).last_lev0size = 30_000;
    ctx.record_mut(RecordId(1)).last_lev0size = 20_000;
    analyze_estimates(&mut ctx).unwrap();

    assert!(!promote_hills(&mut ctx).unwrap());
    assert_eq!(ctx.totals.total_lev0, 0);
}

#[test]
fn test_balance_keeps_schedule_consistent() {
    let disks = (0..5).map(|i| disk(if i % 2 == 0 { "alpha" } else { "beta" }, &format!("/d{i}"))).collect();
    let mut ctx = context(test_config(200_000), disks);
    for i in 0..5_usize {
        let full = 30_000 + 5000 * i as u64;
        let next_level0 = i32::try_from(i + 1).unwrap();
        estimated(&mut ctx, RecordId(i), Some(1), next_level0, &[(0, full), (1, full / 20)]);
    }
    analyze_estimates(&mut ctx).unwrap();

    balance(&mut ctx).unwrap();

    assert!(ctx.totals.total_size <= ctx.capacity.tape_length);
    assert!(ctx.totals.total_lev0 > 0);
    assert_eq!(scheduled_cost(&ctx), ctx.totals.total_size);
    assert_sorted(&ctx);
}
