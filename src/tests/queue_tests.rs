use super::fixtures::{assert_sorted, context, disk, estimated, test_config};
use crate::planner::estimator::analyze_estimates;
use crate::planner::queue::{QueueError, Queues};
use crate::planner::{QueueKind, RecordId};
use std::cmp::Ordering;

fn queues_with(n: usize) -> (Queues, Vec<RecordId>) {
    let mut queues = Queues::new();
    let ids = (0..n).map(|_| queues.register()).collect();
    (queues, ids)
}

#[test]
fn test_enqueue_and_dequeue_fifo() {
    let (mut queues, ids) = queues_with(3);
    for &id in &ids {
        queues.enqueue(QueueKind::Start, id).unwrap();
    }
    assert_eq!(queues.len(QueueKind::Start), 3);
    assert_eq!(queues.dequeue(QueueKind::Start), Some(ids[0]));
    assert_eq!(queues.dequeue(QueueKind::Start), Some(ids[1]));
    assert_eq!(queues.dequeue(QueueKind::Start), Some(ids[2]));
    assert_eq!(queues.dequeue(QueueKind::Start), None);
    assert!(queues.is_empty(QueueKind::Start));
}

#[test]
fn test_remove_from_middle_relinks() {
    let (mut queues, ids) = queues_with(3);
    for &id in &ids {
        queues.enqueue(QueueKind::Scheduled, id).unwrap();
    }
    queues.remove(QueueKind::Scheduled, ids[1]).unwrap();
    assert_eq!(queues.ids(QueueKind::Scheduled), vec![ids[0], ids[2]]);
    assert_eq!(queues.next(ids[0]), Some(ids[2]));
    assert_eq!(queues.prev(ids[2]), Some(ids[0]));
    assert_eq!(queues.queue_of(ids[1]), None);

    queues.remove(QueueKind::Scheduled, ids[2]).unwrap();
    assert_eq!(queues.tail(QueueKind::Scheduled), Some(ids[0]));
    queues.remove(QueueKind::Scheduled, ids[0]).unwrap();
    assert_eq!(queues.head(QueueKind::Scheduled), None);
}

#[test]
fn test_insert_sorted_keeps_order_and_ties_stable() {
    let (mut queues, ids) = queues_with(4);
    let keys = [2, 5, 2, 9];
    // Descending by key, like the schedule.
    for &id in &ids {
        queues
            .insert_sorted(QueueKind::Scheduled, id, |a, b| keys[b.0].cmp(&keys[a.0]))
            .unwrap();
    }
    assert_eq!(queues.ids(QueueKind::Scheduled), vec![ids[3], ids[1], ids[0], ids[2]]);
}

#[test]
fn test_membership_is_exclusive() {
    let (mut queues, ids) = queues_with(1);
    queues.enqueue(QueueKind::Estimated, ids[0]).unwrap();

    let err = queues.enqueue(QueueKind::Failed, ids[0]).unwrap_err();
    assert!(matches!(err, QueueError::AlreadyQueued { queue: QueueKind::Estimated, .. }));

    let err = queues.remove(QueueKind::Failed, ids[0]).unwrap_err();
    assert!(matches!(err, QueueError::NotQueued { queue: QueueKind::Failed, .. }));

    queues.move_to(ids[0], QueueKind::Estimated, QueueKind::Failed).unwrap();
    assert_eq!(queues.queue_of(ids[0]), Some(QueueKind::Failed));
    assert!(queues.is_empty(QueueKind::Estimated));
    let total: usize = QueueKind::ALL.iter().map(|&kind| queues.len(kind)).sum();
    assert_eq!(total, 1);
}

#[test]
fn test_unknown_record_is_rejected() {
    let mut queues = Queues::new();
    let err = queues.enqueue(QueueKind::Start, RecordId(7)).unwrap_err();
    assert!(matches!(err, QueueError::UnknownRecord(7)));
}

#[test]
fn test_schedule_sorted_by_priority_then_size() {
    let disks = vec![
        disk("alpha", "/small"),
        disk("alpha", "/big"),
        { let mut d = disk("beta", "/urgent"); d.priority = 5; d },
        disk("beta", "/mid"),
    ];
    let mut ctx = context(test_config(10_000_000), disks);
    estimated(&mut ctx, RecordId(0), Some(1), 4, &[(1, 100)]);
    estimated(&mut ctx, RecordId(1), Some(1), 4, &[(1, 9000)]);
    estimated(&mut ctx, RecordId(2), Some(1), 4, &[(1, 10)]);
    estimated(&mut ctx, RecordId(3), Some(1), 4, &[(1, 500)]);
    analyze_estimates(&mut ctx).unwrap();

    assert_eq!(
        ctx.queues.ids(QueueKind::Scheduled),
        vec![RecordId(2), RecordId(1), RecordId(3), RecordId(0)]
    );
    assert_sorted(&ctx);
    assert_eq!(ctx.schedule_order(RecordId(2), RecordId(0)), Ordering::Less);
}
