use super::fixtures::{
    context, disk, features_reply, rep, test_config, ScriptedTransport, EPOCH_DUMPDATE,
};
use crate::gather::gather_estimates;
use crate::gather::transport::PacketKind;
use crate::gather::{EstimateTransport, FeatureSet, Packet};
use crate::planner::types::LevelEstimate;
use crate::planner::{EstimateMethod, QueueKind, RecordId, SchedulerContext, SizeEstimate};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Put a record on the start queue asking for `levels`.
fn started(ctx: &mut SchedulerContext, id: RecordId, levels: &[u32]) {
    let rec = ctx.record_mut(id);
    rec.last_level = Some(1);
    rec.levels = levels
        .iter()
        .map(|&level| LevelEstimate::requested(level, EPOCH_DUMPDATE.to_string()))
        .collect();
    ctx.queues.enqueue(QueueKind::Start, id).unwrap();
}

async fn gather(ctx: &mut SchedulerContext, transport: &Arc<ScriptedTransport>) {
    gather_estimates(ctx, Arc::clone(transport) as Arc<dyn EstimateTransport>, CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_probe_then_sendsize() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home"), disk("alpha", "/var")]);
    started(&mut ctx, RecordId(0), &[0, 1]);
    started(&mut ctx, RecordId(1), &[1]);
    let transport = Arc::new(ScriptedTransport::default().reply("alpha", vec![features_reply()]).reply(
        "alpha",
        vec![
            Ok(Packet::new(PacketKind::Prep, "/home 0 SIZE 40000\n")),
            rep("OPTIONS features=ff;\n/home 1 SIZE 5000\n/var 1 SIZE 300\n"),
        ],
    ));

    gather(&mut ctx, &transport).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].1.starts_with("SERVICE noop\nOPTIONS features="));
    let sendsize = &requests[1].1;
    assert!(sendsize.starts_with("SERVICE sendsize\nOPTIONS features="));
    assert!(sendsize.contains("maxdumps=1;hostname=alpha;"));
    assert!(sendsize.contains("GNUTAR /home /home 0 1970:1:1:0:0:0 -1 OPTIONS |;\n"));
    assert!(sendsize.contains("GNUTAR /var /var 1 1970:1:1:0:0:0 -1 OPTIONS |;\n"));

    assert_eq!(ctx.queues.ids(QueueKind::Estimated), vec![RecordId(0), RecordId(1)]);
    assert_eq!(ctx.record(RecordId(0)).native_size_at(0), Some(40_000));
    assert_eq!(ctx.record(RecordId(0)).native_size_at(1), Some(5000));
    assert_eq!(ctx.record(RecordId(1)).native_size_at(1), Some(300));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_host_fails_only_its_disks() {
    let disks = vec![disk("alpha", "/a"), disk("alpha", "/b"), disk("alpha", "/c"), disk("beta", "/d")];
    let mut ctx = context(test_config(1_000_000), disks);
    for id in (0..4).map(RecordId) {
        started(&mut ctx, id, &[1]);
    }
    let transport = Arc::new(
        ScriptedTransport::default()
            .reply("alpha", vec![features_reply()])
            .reply("beta", vec![features_reply()])
            .reply("beta", vec![rep("/d 1 SIZE 700\n")]),
    );

    gather(&mut ctx, &transport).await;

    assert_eq!(ctx.queues.ids(QueueKind::Failed), vec![RecordId(0), RecordId(1), RecordId(2)]);
    for id in (0..3).map(RecordId) {
        assert_eq!(
            ctx.record(id).errstr.as_deref(),
            Some("Some estimate timeout on alpha, using server estimate if possible")
        );
        assert_eq!(ctx.record(id).levels[0].size, SizeEstimate::TimedOut);
    }
    assert_eq!(ctx.queues.ids(QueueKind::Estimated), vec![RecordId(3)]);
}

#[tokio::test]
async fn test_old_client_nak_on_probe() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home")]);
    started(&mut ctx, RecordId(0), &[0]);
    let transport = Arc::new(
        ScriptedTransport::default()
            .reply("alpha", vec![Ok(Packet::new(PacketKind::Nak, "ERROR unknown service: noop\n"))])
            .reply("alpha", vec![rep("/home 0 SIZE 100\n")]),
    );

    gather(&mut ctx, &transport).await;

    let requests = transport.requests();
    assert_eq!(requests[1].1, "SERVICE sendsize\nOPTIONS \nGNUTAR /home /home 0 1970:1:1:0:0:0 -1\n");
    assert_eq!(ctx.hosts[0].features, Some(FeatureSet::empty()));
    assert_eq!(ctx.queues.ids(QueueKind::Estimated), vec![RecordId(0)]);
}

#[tokio::test]
async fn test_refused_request_fails_host() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home")]);
    started(&mut ctx, RecordId(0), &[0]);
    let transport = Arc::new(ScriptedTransport::default().reply("alpha", vec![features_reply()]).reply(
        "alpha",
        vec![Ok(Packet::new(PacketKind::Nak, "ERROR access denied\n"))],
    ));

    gather(&mut ctx, &transport).await;

    assert_eq!(ctx.queues.ids(QueueKind::Failed), vec![RecordId(0)]);
    assert_eq!(ctx.record(RecordId(0)).errstr.as_deref(), Some("alpha NAK: access denied"));
}

#[tokio::test]
async fn test_missing_disk_in_reply() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home"), disk("alpha", "/var")]);
    started(&mut ctx, RecordId(0), &[1]);
    started(&mut ctx, RecordId(1), &[1]);
    let transport = Arc::new(
        ScriptedTransport::default()
            .reply("alpha", vec![features_reply()])
            .reply("alpha", vec![rep("/home 1 SIZE 10\n")]),
    );

    gather(&mut ctx, &transport).await;

    assert_eq!(ctx.queues.ids(QueueKind::Estimated), vec![RecordId(0)]);
    assert_eq!(ctx.queues.ids(QueueKind::Failed), vec![RecordId(1)]);
    assert_eq!(
        ctx.record(RecordId(1)).errstr.as_deref(),
        Some("missing result for /var in alpha response")
    );
}

#[tokio::test]
async fn test_disk_error_reported_at_level_zero() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home")]);
    started(&mut ctx, RecordId(0), &[1, 2]);
    let transport = Arc::new(ScriptedTransport::default().reply("alpha", vec![features_reply()]).reply(
        "alpha",
        vec![rep("/home 0 ERROR \"no such directory\"\n")],
    ));

    gather(&mut ctx, &transport).await;

    assert_eq!(ctx.queues.ids(QueueKind::Failed), vec![RecordId(0)]);
    assert_eq!(ctx.record(RecordId(0)).errstr.as_deref(), Some("no such directory"));
}

#[tokio::test]
async fn test_badly_formatted_reply() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home")]);
    started(&mut ctx, RecordId(0), &[1]);
    let transport = Arc::new(
        ScriptedTransport::default()
            .reply("alpha", vec![features_reply()])
            .reply("alpha", vec![rep("this is not a reply\n")]),
    );

    gather(&mut ctx, &transport).await;

    assert_eq!(ctx.queues.ids(QueueKind::Failed), vec![RecordId(0)]);
    assert_eq!(
        ctx.record(RecordId(0)).errstr.as_deref(),
        Some("badly formatted response from alpha")
    );
}

#[tokio::test]
async fn test_cancelled_before_any_reply() {
    let mut ctx = context(test_config(1_000_000), vec![disk("alpha", "/home"), disk("beta", "/srv")]);
    started(&mut ctx, RecordId(0), &[0]);
    started(&mut ctx, RecordId(1), &[0]);
    let transport: Arc<dyn EstimateTransport> = Arc::new(ScriptedTransport::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    gather_estimates(&mut ctx, transport, cancel).await.unwrap();

    assert_eq!(ctx.queues.len(QueueKind::Failed), 2);
    for id in [RecordId(0), RecordId(1)] {
        assert_eq!(ctx.record(id).errstr.as_deref(), Some("estimate cancelled"));
    }
}

#[tokio::test]
async fn test_server_estimate_needs_no_sendsize() {
    let mut config_disk = disk("alpha", "/home");
    config_disk.estimate = vec![EstimateMethod::Server];
    let mut ctx = context(test_config(1_000_000), vec![config_disk]);
    started(&mut ctx, RecordId(0), &[0, 1]);
    let transport = Arc::new(ScriptedTransport::default());

    gather(&mut ctx, &transport).await;

    assert!(transport.requests().is_empty());
    assert_eq!(ctx.queues.ids(QueueKind::Estimated), vec![RecordId(0)]);
    let rec = ctx.record(RecordId(0));
    assert!(rec.levels.iter().all(|est| matches!(est.size, SizeEstimate::Sized(_))));
    assert!(rec.levels.iter().all(|est| est.guessed));
}

#[tokio::test(start_paused = true)]
async fn test_silent_host_keeps_server_estimates() {
    let mut server_only = disk("alpha", "/home");
    server_only.estimate = vec![EstimateMethod::Server];
    let mut both = disk("alpha", "/srv");
    both.estimate = vec![EstimateMethod::Server, EstimateMethod::Client];
    let mut ctx = context(test_config(1_000_000), vec![server_only, both, disk("alpha", "/var")]);
    for id in (0..3).map(RecordId) {
        started(&mut ctx, id, &[0, 1]);
    }
    let transport = Arc::new(ScriptedTransport::default());

    gather(&mut ctx, &transport).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].1.starts_with("SERVICE noop\n"));

    assert_eq!(ctx.queues.ids(QueueKind::Estimated), vec![RecordId(0), RecordId(1)]);
    assert_eq!(ctx.queues.ids(QueueKind::Failed), vec![RecordId(2)]);
    assert!(ctx.record(RecordId(0)).errstr.is_none());
    assert_eq!(
        ctx.record(RecordId(1)).errstr.as_deref(),
        Some("Some estimate timeout on alpha, using server estimate if possible")
    );
    for id in [RecordId(0), RecordId(1)] {
        assert!(ctx.record(id).levels.iter().all(|est| matches!(est.size, SizeEstimate::Sized(_))));
    }
}

#[tokio::test]
async fn test_client_answer_replaces_server_estimate() {
    let mut both = disk("alpha", "/srv");
    both.estimate = vec![EstimateMethod::Server, EstimateMethod::Client];
    let mut ctx = context(test_config(1_000_000), vec![both]);
    started(&mut ctx, RecordId(0), &[0, 1]);
    let transport = Arc::new(
        ScriptedTransport::default()
            .reply("alpha", vec![features_reply()])
            .reply("alpha", vec![rep("/srv 0 SIZE 7000\n/srv 1 SIZE 70\n")]),
    );

    gather(&mut ctx, &transport).await;

    assert_eq!(transport.requests().len(), 2);
    assert_eq!(ctx.queues.ids(QueueKind::Estimated), vec![RecordId(0)]);
    let rec = ctx.record(RecordId(0));
    assert_eq!(rec.native_size_at(0), Some(7000));
    assert_eq!(rec.native_size_at(1), Some(70));
    assert!(rec.levels.iter().all(|est| !est.guessed));
}
