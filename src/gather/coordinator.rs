//! Per-host estimate exchange state machine.
//!
//! A host goes `Ready -> Active -> Done`; the first exchange with a host is
//! a capability probe, after which the host is `Ready` again for the real
//! estimate request. Every function here runs on the single task that owns
//! the [`SchedulerContext`].

use super::features::{Feature, FeatureSet};
use super::protocol::{self, quote_string, ReplyLine};
use super::transport::{Packet, PacketKind, TransportError};
use crate::db::HistoryRecord;
use crate::events::Event;
use crate::planner::{
    server_estimate, Compression, DiskState, DiskUnit, Encryption, EstimateMethod, HostId,
    HostState, PlannerResult, QueueKind, RecordId, SchedulerContext, SizeEstimate,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a request to a host is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    /// Capability probe.
    Noop,
    /// Size estimates for the host's disks.
    Sendsize,
}

/// A request ready to go out to one host.
#[derive(Debug, Clone)]
pub(crate) struct HostRequest {
    pub host: HostId,
    pub hostname: String,
    pub kind: RequestKind,
    pub body: String,
    pub timeout: Duration,
}

/// Options passed through to the client's estimate program.
fn option_string(disk: &DiskUnit) -> String {
    let mut options = String::from(";");
    match disk.compress {
        Compression::Client => options.push_str("compress-fast;"),
        Compression::Server => options.push_str("srvcomp-fast;"),
        Compression::None => {}
    }
    match disk.encrypt {
        Encryption::Client => options.push_str("encrypt-cust;"),
        Encryption::Server => options.push_str("srvencrypt;"),
        Encryption::None => {}
    }
    options
}

fn supports_estimate_lines(program: &str) -> bool {
    program == "DUMP" || program == "GNUTAR"
}

fn fill_server_estimates(ctx: &mut SchedulerContext, id: RecordId) {
    let tape_length = ctx.capacity.tape_length;
    let empty = HistoryRecord::default();
    let rec = ctx.record_mut(id);
    let last_level = rec.last_level;
    let info = rec.history.as_ref().unwrap_or(&empty);
    for est in &mut rec.levels {
        let sized = server_estimate(info, est.level, last_level, tape_length);
        est.set_size(SizeEstimate::Sized(sized.size), sized.guessed);
    }
    debug!(
        "server estimate for {}:{}: {:?}",
        ctx.host_name(id),
        ctx.disk_name(id),
        ctx.record(id).levels.iter().map(|e| (e.level, e.size)).collect::<Vec<_>>()
    );
}

/// Size a host's server-estimated disks before anything is sent to it.
///
/// Disks with no client method are finished here and go straight to the
/// estimated queue. The others keep their server sizes as a fallback for
/// when the host never answers.
fn start_server_estimates(ctx: &mut SchedulerContext, host: HostId) -> PlannerResult<()> {
    let disks = ctx.hosts[host.0].disks.clone();
    for id in disks {
        let rec = ctx.record(id);
        if ctx.queues.queue_of(id) != Some(QueueKind::Start)
            || rec.state != DiskState::Ready
            || !rec.disk.uses_estimate(EstimateMethod::Server)
            || rec.levels.iter().any(|est| est.size != SizeEstimate::Pending)
        {
            continue;
        }
        fill_server_estimates(ctx, id);
        if ctx.record(id).disk.client_method().is_none() {
            ctx.record_mut(id).state = DiskState::Done;
            ctx.queues.move_to(id, QueueKind::Start, QueueKind::Estimated)?;
        }
    }
    Ok(())
}

fn has_startable_disk(ctx: &SchedulerContext, host: HostId) -> bool {
    ctx.hosts[host.0]
        .disks
        .iter()
        .any(|&id| ctx.queues.queue_of(id) == Some(QueueKind::Start))
}

/// Build the next request for a `Ready` host, marking it `Active`.
///
/// Returns `None` and marks the host `Done` when there is nothing left to ask.
pub(crate) fn request_estimates(
    ctx: &mut SchedulerContext,
    host: HostId,
) -> PlannerResult<Option<HostRequest>> {
    if ctx.hosts[host.0].state != HostState::Ready {
        return Ok(None);
    }
    start_server_estimates(ctx, host)?;
    if !has_startable_disk(ctx, host) {
        ctx.hosts[host.0].state = HostState::Done;
        return Ok(None);
    }

    let hostname = ctx.hosts[host.0].name.clone();
    let Some(features) = ctx.hosts[host.0].features.clone() else {
        ctx.hosts[host.0].state = HostState::Active;
        return Ok(Some(HostRequest {
            host,
            hostname,
            kind: RequestKind::Noop,
            body: format!("SERVICE noop\nOPTIONS features={};\n", FeatureSet::ours()),
            timeout: ctx.config.probe_timeout(),
        }));
    };

    let mut body = String::from("SERVICE sendsize\nOPTIONS ");
    if features.has(Feature::ReqOptionsFeatures) {
        body.push_str(&format!("features={};", FeatureSet::ours()));
    }
    if features.has(Feature::ReqOptionsMaxdumps) {
        body.push_str(&format!("maxdumps={};", ctx.hosts[host.0].maxdumps));
    }
    if features.has(Feature::ReqOptionsHostname) {
        body.push_str(&format!("hostname={hostname};"));
    }
    if features.has(Feature::ReqOptionsConfig) {
        body.push_str(&format!("config={};", ctx.config.config_name));
    }
    body.push('\n');

    let disks = ctx.hosts[host.0].disks.clone();
    let mut estimates = 0;

    for &id in &disks {
        if ctx.queues.queue_of(id) != Some(QueueKind::Start)
            || ctx.record(id).state != DiskState::Ready
        {
            continue;
        }
        ctx.record_mut(id).got_estimate = 0;
        let disk = ctx.record(id).disk.clone();
        let qname = quote_string(&disk.name);
        let server_sized = disk.uses_estimate(EstimateMethod::Server);

        let mut lines = String::new();
        if let Some(mut method) = disk.client_method() {
            if supports_estimate_lines(&disk.program) {
                if method == EstimateMethod::Calcsize && !features.has(Feature::CalcsizeEstimate) {
                    let message = format!(
                        "{hostname}:{qname} does not support CALCSIZE for estimate, using CLIENT."
                    );
                    warn!("{}", message);
                    ctx.publish(Event::Warning { message });
                    method = EstimateMethod::Client;
                }
                let prefix = if method == EstimateMethod::Calcsize { "CALCSIZE " } else { "" };
                let device = quote_string(disk.device.as_deref().unwrap_or(&disk.name));
                let options = features
                    .has(Feature::SendsizeReqOptions)
                    .then(|| format!(" OPTIONS |{}", option_string(&disk)))
                    .unwrap_or_default();
                for est in &ctx.record(id).levels {
                    lines.push_str(&format!(
                        "{prefix}{} {qname} {device} {} {} {}{options}\n",
                        disk.program, est.level, est.dumpdate, disk.spindle
                    ));
                    estimates += 1;
                }
            } else {
                ctx.record_mut(id)
                    .errstr
                    .get_or_insert_with(|| "does not support application-api".to_string());
            }
        }

        if !lines.is_empty() {
            body.push_str(&lines);
            if server_sized {
                ctx.queues.move_to(id, QueueKind::Start, QueueKind::PartialEstimate)?;
                ctx.record_mut(id).state = DiskState::PartiallyDone;
            } else {
                ctx.record_mut(id).state = DiskState::Active;
            }
        } else if server_sized {
            ctx.record_mut(id).state = DiskState::Done;
            ctx.queues.move_to(id, QueueKind::Start, QueueKind::Estimated)?;
        } else {
            let reason = ctx
                .record_mut(id)
                .errstr
                .take()
                .unwrap_or_else(|| "Can't request estimate".to_string());
            warn!("{}:{} {}", hostname, qname, reason);
            ctx.record_mut(id).state = DiskState::Done;
            ctx.fail_from(id, QueueKind::Start, reason)?;
        }
    }

    if estimates == 0 {
        ctx.hosts[host.0].state = HostState::Done;
        return Ok(None);
    }

    for &id in &disks {
        if ctx.record(id).state == DiskState::Active
            && ctx.queues.queue_of(id) == Some(QueueKind::Start)
        {
            ctx.record_mut(id).errstr = None;
            ctx.queues.move_to(id, QueueKind::Start, QueueKind::Waiting)?;
        }
    }
    ctx.hosts[host.0].state = HostState::Active;

    Ok(Some(HostRequest {
        host,
        hostname,
        kind: RequestKind::Sendsize,
        body,
        timeout: ctx.config.estimate_timeout(estimates),
    }))
}

/// Result reported by the client for one disk and level.
enum DiskResult {
    Size(i64),
    Message(String),
}

/// Store one per-disk reply line. `false` means the line was not acceptable.
fn record_result(
    ctx: &mut SchedulerContext,
    host: HostId,
    disk: &str,
    level: i32,
    result: DiskResult,
    kind: PacketKind,
) -> bool {
    let Some(id) = ctx.hosts[host.0].disks.iter().copied().find(|&d| ctx.disk_name(d) == disk)
    else {
        error!("{}: invalid reply from sendsize: unknown disk {}", ctx.hosts[host.0].name, disk);
        return false;
    };

    let rec = ctx.record_mut(id);
    let slot = u32::try_from(level).ok().and_then(|l| rec.slot_for_level(l));
    match result {
        DiskResult::Size(size) => {
            if let Some(slot) = slot {
                if size == -2 {
                    rec.levels[slot].set_size(SizeEstimate::Removed, false);
                } else if size >= 0 {
                    rec.levels[slot].set_size(SizeEstimate::Sized(size.unsigned_abs()), false);
                }
            }
        }
        DiskResult::Message(message) => {
            if kind == PacketKind::Rep && rec.errstr.is_none() {
                rec.errstr = Some(message);
            }
        }
    }

    // Clients report some errors at level 0 whatever was asked.
    if slot.is_none() && level > 0 {
        return false;
    }
    rec.got_estimate += 1;
    true
}

/// Resolve every outstanding disk of a host after the exchange failed.
///
/// Disks that already hold a positive estimate (server-side or partial)
/// go on to analysis, whichever queue they were waiting on; the others
/// fail with `errbuf`.
pub(crate) fn host_failed(ctx: &mut SchedulerContext, host: HostId, errbuf: &str) -> PlannerResult<()> {
    let disks = ctx.hosts[host.0].disks.clone();
    let mut affected = 0;

    for id in disks {
        let Some(from) = ctx.queues.queue_of(id).filter(|q| {
            matches!(q, QueueKind::Start | QueueKind::Waiting | QueueKind::PartialEstimate)
        }) else {
            continue;
        };
        affected += 1;

        let rec = ctx.record_mut(id);
        rec.state = DiskState::Done;
        rec.expire_pending();
        if rec.has_positive_estimate() {
            rec.errstr.get_or_insert_with(|| errbuf.to_string());
            ctx.queues.move_to(id, from, QueueKind::Estimated)?;
            continue;
        }

        warn!("error result for host {} disk {}: {}", ctx.host_name(id), ctx.disk_name(id), errbuf);
        ctx.fail_from(id, from, errbuf)?;
    }

    if affected == 0 {
        error!("{}", errbuf);
        ctx.publish(Event::Warning { message: errbuf.to_string() });
    }
    ctx.hosts[host.0].state = HostState::Done;
    Ok(())
}

/// Process one reply packet from a host.
pub(crate) fn on_reply(ctx: &mut SchedulerContext, host: HostId, packet: &Packet) -> PlannerResult<()> {
    let hostname = ctx.hosts[host.0].name.clone();
    ctx.hosts[host.0].state = HostState::Ready;
    let nak = packet.kind == PacketKind::Nak;

    if nak {
        match protocol::parse_nak(&packet.body) {
            Err(_) => {
                warn!("got strange nak from {}: {}", hostname, packet.body);
                return host_failed(ctx, host, &format!("{hostname} NAK: [NAK parse failed]"));
            }
            Ok(message) if !protocol::is_unknown_noop(&message) => {
                return host_failed(ctx, host, &format!("{hostname} NAK: {message}"));
            }
            Ok(_) => {}
        }
    }

    debug!("got {} from {}:\n{}", packet.kind, hostname, packet.body);
    let lines = match protocol::parse_reply(&packet.body) {
        Ok(lines) => lines,
        Err(e) => {
            warn!("got a bad message from {}: {}", hostname, e);
            return host_failed(ctx, host, &format!("badly formatted response from {hostname}"));
        }
    };

    for line in lines {
        let accepted = match line {
            ReplyLine::Options { features: None } => true,
            ReplyLine::Options { features: Some(hex) } => match FeatureSet::from_hex(&hex) {
                Ok(set) => {
                    ctx.hosts[host.0].features = Some(set);
                    true
                }
                Err(_) => {
                    return host_failed(ctx, host, &format!("{hostname}: bad features value: {hex}"));
                }
            },
            ReplyLine::HostMessage { message, .. } => {
                if ctx.hosts[host.0].features.is_none() && nak && protocol::is_unknown_noop(&message)
                {
                    continue;
                }
                let errbuf = if nak {
                    format!("{hostname} NAK: {message}")
                } else {
                    format!("{hostname}: {message}")
                };
                return host_failed(ctx, host, &errbuf);
            }
            ReplyLine::Size { disk, level, size } => {
                record_result(ctx, host, &disk, level, DiskResult::Size(size), packet.kind)
            }
            ReplyLine::DiskMessage { disk, level, message } => {
                record_result(ctx, host, &disk, level, DiskResult::Message(message), packet.kind)
            }
        };
        if !accepted {
            return host_failed(ctx, host, &format!("badly formatted response from {hostname}"));
        }
    }

    if ctx.hosts[host.0].features.is_none() {
        debug!("no feature set from host {}", hostname);
        ctx.hosts[host.0].features = Some(FeatureSet::empty());
    }

    let disks = ctx.hosts[host.0].disks.clone();
    for id in disks {
        let from = match ctx.record(id).state {
            DiskState::Active => QueueKind::Waiting,
            DiskState::PartiallyDone => QueueKind::PartialEstimate,
            DiskState::Ready | DiskState::Done => continue,
        };
        ctx.queues.remove(from, id)?;

        if packet.kind == PacketKind::Prep {
            debug!("got partial result for host {} disk {}", hostname, ctx.disk_name(id));
            ctx.record_mut(id).state = DiskState::PartiallyDone;
            ctx.queues.enqueue(QueueKind::PartialEstimate, id)?;
            continue;
        }

        ctx.record_mut(id).state = DiskState::Done;
        ctx.hosts[host.0].state = HostState::Done;
        let qname = quote_string(ctx.disk_name(id));
        let rec = ctx.record_mut(id);
        if rec.has_positive_estimate() {
            ctx.queues.enqueue(QueueKind::Estimated, id)?;
            continue;
        }

        if rec.got_estimate > 0 && rec.errstr.is_none() {
            rec.errstr = Some(format!("disk {qname}, all estimate failed"));
        } else {
            rec.errstr
                .get_or_insert_with(|| format!("missing result for {qname} in {hostname} response"));
        }
        let reason = rec.errstr.as_deref().unwrap_or_default();
        warn!("error result for host {} disk {}: {}", hostname, qname, reason);
        ctx.queues.enqueue(QueueKind::Failed, id)?;
    }
    Ok(())
}

/// The exchange with a host ended without a final reply.
pub(crate) fn on_transport_error(
    ctx: &mut SchedulerContext,
    host: HostId,
    err: &TransportError,
) -> PlannerResult<()> {
    let hostname = &ctx.hosts[host.0].name;
    let errbuf = match err {
        TransportError::Timeout => {
            format!("Some estimate timeout on {hostname}, using server estimate if possible")
        }
        other => format!("Request to {hostname} failed: {other}"),
    };
    host_failed(ctx, host, &errbuf)
}

/// Abandon every host that has not finished.
pub(crate) fn cancel_outstanding(ctx: &mut SchedulerContext) -> PlannerResult<()> {
    for idx in 0..ctx.hosts.len() {
        if ctx.hosts[idx].state != HostState::Done {
            host_failed(ctx, HostId(idx), "estimate cancelled")?;
        }
    }
    Ok(())
}

/// Resolve records left on the intermediate queues once all hosts are done.
pub(crate) fn finish(ctx: &mut SchedulerContext) -> PlannerResult<()> {
    while let Some(id) = ctx.queues.dequeue(QueueKind::Waiting) {
        ctx.record_mut(id).errstr = Some("disk was stranded on waitq".to_string());
        ctx.queues.enqueue(QueueKind::Failed, id)?;
    }

    while let Some(id) = ctx.queues.dequeue(QueueKind::PartialEstimate) {
        let qname = quote_string(ctx.disk_name(id));
        let expired = ctx.record_mut(id).expire_pending();
        for level in expired {
            let message =
                format!("disk {}:{}, estimate of level {} timed out.", ctx.host_name(id), qname, level);
            warn!("{}", message);
            ctx.publish(Event::Warning { message });
        }
        if ctx.record(id).has_positive_estimate() {
            ctx.queues.enqueue(QueueKind::Estimated, id)?;
        } else {
            ctx.record_mut(id).errstr = Some(format!("disk {qname}, all estimate timed out"));
            ctx.queues.enqueue(QueueKind::Failed, id)?;
        }
    }

    while let Some(id) = ctx.queues.dequeue(QueueKind::Start) {
        ctx.record_mut(id).errstr = Some("estimate was never requested".to_string());
        ctx.queues.enqueue(QueueKind::Failed, id)?;
    }

    info!(
        "Getting estimates done: {} estimated, {} failed",
        ctx.queues.len(QueueKind::Estimated),
        ctx.queues.len(QueueKind::Failed)
    );
    Ok(())
}
