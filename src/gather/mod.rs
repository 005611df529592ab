pub(crate) mod coordinator;
pub(crate) mod features;
pub(crate) mod protocol;
pub(crate) mod tcp;
pub(crate) mod transport;

pub(crate) use features::FeatureSet;
pub(crate) use tcp::TcpTransport;
pub(crate) use transport::{EstimateTransport, Packet, TransportError};

use crate::planner::{HostId, PlannerResult, SchedulerContext};
use coordinator::HostRequest;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something that happened on one host's exchange.
#[derive(Debug)]
struct HostMessage {
    host: HostId,
    outcome: Result<Packet, TransportError>,
}

/// Drive one request to completion, forwarding every packet to the coordinator.
async fn run_exchange(
    transport: Arc<dyn EstimateTransport>,
    request: HostRequest,
    tx: mpsc::Sender<HostMessage>,
) {
    let deadline = Instant::now() + request.timeout;
    let mut packets = transport.request(&request.hostname, request.body);
    loop {
        let outcome = match tokio::time::timeout_at(deadline, packets.next()).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(None) => Err(TransportError::Closed),
            Ok(Some(outcome)) => outcome,
        };
        let done = outcome.as_ref().map_or(true, |p| p.kind.is_final());
        if tx.send(HostMessage { host: request.host, outcome }).await.is_err() || done {
            return;
        }
    }
}

/// Issue the next request for `host` if it is ready. Returns how many
/// exchanges were started.
fn dispatch(
    ctx: &mut SchedulerContext,
    host: HostId,
    transport: &Arc<dyn EstimateTransport>,
    tx: &mpsc::Sender<HostMessage>,
    tasks: &mut JoinSet<()>,
) -> PlannerResult<usize> {
    let Some(request) = coordinator::request_estimates(ctx, host)? else {
        return Ok(0);
    };
    debug!(
        "sending {:?} request to {} (timeout {:?}):\n{}",
        request.kind, request.hostname, request.timeout, request.body
    );
    tasks.spawn(run_exchange(Arc::clone(transport), request, tx.clone()));
    Ok(1)
}

/// Gather size estimates from every host, one concurrent exchange per host.
///
/// Returns once every host is done; afterwards every record is on the
/// estimated or failed queue.
pub(crate) async fn gather_estimates(
    ctx: &mut SchedulerContext,
    transport: Arc<dyn EstimateTransport>,
    cancel: CancellationToken,
) -> PlannerResult<()> {
    let (tx, mut rx) = mpsc::channel(64);
    let mut tasks = JoinSet::new();
    let mut in_flight = 0;

    for idx in 0..ctx.hosts.len() {
        in_flight += dispatch(ctx, HostId(idx), &transport, &tx, &mut tasks)?;
    }
    info!("Getting estimates from {} host(s)", ctx.hosts.len());

    while in_flight > 0 {
        let message = tokio::select! {
            () = cancel.cancelled() => {
                warn!("Estimate gathering cancelled with {} exchange(s) outstanding", in_flight);
                tasks.abort_all();
                coordinator::cancel_outstanding(ctx)?;
                break;
            }
            message = rx.recv() => message,
        };
        let Some(HostMessage { host, outcome }) = message else {
            break;
        };

        match outcome {
            Ok(packet) => {
                coordinator::on_reply(ctx, host, &packet)?;
                if packet.kind.is_final() {
                    in_flight -= 1;
                    in_flight += dispatch(ctx, host, &transport, &tx, &mut tasks)?;
                }
            }
            Err(err) => {
                debug!("exchange with {} failed: {}", ctx.hosts[host.0].name, err);
                coordinator::on_transport_error(ctx, host, &err)?;
                in_flight -= 1;
            }
        }
    }

    coordinator::finish(ctx)
}
