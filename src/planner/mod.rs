pub(crate) mod balancer;
pub(crate) mod context;
pub(crate) mod emitter;
pub(crate) mod error;
pub(crate) mod estimator;
pub(crate) mod fitter;
pub(crate) mod queue;
pub(crate) mod server_estimate;
pub(crate) mod setup;
pub(crate) mod tapelist;
pub(crate) mod types;

pub use types::{
    BumpPolicy, Compression, DiskUnit, Encryption, EstimateMethod, HoldingPolicy, Strategy,
};

pub(crate) use context::{HostState, SchedulerContext};
pub(crate) use emitter::RunSummary;
pub(crate) use error::{PlannerError, PlannerResult};
pub(crate) use queue::{QueueKind, RecordId};
pub(crate) use server_estimate::server_estimate;
pub(crate) use types::{DiskState, HostId, SizeEstimate};

use balancer::balance;
use emitter::emit_schedule;
use estimator::analyze_estimates;
use fitter::fit;
use setup::setup_estimates;
use tapelist::TapeList;

use crate::config::PlannerConfig;
use crate::db::Database;
use crate::events::EventHub;
use crate::gather::{gather_estimates, EstimateTransport};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Plan one night: set up, gather, analyze, fit, balance and write the schedule.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run(
    config: PlannerConfig,
    disks: Vec<DiskUnit>,
    db: &Database,
    transport: Arc<dyn EstimateTransport>,
    events: EventHub,
    cancel: CancellationToken,
    today: DateTime<Utc>,
    out: &mut impl Write,
) -> PlannerResult<RunSummary> {
    let tapes = TapeList::new(db.get_tapes()?, config.tapecycle, config.runtapes);
    let mut ctx = SchedulerContext::new(config, disks, tapes, today, events)?;
    info!(
        "Planning run {} for {} disk(s) on {} host(s)",
        ctx.timestamp,
        ctx.records.len(),
        ctx.hosts.len()
    );

    plan(&mut ctx, db, transport, cancel).await?;
    emit_schedule(&ctx, out)
}

/// Take every todo disk of `ctx` from history lookup to a balanced schedule.
///
/// Afterwards each record is scheduled, failed or listed as skipped.
pub(crate) async fn plan(
    ctx: &mut SchedulerContext,
    db: &Database,
    transport: Arc<dyn EstimateTransport>,
    cancel: CancellationToken,
) -> PlannerResult<()> {
    setup_estimates(ctx, db)?;
    gather_estimates(ctx, transport, cancel).await?;
    analyze_estimates(ctx)?;
    fit(ctx)?;
    balance(ctx)
}
