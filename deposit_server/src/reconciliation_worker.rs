use std::sync::Arc;

use deposit_engine::{
    clock::Clock,
    traits::{LedgerStore, SettlementGateway},
    BatchSummary,
    SettlementError,
    SettlementFlowApi,
};
use log::*;
use tokio::task::JoinHandle;

use crate::config::PollingConfig;

/// Starts the reconciliation worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// The worker is the safety net for payments whose trigger was lost: every `interval` it runs the settlement flow for
/// each payment that is still unprocessed and was ingested within the lookback window.
pub fn start_reconciliation_worker<B, G>(
    api: SettlementFlowApi<B, G>,
    clock: Arc<dyn Clock>,
    config: PollingConfig,
) -> JoinHandle<()>
where
    B: LedgerStore,
    G: SettlementGateway + 'static,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(config.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("🕰️ Reconciliation worker started. Polling every {}s", config.interval.as_secs());
        loop {
            timer.tick().await;
            trace!("🕰️ Running reconciliation job");
            match reconcile_once(&api, clock.as_ref(), &config).await {
                Ok(summary) if summary.total() == 0 => trace!("🕰️ Nothing to reconcile"),
                Ok(summary) => info!("🕰️ Reconciliation run finished. {summary}"),
                Err(e) => error!("🕰️ Error running reconciliation job: {e}"),
            }
        }
    })
}

/// A single reconciliation pass over the lookback window.
pub async fn reconcile_once<B, G>(
    api: &SettlementFlowApi<B, G>,
    clock: &dyn Clock,
    config: &PollingConfig,
) -> Result<BatchSummary, SettlementError>
where
    B: LedgerStore,
    G: SettlementGateway,
{
    let since = clock.now() - config.lookback;
    api.process_pending_payments(since, config.batch_size).await
}
