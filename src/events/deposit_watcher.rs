use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainError, DepositEvent, SourceChain};
use crate::config::IngestorConfig;
use crate::db::{Deposit, NewDeposit, StateStore, StoreError};
use crate::lifecycle::{FeeError, FeeSchedule};
use crate::scheduler::{sleep_or_shutdown, Job, ShutdownSignal};

// Name of the block tracker row for the deposit scan
pub const BLOCK_TRACKER_KEY: &str = "source_deposit_events_last_block";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("deposit amount {0} does not fit a signed 64-bit integer")]
    AmountOverflow(u128),

    #[error("block number {0} does not fit a signed 64-bit integer")]
    BlockOverflow(u64),

    #[error("fee error: {0}")]
    Fee(#[from] FeeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted(Deposit),
    /// The source tx hash was already recorded.
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub from_block: u64,
    pub to_block: u64,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Inclusive block range for the next scan. Re-scans `overlap_blocks` behind
/// the cursor; with no cursor, reaches `initial_window` blocks back. Returns
/// `None` when the node is behind the cursor.
pub fn scan_range(cursor: Option<u64>, height: u64, config: &IngestorConfig) -> Option<(u64, u64)> {
    let from = match cursor {
        Some(last) => last.saturating_sub(config.overlap_blocks),
        None => height.saturating_sub(config.initial_window),
    };
    (from <= height).then_some((from, height))
}

/// Turns source-chain deposit events into RECEIVED deposits, via a
/// cursor-driven backfill and an optional live subscription.
pub struct DepositWatcher {
    store: Arc<dyn StateStore>,
    source: Arc<dyn SourceChain>,
    fees: FeeSchedule,
    config: IngestorConfig,
}

impl DepositWatcher {
    pub fn new(
        store: Arc<dyn StateStore>,
        source: Arc<dyn SourceChain>,
        fees: FeeSchedule,
        config: IngestorConfig,
    ) -> Self {
        Self {
            store,
            source,
            fees,
            config,
        }
    }

    /// Records the event unless its tx hash is already known. Safe to call
    /// any number of times for the same event, from either ingestion path.
    pub async fn record_deposit(&self, event: &DepositEvent) -> Result<RecordOutcome, IngestError> {
        if self
            .store
            .find_deposit_by_tx_hash(&event.tx_hash)
            .await?
            .is_some()
        {
            debug!(tx_hash = %event.tx_hash, "Deposit already recorded");
            return Ok(RecordOutcome::Duplicate);
        }

        let gross =
            i64::try_from(event.amount).map_err(|_| IngestError::AmountOverflow(event.amount))?;
        let amounts = self.fees.split(gross)?;
        let source_block = i64::try_from(event.block_number)
            .map_err(|_| IngestError::BlockOverflow(event.block_number))?;

        let new_deposit = NewDeposit {
            source_tx_hash: event.tx_hash.clone(),
            source_block,
            user_address: event.user_address.clone(),
            destination_address: event.destination_address.clone(),
            amounts,
        };

        match self.store.create_deposit(new_deposit).await {
            Ok(deposit) => {
                info!(
                    deposit_id = %deposit.id,
                    tx_hash = %deposit.source_tx_hash,
                    gross = deposit.gross_amount,
                    fee = deposit.fee_amount,
                    net = deposit.net_amount,
                    "Recorded deposit"
                );
                Ok(RecordOutcome::Inserted(deposit))
            }
            // lost a race with the other ingestion path
            Err(StoreError::Duplicate(_)) => Ok(RecordOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    /// One backfill pass: scan from the cursor (minus overlap) to the chain
    /// tip, record every event, then advance the cursor to the tip.
    ///
    /// Failing to read the tip or the logs aborts the pass with the cursor
    /// untouched. A failure to record one event is logged and the pass goes
    /// on; that event is picked up again only if it falls in a later overlap.
    pub async fn run_cycle(&self) -> Result<CycleReport, IngestError> {
        let height = self.source.current_height().await?;
        let cursor = self.store.get_cursor(BLOCK_TRACKER_KEY).await?;

        let Some((from_block, to_block)) = scan_range(cursor, height, &self.config) else {
            warn!(?cursor, height, "Chain tip is behind the scan cursor, skipping cycle");
            return Ok(CycleReport::default());
        };

        let events = self
            .source
            .query_deposit_events(from_block, to_block)
            .await?;

        let mut report = CycleReport {
            from_block,
            to_block,
            ..Default::default()
        };

        for event in &events {
            match self.record_deposit(event).await {
                Ok(RecordOutcome::Inserted(_)) => report.inserted += 1,
                Ok(RecordOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    error!(
                        tx_hash = %event.tx_hash,
                        block = event.block_number,
                        error = %e,
                        "Failed to record deposit event"
                    );
                    report.failed += 1;
                }
            }
        }

        self.store.set_cursor(BLOCK_TRACKER_KEY, to_block).await?;

        debug!(
            from_block,
            to_block,
            inserted = report.inserted,
            duplicates = report.duplicates,
            failed = report.failed,
            "Deposit scan complete"
        );
        Ok(report)
    }

    /// Consumes the live subscription until shutdown, resubscribing after
    /// `resubscribe_delay` whenever the stream errors or ends. Decode errors
    /// skip the event and keep the stream.
    pub async fn run_subscription(&self, mut shutdown: ShutdownSignal) {
        let delay: Duration = self.config.resubscribe_delay();
        info!("Starting deposit subscription");

        while !*shutdown.borrow() {
            match self.source.subscribe_deposits().await {
                Ok(mut stream) => loop {
                    let item = tokio::select! {
                        item = stream.next() => item,
                        _ = shutdown.changed() => break,
                    };
                    match item {
                        Some(Ok(event)) => {
                            if let Err(e) = self.record_deposit(&event).await {
                                error!(tx_hash = %event.tx_hash, error = %e, "Failed to record pushed deposit");
                            }
                        }
                        // a malformed event says nothing about the subscription
                        Some(Err(ChainError::Decode(e))) => {
                            error!(error = %e, "Skipping undecodable pushed deposit");
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Deposit subscription error");
                            break;
                        }
                        None => {
                            warn!("Deposit subscription ended");
                            break;
                        }
                    }
                },
                Err(e) => warn!(error = %e, "Failed to subscribe to deposit events"),
            }

            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        info!("Deposit subscription stopped");
    }
}

#[async_trait]
impl Job for DepositWatcher {
    fn name(&self) -> &'static str {
        "deposit_ingestor"
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let report = self.run_cycle().await?;
        if report.inserted > 0 || report.failed > 0 {
            info!(
                from_block = report.from_block,
                to_block = report.to_block,
                inserted = report.inserted,
                failed = report.failed,
                "Processed deposit events"
            );
        }
        Ok(())
    }
}
