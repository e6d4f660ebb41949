//! Pipeline driver.
//!
//! Finite runs alternate a discovery drain and a transfer drain until a pass
//! finds nothing to do. The long-running service instead runs discovery and
//! the transfer workers as independent polling loops that sleep between idle
//! iterations and stop when the cancellation token fires.

use ferry_core::{ErrorClass, MigrationConfig, PassReport, TransferReport};
use ferry_db::Ledger;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backoff::{compute_backoff, sleep_or_cancel};
use crate::discovery::DiscoveryStage;
use crate::error::{log_error, MigrationError};
use crate::transfer::{TransferRunState, TransferStage};

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub watch_location: String,
    pub batch_size: i64,
    pub transfer_workers: usize,
    pub discovery_backoff: Duration,
    pub transfer_backoff: Duration,
    pub connectivity_max_backoff: Duration,
    /// Failed passes in a row a finite run tolerates before giving up.
    pub max_consecutive_failures: u32,
}

impl DriverSettings {
    pub fn from_config(config: &MigrationConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            watch_location: config.drive.watch_folder_id.clone(),
            batch_size: pipeline.transfer_batch_size,
            transfer_workers: pipeline.transfer_workers,
            discovery_backoff: pipeline.discovery_backoff,
            transfer_backoff: pipeline.transfer_backoff,
            connectivity_max_backoff: pipeline.connectivity_max_backoff,
            max_consecutive_failures: pipeline.max_attempts_per_run,
        }
    }
}

#[derive(Clone)]
pub struct PipelineDriver {
    discovery: DiscoveryStage,
    transfer: TransferStage,
    settings: Arc<DriverSettings>,
}

impl PipelineDriver {
    pub fn new(discovery: DiscoveryStage, transfer: TransferStage, settings: DriverSettings) -> Self {
        Self {
            discovery,
            transfer,
            settings: Arc::new(settings),
        }
    }

    pub fn discovery(&self) -> &DiscoveryStage {
        &self.discovery
    }

    pub fn transfer(&self) -> &TransferStage {
        &self.transfer
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Ping the ledger until it answers, backing off between attempts.
    ///
    /// With `max_attempts` set, the last connectivity error is returned once
    /// that many pings failed. Returns `Ok(false)` when `cancel` fires first.
    pub async fn wait_for_ledger(
        &self,
        max_attempts: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<bool, MigrationError> {
        let mut failures = 0u32;
        loop {
            match self.discovery.ledger().ping().await {
                Ok(()) => {
                    if failures > 0 {
                        tracing::info!(failed_attempts = failures, "Ledger reachable again");
                    }
                    return Ok(true);
                }
                Err(e) => {
                    let err = MigrationError::from(e);
                    failures += 1;
                    if max_attempts.is_some_and(|max| failures >= max.max(1)) {
                        log_error(&err, "Ledger still unreachable, giving up");
                        return Err(err);
                    }
                    let delay = compute_backoff(
                        self.settings.discovery_backoff,
                        failures,
                        self.settings.connectivity_max_backoff,
                    );
                    log_error(&err, "Ledger unreachable, waiting");
                    tracing::warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Waiting for the ledger"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Run `transfer_workers` transfer loops side by side until none of them
    /// finds eligible work.
    pub async fn run_transfer_workers(
        &self,
        state: &TransferRunState,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, MigrationError> {
        let batch_size = self.settings.batch_size;
        if self.settings.transfer_workers <= 1 {
            return self
                .transfer
                .run_transfer_loop_with(batch_size, state, cancel)
                .await;
        }

        let workers: Vec<TransferStage> = (0..self.settings.transfer_workers)
            .map(|_| self.transfer.for_new_worker())
            .collect();
        let results = futures::future::join_all(
            workers
                .iter()
                .map(|worker| worker.run_transfer_loop_with(batch_size, state, cancel)),
        )
        .await;

        let mut total = TransferReport::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(report) => total.merge(&report),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// One discovery drain followed by one transfer drain.
    pub async fn run_pass(
        &self,
        state: &TransferRunState,
        cancel: &CancellationToken,
    ) -> Result<PassReport, MigrationError> {
        let discovery = self
            .discovery
            .run_until_empty(&self.settings.watch_location, cancel)
            .await?;
        let transfer = self.run_transfer_workers(state, cancel).await?;
        Ok(PassReport {
            discovery,
            transfer,
        })
    }

    /// Finite batch run: repeat passes until one finds no work in either
    /// stage. Transient failures back off and retry; permanent ones, or too
    /// many failures in a row, end the run with the error.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<PassReport, MigrationError> {
        let state = TransferRunState::new();
        let mut total = PassReport::default();
        let mut passes = 0usize;
        let mut consecutive_failures = 0u32;

        if !cancel.is_cancelled()
            && !self
                .wait_for_ledger(Some(self.settings.max_consecutive_failures), cancel)
                .await?
        {
            return Ok(total);
        }

        while !cancel.is_cancelled() {
            match self.run_pass(&state, cancel).await {
                Ok(pass) => {
                    consecutive_failures = 0;
                    passes += 1;
                    total.discovery.merge(&pass.discovery);
                    total.transfer.merge(&pass.transfer);
                    if pass.is_idle() {
                        break;
                    }
                }
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.settings.max_consecutive_failures.max(1) {
                        log_error(&e, "Pipeline pass failed too many times in a row");
                        return Err(e);
                    }
                    let delay = compute_backoff(
                        self.settings.discovery_backoff,
                        consecutive_failures,
                        self.settings.connectivity_max_backoff,
                    );
                    log_error(&e, "Pipeline pass failed, backing off");
                    tracing::warn!(
                        consecutive_failures = consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying pipeline pass"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    log_error(&e, "Pipeline pass failed");
                    return Err(e);
                }
            }
        }

        tracing::info!(
            passes = passes,
            listed = total.discovery.listed,
            duplicates = total.discovery.duplicates,
            documents = total.discovery.documents,
            registered = total.discovery.registered,
            transferred = total.transfer.transferred,
            failed = total.transfer.failed,
            bytes = total.transfer.bytes,
            cancelled = cancel.is_cancelled(),
            "Pipeline run complete"
        );
        Ok(total)
    }

    async fn discovery_loop(&self, cancel: &CancellationToken) {
        let mut consecutive_failures = 0u32;
        tracing::info!(watch_location = %self.settings.watch_location, "Discovery loop started");

        loop {
            let delay = match self
                .discovery
                .run_until_empty(&self.settings.watch_location, cancel)
                .await
            {
                Ok(report) => {
                    consecutive_failures = 0;
                    if report.listed > 0 {
                        tracing::info!(
                            listed = report.listed,
                            duplicates = report.duplicates,
                            documents = report.documents,
                            queued = report.queued(),
                            "Discovery drained watched location"
                        );
                    }
                    self.settings.discovery_backoff
                }
                Err(e) => {
                    consecutive_failures += 1;
                    log_error(&e, "Discovery iteration failed");
                    compute_backoff(
                        self.settings.discovery_backoff,
                        consecutive_failures,
                        self.settings.connectivity_max_backoff,
                    )
                }
            };
            if !sleep_or_cancel(delay, cancel).await {
                break;
            }
        }

        tracing::info!("Discovery loop stopped");
    }

    async fn transfer_loop(&self, worker: TransferStage, cancel: &CancellationToken) {
        let mut consecutive_failures = 0u32;
        tracing::info!(worker_id = %worker.worker_id(), "Transfer worker started");

        // Attempts reset per drain so a record given up on is retried after
        // the next backoff; stranded claims carry over until released.
        let state = TransferRunState::new();
        loop {
            state.reset_attempts();
            let delay = match worker
                .run_transfer_loop_with(self.settings.batch_size, &state, cancel)
                .await
            {
                Ok(_) => {
                    consecutive_failures = 0;
                    self.settings.transfer_backoff
                }
                Err(e) => {
                    consecutive_failures += 1;
                    log_error(&e, "Transfer iteration failed");
                    compute_backoff(
                        self.settings.transfer_backoff,
                        consecutive_failures,
                        self.settings.connectivity_max_backoff,
                    )
                }
            };
            if !sleep_or_cancel(delay, cancel).await {
                break;
            }
        }

        tracing::info!(worker_id = %worker.worker_id(), "Transfer worker stopped");
    }

    /// Long-running service: once the ledger answers, one discovery loop and
    /// `transfer_workers` transfer loops until `cancel` fires. In-flight transfers finish before
    /// their loop observes the cancellation.
    pub async fn run_forever(&self, cancel: &CancellationToken) {
        match self.wait_for_ledger(None, cancel).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("Cancelled while waiting for the ledger");
                return;
            }
            Err(e) => {
                log_error(&e, "Ledger wait ended unexpectedly");
                return;
            }
        }

        let workers = (0..self.settings.transfer_workers.max(1))
            .map(|_| self.transfer_loop(self.transfer.for_new_worker(), cancel));

        tokio::join!(
            self.discovery_loop(cancel),
            futures::future::join_all(workers)
        );
        tracing::info!("Pipeline stopped");
    }
}
