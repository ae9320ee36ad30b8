//! Received-report pipeline.
//!
//! 1. Skip reports whose signature was already processed.
//! 2. Verify the signature and invariants (all-or-nothing).
//! 3. Recompute the disclosed identifiers on the blocking pool.
//! 4. Match chunk by chunk, releasing the store lock and yielding between
//!    chunks so other tasks keep running and cancellation is observed.
//! 5. Mark the report processed.
//!
//! A cancelled run leaves the report unprocessed; flags already set stay set
//! and the next run picks up from there.

use std::sync::Arc;

use cwatch_tcn::report::{recompute_identifiers_cancellable, verify};
use cwatch_tcn::TcnError;
use cwatch_types::cancel::CancelFlag;
use cwatch_types::report::SignedReport;
use cwatch_types::store::ContactStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::matcher::DEFAULT_CHUNK_SIZE;
use crate::{ExposureError, Result};

/// Result of processing one report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Matching already ran for this report.
    AlreadyProcessed,
    Matched {
        identifiers: usize,
        newly_flagged: usize,
    },
}

impl ProcessOutcome {
    pub fn newly_flagged(&self) -> usize {
        match self {
            ProcessOutcome::AlreadyProcessed => 0,
            ProcessOutcome::Matched { newly_flagged, .. } => *newly_flagged,
        }
    }
}

/// Totals for a batch of reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub newly_flagged: usize,
}

/// Verifies received reports and flags matching observations.
pub struct ReportProcessor<S> {
    store: Arc<Mutex<S>>,
    chunk_size: usize,
}

impl<S> Clone for ReportProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            chunk_size: self.chunk_size,
        }
    }
}

impl<S> ReportProcessor<S>
where
    S: ContactStore + Send + 'static,
{
    pub fn new(store: Arc<Mutex<S>>) -> Self {
        Self::with_chunk_size(store, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(store: Arc<Mutex<S>>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Run one report through the pipeline.
    ///
    /// # Errors
    ///
    /// - [`ExposureError::Tcn`] if the report fails verification; nothing is
    ///   stored for it.
    /// - [`ExposureError::Cancelled`] if `cancel` was raised.
    pub async fn process(&self, signed: SignedReport, cancel: &CancelFlag) -> Result<ProcessOutcome> {
        let signature = signed.signature_bytes;

        {
            let store = self.store.lock().await;
            if store.is_report_processed(&signature)? {
                debug!("Report already processed, skipping");
                return Ok(ProcessOutcome::AlreadyProcessed);
            }
        }

        let worker_cancel = cancel.clone();
        let (verified, identifiers) = tokio::task::spawn_blocking(move || {
            let verified = verify(&signed)?;
            let identifiers = recompute_identifiers_cancellable(&verified, &worker_cancel)?;
            Ok::<_, TcnError>((verified, identifiers))
        })
        .await
        .map_err(|e| ExposureError::Task(format!("spawn_blocking failed: {e}")))?
        .map_err(|e| match e {
            TcnError::Cancelled => ExposureError::Cancelled { newly_flagged: 0 },
            other => ExposureError::Tcn(other),
        })?;

        let signed = SignedReport {
            report: verified.report().clone(),
            signature_bytes: signature,
        };
        self.store.lock().await.save_received_report(&signed)?;

        let mut newly_flagged = 0;
        for chunk in identifiers.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                return Err(ExposureError::Cancelled { newly_flagged });
            }
            newly_flagged += self.store.lock().await.mark_potentially_infectious(chunk)?;
            tokio::task::yield_now().await;
        }

        self.store.lock().await.mark_report_processed(&signature)?;

        let report = verified.report();
        info!(
            start_index = report.start_index,
            end_index = report.end_index,
            identifiers = identifiers.len(),
            newly_flagged,
            "Processed disclosure report"
        );
        Ok(ProcessOutcome::Matched {
            identifiers: identifiers.len(),
            newly_flagged,
        })
    }

    /// Process reports in order. Invalid reports are dropped and logged;
    /// storage errors and cancellation stop the batch.
    pub async fn process_batch(
        &self,
        reports: Vec<SignedReport>,
        cancel: &CancelFlag,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        for signed in reports {
            match self.process(signed, cancel).await {
                Ok(ProcessOutcome::AlreadyProcessed) => summary.skipped += 1,
                Ok(outcome) => {
                    summary.processed += 1;
                    summary.newly_flagged += outcome.newly_flagged();
                }
                Err(ExposureError::Tcn(e)) => {
                    warn!(error = %e, "Dropping invalid report");
                    summary.rejected += 1;
                }
                Err(ExposureError::Cancelled { newly_flagged }) => {
                    summary.newly_flagged += newly_flagged;
                    return Err(ExposureError::Cancelled {
                        newly_flagged: summary.newly_flagged,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }
}
