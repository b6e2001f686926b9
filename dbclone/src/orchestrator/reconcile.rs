//! Startup/periodic recovery for abandoned in-flight operations.
//!
//! A crash or deadline expiry leaves clone rows in Provisioning or
//! Disabling. Reconcile re-drives those rows through the same step drivers
//! as Create and Remove; because every binder primitive is idempotent, the
//! re-drive resumes from the last completed step.

use chrono::Utc;
use serde::Serialize;

use dbclone_shared::errors::{CloneError, CloneResult};

use crate::registry::{CloneRecord, CloneStatus};

use super::CloneOrchestrator;

/// Summary of a reconcile pass.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Stale rows a re-drive was attempted for.
    pub resumed: usize,
    /// Re-drives that reached a terminal success (Enabled or Removed).
    pub completed: usize,
    /// Re-drives that failed again; rows are now Failed or still in flight.
    pub failed: usize,
}

impl CloneOrchestrator {
    /// Scan for stale in-flight rows and re-drive them.
    pub async fn reconcile(&self) -> CloneResult<ReconcileReport> {
        let cutoff = Utc::now() - self.options.orchestrator.stale_after();
        let stale = self.clone_store().stale_in_flight(cutoff)?;

        let mut report = ReconcileReport::default();
        for record in stale {
            // An active operation owns the clone; skip it.
            let _guard = match self.begin(&record.clone_id) {
                Ok(guard) => guard,
                Err(CloneError::OperationInProgress(_)) => continue,
                Err(e) => return Err(e),
            };

            // Re-read under the guard: the operation may have finished (or
            // changed shape) between the scan and the claim.
            let record = match self.clone_store().try_get(&record.clone_id)? {
                Some(current) if current.status == record.status => current,
                _ => continue,
            };

            report.resumed += 1;
            let clone_id = record.clone_id.clone();
            let status = record.status;
            tracing::info!(clone_id = %clone_id, status = %status, "reconciling stale clone");

            let outcome = match status {
                CloneStatus::Provisioning => self.resume_provisioning(record).await,
                CloneStatus::Disabling => self.resume_teardown(record).await,
                other => Err(CloneError::Internal(format!(
                    "stale scan returned clone {} in status {}",
                    clone_id, other
                ))),
            };

            match outcome {
                Ok(()) => report.completed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(clone_id = %clone_id, error = %e, "reconcile re-drive failed");
                }
            }
        }

        if report.resumed > 0 {
            tracing::info!(
                resumed = report.resumed,
                completed = report.completed,
                failed = report.failed,
                "reconcile pass finished"
            );
        }
        Ok(report)
    }

    async fn resume_provisioning(&self, record: CloneRecord) -> CloneResult<()> {
        let image = self.image_store().get(&record.image_id)?;
        self.drive_provisioning(&image, record).await.map(|_| ())
    }

    async fn resume_teardown(&self, record: CloneRecord) -> CloneResult<()> {
        self.finish_removal(&record).await
    }
}
