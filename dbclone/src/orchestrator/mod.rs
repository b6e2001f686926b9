//! Clone lifecycle orchestration.
//!
//! The orchestrator validates requests, calls the storage binder in a fixed
//! order, records every step in the clone registry, and reconciles partial
//! failures. Ordering rules:
//!
//! - The image reference is acquired before any binder call that depends on
//!   the image, and the Provisioning row is inserted before the first binder
//!   call (the durability checkpoint).
//! - Per-clone operations are serialized by an in-flight guard; a second
//!   request against a busy clone fails with `OperationInProgress`.
//! - Provisioning failures unwind completed steps in reverse order; unwind
//!   failures never mask the root cause.
//! - A binder call that exceeds the step deadline is failed-in-place: the
//!   row keeps its in-flight status and reconcile picks it up later.

mod compensation;
mod reconcile;

pub use reconcile::ReconcileReport;

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use dbclone_shared::errors::{CloneError, CloneResult};

use crate::binder::{BinderError, BinderResult, StorageBinder};
use crate::options::DbcloneOptions;
use crate::refs::ReferenceTracker;
use crate::registry::{
    CloneFilter, CloneRecord, CloneStatus, CloneStore, Database, ImageRecord, ImageStore,
    NewClone, NewImage,
};
use compensation::{Compensation, CompensationStack};

/// A provisioning request: which image, and where to attach the clone.
#[derive(Clone, Debug)]
pub struct CreateCloneRequest {
    pub image_id: String,
    pub host_name: String,
    pub sql_instance: String,
    pub database_name: String,
}

/// Outcome of a single binder step.
enum StepError {
    /// Deadline expired while waiting on the binder. The registry row keeps
    /// its in-flight status; no compensation runs.
    Timeout(CloneError),
    /// The step failed for real (transient retries exhausted, or a
    /// non-retryable fault).
    Fault(CloneError),
}

impl StepError {
    fn into_error(self) -> CloneError {
        match self {
            StepError::Timeout(e) | StepError::Fault(e) => e,
        }
    }
}

pub struct CloneOrchestrator {
    images: ImageStore,
    clones: CloneStore,
    refs: ReferenceTracker,
    binder: Arc<dyn StorageBinder>,
    options: DbcloneOptions,
    in_flight: Mutex<HashSet<String>>,
}

impl CloneOrchestrator {
    /// Open (or create) the registry under the configured home directory and
    /// rebuild the reference tracker from it.
    pub fn new(options: DbcloneOptions, binder: Arc<dyn StorageBinder>) -> CloneResult<Self> {
        let db = Database::open(&options.registry_path())?;
        Self::with_database(db, options, binder)
    }

    /// Construct over an already opened registry. Used by tests.
    pub fn with_database(
        db: Database,
        options: DbcloneOptions,
        binder: Arc<dyn StorageBinder>,
    ) -> CloneResult<Self> {
        let images = ImageStore::new(db.clone());
        let clones = CloneStore::new(db);
        let refs = ReferenceTracker::new();
        refs.rebuild(&clones)?;

        Ok(Self {
            images,
            clones,
            refs,
            binder,
            options,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    // ------------------------------------------------------------------
    // Catalog operations
    // ------------------------------------------------------------------

    /// Register an image produced by the external capture workflow.
    pub fn register_image(&self, new: NewImage) -> CloneResult<ImageRecord> {
        self.images.register(new)
    }

    pub fn get_image(&self, image_id: &str) -> CloneResult<ImageRecord> {
        self.images.get(image_id)
    }

    pub fn list_images(&self, include_retired: bool) -> CloneResult<Vec<ImageRecord>> {
        self.images.list(include_retired)
    }

    /// Retire an image. Fails with `ImageInUse` while any clone references
    /// it. The zero-check runs under the reference tracker's lock, so an
    /// in-flight Create cannot invalidate it concurrently, and the registry
    /// re-checks transactionally (Failed rows also block retirement).
    pub fn retire_image(&self, image_id: &str) -> CloneResult<()> {
        self.refs
            .retire_with(image_id, || self.images.retire_unreferenced(image_id))
    }

    /// Live reference count for an image.
    pub fn reference_count(&self, image_id: &str) -> u64 {
        self.refs.count(image_id)
    }

    // ------------------------------------------------------------------
    // Registry queries
    // ------------------------------------------------------------------

    pub fn get_clone(&self, clone_id: &str) -> CloneResult<CloneRecord> {
        self.clones.get(clone_id)
    }

    pub fn list_clones(&self, filter: &CloneFilter) -> CloneResult<Vec<CloneRecord>> {
        self.clones.list(filter)
    }

    // ------------------------------------------------------------------
    // Clone lifecycle
    // ------------------------------------------------------------------

    /// Provision a clone from an image and attach it.
    pub async fn create_clone(&self, req: CreateCloneRequest) -> CloneResult<CloneRecord> {
        let image = self.images.get(&req.image_id)?;
        if image.retired {
            return Err(CloneError::InvalidState(format!(
                "image {} is retired",
                image.image_id
            )));
        }

        if let Some(existing) = self.clones.find_live_attach_point(
            &req.host_name,
            &req.sql_instance,
            &req.database_name,
        )? {
            return Err(CloneError::DuplicateAttachPoint(existing.attach_point()));
        }

        let clone_id = Uuid::new_v4().to_string();
        let _guard = self.begin(&clone_id)?;

        // Reference first: retirement's zero-check must see this Create.
        self.refs.acquire(&req.image_id);

        // The acquire makes us visible to the retire gate, but retirement
        // may have committed between the fetch above and the acquire.
        match self.images.get(&req.image_id) {
            Ok(img) if !img.retired => {}
            _ => {
                let _ = self.refs.release(&req.image_id);
                return Err(CloneError::InvalidState(format!(
                    "image {} was retired concurrently",
                    req.image_id
                )));
            }
        }

        let clone_location = self.derive_clone_location(&image.image_location, &clone_id);
        let record = match self.clones.insert(NewClone {
            clone_id: clone_id.clone(),
            image_id: req.image_id.clone(),
            clone_location,
            host_name: req.host_name,
            sql_instance: req.sql_instance,
            database_name: req.database_name,
        }) {
            Ok(record) => record,
            Err(e) => {
                let _ = self.refs.release(&req.image_id);
                return Err(e);
            }
        };

        tracing::info!(
            clone_id = %record.clone_id,
            image_id = %record.image_id,
            attach_point = %record.attach_point(),
            "provisioning clone"
        );
        self.drive_provisioning(&image, record).await
    }

    /// Tear a clone down. Converges when re-run after a partial failure;
    /// calling it on an already removed clone fails with `CloneNotFound`.
    pub async fn remove_clone(&self, clone_id: &str) -> CloneResult<()> {
        // Guard first: the status check is only trustworthy while we own the
        // clone.
        let _guard = self.begin(clone_id)?;
        let record = match self.clones.try_get(clone_id)? {
            None => return Err(CloneError::CloneNotFound(clone_id.to_string())),
            Some(r) if r.status == CloneStatus::Removed => {
                return Err(CloneError::CloneNotFound(format!(
                    "{} already removed",
                    clone_id
                )))
            }
            Some(r) => r,
        };

        // A Failed clone is outside the reference projection; moving it back
        // through Disabling re-enters the live set for the teardown window.
        if record.status == CloneStatus::Failed {
            self.refs.acquire(&record.image_id);
        }

        let record = self.clones.set_status(clone_id, CloneStatus::Disabling)?;
        tracing::info!(clone_id, attach_point = %record.attach_point(), "removing clone");
        self.finish_removal(&record).await
    }

    /// Detach a clone's database without destroying its storage.
    pub async fn disable_clone(&self, clone_id: &str) -> CloneResult<CloneRecord> {
        let _guard = self.begin(clone_id)?;
        let record = self.clones.get(clone_id)?;
        if record.status != CloneStatus::Enabled {
            return Err(CloneError::InvalidState(format!(
                "clone {} is {}, expected enabled",
                clone_id, record.status
            )));
        }

        self.step(clone_id, "detach database", || {
            self.binder
                .detach_database(&record.sql_instance, &record.database_name)
        })
        .await
        .map_err(StepError::into_error)?;

        let record = self.clones.set_status(clone_id, CloneStatus::Disabled)?;
        tracing::info!(clone_id, "disabled clone");
        Ok(record)
    }

    /// Re-attach a previously disabled clone.
    pub async fn enable_clone(&self, clone_id: &str) -> CloneResult<CloneRecord> {
        let _guard = self.begin(clone_id)?;
        let record = self.clones.get(clone_id)?;
        if record.status != CloneStatus::Disabled {
            return Err(CloneError::InvalidState(format!(
                "clone {} is {}, expected disabled",
                clone_id, record.status
            )));
        }
        let access_path = record.access_path.clone().ok_or_else(|| {
            CloneError::Inconsistent(format!("clone {} has no recorded access path", clone_id))
        })?;

        self.step(clone_id, "attach database", || {
            self.binder
                .attach_database(&access_path, &record.sql_instance, &record.database_name)
        })
        .await
        .map_err(StepError::into_error)?;

        let record = self.clones.set_status(clone_id, CloneStatus::Enabled)?;
        tracing::info!(clone_id, "enabled clone");
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Step drivers (shared with reconcile)
    // ------------------------------------------------------------------

    /// Run allocate → mount → attach for a Provisioning row, compensating in
    /// reverse on failure.
    async fn drive_provisioning(
        &self,
        image: &ImageRecord,
        record: CloneRecord,
    ) -> CloneResult<CloneRecord> {
        let clone_id = record.clone_id.clone();
        let mut stack = CompensationStack::new();

        match self.provision_steps(image, record, &mut stack).await {
            Ok(record) => {
                tracing::info!(clone_id = %record.clone_id, access_path = ?record.access_path, "clone enabled");
                Ok(record)
            }
            Err(StepError::Timeout(e)) => {
                tracing::warn!(clone_id = %clone_id, error = %e, "provisioning timed out, leaving row for reconcile");
                Err(e)
            }
            Err(StepError::Fault(e)) => {
                tracing::warn!(clone_id = %clone_id, error = %e, "provisioning failed, unwinding");
                stack.unwind(self.binder.as_ref(), &clone_id).await;
                if let Err(db_err) = self.clones.set_status(&clone_id, CloneStatus::Failed) {
                    tracing::warn!(clone_id = %clone_id, error = %db_err, "failed to mark clone as failed");
                }
                if let Err(rel_err) = self.refs.release(&image.image_id) {
                    tracing::warn!(clone_id = %clone_id, error = %rel_err, "failed to release image reference");
                }
                Err(e)
            }
        }
    }

    async fn provision_steps(
        &self,
        image: &ImageRecord,
        record: CloneRecord,
        stack: &mut CompensationStack,
    ) -> Result<CloneRecord, StepError> {
        let clone_id = record.clone_id.as_str();

        self.step(clone_id, "allocate diff", || {
            self.binder
                .allocate_diff(&image.image_location, &record.clone_location)
        })
        .await?;
        stack.push(Compensation::DeleteDiff {
            diff_location: record.clone_location.clone(),
        });

        let access_path = self
            .step(clone_id, "mount", || self.binder.mount(&record.clone_location))
            .await?;
        stack.push(Compensation::Unmount {
            access_path: access_path.clone(),
        });
        self.clones
            .set_access_path(clone_id, &access_path)
            .map_err(StepError::Fault)?;

        self.step(clone_id, "attach database", || {
            self.binder
                .attach_database(&access_path, &record.sql_instance, &record.database_name)
        })
        .await?;
        stack.push(Compensation::DetachDatabase {
            sql_instance: record.sql_instance.clone(),
            database_name: record.database_name.clone(),
        });

        self.clones
            .set_status(clone_id, CloneStatus::Enabled)
            .map_err(StepError::Fault)
    }

    /// Run detach → unmount → delete for a Disabling row. Every step
    /// tolerates an already absent target, so re-running converges.
    async fn finish_removal(&self, record: &CloneRecord) -> CloneResult<()> {
        let clone_id = record.clone_id.as_str();

        match self.teardown_steps(record).await {
            Ok(()) => {
                self.clones.set_status(clone_id, CloneStatus::Removed)?;
                if let Err(e) = self.refs.release(&record.image_id) {
                    tracing::warn!(clone_id, error = %e, "failed to release image reference");
                }
                tracing::info!(clone_id, "clone removed");
                Ok(())
            }
            Err(StepError::Timeout(e)) => {
                tracing::warn!(clone_id, error = %e, "teardown timed out, leaving row for reconcile");
                Err(e)
            }
            Err(StepError::Fault(e)) => {
                // The row stays visible as Failed for operator diagnosis; it
                // leaves the reference projection but still blocks image
                // retirement through the registry check.
                tracing::warn!(clone_id, error = %e, "teardown failed");
                if let Err(db_err) = self.clones.set_status(clone_id, CloneStatus::Failed) {
                    tracing::warn!(clone_id, error = %db_err, "failed to mark clone as failed");
                }
                if let Err(rel_err) = self.refs.release(&record.image_id) {
                    tracing::warn!(clone_id, error = %rel_err, "failed to release image reference");
                }
                Err(e)
            }
        }
    }

    async fn teardown_steps(&self, record: &CloneRecord) -> Result<(), StepError> {
        let clone_id = record.clone_id.as_str();

        self.step_absent_ok(clone_id, "detach database", || {
            self.binder
                .detach_database(&record.sql_instance, &record.database_name)
        })
        .await?;

        if let Some(access_path) = &record.access_path {
            self.step_absent_ok(clone_id, "unmount", || self.binder.unmount(access_path))
                .await?;
        }

        self.step_absent_ok(clone_id, "delete diff", || {
            self.binder.delete_diff(&record.clone_location)
        })
        .await?;

        Ok(())
    }

    /// Run one binder call with transient retry and a deadline.
    async fn step<T, F, Fut>(&self, clone_id: &str, label: &str, mut op: F) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BinderResult<T>>,
    {
        let deadline = self.options.orchestrator.step_deadline();
        let retry = &self.options.orchestrator.retry;
        let mut backoff = retry.initial_backoff();
        let mut attempt = 1u32;

        loop {
            match tokio::time::timeout(deadline, op()).await {
                Err(_) => {
                    return Err(StepError::Timeout(CloneError::TransientIo(format!(
                        "{} timed out after {}s",
                        label,
                        deadline.as_secs()
                    ))))
                }
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(BinderError::Transient(msg))) if attempt < retry.max_attempts => {
                    tracing::warn!(
                        clone_id,
                        step = label,
                        attempt,
                        error = %msg,
                        "transient binder fault, retrying"
                    );
                    // Keep the row warm so reconcile leaves it to us.
                    let _ = self.clones.touch(clone_id);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Ok(Err(err)) => return Err(StepError::Fault(err.into())),
            }
        }
    }

    /// Like `step`, for teardown calls where a missing target means the work
    /// is already done.
    async fn step_absent_ok<F, Fut>(
        &self,
        clone_id: &str,
        label: &str,
        mut op: F,
    ) -> Result<(), StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BinderResult<()>>,
    {
        let deadline = self.options.orchestrator.step_deadline();
        let retry = &self.options.orchestrator.retry;
        let mut backoff = retry.initial_backoff();
        let mut attempt = 1u32;

        loop {
            match tokio::time::timeout(deadline, op()).await {
                Err(_) => {
                    return Err(StepError::Timeout(CloneError::TransientIo(format!(
                        "{} timed out after {}s",
                        label,
                        deadline.as_secs()
                    ))))
                }
                Ok(Ok(())) => return Ok(()),
                Ok(Err(BinderError::NotFound(msg))) => {
                    tracing::debug!(clone_id, step = label, detail = %msg, "target already absent");
                    return Ok(());
                }
                Ok(Err(BinderError::Transient(msg))) if attempt < retry.max_attempts => {
                    tracing::warn!(
                        clone_id,
                        step = label,
                        attempt,
                        error = %msg,
                        "transient binder fault, retrying"
                    );
                    let _ = self.clones.touch(clone_id);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Ok(Err(err)) => return Err(StepError::Fault(err.into())),
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Claim exclusive ownership of a clone id for the current operation.
    fn begin(&self, clone_id: &str) -> CloneResult<OpGuard<'_>> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(clone_id.to_string()) {
            return Err(CloneError::OperationInProgress(clone_id.to_string()));
        }
        Ok(OpGuard {
            orchestrator: self,
            clone_id: clone_id.to_string(),
        })
    }

    /// The diff location is a pure function of the clone id, which is what
    /// lets the binder dedup allocations across re-drives.
    fn derive_clone_location(&self, image_location: &str, clone_id: &str) -> String {
        let ext = Path::new(image_location)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "diff".to_string());
        self.options
            .diff_dir()
            .join(format!("{}.{}", clone_id, ext))
            .to_string_lossy()
            .into_owned()
    }

    pub(crate) fn clone_store(&self) -> &CloneStore {
        &self.clones
    }

    pub(crate) fn image_store(&self) -> &ImageStore {
        &self.images
    }
}

/// RAII token for the per-clone single-writer discipline.
struct OpGuard<'a> {
    orchestrator: &'a CloneOrchestrator,
    clone_id: String,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.in_flight.lock().remove(&self.clone_id);
    }
}
