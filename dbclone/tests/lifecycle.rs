//! End-to-end lifecycle tests for the clone orchestrator.
//!
//! Most tests run against a scripted mock binder (call recording, failure
//! injection); a few run against `LocalDiskBinder` to check real filesystem
//! effects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tempfile::TempDir;

use dbclone::binder::{BinderError, BinderResult, StorageBinder};
use dbclone::{
    CloneError, CloneFilter, CloneOrchestrator, CloneStatus, CreateCloneRequest, DbcloneOptions,
    LocalDiskBinder, NewImage, OrchestratorOptions, RetryOptions,
};
use dbclone::registry::Database;

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// How an injected failure behaves.
#[derive(Clone, Copy, Debug)]
enum FailMode {
    Transient,
    PermissionDenied,
    /// Never return; the step deadline has to cut the call off.
    Hang,
}

#[derive(Default)]
struct MockState {
    /// diff_location -> base_location
    diffs: HashMap<String, String>,
    mounts: HashSet<String>,
    /// (sql_instance, database_name) -> access_path
    attachments: HashMap<(String, String), String>,
    calls: Vec<String>,
    /// step name -> (mode, remaining occurrences)
    failures: HashMap<String, (FailMode, usize)>,
}

/// Scripted in-memory binder honoring the idempotency contract.
#[derive(Default)]
struct MockBinder {
    state: Mutex<MockState>,
}

impl MockBinder {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `step` fail `times` times with the given mode.
    fn fail(&self, step: &str, mode: FailMode, times: usize) {
        self.state
            .lock()
            .failures
            .insert(step.to_string(), (mode, times));
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn call_count(&self, step: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(step))
            .count()
    }

    fn diff_count(&self) -> usize {
        self.state.lock().diffs.len()
    }

    fn is_mounted(&self, access_path: &str) -> bool {
        self.state.lock().mounts.contains(access_path)
    }

    fn is_attached(&self, sql_instance: &str, database_name: &str) -> bool {
        self.state
            .lock()
            .attachments
            .contains_key(&(sql_instance.to_string(), database_name.to_string()))
    }

    /// Record the call, then either inject a scripted failure or proceed.
    async fn enter(&self, step: &str, detail: &str) -> BinderResult<()> {
        let mode = {
            let mut state = self.state.lock();
            state.calls.push(format!("{}:{}", step, detail));
            match state.failures.get_mut(step) {
                Some((mode, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*mode)
                }
                _ => None,
            }
        };

        match mode {
            None => Ok(()),
            Some(FailMode::Transient) => {
                Err(BinderError::Transient(format!("{} fault injected", step)))
            }
            Some(FailMode::PermissionDenied) => Err(BinderError::PermissionDenied(format!(
                "{} denied by injection",
                step
            ))),
            Some(FailMode::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(BinderError::Transient("hang elapsed".into()))
            }
        }
    }
}

#[async_trait]
impl StorageBinder for MockBinder {
    async fn allocate_diff(&self, base_location: &str, diff_location: &str) -> BinderResult<()> {
        self.enter("allocate_diff", diff_location).await?;
        let mut state = self.state.lock();
        if let Some(base) = state.diffs.get(diff_location) {
            if base != base_location {
                return Err(BinderError::AlreadyExists(format!(
                    "diff {} backed by {}",
                    diff_location, base
                )));
            }
            return Ok(());
        }
        state
            .diffs
            .insert(diff_location.to_string(), base_location.to_string());
        Ok(())
    }

    async fn mount(&self, diff_location: &str) -> BinderResult<String> {
        self.enter("mount", diff_location).await?;
        let mut state = self.state.lock();
        if !state.diffs.contains_key(diff_location) {
            return Err(BinderError::NotFound(format!(
                "diff missing: {}",
                diff_location
            )));
        }
        let access_path = format!("/mnt/{}", diff_location.replace('/', "_"));
        state.mounts.insert(access_path.clone());
        Ok(access_path)
    }

    async fn attach_database(
        &self,
        access_path: &str,
        sql_instance: &str,
        database_name: &str,
    ) -> BinderResult<()> {
        self.enter(
            "attach_database",
            &format!("{}/{}", sql_instance, database_name),
        )
        .await?;
        let mut state = self.state.lock();
        let key = (sql_instance.to_string(), database_name.to_string());
        match state.attachments.get(&key) {
            Some(existing) if existing == access_path => Ok(()),
            Some(existing) => Err(BinderError::AlreadyExists(format!(
                "already attached from {}",
                existing
            ))),
            None => {
                state.attachments.insert(key, access_path.to_string());
                Ok(())
            }
        }
    }

    async fn detach_database(&self, sql_instance: &str, database_name: &str) -> BinderResult<()> {
        self.enter(
            "detach_database",
            &format!("{}/{}", sql_instance, database_name),
        )
        .await?;
        self.state
            .lock()
            .attachments
            .remove(&(sql_instance.to_string(), database_name.to_string()));
        Ok(())
    }

    async fn unmount(&self, access_path: &str) -> BinderResult<()> {
        self.enter("unmount", access_path).await?;
        self.state.lock().mounts.remove(access_path);
        Ok(())
    }

    async fn delete_diff(&self, diff_location: &str) -> BinderResult<()> {
        self.enter("delete_diff", diff_location).await?;
        self.state.lock().diffs.remove(diff_location);
        Ok(())
    }
}

/// Test context with isolated registry and automatic cleanup.
struct TestContext {
    orchestrator: CloneOrchestrator,
    binder: Arc<MockBinder>,
    _temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_options(|_| {})
    }

    fn with_options(tune: impl FnOnce(&mut OrchestratorOptions)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut orchestrator_opts = OrchestratorOptions {
            retry: RetryOptions {
                max_attempts: 3,
                initial_backoff_ms: 10,
            },
            step_deadline_secs: 5,
            stale_after_secs: 0,
            diff_dir: None,
        };
        tune(&mut orchestrator_opts);

        let options = DbcloneOptions {
            home_dir: temp_dir.path().to_path_buf(),
            orchestrator: orchestrator_opts,
        };
        let binder = MockBinder::new();
        let orchestrator =
            CloneOrchestrator::new(options, binder.clone()).expect("Failed to create orchestrator");
        Self {
            orchestrator,
            binder,
            _temp_dir: temp_dir,
        }
    }

    fn register_image(&self, location: &str) -> String {
        self.orchestrator
            .register_image(NewImage {
                image_name: "Sales_20260801".into(),
                image_location: location.into(),
                source_database_name: "Sales".into(),
                source_database_timestamp: Utc::now(),
                size_bytes: 4 * 1024 * 1024 * 1024,
            })
            .unwrap()
            .image_id
    }

    fn request(&self, image_id: &str, host: &str, instance: &str, db: &str) -> CreateCloneRequest {
        CreateCloneRequest {
            image_id: image_id.into(),
            host_name: host.into(),
            sql_instance: instance.into(),
            database_name: db.into(),
        }
    }
}

// ============================================================================
// CREATE
// ============================================================================

#[tokio::test]
async fn test_create_success_effects() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");

    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    assert_eq!(clone.status, CloneStatus::Enabled);
    let access_path = clone.access_path.as_deref().expect("access path recorded");
    assert!(ctx.binder.is_mounted(access_path));
    assert!(ctx.binder.is_attached("SQL01", "Sales"));
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 1);

    // Fixed step order: allocate, mount, attach.
    let calls = ctx.binder.calls();
    assert!(calls[0].starts_with("allocate_diff"));
    assert!(calls[1].starts_with("mount"));
    assert!(calls[2].starts_with("attach_database"));

    // Clone location is derived from the image extension and the clone id.
    assert!(clone.clone_location.ends_with(&format!("{}.vhdx", clone.clone_id)));
}

#[tokio::test]
async fn test_create_unknown_image() {
    let ctx = TestContext::new();
    let err = ctx
        .orchestrator
        .create_clone(ctx.request("no-such-image", "hostA", "SQL01", "Sales"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::ImageNotFound(_)));
}

#[tokio::test]
async fn test_create_duplicate_attach_point() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");

    ctx.orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    let err = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::DuplicateAttachPoint(_)));
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 1);
}

#[tokio::test]
async fn test_create_transient_fault_retried() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    ctx.binder.fail("allocate_diff", FailMode::Transient, 2);

    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    assert_eq!(clone.status, CloneStatus::Enabled);
    assert_eq!(ctx.binder.call_count("allocate_diff"), 3);
    assert_eq!(ctx.binder.diff_count(), 1);
}

#[tokio::test]
async fn test_create_transient_exhaustion_unwinds() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    ctx.binder.fail("mount", FailMode::Transient, usize::MAX);

    let err = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::TransientIo(_)));

    let clones = ctx
        .orchestrator
        .list_clones(&CloneFilter::default())
        .unwrap();
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].status, CloneStatus::Failed);
    // The allocated diff was compensated away and the reference returned.
    assert_eq!(ctx.binder.diff_count(), 0);
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 0);
}

#[tokio::test]
async fn test_create_permission_denied_unwinds() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    ctx.binder
        .fail("attach_database", FailMode::PermissionDenied, 1);

    let err = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::PermissionDenied(_)));

    let clones = ctx
        .orchestrator
        .list_clones(&CloneFilter::default())
        .unwrap();
    assert_eq!(clones[0].status, CloneStatus::Failed);
    // Diff deleted, nothing mounted, not attached, reference decremented.
    assert_eq!(ctx.binder.diff_count(), 0);
    assert!(!ctx.binder.is_attached("SQL01", "Sales"));
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 0);
    // Compensation ran in reverse order after the failed attach.
    let calls = ctx.binder.calls();
    let unmount_idx = calls.iter().position(|c| c.starts_with("unmount")).unwrap();
    let delete_idx = calls
        .iter()
        .position(|c| c.starts_with("delete_diff"))
        .unwrap();
    assert!(unmount_idx < delete_idx);
}

// ============================================================================
// REMOVE
// ============================================================================

#[tokio::test]
async fn test_remove_tears_everything_down() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    ctx.orchestrator.remove_clone(&clone.clone_id).await.unwrap();

    let record = ctx.orchestrator.get_clone(&clone.clone_id).unwrap();
    assert_eq!(record.status, CloneStatus::Removed);
    assert_eq!(ctx.binder.diff_count(), 0);
    assert!(!ctx.binder.is_attached("SQL01", "Sales"));
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 0);
}

#[tokio::test]
async fn test_remove_twice_fails_without_redriving_teardown() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    ctx.orchestrator.remove_clone(&clone.clone_id).await.unwrap();
    let detach_calls = ctx.binder.call_count("detach_database");

    let err = ctx
        .orchestrator
        .remove_clone(&clone.clone_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::CloneNotFound(_)));
    assert_eq!(ctx.binder.call_count("detach_database"), detach_calls);
}

#[tokio::test]
async fn test_remove_unknown_clone() {
    let ctx = TestContext::new();
    let err = ctx.orchestrator.remove_clone("no-such-clone").await.unwrap_err();
    assert!(matches!(err, CloneError::CloneNotFound(_)));
}

#[tokio::test]
async fn test_remove_failure_leaves_failed_row() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    ctx.binder
        .fail("delete_diff", FailMode::PermissionDenied, 1);
    let err = ctx
        .orchestrator
        .remove_clone(&clone.clone_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::PermissionDenied(_)));

    // The row stays visible for the operator instead of disappearing.
    let record = ctx.orchestrator.get_clone(&clone.clone_id).unwrap();
    assert_eq!(record.status, CloneStatus::Failed);
    // And the image cannot be retired past it.
    let err = ctx.orchestrator.retire_image(&image_id).unwrap_err();
    assert!(matches!(err, CloneError::ImageInUse(_)));

    // Re-running Remove converges: detach and unmount are already done and
    // tolerated, delete succeeds this time.
    ctx.orchestrator.remove_clone(&clone.clone_id).await.unwrap();
    let record = ctx.orchestrator.get_clone(&clone.clone_id).unwrap();
    assert_eq!(record.status, CloneStatus::Removed);
    assert_eq!(ctx.binder.diff_count(), 0);
    ctx.orchestrator.retire_image(&image_id).unwrap();
}

// ============================================================================
// ENABLE / DISABLE
// ============================================================================

#[tokio::test]
async fn test_disable_and_enable_round_trip() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    let record = ctx.orchestrator.disable_clone(&clone.clone_id).await.unwrap();
    assert_eq!(record.status, CloneStatus::Disabled);
    assert!(!ctx.binder.is_attached("SQL01", "Sales"));
    // A disabled clone still pins its image.
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 1);
    assert!(matches!(
        ctx.orchestrator.retire_image(&image_id),
        Err(CloneError::ImageInUse(_))
    ));

    let record = ctx.orchestrator.enable_clone(&clone.clone_id).await.unwrap();
    assert_eq!(record.status, CloneStatus::Enabled);
    assert!(ctx.binder.is_attached("SQL01", "Sales"));
}

#[tokio::test]
async fn test_enable_requires_disabled_state() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    let err = ctx
        .orchestrator
        .enable_clone(&clone.clone_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::InvalidState(_)));
}

// ============================================================================
// RETIREMENT & REFERENCE COUNTS
// ============================================================================

#[tokio::test]
async fn test_retire_gated_by_references() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");

    let a = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 1);

    let b = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostB", "SQL02", "Sales"))
        .await
        .unwrap();
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 2);

    let err = ctx.orchestrator.retire_image(&image_id).unwrap_err();
    assert!(matches!(err, CloneError::ImageInUse(_)));

    ctx.orchestrator.remove_clone(&a.clone_id).await.unwrap();
    ctx.orchestrator.remove_clone(&b.clone_id).await.unwrap();
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 0);

    ctx.orchestrator.retire_image(&image_id).unwrap();
    assert!(ctx.orchestrator.list_images(false).unwrap().is_empty());

    // Creating from a retired image is refused.
    let err = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostC", "SQL03", "Sales"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::InvalidState(_)));
}

#[tokio::test]
async fn test_create_remove_reference_round_trip() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 0);

    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 1);

    ctx.orchestrator.remove_clone(&clone.clone_id).await.unwrap();
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 0);
}

// ============================================================================
// DEADLINES, SERIALIZATION, RECONCILE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_step_deadline_fails_in_place() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    ctx.binder.fail("attach_database", FailMode::Hang, 1);

    let err = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::TransientIo(_)));

    // Failed-in-place: row stays Provisioning, reference held, nothing
    // compensated away.
    let clones = ctx
        .orchestrator
        .list_clones(&CloneFilter::default())
        .unwrap();
    assert_eq!(clones[0].status, CloneStatus::Provisioning);
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 1);
    assert_eq!(ctx.binder.diff_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_resumes_provisioning() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    ctx.binder.fail("attach_database", FailMode::Hang, 1);

    ctx.orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap_err();

    // The binder is healthy again; reconcile re-drives from the last
    // completed step and converges to Enabled without duplicate artifacts.
    let report = ctx.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.resumed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);

    let clones = ctx
        .orchestrator
        .list_clones(&CloneFilter::default())
        .unwrap();
    assert_eq!(clones[0].status, CloneStatus::Enabled);
    assert_eq!(ctx.binder.diff_count(), 1);
    assert!(ctx.binder.is_attached("SQL01", "Sales"));
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_resumes_teardown() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    ctx.binder.fail("delete_diff", FailMode::Hang, 1);
    ctx.orchestrator
        .remove_clone(&clone.clone_id)
        .await
        .unwrap_err();
    let record = ctx.orchestrator.get_clone(&clone.clone_id).unwrap();
    assert_eq!(record.status, CloneStatus::Disabling);

    let report = ctx.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.completed, 1);

    let record = ctx.orchestrator.get_clone(&clone.clone_id).unwrap();
    assert_eq!(record.status, CloneStatus::Removed);
    assert_eq!(ctx.binder.diff_count(), 0);
    assert_eq!(ctx.orchestrator.reference_count(&image_id), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_operation_on_inflight_clone_rejected() {
    let ctx = TestContext::new();
    let image_id = ctx.register_image("/base/img1.vhdx");
    let clone = ctx
        .orchestrator
        .create_clone(ctx.request(&image_id, "hostA", "SQL01", "Sales"))
        .await
        .unwrap();

    ctx.binder.fail("detach_database", FailMode::Hang, 1);
    let orchestrator = Arc::new(ctx.orchestrator);
    let background = {
        let orchestrator = orchestrator.clone();
        let clone_id = clone.clone_id.clone();
        tokio::spawn(async move { orchestrator.remove_clone(&clone_id).await })
    };

    // Let the background remove reach its binder call.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let err = orchestrator.remove_clone(&clone.clone_id).await.unwrap_err();
    assert!(matches!(err, CloneError::OperationInProgress(_)));

    // The hanging call eventually hits the deadline and the remove fails in
    // place; a later remove can then proceed.
    let result = background.await.unwrap();
    assert!(result.is_err());
    ctx.binder.state.lock().failures.clear();
    orchestrator.remove_clone(&clone.clone_id).await.unwrap();
}

// ============================================================================
// RESTART / REBUILD
// ============================================================================

#[tokio::test]
async fn test_reference_tracker_rebuilt_from_registry() {
    let temp_dir = TempDir::new().unwrap();
    let options = DbcloneOptions {
        home_dir: temp_dir.path().to_path_buf(),
        orchestrator: OrchestratorOptions::default(),
    };

    let binder = MockBinder::new();
    let image_id;
    let clone_id;
    {
        let orchestrator = CloneOrchestrator::new(options.clone(), binder.clone()).unwrap();
        image_id = {
            let image = orchestrator
                .register_image(NewImage {
                    image_name: "Sales_20260801".into(),
                    image_location: "/base/img1.vhdx".into(),
                    source_database_name: "Sales".into(),
                    source_database_timestamp: Utc::now(),
                    size_bytes: 1024,
                })
                .unwrap();
            image.image_id
        };
        let clone = orchestrator
            .create_clone(CreateCloneRequest {
                image_id: image_id.clone(),
                host_name: "hostA".into(),
                sql_instance: "SQL01".into(),
                database_name: "Sales".into(),
            })
            .await
            .unwrap();
        clone_id = clone.clone_id;
    }

    // "Restart": a fresh orchestrator over the same registry derives the
    // count from clone rows, not from any in-memory leftovers.
    let db = Database::open(&options.registry_path()).unwrap();
    let orchestrator = CloneOrchestrator::with_database(db, options, binder).unwrap();
    assert_eq!(orchestrator.reference_count(&image_id), 1);

    orchestrator.remove_clone(&clone_id).await.unwrap();
    assert_eq!(orchestrator.reference_count(&image_id), 0);
    orchestrator.retire_image(&image_id).unwrap();
}

// ============================================================================
// LOCAL BINDER END-TO-END
// ============================================================================

#[tokio::test]
async fn test_local_binder_full_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("img1.vhdx");
    std::fs::write(&base, b"master").unwrap();

    let options = DbcloneOptions {
        home_dir: temp_dir.path().join("home"),
        orchestrator: OrchestratorOptions::default(),
    };
    let binder = Arc::new(LocalDiskBinder::new(temp_dir.path()).unwrap());
    let orchestrator = CloneOrchestrator::new(options, binder).unwrap();

    let image = orchestrator
        .register_image(NewImage {
            image_name: "Sales_20260801".into(),
            image_location: base.to_string_lossy().into_owned(),
            source_database_name: "Sales".into(),
            source_database_timestamp: Utc::now(),
            size_bytes: 6,
        })
        .unwrap();

    let clone = orchestrator
        .create_clone(CreateCloneRequest {
            image_id: image.image_id.clone(),
            host_name: "hostA".into(),
            sql_instance: "SQL01".into(),
            database_name: "Sales".into(),
        })
        .await
        .unwrap();

    assert_eq!(clone.status, CloneStatus::Enabled);
    assert!(std::path::Path::new(&clone.clone_location).exists());
    let access_path = clone.access_path.clone().unwrap();
    assert!(std::path::Path::new(&access_path).is_dir());

    orchestrator.remove_clone(&clone.clone_id).await.unwrap();
    assert!(!std::path::Path::new(&clone.clone_location).exists());
    assert!(!std::path::Path::new(&access_path).exists());

    orchestrator.retire_image(&image.image_id).unwrap();
}
