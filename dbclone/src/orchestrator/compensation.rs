//! Undo actions for partially provisioned clones.
//!
//! Every completed provisioning step pushes its inverse; on failure the
//! stack unwinds in reverse order. Unwind failures are logged and swallowed:
//! the root cause of the failed operation must stay visible to the caller,
//! and every action here is idempotent, so a later re-drive can finish the
//! cleanup.

use crate::binder::{BinderResult, StorageBinder};

#[derive(Debug)]
pub(crate) enum Compensation {
    DetachDatabase {
        sql_instance: String,
        database_name: String,
    },
    Unmount {
        access_path: String,
    },
    DeleteDiff {
        diff_location: String,
    },
}

impl Compensation {
    fn describe(&self) -> String {
        match self {
            Compensation::DetachDatabase {
                sql_instance,
                database_name,
            } => format!("detach {}/{}", sql_instance, database_name),
            Compensation::Unmount { access_path } => format!("unmount {}", access_path),
            Compensation::DeleteDiff { diff_location } => format!("delete diff {}", diff_location),
        }
    }

    async fn run(&self, binder: &dyn StorageBinder) -> BinderResult<()> {
        match self {
            Compensation::DetachDatabase {
                sql_instance,
                database_name,
            } => binder.detach_database(sql_instance, database_name).await,
            Compensation::Unmount { access_path } => binder.unmount(access_path).await,
            Compensation::DeleteDiff { diff_location } => binder.delete_diff(diff_location).await,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CompensationStack {
    items: Vec<Compensation>,
}

impl CompensationStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, compensation: Compensation) {
        self.items.push(compensation);
    }

    /// Execute all recorded undo actions, most recent first.
    pub(crate) async fn unwind(self, binder: &dyn StorageBinder, clone_id: &str) {
        for compensation in self.items.into_iter().rev() {
            match compensation.run(binder).await {
                Ok(()) => {
                    tracing::debug!(clone_id, action = %compensation.describe(), "compensated")
                }
                Err(e) => {
                    tracing::warn!(
                        clone_id,
                        action = %compensation.describe(),
                        error = %e,
                        "compensation failed"
                    )
                }
            }
        }
    }
}
