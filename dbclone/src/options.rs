//! Configuration for dbclone.

use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the home directory.
pub const DBCLONE_HOME_ENV: &str = "DBCLONE_HOME";

const DBCLONE_DIR: &str = ".dbclone";

/// Top-level options for a dbclone instance.
///
/// Users can create it with defaults and modify fields as needed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbcloneOptions {
    /// Home directory: holds the registry database and, for the local
    /// binder, diff disks and mount points.
    pub home_dir: PathBuf,

    #[serde(default)]
    pub orchestrator: OrchestratorOptions,
}

impl Default for DbcloneOptions {
    fn default() -> Self {
        let home_dir = std::env::var(DBCLONE_HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
                path.push(DBCLONE_DIR);
                path
            });

        Self {
            home_dir,
            orchestrator: OrchestratorOptions::default(),
        }
    }
}

impl DbcloneOptions {
    /// Path of the registry database file.
    pub fn registry_path(&self) -> PathBuf {
        self.home_dir.join("registry.db")
    }

    /// Directory where clone differencing disks are allocated when the
    /// caller does not configure one.
    pub fn diff_dir(&self) -> PathBuf {
        self.orchestrator
            .diff_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join("diffs"))
    }
}

/// Retry policy for transient binder faults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Total attempts per step, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles on each further attempt.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl RetryOptions {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Orchestrator tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorOptions {
    #[serde(default)]
    pub retry: RetryOptions,

    /// Deadline for a single binder call. Expiry leaves the clone row in its
    /// in-flight status for reconcile to pick up.
    #[serde(default = "default_step_deadline_secs")]
    pub step_deadline_secs: u64,

    /// How long an in-flight row must sit idle before reconcile re-drives it.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Where to allocate differencing disks. Defaults to `<home>/diffs`.
    #[serde(default)]
    pub diff_dir: Option<PathBuf>,
}

impl OrchestratorOptions {
    pub fn step_deadline(&self) -> Duration {
        Duration::from_secs(self.step_deadline_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_step_deadline_secs() -> u64 {
    300
}

fn default_stale_after_secs() -> u64 {
    600
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retry: RetryOptions::default(),
            step_deadline_secs: default_step_deadline_secs(),
            stale_after_secs: default_stale_after_secs(),
            diff_dir: None,
        }
    }
}
