use chrono::{DateTime, Utc};
use digest_core::TaskStatus;
use serde::{Deserialize, Serialize};

use crate::FetchError;

/// Outcome of one task within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    pub snapshot_path: Option<String>,
    pub snapshot_key: Option<String>,
    pub items_fetched: usize,
    pub items_kept: usize,
    pub source_errors: Vec<FetchError>,
    pub error: Option<String>,
}

impl TaskReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Pending,
            snapshot_path: None,
            snapshot_key: None,
            items_fetched: 0,
            items_kept: 0,
            source_errors: Vec::new(),
            error: None,
        }
    }
}

/// Outcome of a whole batch, tasks in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Batch settings that were overridden by the orchestrator's own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settings_overridden: Vec<String>,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn succeeded(&self) -> usize {
        self.count(TaskStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    pub fn all_succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Succeeded)
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}
