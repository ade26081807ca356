use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a task stands within one run batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid task transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// `Pending -> Running -> {Succeeded, Failed}`; terminal states are final.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskLifecycle {
    status: TaskStatus,
}

impl TaskLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Pending, TaskStatus::Running)
    }

    pub fn succeed(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Running, TaskStatus::Succeeded)
    }

    pub fn fail(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Running, TaskStatus::Failed)
    }

    fn transition(&mut self, expected: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        if self.status != expected {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
