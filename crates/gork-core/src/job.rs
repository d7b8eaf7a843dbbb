use crate::{BrokerError, QueueId, Result, Task, TaskId, TaskPayload, ValidationErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job
pub type JobId = Uuid;

/// Single delivery attempt of a task, as seen by the worker holding it.
///
/// Progress and logs live only here until the job completes; they never
/// touch the durable task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_id: TaskId,
    pub queue_id: QueueId,
    /// Copy of the task input at delivery time
    pub input: TaskPayload,
    /// 0-100
    pub progress: u8,
    pub logs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Materialize the job for a task that was just leased
    pub fn for_task(task: &Task, now: DateTime<Utc>) -> Self {
        Job {
            id: Uuid::new_v4(),
            task_id: task.id,
            queue_id: task.queue_id,
            input: task.input.clone(),
            progress: 0,
            logs: Vec::new(),
            created_at: now,
            delivered_at: task.delivered_at.unwrap_or(now),
            finished_at: None,
        }
    }

    /// Record worker progress and/or a log line
    pub fn report(&mut self, progress: Option<u8>, log_line: Option<String>) -> Result<()> {
        if let Some(progress) = progress {
            if progress > 100 {
                let mut errors = ValidationErrors::new();
                errors.add("progress", format!("must be between 0 and 100 (got {})", progress));
                return Err(BrokerError::Validation(errors));
            }
            self.progress = progress;
        }
        if let Some(line) = log_line {
            self.logs.push(line);
        }
        Ok(())
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);
    }
}
