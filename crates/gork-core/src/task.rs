use crate::{BrokerError, Priority, QueueId, Result, ValidationErrors, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Task payload (arbitrary bytes)
pub type TaskPayload = Vec<u8>;

/// Header map a task carries for routing
pub type Headers = HashMap<String, String>;

/// Task status within the queue it was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting to be leased
    Pending,
    /// Leased by a worker
    Processing,
    /// Passed its expiry time before finishing
    Expired,
    /// Completed successfully
    Finished,
    /// Given up on by the failure policy
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Expired => "expired",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "expired" => Some(TaskStatus::Expired),
            "finished" => Some(TaskStatus::Finished),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Expired | TaskStatus::Finished | TaskStatus::Failed)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// `Processing -> Pending` exists only for the retry path of a failure policy.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Expired)
                | (Processing, Finished)
                | (Processing, Expired)
                | (Processing, Failed)
                | (Processing, Pending)
        )
    }
}

/// One delivery record of a published task, owned by a single queue.
///
/// A task routed to several queues is stored once per queue so that each
/// queue consumes its copy independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Queue holding this delivery record
    pub queue_id: QueueId,

    pub status: TaskStatus,

    /// 0-255, higher = more urgent
    pub priority: Priority,

    pub headers: Headers,

    pub input: TaskPayload,

    /// Worker output of a successful run
    pub output: Option<TaskPayload>,

    /// Last failure reported by a worker
    pub error: Option<String>,

    /// Number of times the task was leased
    pub attempts: u32,

    pub created_at: DateTime<Utc>,

    pub expires_at: Option<DateTime<Utc>>,

    /// When the current lease started
    pub delivered_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task builder
    pub fn builder(input: TaskPayload) -> TaskBuilder {
        TaskBuilder::new(input)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires| expires <= now)
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BrokerError::InvalidState {
                expected: next_source(next).to_string(),
                actual: self.status.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark task as leased
    pub fn deliver(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Processing)?;
        self.attempts += 1;
        self.delivered_at = Some(now);
        Ok(())
    }

    /// Mark task as completed successfully
    pub fn finish(&mut self, output: TaskPayload, now: DateTime<Utc>) -> Result<()> {
        if output.len() > MAX_PAYLOAD_SIZE {
            let mut errors = ValidationErrors::new();
            errors.add("output", payload_too_large(output.len()));
            return Err(BrokerError::Validation(errors));
        }

        self.transition(TaskStatus::Finished)?;
        self.output = Some(output);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Give up on the task
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Put a leased task back to pending for another attempt
    pub fn requeue(&mut self, error: String) -> Result<()> {
        self.transition(TaskStatus::Pending)?;
        self.error = Some(error);
        self.delivered_at = None;
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Expired)?;
        self.finished_at = Some(now);
        Ok(())
    }
}

fn next_source(next: TaskStatus) -> &'static str {
    match next {
        TaskStatus::Processing => "pending",
        TaskStatus::Expired => "pending or processing",
        _ => "processing",
    }
}

fn payload_too_large(actual: usize) -> String {
    format!(
        "exceeds maximum allowed size of {} bytes (got {})",
        MAX_PAYLOAD_SIZE, actual
    )
}

/// A validated, not yet routed task.
///
/// The routing engine decides which queues receive it; `for_queue` then
/// stamps out one independent delivery record per destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub input: TaskPayload,
    pub headers: Headers,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(
        input: TaskPayload,
        headers: Headers,
        priority: Priority,
        ttl: Option<std::time::Duration>,
    ) -> Result<Self> {
        let mut errors = ValidationErrors::new();
        if input.len() > MAX_PAYLOAD_SIZE {
            errors.add("input", payload_too_large(input.len()));
        }
        if headers.keys().any(|key| key.is_empty()) {
            errors.add("headers", "keys must not be empty");
        }

        let created_at = Utc::now();
        let mut expires_at = None;
        match ttl.map(Duration::from_std) {
            None => {}
            Some(Ok(ttl)) if ttl > Duration::zero() => match created_at.checked_add_signed(ttl) {
                Some(at) => expires_at = Some(at),
                None => errors.add("ttl", "out of range"),
            },
            Some(Ok(_)) => errors.add("ttl", "must be greater than zero"),
            Some(Err(_)) => errors.add("ttl", "out of range"),
        }
        errors.into_result()?;

        Ok(NewTask {
            input,
            headers,
            priority,
            created_at,
            expires_at,
        })
    }

    /// Delivery record of this task for `queue_id`
    pub fn for_queue(&self, queue_id: QueueId) -> Task {
        Task {
            id: Uuid::new_v4(),
            queue_id,
            status: TaskStatus::Pending,
            priority: self.priority,
            headers: self.headers.clone(),
            input: self.input.clone(),
            output: None,
            error: None,
            attempts: 0,
            created_at: self.created_at,
            expires_at: self.expires_at,
            delivered_at: None,
            finished_at: None,
        }
    }
}

/// Builder for creating tasks with custom configuration
pub struct TaskBuilder {
    input: TaskPayload,
    headers: Headers,
    priority: Priority,
    ttl: Option<std::time::Duration>,
}

impl TaskBuilder {
    pub fn new(input: TaskPayload) -> Self {
        TaskBuilder {
            input,
            headers: Headers::new(),
            priority: Priority::default(),
            ttl: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Result<NewTask> {
        NewTask::new(self.input, self.headers, self.priority, self.ttl)
    }
}
