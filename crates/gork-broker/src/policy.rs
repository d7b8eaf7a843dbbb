//! What happens to a task whose worker reported a failure.

use gork_core::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Back to pending for another attempt
    Requeue,
    /// Terminal `failed` status
    Fail,
}

/// Hook deciding the fate of a failed task.
///
/// Called while the task is still `processing`, with `attempts` already
/// counting the attempt that just failed.
pub trait FailurePolicy: Send + Sync {
    fn on_failure(&self, task: &Task, error: &str) -> FailureAction;
}

/// Requeue until `max_attempts` deliveries have failed, then give up.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy { max_attempts }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 3 }
    }
}

impl FailurePolicy for RetryPolicy {
    fn on_failure(&self, task: &Task, _error: &str) -> FailureAction {
        if task.attempts < self.max_attempts {
            FailureAction::Requeue
        } else {
            FailureAction::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_retry_until_budget_spent() {
        let policy = RetryPolicy::new(2);
        let mut task = Task::builder(vec![]).build().unwrap().for_queue(Uuid::new_v4());

        task.attempts = 1;
        assert_eq!(policy.on_failure(&task, "boom"), FailureAction::Requeue);
        task.attempts = 2;
        assert_eq!(policy.on_failure(&task, "boom"), FailureAction::Fail);
    }

    #[test]
    fn test_single_attempt_never_requeues() {
        let policy = RetryPolicy::new(1);
        let mut task = Task::builder(vec![]).build().unwrap().for_queue(Uuid::new_v4());
        task.attempts = 1;
        assert_eq!(policy.on_failure(&task, "boom"), FailureAction::Fail);
    }
}
