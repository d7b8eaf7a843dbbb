use chrono::{DateTime, Utc};
use gork_core::{BrokerError, Job, JobId, QueueId, Result, TaskId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Outstanding {
    jobs: HashMap<JobId, Job>,
    by_task: HashMap<TaskId, JobId>,
}

/// Registry of leased jobs that have not completed yet.
///
/// Jobs live only in memory; a task record stays `processing` until its
/// job completes or the task expires.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RwLock<Outstanding>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry::default()
    }

    /// Track a freshly leased job
    pub fn register(&self, job: Job) {
        let mut inner = self.inner.write();
        inner.by_task.insert(job.task_id, job.id);
        inner.jobs.insert(job.id, job);
    }

    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.inner.read().jobs.get(job_id).cloned()
    }

    pub fn get_for_task(&self, task_id: &TaskId) -> Option<Job> {
        let inner = self.inner.read();
        inner
            .by_task
            .get(task_id)
            .and_then(|job_id| inner.jobs.get(job_id))
            .cloned()
    }

    /// Apply a worker's progress report and return the updated job
    pub fn report(&self, job_id: &JobId, progress: Option<u8>, log_line: Option<String>) -> Result<Job> {
        let mut inner = self.inner.write();
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::not_found("job", job_id))?;
        job.report(progress, log_line)?;
        Ok(job.clone())
    }

    /// Stop tracking a job, stamping its finish time
    pub fn finish(&self, job_id: &JobId, now: DateTime<Utc>) -> Option<Job> {
        self.remove(job_id).map(|mut job| {
            job.finish(now);
            job
        })
    }

    pub fn remove(&self, job_id: &JobId) -> Option<Job> {
        let mut inner = self.inner.write();
        let job = inner.jobs.remove(job_id)?;
        inner.by_task.remove(&job.task_id);
        Some(job)
    }

    /// Drop the job of a task that reached a terminal status elsewhere
    pub fn remove_for_task(&self, task_id: &TaskId) -> Option<Job> {
        let mut inner = self.inner.write();
        let job_id = inner.by_task.remove(task_id)?;
        inner.jobs.remove(&job_id)
    }

    pub fn jobs_for_queue(&self, queue_id: &QueueId) -> Vec<Job> {
        self.inner
            .read()
            .jobs
            .values()
            .filter(|job| job.queue_id == *queue_id)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gork_core::Task;
    use uuid::Uuid;

    fn leased_job(queue_id: QueueId) -> Job {
        let mut task = Task::builder(b"work".to_vec())
            .build()
            .unwrap()
            .for_queue(queue_id);
        task.deliver(Utc::now()).unwrap();
        Job::for_task(&task, Utc::now())
    }

    #[test]
    fn test_register_and_get_job() {
        let registry = JobRegistry::new();
        let job = leased_job(Uuid::new_v4());
        registry.register(job.clone());

        assert_eq!(registry.get(&job.id), Some(job.clone()));
        assert_eq!(registry.get_for_task(&job.task_id), Some(job));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_report_updates_stored_job() {
        let registry = JobRegistry::new();
        let job = leased_job(Uuid::new_v4());
        registry.register(job.clone());

        let updated = registry
            .report(&job.id, Some(50), Some("halfway".to_string()))
            .unwrap();
        assert_eq!(updated.progress, 50);
        assert_eq!(registry.get(&job.id).unwrap().logs, vec!["halfway"]);

        assert!(matches!(
            registry.report(&Uuid::new_v4(), Some(1), None),
            Err(BrokerError::NotFound { .. })
        ));
    }

    #[test]
    fn test_finish_and_remove_for_task() {
        let registry = JobRegistry::new();
        let queue_id = Uuid::new_v4();
        let a = leased_job(queue_id);
        let b = leased_job(queue_id);
        registry.register(a.clone());
        registry.register(b.clone());
        assert_eq!(registry.jobs_for_queue(&queue_id).len(), 2);

        let finished = registry.finish(&a.id, Utc::now()).unwrap();
        assert!(finished.finished_at.is_some());
        assert_eq!(registry.get_for_task(&a.task_id), None);

        assert_eq!(registry.remove_for_task(&b.task_id).map(|j| j.id), Some(b.id));
        assert_eq!(registry.count(), 0);
    }
}
