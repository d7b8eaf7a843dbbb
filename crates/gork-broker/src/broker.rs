use crate::{
    deadline::Deadline,
    jobs::JobRegistry,
    metrics::BrokerMetrics,
    policy::{FailureAction, FailurePolicy, RetryPolicy},
};
use chrono::Utc;
use gork_core::{
    route, BindingId, BindingRule, BrokerError, CollectionParams, Exchange, ExchangeBinding,
    ExchangeId, ExchangeType, Job, JobId, NewTask, Page, Queue, QueueId, RateLimiter, Result,
    Routes, Store, Task, TaskId, TaskPayload, TaskStatus,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Broker-wide behaviour switches
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Default for `PublishOptions::mandatory`
    pub reject_unroutable: bool,
    pub expiry_sweep_interval: Duration,
    pub max_attempts: u32,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        BrokerOptions {
            reject_unroutable: false,
            expiry_sweep_interval: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Fail with `Unroutable` when no binding matches
    pub mandatory: bool,
}

/// Result of a publish: where the task went and the records created there
#[derive(Debug, Clone)]
pub struct Published {
    pub routes: Routes,
    pub tasks: Vec<Task>,
}

/// Result of a lease attempt. Only `Leased` hands out work.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    Leased(Job),
    /// The queue's token bucket is empty; try later
    RateLimited,
    /// No pending task is available
    Empty,
}

/// What the worker reports when it is done with a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success { output: TaskPayload },
    Failure { error: String },
}

/// Task broker service: queues, exchanges and bindings management, publish
/// with routing, and the lease/progress/complete cycle of workers.
pub struct Broker<S> {
    store: Arc<S>,
    limiter: RateLimiter,
    jobs: JobRegistry,
    policy: Arc<dyn FailurePolicy>,
    metrics: Arc<BrokerMetrics>,
    options: BrokerOptions,
    /// Held across a settings commit and the limiter change that mirrors it
    limits: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl<S: Store + 'static> Broker<S> {
    pub fn new(store: Arc<S>, options: BrokerOptions) -> anyhow::Result<Self> {
        let policy = Arc::new(RetryPolicy::new(options.max_attempts));
        Ok(Broker {
            store,
            limiter: RateLimiter::new(),
            jobs: JobRegistry::new(),
            policy,
            metrics: Arc::new(BrokerMetrics::new()?),
            options,
            limits: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Replace the default retry policy
    pub fn with_failure_policy(mut self, policy: Arc<dyn FailurePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Install the rate limit of every stored queue
    pub async fn warm_up(&self, deadline: Deadline) -> Result<usize> {
        let mut params = CollectionParams::default();
        let mut loaded = 0;
        loop {
            deadline.check()?;
            let page = self.store.find_queues(&params)?;
            for queue in &page.records {
                self.limiter.configure(queue.id, queue.settings.rate_limit());
            }
            loaded += page.records.len();
            if !page.has_more() {
                break;
            }
            params = CollectionParams::new(page.info.cursor, params.limit);
        }

        info!("Loaded rate limits of {} queue(s)", loaded);
        Ok(loaded)
    }

    // Queues

    pub async fn create_queue(
        &self,
        name: &str,
        overrides: &BTreeMap<String, String>,
        deadline: Deadline,
    ) -> Result<Queue> {
        let queue = Queue::new(name, overrides)?;
        deadline.check()?;
        {
            let _limits = self.limits.lock();
            self.store.save_queue(&queue)?;
            self.limiter.configure(queue.id, queue.settings.rate_limit());
        }
        Ok(queue)
    }

    pub async fn get_queue(&self, id: &QueueId, deadline: Deadline) -> Result<Queue> {
        deadline.check()?;
        self.store
            .get_queue(id)?
            .ok_or_else(|| BrokerError::not_found("queue", id))
    }

    pub async fn get_queue_by_name(&self, name: &str, deadline: Deadline) -> Result<Queue> {
        deadline.check()?;
        self.store
            .get_queue_by_name(name)
            .map_err(log_integrity)?
            .ok_or_else(|| BrokerError::not_found("queue", name))
    }

    pub async fn list_queues(&self, params: &CollectionParams, deadline: Deadline) -> Result<Page<Queue>> {
        deadline.check()?;
        self.store.find_queues(params).map_err(log_integrity)
    }

    /// Merge `overrides` over the queue's current settings
    pub async fn update_queue_settings(
        &self,
        id: &QueueId,
        overrides: &BTreeMap<String, String>,
        deadline: Deadline,
    ) -> Result<Queue> {
        deadline.check()?;
        let updated = {
            let _limits = self.limits.lock();
            let updated = self.store.update_queue_settings(id, overrides)?;
            self.limiter.configure(updated.id, updated.settings.rate_limit());
            updated
        };
        info!("Updated settings of queue {}", updated.name);
        Ok(updated)
    }

    pub async fn delete_queue(&self, id: &QueueId, deadline: Deadline) -> Result<()> {
        deadline.check()?;
        {
            let _limits = self.limits.lock();
            self.store.delete_queue(id)?;
            self.limiter.remove(id);
        }
        Ok(())
    }

    // Exchanges and bindings

    pub async fn create_exchange(&self, name: &str, kind: ExchangeType, deadline: Deadline) -> Result<Exchange> {
        let exchange = Exchange::new(name, kind)?;
        deadline.check()?;
        self.store.save_exchange(&exchange)?;
        Ok(exchange)
    }

    pub async fn get_exchange(&self, id: &ExchangeId, deadline: Deadline) -> Result<Exchange> {
        deadline.check()?;
        self.store
            .get_exchange(id)?
            .ok_or_else(|| BrokerError::not_found("exchange", id))
    }

    pub async fn list_exchanges(&self, params: &CollectionParams, deadline: Deadline) -> Result<Page<Exchange>> {
        deadline.check()?;
        self.store.find_exchanges(params).map_err(log_integrity)
    }

    pub async fn delete_exchange(&self, id: &ExchangeId, deadline: Deadline) -> Result<()> {
        deadline.check()?;
        self.store.delete_exchange(id)
    }

    pub async fn create_binding(
        &self,
        exchange_id: &ExchangeId,
        queue_id: &QueueId,
        rules: Vec<BindingRule>,
        deadline: Deadline,
    ) -> Result<ExchangeBinding> {
        let binding = ExchangeBinding::new(*exchange_id, *queue_id, rules)?;
        deadline.check()?;
        self.store.save_binding(&binding).map_err(log_integrity)?;
        Ok(binding)
    }

    pub async fn get_binding(&self, id: &BindingId, deadline: Deadline) -> Result<ExchangeBinding> {
        deadline.check()?;
        self.store
            .get_binding(id)?
            .ok_or_else(|| BrokerError::not_found("binding", id))
    }

    pub async fn list_bindings(&self, exchange_id: &ExchangeId, deadline: Deadline) -> Result<Vec<ExchangeBinding>> {
        deadline.check()?;
        self.store.bindings_for_exchange(exchange_id).map_err(log_integrity)
    }

    pub async fn delete_binding(&self, id: &BindingId, deadline: Deadline) -> Result<()> {
        deadline.check()?;
        self.store.delete_binding(id)
    }

    // Publish

    /// Publish with the broker's default unroutable handling
    pub async fn publish(&self, exchange_id: &ExchangeId, task: NewTask, deadline: Deadline) -> Result<Published> {
        let options = PublishOptions {
            mandatory: self.options.reject_unroutable,
        };
        self.publish_with(exchange_id, task, options, deadline).await
    }

    /// Route `task` through the exchange and store one record per destination
    /// queue in a single transaction
    pub async fn publish_with(
        &self,
        exchange_id: &ExchangeId,
        task: NewTask,
        options: PublishOptions,
        deadline: Deadline,
    ) -> Result<Published> {
        deadline.check()?;
        let exchange = self
            .store
            .get_exchange(exchange_id)?
            .ok_or_else(|| BrokerError::not_found("exchange", exchange_id))?;
        let bindings = self
            .store
            .bindings_for_exchange(exchange_id)
            .map_err(log_integrity)?;

        let routes = route(&exchange, &task.headers, &bindings);
        if routes.is_unroutable() {
            self.metrics.publishes_unroutable.inc();
            if options.mandatory {
                return Err(BrokerError::Unroutable {
                    exchange: exchange.name,
                });
            }
            warn!("Task published to exchange {} matched no binding", exchange.name);
            return Ok(Published {
                routes,
                tasks: Vec::new(),
            });
        }

        let queues = self.store.mget_queues(routes.queue_ids())?;
        if queues.len() != routes.len() {
            let missing: Vec<String> = routes
                .queue_ids()
                .iter()
                .filter(|id| !queues.iter().any(|q| q.id == **id))
                .map(|id| id.to_string())
                .collect();
            return Err(log_integrity(BrokerError::Integrity(format!(
                "exchange {} is bound to missing queue(s) {}",
                exchange.name,
                missing.join(", ")
            ))));
        }

        let tasks: Vec<Task> = routes.queue_ids().iter().map(|id| task.for_queue(*id)).collect();
        deadline.check()?;
        self.store.enqueue_tasks(&tasks)?;

        self.metrics.tasks_published.inc_by(tasks.len() as u64);
        debug!(
            "Published task to exchange {} ({} queue(s))",
            exchange.name,
            tasks.len()
        );
        Ok(Published { routes, tasks })
    }

    // Consume

    /// Lease the next task of a queue.
    ///
    /// The rate limiter is consulted first; an admitted attempt consumes its
    /// token even when the queue turns out to be empty.
    pub async fn lease(&self, queue_id: &QueueId, deadline: Deadline) -> Result<LeaseOutcome> {
        deadline.check()?;
        if self.store.get_queue(queue_id)?.is_none() {
            return Err(BrokerError::not_found("queue", queue_id));
        }

        if !self.limiter.try_acquire(queue_id) {
            self.metrics.inc_lease("rate_limited");
            debug!("Lease on queue {} rate limited", queue_id);
            return Ok(LeaseOutcome::RateLimited);
        }

        deadline.check()?;
        let now = Utc::now();
        let task = match self.store.lease_task(queue_id, now).map_err(log_integrity)? {
            Some(task) => task,
            None => {
                self.metrics.inc_lease("empty");
                return Ok(LeaseOutcome::Empty);
            }
        };

        let job = Job::for_task(&task, now);
        self.jobs.register(job.clone());
        self.metrics.inc_lease("leased");
        self.metrics.jobs_outstanding.set(self.jobs.count() as i64);

        debug!("Job {} leased task {} (attempt {})", job.id, task.id, task.attempts);
        Ok(LeaseOutcome::Leased(job))
    }

    /// Record progress and/or a log line on an outstanding job
    pub async fn report_progress(
        &self,
        job_id: &JobId,
        progress: Option<u8>,
        log_line: Option<String>,
        deadline: Deadline,
    ) -> Result<Job> {
        deadline.check()?;
        self.jobs.report(job_id, progress, log_line)
    }

    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.get(job_id)
    }

    /// Finish an outstanding job and persist the resulting task status
    pub async fn complete(&self, job_id: &JobId, outcome: JobOutcome, deadline: Deadline) -> Result<Task> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| BrokerError::not_found("job", job_id))?;

        deadline.check()?;
        let mut task = self
            .store
            .get_task(&job.task_id)?
            .ok_or_else(|| BrokerError::not_found("task", job.task_id))?;

        let now = Utc::now();
        let label = match outcome {
            JobOutcome::Success { output } => {
                task.finish(output, now)?;
                "finished"
            }
            JobOutcome::Failure { error } => match self.policy.on_failure(&task, &error) {
                FailureAction::Requeue => {
                    task.requeue(error)?;
                    "requeued"
                }
                FailureAction::Fail => {
                    task.fail(error, now)?;
                    "failed"
                }
            },
        };

        deadline.check()?;
        match self.store.update_task(&task, TaskStatus::Processing) {
            Ok(()) => {}
            Err(e @ BrokerError::InvalidState { .. }) => {
                // The task moved on without us, most likely expired
                self.jobs.remove(job_id);
                self.metrics.jobs_outstanding.set(self.jobs.count() as i64);
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        self.jobs.finish(job_id, now);
        self.metrics.inc_completion(label);
        self.metrics.jobs_outstanding.set(self.jobs.count() as i64);

        debug!("Job {} completed, task {} is {}", job_id, task.id, label);
        Ok(task)
    }

    // Tasks

    pub async fn get_task(&self, id: &TaskId, deadline: Deadline) -> Result<Task> {
        deadline.check()?;
        self.store
            .get_task(id)?
            .ok_or_else(|| BrokerError::not_found("task", id))
    }

    pub async fn list_tasks(&self, params: &CollectionParams, deadline: Deadline) -> Result<Page<Task>> {
        deadline.check()?;
        self.store.find_tasks(params).map_err(log_integrity)
    }

    pub async fn pending_count(&self, queue_id: &QueueId, deadline: Deadline) -> Result<u64> {
        deadline.check()?;
        self.store.count_pending(queue_id)
    }

    // Expiry

    /// Expire every task whose deadline has passed and drop their jobs
    pub fn expire_due(&self) -> Result<Vec<Task>> {
        let expired = self.store.expire_due(Utc::now())?;
        for task in &expired {
            if let Some(job) = self.jobs.remove_for_task(&task.id) {
                debug!("Dropped job {} of expired task {}", job.id, task.id);
            }
        }
        if !expired.is_empty() {
            self.metrics.tasks_expired.inc_by(expired.len() as u64);
            self.metrics.jobs_outstanding.set(self.jobs.count() as i64);
        }
        Ok(expired)
    }

    /// Periodic expiry sweep, runs until `shutdown` is called
    pub async fn run_expiry_sweep(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.options.expiry_sweep_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.expire_due() {
                        error!("Expiry sweep failed: {}", e);
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Stopping expiry sweep");
                    break;
                }
            }
        }
    }

    /// Get metrics registry
    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Get the underlying store
    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Stop the expiry sweep. The permit is kept if the sweep is busy.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Integrity problems point at store corruption and are always logged
fn log_integrity(err: BrokerError) -> BrokerError {
    if let BrokerError::Integrity(detail) = &err {
        error!("Integrity error: {}", detail);
    }
    err
}
