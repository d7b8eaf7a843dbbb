//! Storage ports: one narrow repository per entity collection.
//!
//! Every state-changing method is a single all-or-nothing unit as seen by
//! concurrent callers. A failed commit is reported as
//! `BrokerError::Transaction` and leaves nothing behind, so the caller can
//! retry the whole operation.

use crate::{
    BindingId, CollectionParams, Exchange, ExchangeBinding, ExchangeId, Page, Queue, QueueId,
    Result, Task, TaskId, TaskStatus,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub trait QueueRepository: Send + Sync {
    /// Upsert a queue together with its settings, name index and creation
    /// index. Fails with `Conflict` when another queue owns the name.
    fn save_queue(&self, queue: &Queue) -> Result<()>;

    /// Merge `overrides` over the stored settings of a queue as one
    /// read-merge-write unit and return the committed record
    fn update_queue_settings(
        &self,
        id: &QueueId,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Queue>;

    /// Remove the queue and every index entry pointing at it
    fn delete_queue(&self, id: &QueueId) -> Result<()>;

    fn get_queue(&self, id: &QueueId) -> Result<Option<Queue>>;

    /// `Integrity` when the name index points at a missing record
    fn get_queue_by_name(&self, name: &str) -> Result<Option<Queue>>;

    /// Records that exist, in no particular order
    fn mget_queues(&self, ids: &[QueueId]) -> Result<Vec<Queue>>;

    fn find_queues(&self, params: &CollectionParams) -> Result<Page<Queue>>;
}

pub trait ExchangeRepository: Send + Sync {
    fn save_exchange(&self, exchange: &Exchange) -> Result<()>;

    fn delete_exchange(&self, id: &ExchangeId) -> Result<()>;

    fn get_exchange(&self, id: &ExchangeId) -> Result<Option<Exchange>>;

    fn get_exchange_by_name(&self, name: &str) -> Result<Option<Exchange>>;

    fn mget_exchanges(&self, ids: &[ExchangeId]) -> Result<Vec<Exchange>>;

    fn find_exchanges(&self, params: &CollectionParams) -> Result<Page<Exchange>>;
}

pub trait BindingRepository: Send + Sync {
    /// Fails with `Integrity` unless both the exchange and the queue exist
    fn save_binding(&self, binding: &ExchangeBinding) -> Result<()>;

    fn delete_binding(&self, id: &BindingId) -> Result<()>;

    fn get_binding(&self, id: &BindingId) -> Result<Option<ExchangeBinding>>;

    fn mget_bindings(&self, ids: &[BindingId]) -> Result<Vec<ExchangeBinding>>;

    fn find_bindings(&self, params: &CollectionParams) -> Result<Page<ExchangeBinding>>;

    /// Bindings of one exchange in creation order
    fn bindings_for_exchange(&self, exchange_id: &ExchangeId) -> Result<Vec<ExchangeBinding>>;
}

pub trait TaskRepository: Send + Sync {
    /// Store the delivery records of one publish in a single commit
    fn enqueue_tasks(&self, tasks: &[Task]) -> Result<()>;

    /// Atomically pick the most urgent, oldest pending task of the queue that
    /// has not expired, mark it processing and return it.
    ///
    /// Expired pending tasks met along the way are moved to `Expired`. Two
    /// concurrent calls never return the same task.
    fn lease_task(&self, queue_id: &QueueId, now: DateTime<Utc>) -> Result<Option<Task>>;

    /// Write `task` only if the stored record is still in status `expected`,
    /// otherwise fail with `InvalidState`.
    fn update_task(&self, task: &Task, expected: TaskStatus) -> Result<()>;

    /// Move every pending or processing task whose expiry is at or before
    /// `now` to `Expired` and return the updated records
    fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    fn delete_task(&self, id: &TaskId) -> Result<()>;

    fn get_task(&self, id: &TaskId) -> Result<Option<Task>>;

    fn mget_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>>;

    fn find_tasks(&self, params: &CollectionParams) -> Result<Page<Task>>;

    /// Number of pending tasks held by a queue
    fn count_pending(&self, queue_id: &QueueId) -> Result<u64>;
}

/// Everything the broker needs from persistence, bound once at startup.
pub trait Store: QueueRepository + ExchangeRepository + BindingRepository + TaskRepository {}

impl<T> Store for T where T: QueueRepository + ExchangeRepository + BindingRepository + TaskRepository {}
