use crate::schema::{
    expiry_key, pending_key, pending_total_key, trailing_id, CF_TASKS, CF_TASK_EXPIRY,
    CF_TASK_PENDING, TASKS,
};
use crate::{PersistenceError, RocksStore};
use chrono::{DateTime, Utc};
use gork_core::{
    sortable_i64, BrokerError, CollectionParams, OrderKey, Page, QueueId, Result, Task, TaskId,
    TaskRepository, TaskStatus,
};
use rocksdb::{Direction, IteratorMode, Snapshot, WriteBatch};
use tracing::{debug, info};

impl RocksStore {
    fn load_task(&self, snapshot: &Snapshot<'_>, id: &TaskId) -> crate::Result<Option<Task>> {
        self.read_record(snapshot, CF_TASKS, id.as_bytes())
    }

    /// Add the status-dependent index entries of `task`
    fn index_task(&self, batch: &mut WriteBatch, task: &Task) -> crate::Result<()> {
        if task.status == TaskStatus::Pending {
            batch.put_cf(self.cf(CF_TASK_PENDING)?, pending_key(task), b"");
            self.bump(batch, &pending_total_key(&task.queue_id), 1)?;
        }
        if let Some(key) = expiry_key(task) {
            batch.put_cf(self.cf(CF_TASK_EXPIRY)?, key, b"");
        }
        Ok(())
    }

    fn unindex_task(&self, batch: &mut WriteBatch, task: &Task) -> crate::Result<()> {
        if task.status == TaskStatus::Pending {
            batch.delete_cf(self.cf(CF_TASK_PENDING)?, pending_key(task));
            self.bump(batch, &pending_total_key(&task.queue_id), -1)?;
        }
        if let Some(key) = expiry_key(task) {
            batch.delete_cf(self.cf(CF_TASK_EXPIRY)?, key);
        }
        Ok(())
    }

    /// Overwrite `previous` with `next`, moving index entries along
    fn replace_task(&self, batch: &mut WriteBatch, previous: &Task, next: &Task) -> crate::Result<()> {
        self.unindex_task(batch, previous)?;
        self.put_record(batch, CF_TASKS, next.id.as_bytes(), next)?;
        self.index_task(batch, next)
    }

    /// Expire one task under its queue lock; `None` if it no longer qualifies
    fn expire_one(&self, task_id: &TaskId, now: DateTime<Utc>) -> Result<Option<Task>> {
        let queue_id = match self.get_record::<Task>(CF_TASKS, task_id.as_bytes())? {
            Some(task) => task.queue_id,
            None => return Ok(None),
        };

        let lock = self.queue_lock(&queue_id);
        let _guard = lock.lock();

        let current: Task = match self.get_record(CF_TASKS, task_id.as_bytes())? {
            Some(task) => task,
            None => return Ok(None),
        };
        if current.status.is_terminal() || !current.is_expired_at(now) {
            return Ok(None);
        }

        let mut expired = current.clone();
        expired.expire(now)?;

        let mut batch = WriteBatch::default();
        self.replace_task(&mut batch, &current, &expired)?;
        self.commit(batch)?;
        Ok(Some(expired))
    }
}

impl TaskRepository for RocksStore {
    fn enqueue_tasks(&self, tasks: &[Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        for task in tasks {
            let order = OrderKey::new(task.created_at, task.id);
            self.insert_ordered(&mut batch, TASKS, &order, task)?;
            self.index_task(&mut batch, task)?;
        }
        self.commit(batch)?;

        debug!("Enqueued {} task record(s)", tasks.len());
        Ok(())
    }

    fn lease_task(&self, queue_id: &QueueId, now: DateTime<Utc>) -> Result<Option<Task>> {
        let lock = self.queue_lock(queue_id);
        let _guard = lock.lock();

        // Taken under the lock: nothing else can remove pending entries of
        // this queue until we commit.
        let snapshot = self.snapshot();
        let prefix: &[u8] = queue_id.as_bytes();
        let mut batch = WriteBatch::default();
        let mut expired = 0usize;
        let mut leased = None;

        let iter = snapshot.iterator_cf(
            self.cf(CF_TASK_PENDING)?,
            IteratorMode::From(prefix, Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(PersistenceError::from)?;
            if !key.starts_with(prefix) {
                break;
            }

            let task_id = trailing_id(&key).ok_or_else(|| PersistenceError::Corrupt {
                cf: CF_TASK_PENDING,
                detail: format!("{} byte key", key.len()),
            })?;
            let task = self.load_task(&snapshot, &task_id)?.ok_or_else(|| {
                BrokerError::Integrity(format!(
                    "pending index of queue {} points at missing task {}",
                    queue_id, task_id
                ))
            })?;

            let mut next = task.clone();
            if task.is_expired_at(now) {
                next.expire(now)?;
                self.replace_task(&mut batch, &task, &next)?;
                expired += 1;
                continue;
            }

            next.deliver(now)?;
            self.replace_task(&mut batch, &task, &next)?;
            leased = Some(next);
            break;
        }

        if !batch.is_empty() {
            self.commit(batch)?;
        }
        if expired > 0 {
            info!("Expired {} task(s) of queue {} during lease", expired, queue_id);
        }
        if let Some(task) = &leased {
            debug!("Leased task {} from queue {} (attempt {})", task.id, queue_id, task.attempts);
        }
        Ok(leased)
    }

    fn update_task(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        let lock = self.queue_lock(&task.queue_id);
        let _guard = lock.lock();

        let stored: Task = self
            .get_record(CF_TASKS, task.id.as_bytes())?
            .ok_or_else(|| BrokerError::not_found(TASKS.entity, task.id))?;

        if stored.queue_id != task.queue_id {
            return Err(BrokerError::Integrity(format!(
                "task {} belongs to queue {}, not {}",
                task.id, stored.queue_id, task.queue_id
            )));
        }
        if stored.status != expected {
            return Err(BrokerError::InvalidState {
                expected: expected.as_str().to_string(),
                actual: stored.status.as_str().to_string(),
            });
        }

        let mut batch = WriteBatch::default();
        self.replace_task(&mut batch, &stored, task)?;
        self.commit(batch)?;

        debug!(
            "Task {} moved from {} to {}",
            task.id,
            stored.status.as_str(),
            task.status.as_str()
        );
        Ok(())
    }

    fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let upper = sortable_i64(now.timestamp_micros());

        let mut due = Vec::new();
        {
            let snapshot = self.snapshot();
            for item in snapshot.iterator_cf(self.cf(CF_TASK_EXPIRY)?, IteratorMode::Start) {
                let (key, _) = item.map_err(PersistenceError::from)?;
                if key.len() < upper.len() || key[..upper.len()] > upper[..] {
                    break;
                }
                if let Some(id) = trailing_id(&key) {
                    due.push(id);
                }
            }
        }

        let mut expired = Vec::new();
        for task_id in due {
            if let Some(task) = self.expire_one(&task_id, now)? {
                expired.push(task);
            }
        }

        if !expired.is_empty() {
            info!("Expired {} task(s)", expired.len());
        }
        Ok(expired)
    }

    fn delete_task(&self, id: &TaskId) -> Result<()> {
        let queue_id = self
            .get_record::<Task>(CF_TASKS, id.as_bytes())?
            .map(|task| task.queue_id)
            .ok_or_else(|| BrokerError::not_found(TASKS.entity, id))?;

        let lock = self.queue_lock(&queue_id);
        let _guard = lock.lock();

        let current: Task = self
            .get_record(CF_TASKS, id.as_bytes())?
            .ok_or_else(|| BrokerError::not_found(TASKS.entity, id))?;

        let mut batch = WriteBatch::default();
        self.unindex_task(&mut batch, &current)?;
        self.remove_ordered(&mut batch, TASKS, &OrderKey::new(current.created_at, *id))?;
        self.commit(batch)?;

        debug!("Deleted task {}", id);
        Ok(())
    }

    fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.load_task(&self.snapshot(), id)?)
    }

    fn mget_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        Ok(self.load_many(ids, |snapshot, id| self.load_task(snapshot, id))?)
    }

    fn find_tasks(&self, params: &CollectionParams) -> Result<Page<Task>> {
        self.find_page(TASKS, params, |snapshot, id| self.load_task(snapshot, id))
    }

    fn count_pending(&self, queue_id: &QueueId) -> Result<u64> {
        Ok(self.read_counter(&self.snapshot(), &pending_total_key(queue_id))?)
    }
}
