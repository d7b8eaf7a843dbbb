use crate::schema::{CF_QUEUES, CF_QUEUE_NAMES, CF_QUEUE_SETTINGS, QUEUES};
use crate::{PersistenceError, RocksStore};
use chrono::{DateTime, Utc};
use gork_core::{
    BrokerError, CollectionParams, OrderKey, Page, Queue, QueueId, QueueRepository, QueueSettings,
    Result,
};
use rocksdb::{Snapshot, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Primary queue record; settings live in their own column family
#[derive(Debug, Serialize, Deserialize)]
struct StoredQueue {
    id: QueueId,
    name: String,
    created_at: DateTime<Utc>,
}

impl RocksStore {
    fn load_queue(&self, snapshot: &Snapshot<'_>, id: &QueueId) -> crate::Result<Option<Queue>> {
        let stored: StoredQueue = match self.read_record(snapshot, CF_QUEUES, id.as_bytes())? {
            Some(stored) => stored,
            None => return Ok(None),
        };
        let settings: QueueSettings = self
            .read_record(snapshot, CF_QUEUE_SETTINGS, id.as_bytes())?
            .ok_or_else(|| PersistenceError::Corrupt {
                cf: CF_QUEUE_SETTINGS,
                detail: format!("queue {} has no settings", id),
            })?;

        Ok(Some(Queue {
            id: stored.id,
            name: stored.name,
            settings,
            created_at: stored.created_at,
        }))
    }
}

impl QueueRepository for RocksStore {
    fn save_queue(&self, queue: &Queue) -> Result<()> {
        let _names = self.queue_names.lock();

        self.check_name(CF_QUEUE_NAMES, QUEUES.entity, &queue.name, &queue.id)?;
        let existing: Option<StoredQueue> = self.get_record(CF_QUEUES, queue.id.as_bytes())?;

        // The creation time, and with it the position in listings, never moves
        let stored = StoredQueue {
            id: queue.id,
            name: queue.name.clone(),
            created_at: existing.as_ref().map_or(queue.created_at, |e| e.created_at),
        };

        let mut batch = WriteBatch::default();
        match &existing {
            None => {
                let order = OrderKey::new(stored.created_at, stored.id);
                self.insert_ordered(&mut batch, QUEUES, &order, &stored)?;
            }
            Some(previous) => {
                self.put_record(&mut batch, CF_QUEUES, queue.id.as_bytes(), &stored)?;
                if previous.name != queue.name {
                    batch.delete_cf(self.cf(CF_QUEUE_NAMES)?, previous.name.as_bytes());
                }
            }
        }
        self.put_record(&mut batch, CF_QUEUE_SETTINGS, queue.id.as_bytes(), &queue.settings)?;
        batch.put_cf(self.cf(CF_QUEUE_NAMES)?, queue.name.as_bytes(), queue.id.as_bytes());
        self.commit(batch)?;

        if existing.is_none() {
            info!("Created queue {} ({})", queue.name, queue.id);
        } else {
            debug!("Updated queue {} ({})", queue.name, queue.id);
        }
        Ok(())
    }

    fn update_queue_settings(
        &self,
        id: &QueueId,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Queue> {
        let _names = self.queue_names.lock();

        let current = self
            .get_queue(id)?
            .ok_or_else(|| BrokerError::not_found(QUEUES.entity, id))?;
        let updated = current.with_settings(overrides)?;

        let mut batch = WriteBatch::default();
        self.put_record(&mut batch, CF_QUEUE_SETTINGS, id.as_bytes(), &updated.settings)?;
        self.commit(batch)?;

        debug!("Updated settings of queue {} ({})", updated.name, id);
        Ok(updated)
    }

    fn delete_queue(&self, id: &QueueId) -> Result<()> {
        let _names = self.queue_names.lock();

        let existing: StoredQueue = self
            .get_record(CF_QUEUES, id.as_bytes())?
            .ok_or_else(|| BrokerError::not_found(QUEUES.entity, id))?;

        let mut batch = WriteBatch::default();
        self.remove_ordered(&mut batch, QUEUES, &OrderKey::new(existing.created_at, *id))?;
        batch.delete_cf(self.cf(CF_QUEUE_SETTINGS)?, id.as_bytes());
        batch.delete_cf(self.cf(CF_QUEUE_NAMES)?, existing.name.as_bytes());
        self.commit(batch)?;

        self.forget_queue_lock(id);
        info!("Deleted queue {} ({})", existing.name, id);
        Ok(())
    }

    fn get_queue(&self, id: &QueueId) -> Result<Option<Queue>> {
        Ok(self.load_queue(&self.snapshot(), id)?)
    }

    fn get_queue_by_name(&self, name: &str) -> Result<Option<Queue>> {
        let snapshot = self.snapshot();
        let id = match self.id_for_name(&snapshot, CF_QUEUE_NAMES, name)? {
            Some(id) => id,
            None => return Ok(None),
        };

        match self.load_queue(&snapshot, &id)? {
            Some(queue) => Ok(Some(queue)),
            None => Err(BrokerError::Integrity(format!(
                "queue name {:?} points at missing queue {}",
                name, id
            ))),
        }
    }

    fn mget_queues(&self, ids: &[QueueId]) -> Result<Vec<Queue>> {
        Ok(self.load_many(ids, |snapshot, id| self.load_queue(snapshot, id))?)
    }

    fn find_queues(&self, params: &CollectionParams) -> Result<Page<Queue>> {
        self.find_page(QUEUES, params, |snapshot, id| self.load_queue(snapshot, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_store;
    use gork_core::QueueSetting;
    use std::collections::HashSet;

    fn queue(name: &str) -> Queue {
        Queue::new(name, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_save_and_get_queue() {
        let (_dir, store) = open_store();
        let mut overrides = BTreeMap::new();
        overrides.insert("rate_limit.tokens".to_string(), "10".to_string());
        let q = Queue::new("emails", &overrides).unwrap();

        store.save_queue(&q).unwrap();

        assert_eq!(store.get_queue(&q.id).unwrap(), Some(q.clone()));
        assert_eq!(store.get_queue_by_name("emails").unwrap(), Some(q));
        assert_eq!(store.get_queue_by_name("missing").unwrap(), None);
    }

    #[test]
    fn test_name_conflict_keeps_first_record() {
        let (_dir, store) = open_store();
        let first = queue("jobs");
        let second = queue("jobs");

        store.save_queue(&first).unwrap();
        let result = store.save_queue(&second);

        assert!(matches!(result, Err(BrokerError::Conflict { .. })));
        assert_eq!(store.get_queue_by_name("jobs").unwrap().unwrap().id, first.id);
        assert_eq!(store.get_queue(&second.id).unwrap(), None);
        assert_eq!(store.find_queues(&CollectionParams::default()).unwrap().info.total, 1);
    }

    #[test]
    fn test_rename_frees_old_name() {
        let (_dir, store) = open_store();
        let mut q = queue("old");
        store.save_queue(&q).unwrap();

        q.name = "new".to_string();
        store.save_queue(&q).unwrap();

        assert_eq!(store.get_queue_by_name("old").unwrap(), None);
        assert_eq!(store.get_queue_by_name("new").unwrap().unwrap().id, q.id);
        assert_eq!(store.find_queues(&CollectionParams::default()).unwrap().info.total, 1);
        store.save_queue(&queue("old")).unwrap();
    }

    #[test]
    fn test_delete_removes_every_index() {
        let (_dir, store) = open_store();
        let q = queue("doomed");
        store.save_queue(&q).unwrap();

        store.delete_queue(&q.id).unwrap();

        assert_eq!(store.get_queue(&q.id).unwrap(), None);
        assert_eq!(store.get_queue_by_name("doomed").unwrap(), None);
        let page = store.find_queues(&CollectionParams::default()).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.info.total, 0);

        assert!(matches!(store.delete_queue(&q.id), Err(BrokerError::NotFound { .. })));
        store.save_queue(&queue("doomed")).unwrap();
    }

    #[test]
    fn test_dangling_name_index_is_integrity_error() {
        let (_dir, store) = open_store();
        let q = queue("ghost");
        store.save_queue(&q).unwrap();

        let mut batch = WriteBatch::default();
        batch.delete_cf(store.cf(CF_QUEUES).unwrap(), q.id.as_bytes());
        store.commit(batch).unwrap();

        assert!(matches!(
            store.get_queue_by_name("ghost"),
            Err(BrokerError::Integrity(_))
        ));
    }

    #[test]
    fn test_pagination_pages_without_overlap() {
        let (_dir, store) = open_store();
        let mut created = Vec::new();
        for i in 0..30 {
            let q = queue(&format!("queue-{:02}", i));
            store.save_queue(&q).unwrap();
            created.push(q.id);
        }

        let first = store.find_queues(&CollectionParams::new("", 25)).unwrap();
        assert_eq!(first.records.len(), 25);
        assert_eq!(first.info.total, 30);
        assert!(first.has_more());

        let second = store
            .find_queues(&CollectionParams::new(first.info.cursor.clone(), 25))
            .unwrap();
        assert_eq!(second.records.len(), 5);
        assert_eq!(second.info.total, 30);
        assert!(!second.has_more());

        let seen: HashSet<QueueId> = first
            .records
            .iter()
            .chain(second.records.iter())
            .map(|q| q.id)
            .collect();
        let expected: HashSet<QueueId> = created.into_iter().collect();
        assert_eq!(seen.len(), 30);
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_find_follows_creation_order() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        let mut late = queue("late");
        let mut early = queue("early");
        late.created_at = now;
        early.created_at = now - chrono::Duration::seconds(30);
        store.save_queue(&late).unwrap();
        store.save_queue(&early).unwrap();

        let page = store.find_queues(&CollectionParams::new("", 0)).unwrap();
        let names: Vec<_> = page.records.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[test]
    fn test_mget_skips_missing() {
        let (_dir, store) = open_store();
        let a = queue("a");
        let b = queue("b");
        store.save_queue(&a).unwrap();
        store.save_queue(&b).unwrap();

        let found = store.mget_queues(&[a.id, QueueId::new_v4(), b.id]).unwrap();
        let ids: HashSet<QueueId> = found.iter().map(|q| q.id).collect();
        let expected: HashSet<QueueId> = [a.id, b.id].into_iter().collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        let (_dir, store) = open_store();
        let result = store.find_queues(&CollectionParams::new("%%%", 10));
        assert!(matches!(result, Err(BrokerError::Validation(_))));
    }

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_update_settings_merges_over_stored() {
        let (_dir, store) = open_store();
        let q = Queue::new("emails", &overrides(&[("rate_limit.tokens", "10")])).unwrap();
        store.save_queue(&q).unwrap();

        let updated = store
            .update_queue_settings(&q.id, &overrides(&[("rate_limit.enabled", "1")]))
            .unwrap();
        assert_eq!(updated.settings.get(QueueSetting::RateLimitTokens), "10");
        assert_eq!(updated.settings.get(QueueSetting::RateLimitEnabled), "1");
        assert_eq!(store.get_queue(&q.id).unwrap(), Some(updated));

        let missing = store.update_queue_settings(&QueueId::new_v4(), &BTreeMap::new());
        assert!(matches!(missing, Err(BrokerError::NotFound { .. })));

        let invalid = store.update_queue_settings(&q.id, &overrides(&[("rate_limit.tokens", "x")]));
        assert!(matches!(invalid, Err(BrokerError::Validation(_))));
        assert_eq!(
            store.get_queue(&q.id).unwrap().unwrap().settings.get(QueueSetting::RateLimitEnabled),
            "1"
        );
    }

    #[test]
    fn test_concurrent_settings_updates_keep_every_key() {
        for _ in 0..20 {
            let (_dir, store) = open_store();
            let q = queue("shared");
            store.save_queue(&q).unwrap();

            let updates = [
                ("rate_limit.enabled", "1"),
                ("rate_limit.tokens", "7"),
                ("rate_limit.duration", "60"),
            ];
            std::thread::scope(|scope| {
                for (key, value) in updates {
                    let store = &store;
                    let id = q.id;
                    scope.spawn(move || {
                        store
                            .update_queue_settings(&id, &overrides(&[(key, value)]))
                            .unwrap();
                    });
                }
            });

            let stored = store.get_queue(&q.id).unwrap().unwrap();
            for (key, value) in updates {
                assert_eq!(stored.settings.to_map()[key], value);
            }
        }
    }
}
