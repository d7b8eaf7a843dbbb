use crate::schema::{self, Table, ALL_CFS, CF_COUNTERS};
use crate::{PersistenceError, Result};
use dashmap::DashMap;
use gork_core::{BrokerError, CollectionInfo, CollectionParams, OrderKey, Page, QueueId};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, Snapshot, WriteBatch,
    DB,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for the RocksDB store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Durable store for every broker collection, backed by RocksDB.
///
/// Each state-changing call commits exactly one `WriteBatch`. Writers that
/// must read before they write (name uniqueness, lease pop-and-flip, status
/// compare-and-set) hold a lock scoped to the collection or to the queue, so
/// unrelated queues never contend.
pub struct RocksStore {
    db: Arc<DB>,
    pub(crate) queue_names: Mutex<()>,
    pub(crate) exchange_names: Mutex<()>,
    pub(crate) bindings: Mutex<()>,
    queue_locks: DashMap<QueueId, Arc<Mutex<()>>>,
}

impl RocksStore {
    /// Open or create the store
    pub fn open(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.data_dir.join("gork");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                if *name == CF_COUNTERS {
                    opts.set_merge_operator_associative("add", schema::add_counters);
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, db_path, cf_descriptors)?;

        info!("Opened store at {:?}", config.data_dir);

        Ok(RocksStore {
            db: Arc::new(db),
            queue_names: Mutex::new(()),
            exchange_names: Mutex::new(()),
            bindings: Mutex::new(()),
            queue_locks: DashMap::new(),
        })
    }

    pub(crate) fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or(PersistenceError::MissingColumnFamily(name))
    }

    pub(crate) fn snapshot(&self) -> Snapshot<'_> {
        self.db.snapshot()
    }

    /// Lock serializing status changes of the tasks of one queue
    pub(crate) fn queue_lock(&self, queue_id: &QueueId) -> Arc<Mutex<()>> {
        self.queue_locks
            .entry(*queue_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn forget_queue_lock(&self, queue_id: &QueueId) {
        self.queue_locks.remove(queue_id);
    }

    /// Apply a batch atomically. Nothing is written when this fails.
    pub(crate) fn commit(&self, batch: WriteBatch) -> gork_core::Result<()> {
        let ops = batch.len();
        self.db
            .write(batch)
            .map_err(|e| BrokerError::Transaction(e.to_string()))?;
        debug!("Committed batch of {} operations", ops);
        Ok(())
    }

    /// Latest committed value, read outside of any snapshot
    pub(crate) fn get_raw(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(cf)?, key)?)
    }

    pub(crate) fn get_record<T: DeserializeOwned>(
        &self,
        cf: &'static str,
        key: &[u8],
    ) -> Result<Option<T>> {
        self.get_raw(cf, key)?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    pub(crate) fn read_record<T: DeserializeOwned>(
        &self,
        snapshot: &Snapshot<'_>,
        cf: &'static str,
        key: &[u8],
    ) -> Result<Option<T>> {
        snapshot
            .get_cf(self.cf(cf)?, key)?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    pub(crate) fn put_record<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &'static str,
        key: &[u8],
        record: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, bincode::serialize(record)?);
        Ok(())
    }

    /// Add `delta` to a counter inside `batch`
    pub(crate) fn bump(&self, batch: &mut WriteBatch, key: &[u8], delta: i64) -> Result<()> {
        batch.merge_cf(self.cf(CF_COUNTERS)?, key, schema::encode_delta(delta));
        Ok(())
    }

    pub(crate) fn read_counter(&self, snapshot: &Snapshot<'_>, key: &[u8]) -> Result<u64> {
        let value = snapshot
            .get_cf(self.cf(CF_COUNTERS)?, key)?
            .map(|bytes| schema::decode_counter(&bytes))
            .unwrap_or(0);
        Ok(value.max(0) as u64)
    }

    /// Insert a new record with its creation-order entry and count it
    pub(crate) fn insert_ordered<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        table: Table,
        order: &OrderKey,
        record: &T,
    ) -> Result<()> {
        self.put_record(batch, table.data, order.id().as_bytes(), record)?;
        batch.put_cf(self.cf(table.order)?, order.to_bytes(), b"");
        self.bump(batch, table.total, 1)
    }

    /// Remove a record, its creation-order entry and its count
    pub(crate) fn remove_ordered(
        &self,
        batch: &mut WriteBatch,
        table: Table,
        order: &OrderKey,
    ) -> Result<()> {
        batch.delete_cf(self.cf(table.data)?, order.id().as_bytes());
        batch.delete_cf(self.cf(table.order)?, order.to_bytes());
        self.bump(batch, table.total, -1)
    }

    /// Fail with `Conflict` when `name` is indexed to a record other than `id`
    pub(crate) fn check_name(
        &self,
        cf: &'static str,
        entity: &'static str,
        name: &str,
        id: &Uuid,
    ) -> gork_core::Result<()> {
        if let Some(owner) = self.get_raw(cf, name.as_bytes())? {
            if owner.as_slice() != &id.as_bytes()[..] {
                return Err(BrokerError::Conflict {
                    entity,
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn id_for_name(
        &self,
        snapshot: &Snapshot<'_>,
        cf: &'static str,
        name: &str,
    ) -> Result<Option<Uuid>> {
        snapshot
            .get_cf(self.cf(cf)?, name.as_bytes())?
            .map(|bytes| {
                Uuid::from_slice(&bytes).map_err(|e| PersistenceError::Corrupt {
                    cf,
                    detail: e.to_string(),
                })
            })
            .transpose()
    }

    /// Keys stored under `prefix`, in key order
    pub(crate) fn keys_with_prefix(
        &self,
        snapshot: &Snapshot<'_>,
        cf: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<Box<[u8]>>> {
        let mut keys = Vec::new();
        for item in snapshot.iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// One page of a collection in creation order.
    ///
    /// The page and the total are read from the same snapshot. `load` turns
    /// each ID into a record; an ID with no record is a dangling index entry.
    pub(crate) fn find_page<T>(
        &self,
        table: Table,
        params: &CollectionParams,
        load: impl Fn(&Snapshot<'_>, &Uuid) -> Result<Option<T>>,
    ) -> gork_core::Result<Page<T>> {
        let start_after = params.start_after()?;
        let limit = params.limit as usize;
        let snapshot = self.snapshot();

        let start_bytes = start_after.map(|key| key.to_bytes());
        let mode = match &start_bytes {
            Some(bytes) => IteratorMode::From(bytes.as_slice(), Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut keys = Vec::with_capacity(limit + 1);
        for item in snapshot.iterator_cf(self.cf(table.order)?, mode) {
            let (key, _) = item.map_err(PersistenceError::from)?;
            if start_bytes.map_or(false, |start| key[..] == start[..]) {
                continue;
            }
            let order = OrderKey::from_bytes(&key).ok_or_else(|| PersistenceError::Corrupt {
                cf: table.order,
                detail: format!("{} byte key", key.len()),
            })?;
            keys.push(order);
            if keys.len() > limit {
                break;
            }
        }

        let has_more = keys.len() > limit;
        keys.truncate(limit);

        let mut records = Vec::with_capacity(keys.len());
        for key in &keys {
            let record = load(&snapshot, &key.id())?.ok_or_else(|| {
                BrokerError::Integrity(format!(
                    "{} index of {} points at missing record",
                    table.entity,
                    key.id()
                ))
            })?;
            records.push(record);
        }

        let cursor = match keys.last() {
            Some(last) if has_more => last.to_cursor(),
            _ => String::new(),
        };
        let total = self.read_counter(&snapshot, table.total)?;

        Ok(Page {
            records,
            info: CollectionInfo { cursor, total },
        })
    }

    /// Point lookups of many IDs from one snapshot; missing IDs are skipped
    pub(crate) fn load_many<T>(
        &self,
        ids: &[Uuid],
        load: impl Fn(&Snapshot<'_>, &Uuid) -> Result<Option<T>>,
    ) -> Result<Vec<T>> {
        let snapshot = self.snapshot();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = load(&snapshot, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
