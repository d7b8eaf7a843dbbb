use crate::schema::{
    binding_by_exchange_key, trailing_id, BINDINGS, CF_BINDINGS, CF_BINDINGS_BY_EXCHANGE,
    CF_EXCHANGES, CF_QUEUES,
};
use crate::{PersistenceError, RocksStore};
use gork_core::{
    BindingId, BindingRepository, BrokerError, CollectionParams, ExchangeBinding, ExchangeId,
    OrderKey, Page, Result,
};
use rocksdb::{Snapshot, WriteBatch};
use tracing::{debug, info};

impl RocksStore {
    fn load_binding(
        &self,
        snapshot: &Snapshot<'_>,
        id: &BindingId,
    ) -> crate::Result<Option<ExchangeBinding>> {
        self.read_record(snapshot, CF_BINDINGS, id.as_bytes())
    }
}

impl BindingRepository for RocksStore {
    fn save_binding(&self, binding: &ExchangeBinding) -> Result<()> {
        // Hold both name locks so neither endpoint can be deleted mid-check
        let _queues = self.queue_names.lock();
        let _exchanges = self.exchange_names.lock();
        let _bindings = self.bindings.lock();

        if self.get_raw(CF_EXCHANGES, binding.exchange_id.as_bytes())?.is_none() {
            return Err(BrokerError::Integrity(format!(
                "binding {} refers to missing exchange {}",
                binding.id, binding.exchange_id
            )));
        }
        if self.get_raw(CF_QUEUES, binding.queue_id.as_bytes())?.is_none() {
            return Err(BrokerError::Integrity(format!(
                "binding {} refers to missing queue {}",
                binding.id, binding.queue_id
            )));
        }

        let existing: Option<ExchangeBinding> = self.get_record(CF_BINDINGS, binding.id.as_bytes())?;
        let by_exchange = self.cf(CF_BINDINGS_BY_EXCHANGE)?;

        let mut batch = WriteBatch::default();
        match &existing {
            None => {
                let order = OrderKey::new(binding.created_at, binding.id);
                self.insert_ordered(&mut batch, BINDINGS, &order, binding)?;
                batch.put_cf(by_exchange, binding_by_exchange_key(&binding.exchange_id, &order), b"");
            }
            Some(previous) => {
                let order = OrderKey::new(previous.created_at, binding.id);
                let updated = ExchangeBinding {
                    created_at: previous.created_at,
                    ..binding.clone()
                };
                self.put_record(&mut batch, CF_BINDINGS, binding.id.as_bytes(), &updated)?;
                batch.delete_cf(by_exchange, binding_by_exchange_key(&previous.exchange_id, &order));
                batch.put_cf(by_exchange, binding_by_exchange_key(&binding.exchange_id, &order), b"");
            }
        }
        self.commit(batch)?;

        info!(
            "Bound queue {} to exchange {} with {} rule(s)",
            binding.queue_id,
            binding.exchange_id,
            binding.rules.len()
        );
        Ok(())
    }

    fn delete_binding(&self, id: &BindingId) -> Result<()> {
        let _bindings = self.bindings.lock();

        let existing: ExchangeBinding = self
            .get_record(CF_BINDINGS, id.as_bytes())?
            .ok_or_else(|| BrokerError::not_found(BINDINGS.entity, id))?;

        let order = OrderKey::new(existing.created_at, *id);
        let mut batch = WriteBatch::default();
        self.remove_ordered(&mut batch, BINDINGS, &order)?;
        batch.delete_cf(
            self.cf(CF_BINDINGS_BY_EXCHANGE)?,
            binding_by_exchange_key(&existing.exchange_id, &order),
        );
        self.commit(batch)?;

        debug!("Deleted binding {}", id);
        Ok(())
    }

    fn get_binding(&self, id: &BindingId) -> Result<Option<ExchangeBinding>> {
        Ok(self.load_binding(&self.snapshot(), id)?)
    }

    fn mget_bindings(&self, ids: &[BindingId]) -> Result<Vec<ExchangeBinding>> {
        Ok(self.load_many(ids, |snapshot, id| self.load_binding(snapshot, id))?)
    }

    fn find_bindings(&self, params: &CollectionParams) -> Result<Page<ExchangeBinding>> {
        self.find_page(BINDINGS, params, |snapshot, id| self.load_binding(snapshot, id))
    }

    fn bindings_for_exchange(&self, exchange_id: &ExchangeId) -> Result<Vec<ExchangeBinding>> {
        let snapshot = self.snapshot();
        let keys = self.keys_with_prefix(&snapshot, CF_BINDINGS_BY_EXCHANGE, exchange_id.as_bytes())?;

        let mut bindings = Vec::with_capacity(keys.len());
        for key in keys {
            let id = trailing_id(&key).ok_or_else(|| PersistenceError::Corrupt {
                cf: CF_BINDINGS_BY_EXCHANGE,
                detail: format!("{} byte key", key.len()),
            })?;
            let binding = self.load_binding(&snapshot, &id)?.ok_or_else(|| {
                BrokerError::Integrity(format!(
                    "exchange {} index points at missing binding {}",
                    exchange_id, id
                ))
            })?;
            bindings.push(binding);
        }
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_store;
    use gork_core::{
        BindingRule, Exchange, ExchangeRepository, ExchangeType, Queue, QueueRepository,
    };
    use std::collections::BTreeMap;

    fn setup(store: &RocksStore) -> (Exchange, Queue) {
        let exchange = Exchange::new("orders", ExchangeType::Direct).unwrap();
        let queue = Queue::new("billing", &BTreeMap::new()).unwrap();
        store.save_exchange(&exchange).unwrap();
        store.save_queue(&queue).unwrap();
        (exchange, queue)
    }

    #[test]
    fn test_bindings_listed_per_exchange_in_creation_order() {
        let (_dir, store) = open_store();
        let (exchange, queue) = setup(&store);
        let other = Exchange::new("other", ExchangeType::Fanout).unwrap();
        store.save_exchange(&other).unwrap();

        let mut first = ExchangeBinding::new(exchange.id, queue.id, vec![]).unwrap();
        let mut second =
            ExchangeBinding::new(exchange.id, queue.id, vec![BindingRule::equals("env", "prod")])
                .unwrap();
        first.created_at = second.created_at - chrono::Duration::seconds(1);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        let unrelated = ExchangeBinding::new(other.id, queue.id, vec![]).unwrap();

        store.save_binding(&second).unwrap();
        store.save_binding(&first).unwrap();
        store.save_binding(&unrelated).unwrap();

        let bound = store.bindings_for_exchange(&exchange.id).unwrap();
        assert_eq!(bound, vec![first, second]);
        assert_eq!(
            store.find_bindings(&CollectionParams::default()).unwrap().info.total,
            3
        );
    }

    #[test]
    fn test_binding_requires_existing_endpoints() {
        let (_dir, store) = open_store();
        let (exchange, queue) = setup(&store);

        let no_queue = ExchangeBinding::new(exchange.id, uuid::Uuid::new_v4(), vec![]).unwrap();
        let no_exchange = ExchangeBinding::new(uuid::Uuid::new_v4(), queue.id, vec![]).unwrap();

        assert!(matches!(store.save_binding(&no_queue), Err(BrokerError::Integrity(_))));
        assert!(matches!(store.save_binding(&no_exchange), Err(BrokerError::Integrity(_))));
        assert!(store.bindings_for_exchange(&exchange.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_binding_clears_exchange_index() {
        let (_dir, store) = open_store();
        let (exchange, queue) = setup(&store);
        let binding = ExchangeBinding::new(exchange.id, queue.id, vec![]).unwrap();
        store.save_binding(&binding).unwrap();

        store.delete_binding(&binding.id).unwrap();

        assert_eq!(store.get_binding(&binding.id).unwrap(), None);
        assert!(store.bindings_for_exchange(&exchange.id).unwrap().is_empty());
        assert!(matches!(
            store.delete_binding(&binding.id),
            Err(BrokerError::NotFound { .. })
        ));
    }
}
