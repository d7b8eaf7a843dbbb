use crate::schema::{CF_EXCHANGES, CF_EXCHANGE_NAMES, EXCHANGES};
use crate::RocksStore;
use gork_core::{
    BrokerError, CollectionParams, Exchange, ExchangeId, ExchangeRepository, OrderKey, Page,
    Result,
};
use rocksdb::{Snapshot, WriteBatch};
use tracing::{debug, info};

impl RocksStore {
    fn load_exchange(
        &self,
        snapshot: &Snapshot<'_>,
        id: &ExchangeId,
    ) -> crate::Result<Option<Exchange>> {
        self.read_record(snapshot, CF_EXCHANGES, id.as_bytes())
    }
}

impl ExchangeRepository for RocksStore {
    fn save_exchange(&self, exchange: &Exchange) -> Result<()> {
        let _names = self.exchange_names.lock();

        self.check_name(CF_EXCHANGE_NAMES, EXCHANGES.entity, &exchange.name, &exchange.id)?;
        let existing: Option<Exchange> = self.get_record(CF_EXCHANGES, exchange.id.as_bytes())?;

        let mut batch = WriteBatch::default();
        match &existing {
            None => {
                let order = OrderKey::new(exchange.created_at, exchange.id);
                self.insert_ordered(&mut batch, EXCHANGES, &order, exchange)?;
            }
            Some(previous) => {
                let updated = Exchange {
                    created_at: previous.created_at,
                    ..exchange.clone()
                };
                self.put_record(&mut batch, CF_EXCHANGES, exchange.id.as_bytes(), &updated)?;
                if previous.name != exchange.name {
                    batch.delete_cf(self.cf(CF_EXCHANGE_NAMES)?, previous.name.as_bytes());
                }
            }
        }
        batch.put_cf(
            self.cf(CF_EXCHANGE_NAMES)?,
            exchange.name.as_bytes(),
            exchange.id.as_bytes(),
        );
        self.commit(batch)?;

        if existing.is_none() {
            info!(
                "Created {} exchange {} ({})",
                exchange.kind, exchange.name, exchange.id
            );
        } else {
            debug!("Updated exchange {} ({})", exchange.name, exchange.id);
        }
        Ok(())
    }

    fn delete_exchange(&self, id: &ExchangeId) -> Result<()> {
        let _names = self.exchange_names.lock();

        let existing: Exchange = self
            .get_record(CF_EXCHANGES, id.as_bytes())?
            .ok_or_else(|| BrokerError::not_found(EXCHANGES.entity, id))?;

        let mut batch = WriteBatch::default();
        self.remove_ordered(&mut batch, EXCHANGES, &OrderKey::new(existing.created_at, *id))?;
        batch.delete_cf(self.cf(CF_EXCHANGE_NAMES)?, existing.name.as_bytes());
        self.commit(batch)?;

        info!("Deleted exchange {} ({})", existing.name, id);
        Ok(())
    }

    fn get_exchange(&self, id: &ExchangeId) -> Result<Option<Exchange>> {
        Ok(self.load_exchange(&self.snapshot(), id)?)
    }

    fn get_exchange_by_name(&self, name: &str) -> Result<Option<Exchange>> {
        let snapshot = self.snapshot();
        let id = match self.id_for_name(&snapshot, CF_EXCHANGE_NAMES, name)? {
            Some(id) => id,
            None => return Ok(None),
        };

        match self.load_exchange(&snapshot, &id)? {
            Some(exchange) => Ok(Some(exchange)),
            None => Err(BrokerError::Integrity(format!(
                "exchange name {:?} points at missing exchange {}",
                name, id
            ))),
        }
    }

    fn mget_exchanges(&self, ids: &[ExchangeId]) -> Result<Vec<Exchange>> {
        Ok(self.load_many(ids, |snapshot, id| self.load_exchange(snapshot, id))?)
    }

    fn find_exchanges(&self, params: &CollectionParams) -> Result<Page<Exchange>> {
        self.find_page(EXCHANGES, params, |snapshot, id| self.load_exchange(snapshot, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_store;
    use gork_core::ExchangeType;

    #[test]
    fn test_save_get_and_delete_exchange() {
        let (_dir, store) = open_store();
        let exchange = Exchange::new("events", ExchangeType::Topic).unwrap();

        store.save_exchange(&exchange).unwrap();
        assert_eq!(store.get_exchange(&exchange.id).unwrap(), Some(exchange.clone()));
        assert_eq!(
            store.get_exchange_by_name("events").unwrap(),
            Some(exchange.clone())
        );

        store.delete_exchange(&exchange.id).unwrap();
        assert_eq!(store.get_exchange(&exchange.id).unwrap(), None);
        assert_eq!(store.get_exchange_by_name("events").unwrap(), None);
        assert_eq!(
            store.find_exchanges(&CollectionParams::default()).unwrap().info.total,
            0
        );
    }

    #[test]
    fn test_exchange_names_are_unique() {
        let (_dir, store) = open_store();
        store
            .save_exchange(&Exchange::new("events", ExchangeType::Fanout).unwrap())
            .unwrap();

        let duplicate = Exchange::new("events", ExchangeType::Direct).unwrap();
        assert!(matches!(
            store.save_exchange(&duplicate),
            Err(BrokerError::Conflict { entity: "exchange", .. })
        ));
    }

    #[test]
    fn test_exchanges_listed_with_total() {
        let (_dir, store) = open_store();
        for i in 0..3 {
            let exchange = Exchange::new(format!("ex-{}", i), ExchangeType::Direct).unwrap();
            store.save_exchange(&exchange).unwrap();
        }

        let page = store.find_exchanges(&CollectionParams::new("", 2)).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.info.total, 3);

        let rest = store
            .find_exchanges(&CollectionParams::new(page.info.cursor, 2))
            .unwrap();
        assert_eq!(rest.records.len(), 1);
        assert!(rest.info.cursor.is_empty());
    }
}
