mod bindings;
mod exchanges;
mod queues;
mod schema;
mod store;
mod tasks;

pub use store::{RocksStore, StoreConfig};

use gork_core::BrokerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Column family not found: {0}")]
    MissingColumnFamily(&'static str),

    #[error("Corrupt entry in {cf}: {detail}")]
    Corrupt { cf: &'static str, detail: String },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{RocksStore, StoreConfig};
    use tempfile::TempDir;

    pub(crate) fn open_store() -> (TempDir, RocksStore) {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            data_dir: temp_dir.path().to_path_buf(),
        };
        let store = RocksStore::open(config).unwrap();
        (temp_dir, store)
    }
}

/// Read-path failures. Commit failures are mapped to
/// `BrokerError::Transaction` where the batch is written.
impl From<PersistenceError> for BrokerError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::SerializationError(e) => BrokerError::Serialization(e),
            PersistenceError::Corrupt { .. } => BrokerError::Integrity(err.to_string()),
            other => BrokerError::Storage(other.to_string()),
        }
    }
}
