//! Column families and key layouts.
//!
//! Every multi-byte number in a key is big-endian so that RocksDB's byte
//! order equals the order the scans need.

use gork_core::{sortable_i64, OrderKey, QueueId, Task, TaskId, TaskStatus};
use rocksdb::MergeOperands;
use uuid::Uuid;

pub(crate) const CF_QUEUES: &str = "queues";
pub(crate) const CF_QUEUE_SETTINGS: &str = "queue_settings";
pub(crate) const CF_QUEUE_NAMES: &str = "queue_names";
pub(crate) const CF_QUEUE_ORDER: &str = "queue_order";

pub(crate) const CF_EXCHANGES: &str = "exchanges";
pub(crate) const CF_EXCHANGE_NAMES: &str = "exchange_names";
pub(crate) const CF_EXCHANGE_ORDER: &str = "exchange_order";

pub(crate) const CF_BINDINGS: &str = "bindings";
pub(crate) const CF_BINDING_ORDER: &str = "binding_order";
/// exchange_id ++ order key
pub(crate) const CF_BINDINGS_BY_EXCHANGE: &str = "bindings_by_exchange";

pub(crate) const CF_TASKS: &str = "tasks";
pub(crate) const CF_TASK_ORDER: &str = "task_order";
/// queue_id ++ urgency ++ created_at ++ task_id, pending tasks only
pub(crate) const CF_TASK_PENDING: &str = "task_pending";
/// expires_at ++ task_id, pending and processing tasks with an expiry
pub(crate) const CF_TASK_EXPIRY: &str = "task_expiry";

/// Cardinality counters, combined with the `add` merge operator
pub(crate) const CF_COUNTERS: &str = "counters";

pub(crate) const ALL_CFS: &[&str] = &[
    CF_QUEUES,
    CF_QUEUE_SETTINGS,
    CF_QUEUE_NAMES,
    CF_QUEUE_ORDER,
    CF_EXCHANGES,
    CF_EXCHANGE_NAMES,
    CF_EXCHANGE_ORDER,
    CF_BINDINGS,
    CF_BINDING_ORDER,
    CF_BINDINGS_BY_EXCHANGE,
    CF_TASKS,
    CF_TASK_ORDER,
    CF_TASK_PENDING,
    CF_TASK_EXPIRY,
    CF_COUNTERS,
];

/// Records and creation-order index of one collection
#[derive(Debug, Clone, Copy)]
pub(crate) struct Table {
    pub entity: &'static str,
    pub data: &'static str,
    pub order: &'static str,
    pub total: &'static [u8],
}

pub(crate) const QUEUES: Table = Table {
    entity: "queue",
    data: CF_QUEUES,
    order: CF_QUEUE_ORDER,
    total: b"total:queues",
};

pub(crate) const EXCHANGES: Table = Table {
    entity: "exchange",
    data: CF_EXCHANGES,
    order: CF_EXCHANGE_ORDER,
    total: b"total:exchanges",
};

pub(crate) const BINDINGS: Table = Table {
    entity: "binding",
    data: CF_BINDINGS,
    order: CF_BINDING_ORDER,
    total: b"total:bindings",
};

pub(crate) const TASKS: Table = Table {
    entity: "task",
    data: CF_TASKS,
    order: CF_TASK_ORDER,
    total: b"total:tasks",
};

pub(crate) fn pending_total_key(queue_id: &QueueId) -> Vec<u8> {
    let mut key = b"pending:".to_vec();
    key.extend_from_slice(queue_id.as_bytes());
    key
}

pub(crate) fn binding_by_exchange_key(exchange_id: &Uuid, order: &OrderKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + OrderKey::LEN);
    key.extend_from_slice(exchange_id.as_bytes());
    key.extend_from_slice(&order.to_bytes());
    key
}

/// Pending index key: most urgent first, then oldest first
pub(crate) fn pending_key(task: &Task) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 1 + 8 + 16);
    key.extend_from_slice(task.queue_id.as_bytes());
    key.push(task.priority.urgency_byte());
    key.extend_from_slice(&sortable_i64(task.created_at.timestamp_micros()));
    key.extend_from_slice(task.id.as_bytes());
    key
}

/// `None` when the task does not belong in the expiry index
pub(crate) fn expiry_key(task: &Task) -> Option<Vec<u8>> {
    if !matches!(task.status, TaskStatus::Pending | TaskStatus::Processing) {
        return None;
    }
    task.expires_at.map(|expires_at| {
        let mut key = Vec::with_capacity(8 + 16);
        key.extend_from_slice(&sortable_i64(expires_at.timestamp_micros()));
        key.extend_from_slice(task.id.as_bytes());
        key
    })
}

/// Task ID stored in the last 16 bytes of an index key
pub(crate) fn trailing_id(key: &[u8]) -> Option<TaskId> {
    key.len()
        .checked_sub(16)
        .and_then(|start| Uuid::from_slice(&key[start..]).ok())
}

pub(crate) fn encode_delta(delta: i64) -> [u8; 8] {
    delta.to_le_bytes()
}

pub(crate) fn decode_counter(bytes: &[u8]) -> i64 {
    <[u8; 8]>::try_from(bytes)
        .map(i64::from_le_bytes)
        .unwrap_or(0)
}

/// Associative merge for counters: sums every operand onto the stored value
pub(crate) fn add_counters(
    _key: &[u8],
    existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    let mut total = existing.map(decode_counter).unwrap_or(0);
    for operand in operands.iter() {
        total += decode_counter(operand);
    }
    Some(encode_delta(total).to_vec())
}
