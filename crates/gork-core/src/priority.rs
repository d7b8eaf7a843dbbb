use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Delivery priority of a task.
/// Higher numerical values are delivered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const HIGHEST: Priority = Priority(255);

    pub fn new(value: u8) -> Self {
        Priority(value)
    }

    /// Get the raw priority value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Byte that sorts the most urgent priority first in ascending key order
    pub fn urgency_byte(&self) -> u8 {
        u8::MAX - self.0
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority(0)
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Priority(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}
