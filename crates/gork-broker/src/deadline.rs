use gork_core::{BrokerError, Result};
use std::time::{Duration, Instant};

/// Caller-supplied cutoff for a service operation.
///
/// Checked before each storage transaction starts. A transaction that was
/// already admitted always runs to completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No cutoff
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.map_or(false, |at| Instant::now() >= at)
    }

    /// Time left, `None` when there is no cutoff
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            return Err(BrokerError::DeadlineExceeded);
        }
        Ok(())
    }
}
