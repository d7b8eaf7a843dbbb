use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} with name {name:?} already exists")]
    Conflict { entity: &'static str, name: String },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Task in invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Task published to exchange {exchange} matched no binding")]
    Unroutable { exchange: String },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl BrokerError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        BrokerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Whether the caller may retry the whole logical operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Transaction(_))
    }
}

impl From<ValidationErrors> for BrokerError {
    fn from(errors: ValidationErrors) -> Self {
        BrokerError::Validation(errors)
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Every invalid field of a request, keyed by field path.
///
/// Validators record into this instead of returning early so that a single
/// request reports all of its problems at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        ValidationErrors(BTreeMap::new())
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    /// Record the outcome of a single field check
    pub fn check(&mut self, field: impl Into<String>, outcome: std::result::Result<(), String>) {
        if let Err(message) = outcome {
            self.add(field, message);
        }
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", field, message)?;
            first = false;
        }
        Ok(())
    }
}

/// Length check shared by queue and exchange names
pub(crate) fn validate_name(name: &str) -> std::result::Result<(), String> {
    let len = name.chars().count();
    if !(1..=255).contains(&len) {
        return Err(format!("must be between 1 and 255 characters (got {})", len));
    }
    Ok(())
}
