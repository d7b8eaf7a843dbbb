use crate::error::validate_name;
use crate::{BrokerError, Result, ValidationErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an exchange
pub type ExchangeId = Uuid;

/// How an exchange evaluates its bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeType {
    /// Exact header equality on every rule
    Direct,
    /// Every bound queue, rules ignored
    Fanout,
    /// Per-rule operators
    Topic,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(ExchangeType::Direct),
            "fanout" => Ok(ExchangeType::Fanout),
            "topic" => Ok(ExchangeType::Topic),
            other => {
                let mut errors = ValidationErrors::new();
                errors.add("type", format!("unknown exchange type {:?}", other));
                Err(BrokerError::Validation(errors))
            }
        }
    }
}

/// Entry point that accepts tasks from publishers and routes them to queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,
    /// Unique name
    pub name: String,
    /// Fixed at creation
    pub kind: ExchangeType,
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(name: impl Into<String>, kind: ExchangeType) -> Result<Self> {
        let name = name.into();

        let mut errors = ValidationErrors::new();
        errors.check("name", validate_name(&name));
        errors.into_result()?;

        Ok(Exchange {
            id: Uuid::new_v4(),
            name,
            kind,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_type_parsing() {
        assert_eq!("topic".parse::<ExchangeType>().unwrap(), ExchangeType::Topic);
        assert_eq!(ExchangeType::Fanout.to_string(), "fanout");
        assert!("headers".parse::<ExchangeType>().is_err());
    }

    #[test]
    fn test_exchange_name_validated() {
        assert!(Exchange::new("orders", ExchangeType::Direct).is_ok());
        assert!(Exchange::new("", ExchangeType::Direct).is_err());
    }
}
