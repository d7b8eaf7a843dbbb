use crate::{BrokerError, ExchangeId, QueueId, Result, ValidationErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a binding
pub type BindingId = Uuid;

/// Comparison applied by a binding rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    /// Header must be present, value ignored
    Exists,
    /// Rule value is a substring of the header value
    Contains,
    /// Header value starts with the rule value
    Prefix,
}

impl RuleOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOperator::Equals => "equals",
            RuleOperator::NotEquals => "not_equals",
            RuleOperator::Exists => "exists",
            RuleOperator::Contains => "contains",
            RuleOperator::Prefix => "prefix",
        }
    }
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleOperator {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "equals" => Ok(RuleOperator::Equals),
            "not_equals" => Ok(RuleOperator::NotEquals),
            "exists" => Ok(RuleOperator::Exists),
            "contains" => Ok(RuleOperator::Contains),
            "prefix" => Ok(RuleOperator::Prefix),
            other => {
                let mut errors = ValidationErrors::new();
                errors.add("operator", format!("unknown operator {:?}", other));
                Err(BrokerError::Validation(errors))
            }
        }
    }
}

/// A single header comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRule {
    pub key: String,
    pub operator: RuleOperator,
    pub value: String,
}

impl BindingRule {
    pub fn new(key: impl Into<String>, operator: RuleOperator, value: impl Into<String>) -> Self {
        BindingRule {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, RuleOperator::Equals, value)
    }
}

/// Rule-guarded link from an exchange to a queue.
///
/// Rules are combined with AND; a binding without rules matches every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeBinding {
    pub id: BindingId,
    pub exchange_id: ExchangeId,
    pub queue_id: QueueId,
    pub rules: Vec<BindingRule>,
    pub created_at: DateTime<Utc>,
}

impl ExchangeBinding {
    /// Validates rule shape only; whether the exchange and queue exist is
    /// checked by the storage layer when the binding is saved.
    pub fn new(exchange_id: ExchangeId, queue_id: QueueId, rules: Vec<BindingRule>) -> Result<Self> {
        let mut errors = ValidationErrors::new();
        for (i, rule) in rules.iter().enumerate() {
            if rule.key.is_empty() {
                errors.add(format!("rules[{}].key", i), "must not be empty");
            }
        }
        errors.into_result()?;

        Ok(ExchangeBinding {
            id: Uuid::new_v4(),
            exchange_id,
            queue_id,
            rules,
            created_at: Utc::now(),
        })
    }

    pub fn is_unconditional(&self) -> bool {
        self.rules.is_empty()
    }
}
