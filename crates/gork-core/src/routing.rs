//! Routing engine: maps a published task onto destination queues.
//!
//! Routing is a pure function of the task headers and the exchange's
//! bindings, so it is safe to call from any number of publishers at once.

use crate::{BindingRule, Exchange, ExchangeBinding, ExchangeType, Headers, QueueId, RuleOperator};
use std::collections::HashSet;

/// Destination queues computed for one published task, in binding order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routes(Vec<QueueId>);

impl Routes {
    pub fn queue_ids(&self) -> &[QueueId] {
        &self.0
    }

    pub fn into_queue_ids(self) -> Vec<QueueId> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// No binding matched. Whether that is acceptable is up to the publisher.
    pub fn is_unroutable(&self) -> bool {
        self.is_empty()
    }
}

/// Compute the destination queues of a task published to `exchange`.
///
/// Bindings of other exchanges are ignored. Each queue appears at most once,
/// at the position of the first binding that matched it.
pub fn route(exchange: &Exchange, headers: &Headers, bindings: &[ExchangeBinding]) -> Routes {
    let mut seen = HashSet::new();
    let mut destinations = Vec::new();

    for binding in bindings {
        if binding.exchange_id != exchange.id {
            continue;
        }
        if matches(exchange.kind, binding, headers) && seen.insert(binding.queue_id) {
            destinations.push(binding.queue_id);
        }
    }

    Routes(destinations)
}

/// Whether a task with `headers` passes every rule of `binding`
pub fn matches(kind: ExchangeType, binding: &ExchangeBinding, headers: &Headers) -> bool {
    match kind {
        ExchangeType::Fanout => true,
        ExchangeType::Direct => binding
            .rules
            .iter()
            .all(|rule| headers.get(&rule.key) == Some(&rule.value)),
        ExchangeType::Topic => binding.rules.iter().all(|rule| evaluate(rule, headers)),
    }
}

/// Evaluate a single rule using its operator
pub fn evaluate(rule: &BindingRule, headers: &Headers) -> bool {
    let actual = headers.get(&rule.key);
    match rule.operator {
        RuleOperator::Equals => actual == Some(&rule.value),
        // A missing header is never equal to the rule value
        RuleOperator::NotEquals => actual != Some(&rule.value),
        RuleOperator::Exists => actual.is_some(),
        RuleOperator::Contains => actual.map_or(false, |v| v.contains(rule.value.as_str())),
        RuleOperator::Prefix => actual.map_or(false, |v| v.starts_with(rule.value.as_str())),
    }
}
