//! Queue settings: recognized keys, per-key validation and the merge rule.

use crate::{Result, ValidationErrors};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Longest accepted rate-limit window, in seconds
pub const MAX_RATE_LIMIT_DURATION_SECS: u64 = 86_400;

/// Setting keys a queue recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueSetting {
    RateLimitEnabled,
    RateLimitTokens,
    RateLimitDuration,
}

impl QueueSetting {
    pub const ALL: [QueueSetting; 3] = [
        QueueSetting::RateLimitEnabled,
        QueueSetting::RateLimitTokens,
        QueueSetting::RateLimitDuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueSetting::RateLimitEnabled => "rate_limit.enabled",
            QueueSetting::RateLimitTokens => "rate_limit.tokens",
            QueueSetting::RateLimitDuration => "rate_limit.duration",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|setting| setting.as_str() == key)
    }

    pub fn default_value(&self) -> &'static str {
        "0"
    }

    /// Check a raw value for this key
    pub fn validate(&self, value: &str) -> std::result::Result<(), String> {
        match self {
            QueueSetting::RateLimitEnabled => match value {
                "0" | "1" => Ok(()),
                _ => Err("must be \"0\" or \"1\"".to_string()),
            },
            QueueSetting::RateLimitTokens => value
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| "must be a non-negative integer".to_string()),
            QueueSetting::RateLimitDuration => match value.parse::<u64>() {
                Ok(secs) if secs <= MAX_RATE_LIMIT_DURATION_SECS => Ok(()),
                Ok(_) => Err(format!("must be no greater than {}", MAX_RATE_LIMIT_DURATION_SECS)),
                Err(_) => Err("must be a non-negative integer".to_string()),
            },
        }
    }
}

/// Validated settings of a queue. Always holds a value for every recognized key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings(BTreeMap<QueueSetting, String>);

impl QueueSettings {
    pub fn defaults() -> Self {
        QueueSettings(
            QueueSetting::ALL
                .into_iter()
                .map(|setting| (setting, setting.default_value().to_string()))
                .collect(),
        )
    }

    /// Apply caller overrides on top of these settings.
    ///
    /// Unknown keys and invalid values are all reported in one
    /// `BrokerError::Validation`; nothing is applied unless every entry passes.
    pub fn merge(&self, overrides: &BTreeMap<String, String>) -> Result<QueueSettings> {
        let mut errors = ValidationErrors::new();
        check_overrides(overrides, &mut errors);
        errors.into_result()?;
        Ok(self.merge_unchecked(overrides))
    }

    fn merge_unchecked(&self, overrides: &BTreeMap<String, String>) -> QueueSettings {
        let mut merged = self.0.clone();
        for (key, value) in overrides {
            if let Some(setting) = QueueSetting::parse(key) {
                merged.insert(setting, value.clone());
            }
        }
        QueueSettings(merged)
    }

    pub fn get(&self, setting: QueueSetting) -> &str {
        self.0
            .get(&setting)
            .map(String::as_str)
            .unwrap_or_else(|| setting.default_value())
    }

    /// Flat key/value view using the wire names of the keys
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(setting, value)| (setting.as_str().to_string(), value.clone()))
            .collect()
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit {
            enabled: self.get(QueueSetting::RateLimitEnabled) == "1",
            tokens: self.get(QueueSetting::RateLimitTokens).parse().unwrap_or(0),
            duration: Duration::from_secs(
                self.get(QueueSetting::RateLimitDuration).parse().unwrap_or(0),
            ),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Record every invalid override key/value into `errors`
pub(crate) fn check_overrides(overrides: &BTreeMap<String, String>, errors: &mut ValidationErrors) {
    for (key, value) in overrides {
        let field = format!("settings[{}]", key);
        match QueueSetting::parse(key) {
            Some(setting) => errors.check(field, setting.validate(value)),
            None => errors.add(field, "unknown setting"),
        }
    }
}

/// Typed view of the rate-limit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimit {
    pub enabled: bool,
    pub tokens: u64,
    pub duration: Duration,
}

impl RateLimit {
    pub fn new(tokens: u64, duration: Duration) -> Self {
        RateLimit {
            enabled: true,
            tokens,
            duration,
        }
    }

    pub fn disabled() -> Self {
        RateLimit::default()
    }

    /// A limit with no tokens or a zero-length window behaves as if disabled
    pub fn is_active(&self) -> bool {
        self.enabled && self.tokens > 0 && !self.duration.is_zero()
    }
}
