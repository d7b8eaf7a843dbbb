use crate::error::validate_name;
use crate::settings::check_overrides;
use crate::{QueueSettings, Result, ValidationErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a queue
pub type QueueId = Uuid;

/// A named list of tasks of the same kind waiting to be leased by workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    /// Unique name, 1-255 characters
    pub name: String,
    pub settings: QueueSettings,
    pub created_at: DateTime<Utc>,
}

impl Queue {
    /// Create a queue with the default settings overridden by `overrides`.
    ///
    /// The name and every override are validated together.
    pub fn new(name: impl Into<String>, overrides: &BTreeMap<String, String>) -> Result<Self> {
        let name = name.into();

        let mut errors = ValidationErrors::new();
        errors.check("name", validate_name(&name));
        check_overrides(overrides, &mut errors);
        errors.into_result()?;

        Ok(Queue {
            id: Uuid::new_v4(),
            name,
            settings: QueueSettings::defaults().merge(overrides)?,
            created_at: Utc::now(),
        })
    }

    /// Copy of this queue with `overrides` merged over its current settings
    pub fn with_settings(&self, overrides: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Queue {
            settings: self.settings.merge(overrides)?,
            ..self.clone()
        })
    }
}
