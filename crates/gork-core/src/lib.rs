mod binding;
mod collection;
mod error;
mod exchange;
mod job;
mod priority;
mod queue;
mod settings;
mod task;

pub mod rate_limit;
pub mod repository;
pub mod routing;

pub use binding::{BindingId, BindingRule, ExchangeBinding, RuleOperator};
pub use collection::{sortable_i64, CollectionInfo, CollectionParams, OrderKey, Page, DEFAULT_LIMIT};
pub use error::{BrokerError, Result, ValidationErrors};
pub use exchange::{Exchange, ExchangeId, ExchangeType};
pub use job::{Job, JobId};
pub use priority::Priority;
pub use queue::{Queue, QueueId};
pub use rate_limit::RateLimiter;
pub use repository::{BindingRepository, ExchangeRepository, QueueRepository, Store, TaskRepository};
pub use routing::{route, Routes};
pub use settings::{QueueSetting, QueueSettings, RateLimit, MAX_RATE_LIMIT_DURATION_SECS};
pub use task::{Headers, NewTask, Task, TaskBuilder, TaskId, TaskPayload, TaskStatus};

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
