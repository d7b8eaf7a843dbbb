pub mod broker;
pub mod config;
pub mod deadline;
pub mod gateway;
pub mod jobs;
pub mod metrics;
pub mod policy;
pub mod server;

pub use broker::{Broker, BrokerOptions, JobOutcome, LeaseOutcome, PublishOptions, Published};
pub use config::{BrokerConfig, LogFormat};
pub use deadline::Deadline;
pub use gateway::MetricsGateway;
pub use jobs::JobRegistry;
pub use metrics::BrokerMetrics;
pub use policy::{FailureAction, FailurePolicy, RetryPolicy};
pub use server::{Gateway, Server};
