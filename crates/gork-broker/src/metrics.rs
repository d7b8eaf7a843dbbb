use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Publish path
    pub tasks_published: IntCounter,
    pub publishes_unroutable: IntCounter,

    // Consume path, labelled by outcome
    pub leases_total: IntCounterVec,
    pub completions_total: IntCounterVec,

    pub tasks_expired: IntCounter,

    pub jobs_outstanding: IntGauge,
}

impl BrokerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let tasks_published = IntCounter::new(
            "gork_tasks_published_total",
            "Task records created by publishes, one per destination queue",
        )?;
        registry.register(Box::new(tasks_published.clone()))?;

        let publishes_unroutable = IntCounter::new(
            "gork_publishes_unroutable_total",
            "Publishes that matched no binding",
        )?;
        registry.register(Box::new(publishes_unroutable.clone()))?;

        let leases_total = IntCounterVec::new(
            Opts::new("gork_leases_total", "Lease attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(leases_total.clone()))?;

        let completions_total = IntCounterVec::new(
            Opts::new("gork_completions_total", "Job completions by resulting task status"),
            &["outcome"],
        )?;
        registry.register(Box::new(completions_total.clone()))?;

        let tasks_expired = IntCounter::new("gork_tasks_expired_total", "Tasks moved to expired")?;
        registry.register(Box::new(tasks_expired.clone()))?;

        let jobs_outstanding = IntGauge::new("gork_jobs_outstanding", "Leased jobs not yet completed")?;
        registry.register(Box::new(jobs_outstanding.clone()))?;

        Ok(BrokerMetrics {
            registry,
            tasks_published,
            publishes_unroutable,
            leases_total,
            completions_total,
            tasks_expired,
            jobs_outstanding,
        })
    }

    pub fn inc_lease(&self, outcome: &str) {
        self.leases_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_completion(&self, outcome: &str) {
        self.completions_total.with_label_values(&[outcome]).inc();
    }

    /// Text exposition format of every registered metric
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
