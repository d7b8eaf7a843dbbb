use clap::Parser;
use gork_broker::{
    Broker, BrokerConfig, BrokerOptions, Deadline, Gateway, LogFormat, MetricsGateway, Server,
};
use gork_persistence::RocksStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gork-server")]
#[command(about = "Task broker with exchange routing and rate-limited queues", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "GORK_CONFIG", default_value = "gork.yaml")]
    config: String,

    /// Directory holding the task store
    #[arg(long, env = "GORK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Metrics gateway port
    #[arg(long, env = "GORK_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Log at debug level
    #[arg(long, env = "GORK_DEBUG")]
    debug: bool,

    /// Human readable logs instead of JSON
    #[arg(long, env = "GORK_TEXT_LOGS")]
    text: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_found = std::path::Path::new(&args.config).exists();
    let mut config = if config_found {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    // Override with CLI args
    if let Some(data_dir) = args.data_dir {
        config.persistence.data_dir = data_dir;
    }
    if let Some(port) = args.metrics_port {
        config.gateways.metrics.port = port;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }
    if args.text {
        config.logging.format = LogFormat::Text;
    }
    config.validate()?;

    init_tracing(&config);
    if !config_found {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }
    tracing::info!("Starting gork with config: {:?}", config);

    let store = Arc::new(RocksStore::open(config.to_store_config())?);
    let options = BrokerOptions {
        reject_unroutable: config.lifecycle.reject_unroutable,
        expiry_sweep_interval: config.expiry_sweep_interval(),
        max_attempts: config.lifecycle.max_attempts,
    };
    let broker = Arc::new(Broker::new(store, options)?);
    broker.warm_up(Deadline::none()).await?;

    let sweep = tokio::spawn(broker.clone().run_expiry_sweep());

    let mut gateways: Vec<Arc<dyn Gateway>> = Vec::new();
    if config.gateways.metrics.enabled {
        gateways.push(Arc::new(MetricsGateway::new(
            &config.gateways.metrics.host,
            config.gateways.metrics.port,
            broker.metrics(),
        )));
    }

    let server = Server::new(gateways, config.startup_grace());
    if let Err(e) = server.start().await {
        stop_sweep(&broker, sweep).await;
        return Err(e);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    let stopped = server.stop().await;
    stop_sweep(&broker, sweep).await;
    stopped?;

    tracing::info!("Broker stopped");
    Ok(())
}

async fn stop_sweep(broker: &Broker<RocksStore>, sweep: JoinHandle<()>) {
    broker.shutdown();
    if let Err(e) = sweep.await {
        tracing::error!("Expiry sweep task failed: {}", e);
    }
}

fn init_tracing(config: &BrokerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}
