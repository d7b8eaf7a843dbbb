//! Runs the transport gateways that expose the broker.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A transport in front of the broker.
///
/// `start` serves until `stop` is called; returning an error means the
/// gateway failed.
#[async_trait]
pub trait Gateway: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

/// Starts every gateway concurrently and stops them together.
pub struct Server {
    gateways: Vec<Arc<dyn Gateway>>,
    grace: Duration,
    running: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    pub fn new(gateways: Vec<Arc<dyn Gateway>>, grace: Duration) -> Self {
        Server {
            gateways,
            grace,
            running: Mutex::new(Vec::new()),
        }
    }

    /// Launch all gateways.
    ///
    /// Fails with the first gateway error reported within the grace period,
    /// after stopping the others. Errors after the grace period are logged.
    pub async fn start(&self) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(self.gateways.len().max(1));

        let mut handles = Vec::with_capacity(self.gateways.len());
        for gateway in &self.gateways {
            let gateway = gateway.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                info!("Starting gateway {}", gateway.name());
                if let Err(e) = gateway.start().await {
                    error!("Gateway {} failed: {:#}", gateway.name(), e);
                    if tx.send((gateway.name().to_string(), e)).await.is_err() {
                        warn!("Gateway {} failed after the startup grace period", gateway.name());
                    }
                }
            }));
        }
        drop(tx);
        *self.running.lock() = handles;

        match tokio::time::timeout(self.grace, rx.recv()).await {
            Ok(Some((name, e))) => {
                if let Err(stop_err) = self.stop().await {
                    warn!("Error while stopping after failed start: {:#}", stop_err);
                }
                Err(e.context(format!("gateway {} failed to start", name)))
            }
            // Every gateway returned cleanly, or none failed in time
            Ok(None) | Err(_) => {
                info!("Started {} gateway(s)", self.gateways.len());
                Ok(())
            }
        }
    }

    /// Stop every gateway concurrently and wait for all of them to finish
    pub async fn stop(&self) -> anyhow::Result<()> {
        let results = join_all(self.gateways.iter().map(|gateway| async move {
            let result = gateway.stop().await;
            if let Err(e) = &result {
                error!("Gateway {} failed to stop: {:#}", gateway.name(), e);
            }
            result
        }))
        .await;

        let handles = std::mem::take(&mut *self.running.lock());
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("Gateway task panicked: {}", e);
            }
        }

        info!("Stopped {} gateway(s)", self.gateways.len());
        results.into_iter().collect::<anyhow::Result<Vec<()>>>()?;
        Ok(())
    }
}
