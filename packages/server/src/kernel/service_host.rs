//! Runs long-lived services until the process is asked to stop.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-running background service.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Run until `shutdown` fires, then clean up and return.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

#[derive(Default)]
pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
    shutdown: CancellationToken,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Service + 'static) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Token that stops every hosted service when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run all services until the shutdown token fires.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.shutdown;
        let runs = self.services.into_iter().map(|service| {
            let token = shutdown.clone();
            async move {
                let name = service.name();
                info!(service = name, "service starting");
                if let Err(e) = service.run(token).await {
                    error!(service = name, error = %e, "service exited with error");
                }
                info!(service = name, "service stopped");
            }
        });

        futures::future::join_all(runs).await;
        Ok(())
    }

    /// Run all services until Ctrl-C or SIGTERM.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            wait_for_signal().await;
            info!("received shutdown signal");
            shutdown.cancel();
        });

        self.run().await
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
