//! Process runtime
//!
//! One explicit process-level owner for the HTTP driver thread, the control
//! dispatcher, and the control sockets. Built at program start, never
//! lazily under a request path.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::control::{ControlServer, Dispatcher};
use crate::error::StreamError;
use crate::http::HttpDriver;

/// Process-level runtime
pub struct Runtime {
    config: Config,
    driver: Arc<HttpDriver>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

impl Runtime {
    /// Start the HTTP driver and build the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP driver thread cannot start.
    pub fn new(config: Config) -> Result<Self, StreamError> {
        let driver = Arc::new(HttpDriver::start(config.max_connections)?);
        let dispatcher = Dispatcher::new(Arc::clone(&driver), config.clone());
        Ok(Self {
            config,
            driver,
            dispatcher,
            shutdown: CancellationToken::new(),
        })
    }

    /// The control dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Request process shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Serve the control plane until shutdown is requested (explicitly or
    /// via ctrl-c), then stop every instance and the HTTP driver.
    ///
    /// # Errors
    ///
    /// Returns an error when the control sockets cannot be bound.
    pub async fn serve(&self) -> Result<(), StreamError> {
        tokio::spawn(Arc::clone(&self.dispatcher).run_reaper());

        let server = ControlServer::new(Arc::clone(&self.dispatcher), self.shutdown.clone());
        let request_addr = self.config.request_addr.clone();
        let publish_addr = self.config.publish_addr.clone();
        let serving =
            tokio::spawn(async move { server.run(&request_addr, &publish_addr).await });

        tokio::select! {
            () = self.shutdown.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!("ctrl-c handler failed: {e}");
                }
                info!("shutdown requested");
                self.shutdown.cancel();
            }
        }

        self.dispatcher.stop_all();
        let driver = Arc::clone(&self.driver);
        // The driver join blocks; keep it off the async workers.
        let _ = tokio::task::spawn_blocking(move || driver.stop()).await;
        let _ = serving.await;
        info!("runtime stopped");
        Ok(())
    }
}
