use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::realtime;
use crate::services::Services;
use crate::store::Database;
use crate::venues::{BinanceVenue, ExchangeClient};

const QUOTE_CHANNEL_CAPACITY: usize = 1000;

/// Owns the process-level resources and drives the server lifecycle
pub struct CommandControl {
    services: Services,
    db: Database,
    venue: Arc<BinanceVenue>,
}

impl CommandControl {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::connect(&config.database_url).await?;
        let venue = Arc::new(BinanceVenue::new(
            config.binance_api_key.clone(),
            config.binance_api_secret.clone(),
            config.binance_base_url.clone(),
            config.binance_ws_url.clone(),
        )?);
        let exchange: Arc<dyn ExchangeClient> = venue.clone();
        let services = Services::new(config, &db, exchange);

        Ok(Self {
            services,
            db,
            venue,
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Streams tickers for the configured symbols to realtime clients.
    /// A failed stream is logged and the server keeps running without it.
    pub async fn start_market_stream(&self) {
        let symbols = self.services.config.market_stream_symbols.clone();
        if symbols.is_empty() {
            info!("No market stream symbols configured");
            return;
        }

        let (quote_tx, quote_rx) = mpsc::channel(QUOTE_CHANNEL_CAPACITY);
        match self.venue.stream_quotes(symbols, quote_tx).await {
            Ok(()) => {
                tokio::spawn(realtime::forward_quotes(
                    Arc::clone(&self.services.hub),
                    quote_rx,
                ));
            }
            Err(e) => warn!(error = %e, "Market stream unavailable"),
        }
    }

    /// Serves the API until `shutdown` resolves
    pub async fn serve(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.services.config.port).into();
        let routes = api::routes(self.services.clone());

        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .map_err(|e| AppError::Config(format!("Failed to bind {}: {}", addr, e)))?;

        info!(
            addr = %bound,
            environment = ?self.services.config.environment,
            "Server listening"
        );
        server.await;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        metrics::init_metrics_server(self.services.config.metrics_port).await;

        if self.services.config.has_binance_credentials() {
            if let Err(e) = self.services.exchange.ping().await {
                warn!(error = %e, "Exchange is not reachable");
            }
        }
        self.start_market_stream().await;

        self.serve(shutdown_signal()).await?;
        self.stop().await
    }

    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.services.exchange.stop().await {
            error!(error = %e, "Failed to stop exchange client");
        }
        self.db.close().await;
        info!("Server stopped");
        Ok(())
    }

    pub fn status(&self) -> String {
        format!(
            "running for {:.0}s on port {}",
            self.services.uptime(),
            self.services.config.port
        )
    }
}

/// Resolves on SIGINT, or SIGTERM where the platform has it
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
