use axum::routing::get;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::metrics::RelayMetrics;
use crate::registry::IdentityRegistry;
use crate::router::Router;

pub struct RelayServer {
    config: ServerConfig,
    router: Router,
    metrics: Arc<RelayMetrics>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let registry = Arc::new(IdentityRegistry::new(config.id_bytes));
        let metrics = Arc::new(RelayMetrics::new()?);
        let router = Router::new(registry, Arc::clone(&metrics));
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        Ok(Self {
            config,
            router,
            metrics,
            shutdown_tx,
        })
    }

    /// Builds the relay with a caller-supplied registry.
    pub fn with_registry(config: ServerConfig, registry: Arc<IdentityRegistry>) -> anyhow::Result<Self> {
        let mut server = Self::new(config)?;
        server.router = Router::new(registry, Arc::clone(&server.metrics));
        Ok(server)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn app(&self) -> axum::Router {
        let state = AppState {
            router: self.router.clone(),
            metrics: Arc::clone(&self.metrics),
            config: self.config.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        };

        axum::Router::new()
            .route("/", get(crate::api::ws_upgrade))
            .route("/ws", get(crate::api::ws_upgrade))
            .route("/health", get(crate::api::get_health))
            .route("/metrics", get(crate::api::get_metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!("phosaic-relay listening on {}", listener.local_addr()?);

        axum::serve(listener, self.app().into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(Self::shutdown_signal(Arc::clone(&self.shutdown_tx)))
            .await?;

        info!("phosaic-relay stopped");
        Ok(())
    }

    /// Resolves on SIGTERM, SIGINT or [`RelayServer::shutdown`], and tells open
    /// connections to close so graceful shutdown can complete.
    async fn shutdown_signal(shutdown_tx: Arc<watch::Sender<bool>>) {
        let mut shutdown = shutdown_tx.subscribe();

        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = async {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                std::future::pending::<()>().await;
            } => {
                info!("Shutdown requested");
            }
        }

        shutdown_tx.send_replace(true);
    }

    /// Stops accepting connections and closes open ones.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
