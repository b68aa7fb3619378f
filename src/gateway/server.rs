//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::auth::AuthGuard;
use super::router::{AppState, create_router};
use crate::auth::{Authenticator, ClaimsAuthenticator, IdentityClient, VerificationCache};
use crate::backend::{AuthPassthrough, PredictionClient};
use crate::config::Config;
use crate::history::{
    InMemoryResultStore, PersistenceFanout, PgResultStore, PgSettings, ResultCache, ResultStore,
};
use crate::service::PredictionService;
use crate::{Error, Result};

/// Prediction gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Credential verification, shared with the sweeper
    authenticator: Arc<Authenticator>,
    /// Business operations
    service: PredictionService,
    /// Identity service relay
    passthrough: AuthPassthrough,
}

impl Gateway {
    /// Build every process-wide component from `config`.
    ///
    /// Connects to Postgres when a database is configured.
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn ResultStore> = match &config.history.database {
            Some(database) => {
                let settings = PgSettings {
                    url: database.resolve_url()?,
                    max_connections: database.max_connections,
                    acquire_timeout: database.acquire_timeout,
                };
                Arc::new(PgResultStore::connect(&settings).await?)
            }
            None => {
                warn!("No database configured, prediction history is kept in memory only");
                Arc::new(InMemoryResultStore::new())
            }
        };
        Self::with_store(config, store)
    }

    /// Build the gateway around an existing result store.
    pub fn with_store(config: Config, store: Arc<dyn ResultStore>) -> Result<Self> {
        let secret = config.auth.resolve_secret()?;
        let verification_cache = Arc::new(VerificationCache::new(config.auth.verification_ttl));
        let mut authenticator = Authenticator::new(
            ClaimsAuthenticator::new(secret.as_bytes()),
            verification_cache,
        );
        if config.auth.remote_validation {
            let identity = IdentityClient::new(&config.identity.url, config.identity.timeout)?;
            authenticator = authenticator.with_remote(Arc::new(identity));
        }

        let result_cache = Arc::new(ResultCache::new(config.history.cache_capacity));
        let fanout = PersistenceFanout::new(Arc::clone(&result_cache), Arc::clone(&store));
        let client = PredictionClient::new(&config.prediction.url, config.prediction.timeout)?;
        let service = PredictionService::new(client, result_cache, store, fanout);
        let passthrough = AuthPassthrough::new(&config.identity.url, config.identity.timeout)?;

        Ok(Self {
            config,
            authenticator: Arc::new(authenticator),
            service,
            passthrough,
        })
    }

    /// The HTTP application, without binding a socket
    pub fn router(&self) -> Result<Router> {
        let state = Arc::new(AppState {
            service: self.service.clone(),
            passthrough: self.passthrough.clone(),
        });
        let guard = Arc::new(AuthGuard::new(
            Arc::clone(&self.authenticator),
            self.config.auth.public_paths.clone(),
        ));
        create_router(state, guard, &self.config.server)
    }

    /// Business operations, shared with the router
    #[must_use]
    pub fn service(&self) -> &PredictionService {
        &self.service
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        if let Err(e) = self.service.prime_cache().await {
            warn!(error = %e, "Failed to prime result cache, continuing cold");
        }

        let sweeper = self
            .authenticator
            .cache()
            .spawn_cleanup(self.config.auth.cleanup_interval, shutdown_tx.subscribe());

        let app = self.router()?;

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("PREDICT GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            verification_ttl_secs = self.authenticator.cache().ttl().as_secs(),
            remote_validation = self.config.auth.remote_validation,
            "Credential verification ready"
        );
        info!(
            prediction = %self.config.prediction.url,
            identity = %self.config.identity.url,
            "Upstream services"
        );
        info!("============================================================");

        // Run server with graceful shutdown
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
            .await
            .map_err(|e| Error::Internal(e.to_string()));

        // Stop the sweeper even when serving failed before any signal
        let _ = shutdown_tx.send(());
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Verification sweeper ended abnormally");
        }

        self.conclude(served).await
    }

    /// Drain in-flight result writes, then hand back how serving ended.
    async fn conclude(&self, served: Result<()>) -> Result<()> {
        info!("Draining result writes...");
        let fanout = self.service.fanout();
        if tokio::time::timeout(self.config.server.shutdown_timeout, fanout.shutdown())
            .await
            .is_err()
        {
            warn!(pending = fanout.pending(), "Shutdown timeout reached with result writes in flight");
        }
        served
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
