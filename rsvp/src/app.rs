//! Application wiring and lifecycle.
//!
//! 1. **Startup**: build stores, the M-Pesa client and the services
//! 2. **Runtime**: serve HTTP and run the background loops
//!    (payment sweep, projection repair)
//! 3. **Shutdown**: on Ctrl+C or SIGTERM stop accepting connections,
//!    broadcast shutdown to the loops and wait for them to finish

use crate::config::{Config, ReconciliationConfig};
use crate::consistency::ProjectionSync;
use crate::coordinator::RegistrationCoordinator;
use crate::identity::StaticTokenIdentity;
use crate::notifier::LogNotifier;
use crate::reconciliation::ReconciliationEngine;
use crate::retry::RetryPolicy;
use crate::server::{AppState, build_router};
use crate::store::{InMemoryEventStore, InMemoryProjectionStore, InMemorySessionStore};
use metrics_exporter_prometheus::PrometheusHandle;
use rsvp_core::{
    Clock, EventStore, IdentityProvider, Notifier, PaymentGateway, PaymentSessionStore,
    SystemClock, UserProjectionStore,
};
use rsvp_mpesa::{MpesaClient, MpesaError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// How often queued projection repairs are checked for being due
const RETRY_TICK: Duration = Duration::from_secs(1);

/// Start-up and serving failures.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or migration failed
    #[error("database error: {0}")]
    Database(String),

    /// The M-Pesa client could not be built
    #[error("payment gateway error: {0}")]
    Gateway(#[from] MpesaError),

    /// Binding or serving failed
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage backends.
#[derive(Clone)]
pub struct Stores {
    /// Authoritative event ledger
    pub events: Arc<dyn EventStore>,
    /// Per-user projection
    pub projections: Arc<dyn UserProjectionStore>,
    /// Payment sessions
    pub sessions: Arc<dyn PaymentSessionStore>,
}

impl Stores {
    /// Process-local stores; state is lost on restart.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new()),
            projections: Arc::new(InMemoryProjectionStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
        }
    }

    /// `PostgreSQL` stores sharing one pool, with migrations applied.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Database`] if the pool cannot connect or a
    /// migration fails.
    #[cfg(feature = "postgres")]
    pub async fn postgres(url: &str, max_connections: u32) -> Result<Self, AppError> {
        use crate::store::{PostgresEventStore, PostgresProjectionStore, PostgresSessionStore};

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Self {
            events: Arc::new(PostgresEventStore::new(pool.clone())),
            projections: Arc::new(PostgresProjectionStore::new(pool.clone())),
            sessions: Arc::new(PostgresSessionStore::new(pool)),
        })
    }

    /// Stores selected by configuration: `PostgreSQL` when `DATABASE_URL` is
    /// set, in-memory otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if the database is unreachable, or if a
    /// `DATABASE_URL` is set in a build without the `postgres` feature.
    pub async fn from_config(config: &Config) -> Result<Self, AppError> {
        match config.database.url.as_deref() {
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                Ok(Self::in_memory())
            }
            #[cfg(feature = "postgres")]
            Some(url) => {
                let stores = Self::postgres(url, config.database.max_connections).await?;
                tracing::info!("Connected to PostgreSQL");
                Ok(stores)
            }
            #[cfg(not(feature = "postgres"))]
            Some(_) => Err(AppError::Config(
                "DATABASE_URL is set but this build lacks the `postgres` feature".to_string(),
            )),
        }
    }
}

/// The wired-up services.
#[derive(Clone)]
pub struct Services {
    /// Storage backends
    pub stores: Stores,
    /// Registration and cancellation
    pub coordinator: Arc<RegistrationCoordinator>,
    /// Payment reconciliation
    pub reconciliation: Arc<ReconciliationEngine>,
    /// Projection consistency
    pub sync: Arc<ProjectionSync>,
    /// Bearer token resolution
    pub identity: Arc<dyn IdentityProvider>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Wire the services over the given collaborators.
    #[must_use]
    pub fn new(
        stores: Stores,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        reconciliation: &ReconciliationConfig,
    ) -> Self {
        let sync = Arc::new(ProjectionSync::new(
            stores.events.clone(),
            stores.projections.clone(),
            clock.clone(),
            RetryPolicy::default(),
        ));
        let coordinator = Arc::new(RegistrationCoordinator::new(
            stores.events.clone(),
            stores.sessions.clone(),
            gateway.clone(),
            sync.clone(),
            clock.clone(),
        ));
        let (query_after, hard_deadline) = reconciliation.windows();
        let engine = ReconciliationEngine::new(
            stores.events.clone(),
            stores.sessions.clone(),
            gateway,
            notifier,
            sync.clone(),
            clock.clone(),
        )
        .with_windows(query_after, hard_deadline);

        Self {
            stores,
            coordinator,
            reconciliation: Arc::new(engine),
            sync,
            identity,
            clock,
        }
    }

    /// HTTP handler state
    #[must_use]
    pub fn app_state(&self, metrics: Option<PrometheusHandle>) -> AppState {
        AppState {
            coordinator: self.coordinator.clone(),
            reconciliation: self.reconciliation.clone(),
            events: self.stores.events.clone(),
            projections: self.stores.projections.clone(),
            identity: self.identity.clone(),
            clock: self.clock.clone(),
            metrics,
        }
    }

    /// Spawn the payment sweep and projection repair loops.
    ///
    /// Both run their first pass immediately, which also repairs whatever a
    /// previous process left diverged.
    #[must_use]
    pub fn spawn_background(
        &self,
        config: &ReconciliationConfig,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(payment_sweep_loop(
                self.reconciliation.clone(),
                config.poll_every(),
                shutdown.subscribe(),
            )),
            tokio::spawn(repair_loop(
                self.sync.clone(),
                config.repair_every(),
                shutdown.subscribe(),
            )),
        ]
    }
}

async fn payment_sweep_loop(
    engine: Arc<ReconciliationEngine>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(interval = ?every, "Payment sweep started");
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Payment sweep received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                if let Err(error) = engine.sweep().await {
                    tracing::error!(%error, "Payment sweep failed");
                }
                if let Err(error) = engine.release_orphans().await {
                    tracing::error!(%error, "Orphan sweep failed");
                }
            }
        }
    }
}

async fn repair_loop(sync: Arc<ProjectionSync>, every: Duration, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!(interval = ?every, "Projection repair started");
    let mut retry_ticker = interval(RETRY_TICK);
    retry_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut repair_ticker = interval(every);
    repair_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Projection repair received shutdown signal");
                break;
            }
            _ = retry_ticker.tick() => {
                let report = sync.drain_retries().await;
                if report != crate::consistency::DrainReport::default() {
                    tracing::debug!(?report, "Projection retries drained");
                }
            }
            _ = repair_ticker.tick() => {
                match sync.repair_all().await {
                    Ok(report) if report.repaired > 0 || report.failed > 0 => {
                        tracing::info!(?report, "Projection repair sweep complete");
                    }
                    Ok(_) => {}
                    Err(error) => tracing::error!(%error, "Projection repair sweep failed"),
                }
            }
        }
    }
}

/// Build the services from configuration and serve until shutdown.
///
/// # Errors
///
/// Returns [`AppError`] if start-up fails or the listener cannot be bound.
pub async fn run(config: Config, metrics: Option<PrometheusHandle>) -> Result<(), AppError> {
    let stores = Stores::from_config(&config).await?;

    if !config.mpesa.has_credentials() {
        tracing::warn!("M-Pesa credentials missing, paid registrations will fail to initiate");
    }
    let gateway = MpesaClient::new(config.mpesa.client_config())?;
    tracing::info!(
        base_url = %config.mpesa.base_url,
        callback_url = %config.mpesa.callback_url(),
        "M-Pesa client ready"
    );

    let identity = StaticTokenIdentity::parse(&config.auth.tokens)
        .map_err(|e| AppError::Config(e.to_string()))?;
    if identity.is_empty() {
        tracing::warn!("AUTH_TOKENS is empty, every authenticated request will be refused");
    }

    let services = Services::new(
        stores,
        Arc::new(gateway),
        Arc::new(LogNotifier),
        Arc::new(identity),
        Arc::new(SystemClock),
        &config.reconciliation,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = services.spawn_background(&config.reconciliation, &shutdown_tx);

    let router = build_router(services.app_state(metrics));
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!(address = %config.bind_address(), "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, stopping background tasks");
    let _ = shutdown_tx.send(());
    await_shutdown(handles, Duration::from_secs(config.server.shutdown_timeout)).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn await_shutdown(handles: Vec<JoinHandle<()>>, timeout: Duration) {
    for (idx, handle) in handles.into_iter().enumerate() {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => tracing::info!(task = idx, "Background task stopped gracefully"),
            Ok(Err(e)) => tracing::warn!(task = idx, error = %e, "Background task failed"),
            Err(_) => tracing::warn!(task = idx, "Background task shutdown timed out"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        }
    }
}
