//! Engine bootstrap and teardown.
//!
//! Startup order matters: the store is warmed from the backend, every record
//! is reconciled against live membership, and only then is the command
//! service handed out. Recovery scans are started separately and run in the
//! background.

use crate::config::EngineConfig;
use crate::effects::Collaborators;
use crate::error::StartupError;
use crate::health::HealthReport;
use crate::metrics::MetricsServer;
use crate::reconciler::{ReconcileReport, Reconciler, ReconcilerSettings};
use crate::recovery::{ChannelRef, RecoveryReport, RecoveryScanner};
use crate::service::SignupService;
use crate::store::{FlushReport, RecordStore};
use rollcall_core::backend::RecordBackend;
use rollcall_core::environment::Clock;
use rollcall_core::platform::{ChannelHistory, MembershipSource};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Everything on the platform side the engine talks to.
#[derive(Clone)]
pub struct Platform {
    /// Live reaction membership
    pub membership: Arc<dyn MembershipSource>,
    /// Channel history for recovery scans
    pub history: Arc<dyn ChannelHistory>,
    /// Effect targets
    pub collaborators: Collaborators,
}

/// A running signup engine.
pub struct Engine {
    store: Arc<RecordStore>,
    service: SignupService,
    reconciler: Reconciler,
    scanner: Arc<RecoveryScanner>,
    startup: ReconcileReport,
    metrics: Option<MetricsServer>,
    recovery: Option<JoinHandle<Option<RecoveryReport>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("startup", &self.startup)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Load, reconcile and return a ready engine.
    ///
    /// # Errors
    ///
    /// - [`StartupError::Config`] for an invalid configuration
    /// - [`StartupError::Storage`] if the backend cannot be listed
    /// - [`StartupError::Metrics`] if the exporter cannot be installed
    pub async fn start(
        config: &EngineConfig,
        backend: Arc<dyn RecordBackend>,
        platform: Platform,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let metrics = match config.observability.metrics_addr {
            Some(addr) => {
                let mut server = MetricsServer::new(addr);
                server.start()?;
                Some(server)
            },
            None => None,
        };

        let store = Arc::new(
            RecordStore::load(backend, config.store.persistence_alert_threshold).await?,
        );
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            platform.membership,
            platform.collaborators.clone(),
            ReconcilerSettings::from(&config.reconcile),
        );
        let startup = reconciler.reconcile_all().await;

        let service = SignupService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            platform.collaborators,
        );
        let scanner = Arc::new(RecoveryScanner::new(
            Arc::clone(&store),
            platform.history,
            clock,
            &config.recovery,
        ));

        tracing::info!(
            records = store.len().await,
            reconciled = startup.updated,
            purged = startup.purged,
            "Engine ready"
        );

        Ok(Self {
            store,
            service,
            reconciler,
            scanner,
            startup,
            metrics,
            recovery: None,
        })
    }

    /// The command surface
    #[must_use]
    pub const fn service(&self) -> &SignupService {
        &self.service
    }

    /// The reconciler, for opportunistic resyncs
    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// What the startup pass did
    #[must_use]
    pub const fn startup_report(&self) -> &ReconcileReport {
        &self.startup
    }

    /// Prometheus scrape text, if an exporter was configured
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().and_then(MetricsServer::render)
    }

    /// Start a background recovery scan over `channels`.
    ///
    /// A scan already running keeps running; the new one replaces its
    /// handle.
    pub fn spawn_recovery(&mut self, channels: Vec<ChannelRef>) {
        self.recovery = Some(Arc::clone(&self.scanner).spawn(channels));
    }

    /// Wait for the latest recovery scan. `None` if none was started, it
    /// timed out, or its task failed.
    pub async fn join_recovery(&mut self) -> Option<RecoveryReport> {
        match self.recovery.take()?.await {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!(%error, "Recovery task failed");
                None
            },
        }
    }

    /// Health of the store and the reconciler.
    pub async fn health(&self) -> HealthReport {
        HealthReport::new(vec![self.store.health().await, self.reconciler.health()])
    }

    /// Stop background work and flush the store.
    pub async fn shutdown(mut self) -> FlushReport {
        if let Some(task) = self.recovery.take() {
            task.abort();
        }
        self.store.shutdown().await
    }
}
