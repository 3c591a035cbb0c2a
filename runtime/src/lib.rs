//! # Rollcall Runtime
//!
//! The imperative shell around [`rollcall_core`].
//!
//! ## Components
//!
//! - **Record store** ([`store`]): cached, write-through persistence with
//!   deferred batches and degraded-durability reporting
//! - **Command service** ([`service`]): runs the lifecycle reducer and
//!   delivers its effects
//! - **Reconciler** ([`reconciler`]): converges stored records with live
//!   reaction membership at startup and on demand
//! - **Recovery scanner** ([`recovery`]): rebuilds lost records from
//!   rendered posts in the background
//! - **File backend** ([`file_backend`]): JSON files with atomic replace and
//!   a one-version backup
//! - **Engine** ([`engine`]): wires it all together from an [`EngineConfig`]
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_runtime::{Engine, EngineConfig, JsonFileBackend};
//!
//! let config = EngineConfig::from_env()?;
//! rollcall_runtime::telemetry::init_tracing(&config.observability);
//! let backend = Arc::new(JsonFileBackend::open(&config.store.data_dir)?);
//! let engine = Engine::start(&config, backend, platform, Arc::new(SystemClock)).await?;
//!
//! engine.service().assign(&raid_id, user, Selector::parse("tank")).await?;
//! engine.shutdown().await;
//! ```

pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod file_backend;
pub mod health;
pub mod metrics;
pub mod reconciler;
pub mod recovery;
pub mod service;
pub mod store;
pub mod telemetry;

pub use config::EngineConfig;
pub use effects::Collaborators;
pub use engine::{Engine, Platform};
pub use error::{ConfigError, ReconcileError, ServiceError, StartupError};
pub use file_backend::JsonFileBackend;
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use reconciler::{ReconcileReport, Reconciler, ReconcilerSettings, RecordOutcome};
pub use recovery::{ChannelRef, RecoveryReport, RecoveryScanner};
pub use service::SignupService;
pub use store::{FlushReport, Persist, RecordStore};
