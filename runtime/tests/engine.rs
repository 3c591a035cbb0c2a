//! Engine lifecycle: startup reconciliation, recovery, health, shutdown.

#![allow(clippy::unwrap_used)]

mod common;

use common::Recorders;
use rollcall_core::prelude::*;
use rollcall_core::render::render_text;
use rollcall_runtime::{
    ChannelRef, Engine, EngineConfig, HealthStatus, JsonFileBackend, Platform, StartupError,
};
use rollcall_testing::fixtures::{RaidBuilder, users};
use rollcall_testing::{InMemoryBackend, StubChannelHistory, StubMembershipSource, test_clock};
use std::sync::Arc;

fn u(id: &str) -> UserId {
    UserId::new(id)
}

fn raid(id: &str) -> EventRecord {
    RaidBuilder::new(id)
        .slot("Tank", "🛡️", 1)
        .slot("Healer", "💚", 2)
        .rostered(0, &["a"])
        .build()
}

struct Fixture {
    membership: StubMembershipSource,
    history: StubChannelHistory,
    recorders: Recorders,
}

impl Fixture {
    fn new() -> Self {
        Self {
            membership: StubMembershipSource::new(),
            history: StubChannelHistory::new(),
            recorders: Recorders::default(),
        }
    }

    fn platform(&self) -> Platform {
        Platform {
            membership: Arc::new(self.membership.clone()),
            history: Arc::new(self.history.clone()),
            collaborators: self.recorders.collaborators(),
        }
    }
}

#[tokio::test]
async fn startup_reconciles_before_commands_are_served() {
    let record = raid("r1");
    let backend = InMemoryBackend::with_records([record.clone()]);
    let fixture = Fixture::new();
    fixture.membership.set_members(&record.post, "🛡️", users(&["a"]));
    fixture.membership.set_members(&record.post, "💚", users(&["offline-join"]));

    let engine = Engine::start(
        &EngineConfig::default(),
        Arc::new(backend.clone()),
        fixture.platform(),
        Arc::new(test_clock()),
    )
    .await
    .unwrap();

    assert_eq!(engine.startup_report().updated, 1);
    let served = engine.service().get(&record.id).await.unwrap();
    assert_eq!(served.users_of(1), &[u("offline-join")]);
    assert_eq!(backend.stored(&record.id).unwrap(), served);
}

#[tokio::test]
async fn commands_flow_through_a_started_engine() {
    let record = raid("r1");
    let backend = InMemoryBackend::with_records([record.clone()]);
    let fixture = Fixture::new();
    fixture.membership.set_members(&record.post, "🛡️", users(&["a"]));

    let engine = Engine::start(
        &EngineConfig::default(),
        Arc::new(backend.clone()),
        fixture.platform(),
        Arc::new(test_clock()),
    )
    .await
    .unwrap();

    engine
        .service()
        .reaction_added(&record.id, u("b"), ReactionKey::new("🛡️"))
        .await
        .unwrap();
    engine
        .service()
        .reaction_removed(&record.id, u("a"), ReactionKey::new("🛡️"))
        .await
        .unwrap();

    assert_eq!(backend.stored(&record.id).unwrap().users_of(0), &[u("b")]);
    assert_eq!(fixture.recorders.audit.promotions().len(), 1);
}

#[tokio::test]
async fn shutdown_flushes_what_failed_to_persist() {
    let record = raid("r1");
    let backend = InMemoryBackend::with_records([record.clone()]);
    let fixture = Fixture::new();
    fixture.membership.set_members(&record.post, "🛡️", users(&["a"]));
    let engine = Engine::start(
        &EngineConfig::default(),
        Arc::new(backend.clone()),
        fixture.platform(),
        Arc::new(test_clock()),
    )
    .await
    .unwrap();

    backend.fail_writes(true);
    for user in ["h1", "h2"] {
        engine
            .service()
            .assign(&record.id, u(user), Selector::parse("healer"))
            .await
            .unwrap();
    }
    backend.fail_writes(false);

    let report = engine.shutdown().await;

    assert_eq!(report.written, 1);
    assert_eq!(
        backend.stored(&record.id).unwrap().users_of(1),
        &[u("h1"), u("h2")]
    );
}

#[tokio::test]
async fn health_degrades_with_persistence_failures() {
    let record = raid("r1");
    let backend = InMemoryBackend::with_records([record.clone()]);
    let fixture = Fixture::new();
    fixture.membership.set_members(&record.post, "🛡️", users(&["a"]));
    let mut config = EngineConfig::default();
    config.store.persistence_alert_threshold = 1;
    let engine = Engine::start(
        &config,
        Arc::new(backend.clone()),
        fixture.platform(),
        Arc::new(test_clock()),
    )
    .await
    .unwrap();
    assert_eq!(engine.health().await.status, HealthStatus::Healthy);

    backend.fail_writes(true);
    engine
        .service()
        .assign(&record.id, u("h"), Selector::parse("2"))
        .await
        .unwrap();

    let health = engine.health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.check("store").unwrap().status, HealthStatus::Degraded);
    assert_eq!(health.check("reconciler").unwrap().status, HealthStatus::Healthy);
}

#[tokio::test]
async fn background_recovery_restores_lost_records() {
    let lost = raid("lost");
    let fixture = Fixture::new();
    fixture.history.push(lost.post.clone(), render_text(&lost));
    let mut engine = Engine::start(
        &EngineConfig::default(),
        Arc::new(InMemoryBackend::new()),
        fixture.platform(),
        Arc::new(test_clock()),
    )
    .await
    .unwrap();

    engine.spawn_recovery(vec![ChannelRef::new("g1", "c1")]);
    let report = engine.join_recovery().await.unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(engine.service().get(&lost.id).await.unwrap(), lost);
    assert!(engine.join_recovery().await.is_none());
}

#[tokio::test]
async fn invalid_config_refuses_to_start() {
    let mut config = EngineConfig::default();
    config.reconcile.membership_concurrency = 0;

    let result = Engine::start(
        &config,
        Arc::new(InMemoryBackend::new()),
        Fixture::new().platform(),
        Arc::new(test_clock()),
    )
    .await;

    assert!(matches!(result, Err(StartupError::Config(_))));
}

#[tokio::test]
async fn file_backend_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    let record = raid("r1");
    fixture.membership.set_members(&record.post, "🛡️", users(&["a"]));

    let engine = Engine::start(
        &EngineConfig::default(),
        Arc::new(JsonFileBackend::open(dir.path()).unwrap()),
        fixture.platform(),
        Arc::new(test_clock()),
    )
    .await
    .unwrap();
    engine.service().create(record.clone()).await.unwrap();
    engine
        .service()
        .close(&record.id, None, Some("full".into()))
        .await
        .unwrap();
    engine.shutdown().await;

    let restarted = Engine::start(
        &EngineConfig::default(),
        Arc::new(JsonFileBackend::open(dir.path()).unwrap()),
        fixture.platform(),
        Arc::new(test_clock()),
    )
    .await
    .unwrap();

    let reloaded = restarted.service().get(&record.id).await.unwrap();
    assert_eq!(reloaded.status, RecordStatus::Closed);
    assert!(reloaded.stats_finalized);
    assert_eq!(restarted.startup_report().closed, 1);
    assert_eq!(fixture.recorders.stats.finalized_count(&record.id), 1);
}
