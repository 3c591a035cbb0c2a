//! Rebuilding lost records from rendered posts.

#![allow(clippy::unwrap_used)]

mod common;

use common::store;
use rollcall_core::prelude::*;
use rollcall_core::render::render_text;
use rollcall_runtime::config::RecoveryConfig;
use rollcall_runtime::{ChannelRef, Persist, RecoveryScanner};
use rollcall_testing::fixtures::{RaidBuilder, flat_roster, post_for};
use rollcall_testing::{StubChannelHistory, init_test_tracing, test_clock};
use std::sync::Arc;
use std::time::Duration;

fn raid(id: &str) -> EventRecord {
    RaidBuilder::new(id)
        .slot("Tank", "🛡️", 2)
        .slot("Healer", "💚", 1)
        .rostered(0, &["111", "222"])
        .label(0, "222", "Paladin")
        .waitlisted(0, &["333"])
        .rostered(1, &["444"])
        .build()
}

fn channel() -> ChannelRef {
    ChannelRef::new("g1", "c1")
}

fn scanner(
    store: &Arc<rollcall_runtime::RecordStore>,
    history: &StubChannelHistory,
) -> RecoveryScanner {
    RecoveryScanner::new(
        Arc::clone(store),
        Arc::new(history.clone()),
        Arc::new(test_clock()),
        &RecoveryConfig::default(),
    )
}

#[tokio::test]
async fn lost_record_is_rebuilt_from_its_post() {
    init_test_tracing();
    let (backend, store) = store(3);
    let history = StubChannelHistory::new();
    let lost = raid("r1");
    history.push(lost.post.clone(), render_text(&lost));

    let report = scanner(&store, &history).scan(&[channel()]).await;

    assert_eq!(report.recovered, 1);
    assert_eq!(store.get(&lost.id).await.unwrap(), lost);
    assert_eq!(backend.stored(&lost.id).unwrap(), lost);
}

#[tokio::test]
async fn existing_records_and_foreign_posts_are_left_alone() {
    let (_backend, store) = store(3);
    let history = StubChannelHistory::new();

    let mut known = raid("known");
    history.push(known.post.clone(), render_text(&known));
    known.title = "Edited since the post was rendered".into();
    store.set(known.clone(), Persist::WriteThrough).await;

    history.push(post_for("chatter"), "anyone up for raid tonight?");
    let flat = flat_roster("f1", 4, &["9"], &[]);
    history.push(flat.post.clone(), render_text(&flat));

    let report = scanner(&store, &history).scan(&[channel()]).await;

    assert_eq!(report.channels, 1);
    assert_eq!(report.posts, 3);
    assert_eq!(report.unmarked, 1);
    assert_eq!(report.existing, 1);
    assert_eq!(report.recovered, 1);
    assert_eq!(store.get(&known.id).await.unwrap(), known);
    assert_eq!(store.get(&flat.id).await.unwrap(), flat);
}

#[tokio::test]
async fn closed_post_comes_back_already_finalized() {
    let (_backend, store) = store(3);
    let history = StubChannelHistory::new();
    let mut closed = raid("r1");
    closed.status = RecordStatus::Closed;
    history.push(closed.post.clone(), render_text(&closed));

    scanner(&store, &history).scan(&[channel()]).await;

    let recovered = store.get(&closed.id).await.unwrap();
    assert_eq!(recovered.status, RecordStatus::Closed);
    assert!(recovered.stats_finalized);
}

#[tokio::test]
async fn mangled_post_is_counted_not_stored() {
    let (_backend, store) = store(3);
    let history = StubChannelHistory::new();
    let record = raid("r1");
    let mangled = render_text(&record).replace("(2/2)", "(2/two)");
    history.push(record.post.clone(), mangled);

    let report = scanner(&store, &history).scan(&[channel()]).await;

    assert_eq!(report.unparsable, 1);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn history_limit_bounds_the_scan() {
    let (_backend, store) = store(3);
    let history = StubChannelHistory::new();
    for n in 0..5 {
        let record = raid(&format!("r{n}"));
        history.push(record.post.clone(), render_text(&record));
    }
    let config = RecoveryConfig {
        history_limit: 2,
        ..RecoveryConfig::default()
    };
    let scanner = RecoveryScanner::new(
        Arc::clone(&store),
        Arc::new(history),
        Arc::new(test_clock()),
        &config,
    );

    let report = scanner.scan(&[channel()]).await;

    assert_eq!(report.posts, 2);
    assert!(store.contains(&RecordId::new("r4")).await, "newest first");
    assert!(store.contains(&RecordId::new("r3")).await);
    assert!(!store.contains(&RecordId::new("r0")).await);
}

#[tokio::test]
async fn background_scan_reports_when_done() {
    let (_backend, store) = store(3);
    let history = StubChannelHistory::new();
    let record = raid("r1");
    history.push(record.post.clone(), render_text(&record));

    let handle = Arc::new(scanner(&store, &history)).spawn(vec![channel()]);
    let report = handle.await.unwrap().unwrap();

    assert_eq!(report.recovered, 1);
}

#[tokio::test]
async fn background_scan_gives_up_at_the_deadline() {
    let (_backend, store) = store(3);
    let history = StubChannelHistory::new().with_delay(Duration::from_secs(60));
    let record = raid("r1");
    history.push(record.post.clone(), render_text(&record));

    let scanner = scanner(&store, &history).with_timeout(Duration::from_millis(50));
    let report = Arc::new(scanner).spawn(vec![channel()]).await.unwrap();

    assert!(report.is_none());
    assert!(store.is_empty().await);
}
