//! End-to-end scenarios for the assignment engine and reconciliation.

#![allow(clippy::unwrap_used)]

use rollcall_core::prelude::*;
use rollcall_testing::fixtures::{RaidBuilder, flat_roster, team_roster, users};

fn u(id: &str) -> UserId {
    UserId::new(id)
}

fn tank_and_healer() -> RaidBuilder {
    RaidBuilder::new("r1")
        .slot("Tank", "🛡️", 1)
        .slot("Healer", "💚", 1)
        .slot("DPS", "⚔️", 3)
}

// ============================================================================
// Assignment
// ============================================================================

#[test]
fn second_assign_to_full_slot_is_rejected() {
    let mut record = tank_and_healer().build();

    let first = assignment::assign(&mut record, &u("a"), &Selector::parse("Tank")).unwrap();
    assert_eq!(first.kind, MutationKind::Assigned);

    let before = record.clone();
    for selector in [Selector::parse("Tank"), Selector::Position(1)] {
        let err = assignment::assign(&mut record, &u("b"), &selector).unwrap_err();
        assert_eq!(err.code(), "SLOT_FULL");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(record, before, "rejected assign must not touch the record");
    }
}

#[test]
fn reaction_path_redirects_to_waitlist() {
    let mut record = tank_and_healer().rostered(0, &["a"]).build();
    let joined = assignment::join(&mut record, &u("b"), &ReactionKey::new("🛡️")).unwrap();
    assert_eq!(joined.kind, MutationKind::Waitlisted { position: 1 });
    assert_eq!(record.waitlist_of(0), &[u("b")]);
}

#[test]
fn remove_promotes_head_of_waitlist() {
    let mut record = tank_and_healer()
        .rostered(0, &["a"])
        .waitlisted(0, &["c"])
        .build();
    let removed = assignment::remove(&mut record, &u("a"), &Selector::parse("tank")).unwrap();

    assert_eq!(record.users_of(0), &[u("c")]);
    assert!(record.waitlist_of(0).is_empty());
    assert_eq!(removed.promotions.len(), 1);
    assert_eq!(removed.promotions[0].user, u("c"));
}

#[test]
fn assign_moves_waitlisted_user() {
    let mut record = tank_and_healer()
        .rostered(1, &["h"])
        .waitlisted(1, &["a"])
        .build();
    let moved = assignment::assign(&mut record, &u("a"), &Selector::parse("DPS")).unwrap();

    assert!(record.waitlist_of(1).is_empty());
    assert_eq!(record.users_of(2), &[u("a")]);
    assert_eq!(
        moved.previous,
        Some(Placement {
            target: 1,
            waitlisted: true
        })
    );
    assert!(record.check_invariants().is_ok());
}

#[test]
fn ambiguous_label_is_a_hard_error() {
    let mut record = RaidBuilder::new("r1")
        .slot("Melee DPS", "⚔️", 2)
        .slot("Ranged DPS", "🏹", 2)
        .build();
    let before = record.clone();
    let err = assignment::assign(&mut record, &u("a"), &Selector::parse("dps")).unwrap_err();
    assert_eq!(err.code(), "AMBIGUOUS_SELECTOR");
    assert_eq!(record, before);
}

#[test]
fn moving_between_slots_promotes_the_vacated_one() {
    let mut record = tank_and_healer()
        .rostered(0, &["a"])
        .waitlisted(0, &["w"])
        .build();
    let moved = assignment::assign(&mut record, &u("a"), &Selector::parse("healer")).unwrap();
    assert_eq!(record.users_of(0), &[u("w")]);
    assert_eq!(record.users_of(1), &[u("a")]);
    assert_eq!(moved.promotions.len(), 1);
}

#[test]
fn team_assign_respects_record_ceiling() {
    let mut record = team_roster("t1", 2, &[("Team 1", 2, &["a"]), ("Team 2", 2, &["b"])], &[]);
    let err = assignment::assign(&mut record, &u("c"), &Selector::parse("team 2")).unwrap_err();
    assert_eq!(err.code(), "SLOT_FULL");

    // Moving between teams does not count against the ceiling twice.
    assignment::assign(&mut record, &u("a"), &Selector::parse("Team 2")).unwrap();
    assert_eq!(record.users_of(1), &[u("b"), u("a")]);
}

// ============================================================================
// Reconciliation
// ============================================================================

fn snapshot(entries: &[(&str, &[&str])]) -> MembershipSnapshot {
    let mut snapshot = MembershipSnapshot::new();
    for (key, ids) in entries {
        snapshot.observe(*key, users(ids));
    }
    snapshot
}

#[test]
fn round_trip_yields_no_changes() {
    let record = tank_and_healer()
        .rostered(0, &["a"])
        .waitlisted(0, &["b"])
        .rostered(2, &["c", "d"])
        .label(2, "c", "Rogue")
        .build();
    let observed = snapshot(&[("🛡️", &["a", "b"]), ("💚", &[]), ("⚔️", &["c", "d"])]);

    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert!(result.changes.is_empty(), "{:?}", result.changes);
    assert_eq!(result.record, record);
}

#[test]
fn lost_reaction_is_tolerated() {
    let record = tank_and_healer().rostered(0, &["a"]).build();
    let observed = snapshot(&[("🛡️", &[]), ("💚", &[]), ("⚔️", &[])]);

    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert_eq!(result.record.users_of(0), &[u("a")]);
    assert!(result.changes.is_empty());
}

#[test]
fn switch_moves_user() {
    let record = tank_and_healer().rostered(0, &["a"]).build();
    let observed = snapshot(&[("🛡️", &[]), ("💚", &["a"]), ("⚔️", &[])]);

    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert!(result.record.users_of(0).is_empty());
    assert_eq!(result.record.users_of(1), &[u("a")]);
    assert_eq!(result.changes.len(), 1);
    assert_eq!(result.changes[0].action, ChangeAction::Switched);
    assert_eq!(result.changes[0].slot, "Healer");
}

#[test]
fn multi_reaction_defers_to_stored_slot() {
    let record = tank_and_healer().rostered(1, &["a"]).build();
    let observed = snapshot(&[("🛡️", &["a"]), ("💚", &["a"]), ("⚔️", &[])]);

    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert!(result.record.users_of(0).is_empty());
    assert_eq!(result.record.users_of(1), &[u("a")]);
    assert_eq!(result.changes.len(), 1);
    assert_eq!(result.changes[0].action, ChangeAction::Deferred);
    assert_eq!(result.changes[0].slot, "Tank");
}

#[test]
fn multi_reaction_without_stored_slot_takes_first() {
    let record = tank_and_healer().build();
    let observed = snapshot(&[("🛡️", &["a"]), ("💚", &["a"]), ("⚔️", &[])]);

    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert_eq!(result.record.users_of(0), &[u("a")]);
    assert!(result.record.users_of(1).is_empty());
    assert_eq!(result.changes.len(), 1);
    assert_eq!(result.changes[0].action, ChangeAction::Ambiguous);
    assert!(result.record.check_invariants().is_ok());
}

#[test]
fn stored_waitlist_fills_before_new_arrivals() {
    let record = RaidBuilder::new("r1")
        .slot("DPS", "⚔️", 2)
        .rostered(0, &["a"])
        .waitlisted(0, &["w1", "w2"])
        .build();
    // `a` reacts nowhere and keeps the seat.
    let observed = snapshot(&[("⚔️", &["new", "w2", "w1"])]);

    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert_eq!(result.record.users_of(0), &[u("a"), u("w1")]);
    assert_eq!(result.record.waitlist_of(0), &[u("w2"), u("new")]);
    let actions: Vec<_> = result.changes.iter().map(|c| (c.user.clone(), c.action)).collect();
    assert_eq!(
        actions,
        vec![
            (u("w1"), ChangeAction::Promoted),
            (u("new"), ChangeAction::Waitlisted),
        ]
    );
}

#[test]
fn labels_follow_only_users_who_stay() {
    let record = tank_and_healer()
        .rostered(0, &["a"])
        .label(0, "a", "Paladin")
        .build();
    let observed = snapshot(&[("🛡️", &[]), ("💚", &["a"]), ("⚔️", &[])]);
    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert_eq!(result.record.label_of(&u("a")), None);
}

#[test]
fn flat_roster_merges_observed_and_stored() {
    let record = flat_roster("f1", 2, &["a"], &["w"]);
    let observed = snapshot(&[("✅", &["x", "a", "y"])]);

    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert_eq!(result.record.users_of(0), &[u("a"), u("w")]);
    assert_eq!(result.record.waitlist_of(0), &[u("x"), u("y")]);
    assert!(result.record.check_invariants().is_ok());
}

#[test]
fn team_roster_fills_first_team_with_room() {
    let record = team_roster("t1", 3, &[("Team 1", 2, &["a"]), ("Team 2", 2, &[])], &[]);
    let observed = snapshot(&[("✅", &["a", "b", "c", "d"])]);

    let result = reconcile(&record, &observed, &ReconcileOptions::default());
    assert_eq!(result.record.users_of(0), &[u("a"), u("b")]);
    assert_eq!(result.record.users_of(1), &[u("c")]);
    assert_eq!(result.record.waitlist_of(0), &[u("d")]);
    assert!(result.record.check_invariants().is_ok());
}
