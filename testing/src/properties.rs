//! Property-based testing utilities.
//!
//! proptest strategies for commands and reaction snapshots. The plain
//! [`command`] and [`snapshot`] target the standard raid
//! ([`crate::fixtures::standard_raid`]); the `single_key_*` variants target
//! flat and team rosters, which share one reaction key.

use proptest::prelude::*;
use rollcall_core::ids::{ReactionKey, UserId};
use rollcall_core::lifecycle::SignupAction;
use rollcall_core::reconcile::MembershipSnapshot;
use rollcall_core::selector::Selector;

/// Reaction keys of the standard raid, in declared order.
pub const STANDARD_KEYS: [&str; 4] = ["🛡️", "💚", "⚔️", "🏹"];

/// The one reaction key of flat and team rosters built by the fixtures.
pub const ROSTER_KEY: &str = "✅";

/// One of a small pool of users, so commands collide often.
pub fn user() -> impl Strategy<Value = UserId> {
    (0u8..8).prop_map(|n| UserId::new(format!("u{n}")))
}

/// A selector that usually resolves, sometimes out of range or ambiguous.
pub fn selector() -> impl Strategy<Value = Selector> {
    prop_oneof![
        (0usize..6).prop_map(Selector::Position),
        Just(Selector::Label("tank".into())),
        Just(Selector::Label("heal".into())),
        Just(Selector::Label("dps".into())),
        Just(Selector::Label("melee".into())),
        Just(Selector::Label("🏹".into())),
    ]
}

/// A reaction key of the standard raid.
pub fn key() -> impl Strategy<Value = ReactionKey> {
    prop::sample::select(STANDARD_KEYS.to_vec()).prop_map(ReactionKey::new)
}

/// A selector for a flat or team roster: team positions, team names, the
/// shared key, and the ambiguous "team" prefix.
pub fn single_key_selector() -> impl Strategy<Value = Selector> {
    prop_oneof![
        (0usize..4).prop_map(Selector::Position),
        Just(Selector::Label("team".into())),
        Just(Selector::Label("team 1".into())),
        Just(Selector::Label("team 2".into())),
        Just(Selector::Label(ROSTER_KEY.into())),
    ]
}

fn commands_over(
    selector: BoxedStrategy<Selector>,
    key: BoxedStrategy<ReactionKey>,
) -> impl Strategy<Value = SignupAction> {
    prop_oneof![
        (user(), selector.clone()).prop_map(|(user, selector)| SignupAction::Assign { user, selector }),
        (user(), selector.clone()).prop_map(|(user, selector)| SignupAction::Remove { user, selector }),
        (user(), selector).prop_map(|(user, selector)| SignupAction::Waitlist { user, selector }),
        (user(), key.clone()).prop_map(|(user, key)| SignupAction::Join { user, key }),
        (user(), key).prop_map(|(user, key)| SignupAction::Leave { user, key }),
    ]
}

/// Any signup command except close/reopen.
pub fn command() -> impl Strategy<Value = SignupAction> {
    commands_over(selector().boxed(), key().boxed())
}

/// Any signup command except close/reopen, against a flat or team roster.
pub fn single_key_command() -> impl Strategy<Value = SignupAction> {
    commands_over(
        single_key_selector().boxed(),
        Just(ReactionKey::new(ROSTER_KEY)).boxed(),
    )
}

fn snapshot_over(keys: &'static [&'static str]) -> impl Strategy<Value = MembershipSnapshot> {
    prop::collection::vec(
        prop::option::weighted(0.9, prop::collection::vec(user(), 0..6)),
        keys.len(),
    )
    .prop_map(move |observations| {
        let mut snapshot = MembershipSnapshot::new();
        for (key, observed) in keys.iter().zip(observations) {
            match observed {
                Some(users) => snapshot.observe(*key, users),
                None => snapshot.mark_unavailable(*key),
            }
        }
        snapshot
    })
}

/// A snapshot over the standard raid's keys: each key is either observed
/// with a subset of the user pool, or unavailable.
pub fn snapshot() -> impl Strategy<Value = MembershipSnapshot> {
    snapshot_over(&STANDARD_KEYS)
}

/// A snapshot of the shared roster key, observed or unavailable.
pub fn single_key_snapshot() -> impl Strategy<Value = MembershipSnapshot> {
    snapshot_over(&[ROSTER_KEY])
}
