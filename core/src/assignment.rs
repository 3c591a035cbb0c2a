//! Capacity & assignment engine.
//!
//! Every operation keeps the roster invariants:
//!
//! 1. a user is on at most one roster in the record
//! 2. no roster exceeds its capacity
//! 3. nobody is on a roster and on the waitlist serving it at the same time
//!
//! Moves are built from two primitives, [`detach_from_all`] and [`attach`].
//! Validation happens before either runs, so a rejected command leaves the
//! record untouched. Any roster seat freed by a command is refilled from its
//! waitlist before the command returns.

use crate::error::SignupError;
use crate::ids::{ReactionKey, UserId};
use crate::promotion::{Promotion, promote_vacated};
use crate::record::{EventRecord, Placement, Roster};
use crate::selector::{Selector, SlotIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What a command did to the acting user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Placed on a roster
    Assigned,
    /// Taken off a roster
    Removed,
    /// Appended to a waitlist (1-based queue position)
    Waitlisted {
        /// Queue position after the append
        position: usize,
    },
    /// Taken off a waitlist
    Unqueued,
    /// Auxiliary label changed
    Labeled,
    /// Nothing to do (idempotent reaction replay)
    Unchanged,
}

/// Result of a successful assignment-engine call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Acting user
    pub user: UserId,
    /// Target index touched
    pub target: usize,
    /// Display name of that target
    pub slot: String,
    /// What happened
    pub kind: MutationKind,
    /// Where the user was before
    pub previous: Option<Placement>,
    /// Who moved up off a waitlist as a consequence
    pub promotions: Vec<Promotion>,
}

/// Targets a user was taken out of by [`detach_from_all`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Detached {
    /// Rosters that lost the user (candidates for promotion)
    pub vacated: Vec<usize>,
    /// Waitlists that lost the user
    pub dequeued: Vec<usize>,
}

impl Detached {
    /// `true` if the user was nowhere
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vacated.is_empty() && self.dequeued.is_empty()
    }
}

// ============================================================================
// Primitives
// ============================================================================

/// Remove a user from every roster and waitlist in the record.
///
/// Does not promote; callers decide when vacated seats are refilled.
pub fn detach_from_all(record: &mut EventRecord, user: &UserId) -> Detached {
    let mut detached = Detached::default();
    for target in 0..record.target_count() {
        if let Some(users) = record.users_mut(target) {
            let before = users.len();
            users.retain(|u| u != user);
            if users.len() != before {
                detached.vacated.push(target);
            }
        }
    }

    let queues: Vec<usize> = match &record.roster {
        Roster::Roles(slots) => (0..slots.len()).collect(),
        Roster::Flat(_) | Roster::Teams(_) => vec![0],
    };
    for target in queues {
        if let Some(waitlist) = record.waitlist_mut(target) {
            let before = waitlist.len();
            waitlist.retain(|u| u != user);
            if waitlist.len() != before {
                detached.dequeued.push(target);
            }
        }
    }
    detached
}

/// Append a (detached) user to a roster.
///
/// # Errors
///
/// - [`SignupError::AlreadyAssigned`] if the user is already on that roster
/// - [`SignupError::SlotFull`] if the target or the record-wide ceiling is full
/// - [`SignupError::SlotNotFound`] for an unknown target index
pub fn attach(record: &mut EventRecord, user: &UserId, target: usize) -> Result<(), SignupError> {
    if target >= record.target_count() {
        return Err(SignupError::SlotNotFound {
            selector: format!("#{}", target + 1),
        });
    }
    if record.users_of(target).contains(user) {
        return Err(already_assigned(record, user, target));
    }
    if !record.has_room(target) {
        return Err(slot_full(record, target));
    }
    if let Some(users) = record.users_mut(target) {
        users.push(user.clone());
    }
    Ok(())
}

/// Drop labels for users who no longer occupy the slot they were set on.
pub fn prune_labels(record: &mut EventRecord) {
    match &mut record.roster {
        Roster::Roles(slots) => {
            for slot in slots {
                let present: HashSet<UserId> = slot
                    .users
                    .iter()
                    .chain(slot.waitlist.iter())
                    .cloned()
                    .collect();
                slot.labels.retain(|user, _| present.contains(user));
            }
        },
        Roster::Flat(flat) => {
            let present: HashSet<UserId> =
                flat.users.iter().chain(flat.waitlist.iter()).cloned().collect();
            flat.labels.retain(|user, _| present.contains(user));
        },
        Roster::Teams(teams) => {
            let present: HashSet<UserId> = teams
                .teams
                .iter()
                .flat_map(|team| team.users.iter())
                .chain(teams.waitlist.iter())
                .cloned()
                .collect();
            teams.labels.retain(|user, _| present.contains(user));
        },
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Reject normal mutations on a closed record.
///
/// # Errors
///
/// Returns [`SignupError::RecordClosed`] unless the record is open.
pub fn ensure_open(record: &EventRecord) -> Result<(), SignupError> {
    if record.is_open() {
        Ok(())
    } else {
        Err(SignupError::RecordClosed(record.id.clone()))
    }
}

/// Assign a user to the slot named by `selector`, moving them out of any
/// other roster or waitlist first.
///
/// A full destination is rejected with [`SignupError::SlotFull`], whether the
/// slot was named by position or by label; use [`waitlist`] to queue instead.
///
/// # Errors
///
/// Selector errors from [`SlotIndex::resolve`], plus `RecordClosed`,
/// `AlreadyAssigned` and `SlotFull`.
pub fn assign(
    record: &mut EventRecord,
    user: &UserId,
    selector: &Selector,
) -> Result<Mutation, SignupError> {
    ensure_open(record)?;
    let target = SlotIndex::build(record).resolve(selector)?;
    assign_to(record, user, target)
}

/// Assign a user to a resolved target.
///
/// # Errors
///
/// `RecordClosed`, `AlreadyAssigned`, `SlotFull` or `SlotNotFound`.
pub fn assign_to(
    record: &mut EventRecord,
    user: &UserId,
    target: usize,
) -> Result<Mutation, SignupError> {
    ensure_open(record)?;
    if target >= record.target_count() {
        return Err(SignupError::SlotNotFound {
            selector: format!("#{}", target + 1),
        });
    }
    if record.users_of(target).contains(user) {
        return Err(already_assigned(record, user, target));
    }
    let previous = record.placement(user);
    if !room_for(record, previous, target) {
        return Err(slot_full(record, target));
    }

    let detached = detach_from_all(record, user);
    attach(record, user, target)?;
    let promotions = promote_vacated(record, &detached.vacated);
    prune_labels(record);

    Ok(Mutation {
        user: user.clone(),
        target,
        slot: record.target_name(target).to_string(),
        kind: MutationKind::Assigned,
        previous,
        promotions,
    })
}

/// Remove a user from the roster of the slot named by `selector`, then
/// promote the head of that slot's waitlist.
///
/// # Errors
///
/// Selector errors, `RecordClosed`, or `NotSignedUp` when the user is not on
/// that roster.
pub fn remove(
    record: &mut EventRecord,
    user: &UserId,
    selector: &Selector,
) -> Result<Mutation, SignupError> {
    ensure_open(record)?;
    let target = SlotIndex::build(record).resolve(selector)?;
    if !record.users_of(target).contains(user) {
        return Err(SignupError::NotSignedUp {
            user: user.clone(),
            slot: record.target_name(target).to_string(),
        });
    }

    if let Some(users) = record.users_mut(target) {
        users.retain(|u| u != user);
    }
    let promotions = promote_vacated(record, &[target]);
    prune_labels(record);

    Ok(Mutation {
        user: user.clone(),
        target,
        slot: record.target_name(target).to_string(),
        kind: MutationKind::Removed,
        previous: Some(Placement {
            target,
            waitlisted: false,
        }),
        promotions,
    })
}

/// Queue a user on the waitlist serving the slot named by `selector`.
///
/// The user leaves any roster (that seat is refilled first) and any other
/// waitlist, then joins the tail of this one.
///
/// # Errors
///
/// Selector errors, `RecordClosed`, or `AlreadyWaitlisted` when the user is
/// already queued there.
pub fn waitlist(
    record: &mut EventRecord,
    user: &UserId,
    selector: &Selector,
) -> Result<Mutation, SignupError> {
    ensure_open(record)?;
    let target = SlotIndex::build(record).resolve(selector)?;
    waitlist_to(record, user, target)
}

fn waitlist_to(
    record: &mut EventRecord,
    user: &UserId,
    target: usize,
) -> Result<Mutation, SignupError> {
    if record.waitlist_of(target).contains(user) {
        return Err(SignupError::AlreadyWaitlisted {
            user: user.clone(),
            slot: record.target_name(target).to_string(),
        });
    }

    let previous = record.placement(user);
    let detached = detach_from_all(record, user);
    let promotions = promote_vacated(record, &detached.vacated);
    let position = match record.waitlist_mut(target) {
        Some(queue) => {
            queue.push(user.clone());
            queue.len()
        },
        None => {
            return Err(SignupError::SlotNotFound {
                selector: format!("#{}", target + 1),
            });
        },
    };
    prune_labels(record);

    Ok(Mutation {
        user: user.clone(),
        target,
        slot: record.target_name(target).to_string(),
        kind: MutationKind::Waitlisted { position },
        previous,
        promotions,
    })
}

/// Live "reaction added": place the user if there is room, otherwise queue
/// them. Replays of a reaction the record already reflects are no-ops.
///
/// # Errors
///
/// `RecordClosed`, or `SlotNotFound` for a key this record does not use.
pub fn join(
    record: &mut EventRecord,
    user: &UserId,
    key: &ReactionKey,
) -> Result<Mutation, SignupError> {
    ensure_open(record)?;
    match &record.roster {
        Roster::Roles(_) => {
            let target = target_for_key(record, key)?;
            if record.users_of(target).contains(user) || record.waitlist_of(target).contains(user)
            {
                return Ok(unchanged(record, user, target));
            }
            let previous = record.placement(user);
            if room_for(record, previous, target) {
                assign_to(record, user, target)
            } else if previous.is_some_and(|p| !p.waitlisted) {
                // Keep the seat they hold; reconciliation sorts out the
                // second reaction.
                Ok(unchanged(record, user, target))
            } else {
                waitlist_to(record, user, target)
            }
        },
        Roster::Flat(_) => {
            let target = target_for_key(record, key)?;
            if record.placement(user).is_some() {
                return Ok(unchanged(record, user, target));
            }
            if record.has_room(target) {
                assign_to(record, user, target)
            } else {
                waitlist_to(record, user, target)
            }
        },
        Roster::Teams(teams) => {
            if &teams.key != key {
                return Err(SignupError::SlotNotFound {
                    selector: key.to_string(),
                });
            }
            if let Some(placement) = record.placement(user) {
                return Ok(unchanged(record, user, placement.target));
            }
            match (0..record.target_count()).find(|&t| record.has_room(t)) {
                Some(target) => assign_to(record, user, target),
                None => waitlist_to(record, user, 0),
            }
        },
    }
}

/// Live "reaction removed": take the user off the roster or waitlist fed by
/// `key`. Absent users are a no-op.
///
/// # Errors
///
/// `RecordClosed`, or `SlotNotFound` for a key this record does not use.
pub fn leave(
    record: &mut EventRecord,
    user: &UserId,
    key: &ReactionKey,
) -> Result<Mutation, SignupError> {
    ensure_open(record)?;
    let candidates: Vec<usize> = match &record.roster {
        Roster::Roles(_) | Roster::Flat(_) => vec![target_for_key(record, key)?],
        Roster::Teams(teams) => {
            if &teams.key != key {
                return Err(SignupError::SlotNotFound {
                    selector: key.to_string(),
                });
            }
            (0..teams.teams.len()).collect()
        },
    };

    for &target in &candidates {
        if record.users_of(target).contains(user) {
            if let Some(users) = record.users_mut(target) {
                users.retain(|u| u != user);
            }
            let promotions = promote_vacated(record, &[target]);
            prune_labels(record);
            return Ok(Mutation {
                user: user.clone(),
                target,
                slot: record.target_name(target).to_string(),
                kind: MutationKind::Removed,
                previous: Some(Placement {
                    target,
                    waitlisted: false,
                }),
                promotions,
            });
        }
    }

    let queue_target = candidates.first().copied().unwrap_or_default();
    if let Some(queue) = record.waitlist_mut(queue_target) {
        let before = queue.len();
        queue.retain(|u| u != user);
        if queue.len() != before {
            prune_labels(record);
            return Ok(Mutation {
                user: user.clone(),
                target: queue_target,
                slot: record.target_name(queue_target).to_string(),
                kind: MutationKind::Unqueued,
                previous: Some(Placement {
                    target: queue_target,
                    waitlisted: true,
                }),
                promotions: Vec::new(),
            });
        }
    }

    Ok(unchanged(record, user, queue_target))
}

/// Set or clear a user's auxiliary label on the slot they occupy.
///
/// # Errors
///
/// `RecordClosed`, or `NotSignedUp` when the user is nowhere in the record.
pub fn set_label(
    record: &mut EventRecord,
    user: &UserId,
    label: Option<String>,
) -> Result<Mutation, SignupError> {
    ensure_open(record)?;
    let Some(Placement { target, waitlisted }) = record.placement(user) else {
        return Err(SignupError::NotSignedUp {
            user: user.clone(),
            slot: record.title.clone(),
        });
    };
    if let Some(labels) = record.labels_mut(target) {
        // Rendered inline on the user's row, so any line breaks are folded.
        let label = label.map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "));
        match label.filter(|l| !l.is_empty()) {
            Some(label) => {
                labels.insert(user.clone(), label);
            },
            None => {
                labels.remove(user);
            },
        }
    }
    Ok(Mutation {
        user: user.clone(),
        target,
        slot: record.target_name(target).to_string(),
        kind: MutationKind::Labeled,
        previous: Some(Placement { target, waitlisted }),
        promotions: Vec::new(),
    })
}

// ============================================================================
// Helpers
// ============================================================================

fn target_for_key(record: &EventRecord, key: &ReactionKey) -> Result<usize, SignupError> {
    SlotIndex::build(record)
        .by_key(key)
        .ok_or_else(|| SignupError::SlotNotFound {
            selector: key.to_string(),
        })
}

/// Would `target` have room for this user once they leave where they are now?
fn room_for(record: &EventRecord, previous: Option<Placement>, target: usize) -> bool {
    match &record.roster {
        Roster::Teams(teams) => {
            let Some(team) = teams.teams.get(target) else {
                return false;
            };
            let moving_between_teams = previous.is_some_and(|p| !p.waitlisted);
            let members_after = teams.member_count() - usize::from(moving_between_teams);
            team.users.len() < team.capacity as usize && members_after < teams.ceiling()
        },
        Roster::Roles(_) | Roster::Flat(_) => record.has_room(target),
    }
}

fn already_assigned(record: &EventRecord, user: &UserId, target: usize) -> SignupError {
    SignupError::AlreadyAssigned {
        user: user.clone(),
        slot: record.target_name(target).to_string(),
    }
}

fn slot_full(record: &EventRecord, target: usize) -> SignupError {
    let capacity = match &record.roster {
        Roster::Teams(teams) if teams.member_count() >= teams.ceiling() => teams.capacity,
        _ => record.target_capacity(target),
    };
    SignupError::SlotFull {
        slot: record.target_name(target).to_string(),
        capacity,
    }
}

fn unchanged(record: &EventRecord, user: &UserId, target: usize) -> Mutation {
    Mutation {
        user: user.clone(),
        target,
        slot: record.target_name(target).to_string(),
        kind: MutationKind::Unchanged,
        previous: record.placement(user),
        promotions: Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ids::PostRef;
    use crate::record::RoleSlot;
    use chrono::Utc;

    fn u(id: &str) -> UserId {
        UserId::new(id)
    }

    fn raid() -> EventRecord {
        EventRecord::new(
            "r1",
            PostRef::new("g", "c", "m"),
            "Raid",
            Roster::Roles(vec![
                RoleSlot::new("Tank", "🛡️", 1),
                RoleSlot::new("Healer", "💚", 2),
                RoleSlot::new("DPS", "⚔️", 3),
            ]),
            Utc::now(),
        )
    }

    #[test]
    fn detach_reports_every_vacated_target() {
        let mut record = raid();
        if let Roster::Roles(slots) = &mut record.roster {
            slots[0].users.push(u("a"));
            slots[1].waitlist.push(u("a"));
        }
        let detached = detach_from_all(&mut record, &u("a"));
        assert_eq!(detached.vacated, vec![0]);
        assert_eq!(detached.dequeued, vec![1]);
        assert!(record.placement(&u("a")).is_none());
    }

    #[test]
    fn attach_rejects_full_target() {
        let mut record = raid();
        attach(&mut record, &u("a"), 0).unwrap();
        assert!(matches!(
            attach(&mut record, &u("b"), 0),
            Err(SignupError::SlotFull { capacity: 1, .. })
        ));
    }

    #[test]
    fn rejected_assign_leaves_record_untouched() {
        let mut record = raid();
        assign(&mut record, &u("a"), &Selector::Label("Tank".into())).unwrap();
        assign(&mut record, &u("b"), &Selector::Label("Healer".into())).unwrap();
        let before = record.clone();

        let result = assign(&mut record, &u("b"), &Selector::Position(1));
        assert!(matches!(result, Err(SignupError::SlotFull { .. })));
        assert_eq!(record, before);
    }

    #[test]
    fn labels_are_pruned_when_user_moves() {
        let mut record = raid();
        assign(&mut record, &u("a"), &Selector::Label("Healer".into())).unwrap();
        set_label(&mut record, &u("a"), Some("Resto".into())).unwrap();
        assert_eq!(record.label_of(&u("a")), Some("Resto"));

        assign(&mut record, &u("a"), &Selector::Label("DPS".into())).unwrap();
        assert_eq!(record.label_of(&u("a")), None);
    }

    #[test]
    fn label_whitespace_is_folded_to_one_line() {
        let mut record = raid();
        assign(&mut record, &u("a"), &Selector::Label("Healer".into())).unwrap();
        set_label(&mut record, &u("a"), Some("  Resto\r\n  Druid ".into())).unwrap();
        assert_eq!(record.label_of(&u("a")), Some("Resto Druid"));

        set_label(&mut record, &u("a"), Some("\n\t".into())).unwrap();
        assert_eq!(record.label_of(&u("a")), None);
    }

    #[test]
    fn join_is_idempotent() {
        let mut record = raid();
        let key = ReactionKey::new("💚");
        let first = join(&mut record, &u("a"), &key);
        assert!(matches!(first, Ok(Mutation { kind: MutationKind::Assigned, .. })));
        let again = join(&mut record, &u("a"), &key);
        assert!(matches!(again, Ok(Mutation { kind: MutationKind::Unchanged, .. })));
        assert_eq!(record.users_of(1), &[u("a")]);
    }
}
