//! Reconciliation of persisted signups against live reaction membership.
//!
//! After an observation gap the platform's reactions and the persisted record
//! can disagree. Reactions are authoritative for *who is interested where*;
//! the record is authoritative for everything reactions cannot express
//! (waitlist order, labels, the slot a multi-reacting user really chose).
//! [`reconcile`] merges the two into one record that still satisfies every
//! roster invariant, and returns one [`Change`] per difference it resolved.
//!
//! # Raid records
//!
//! Slots are processed in declared order. For each slot the eligible list is
//!
//! 1. stored roster users that still react here or react nowhere
//!    (a missed un-react is tolerated), in stored order
//! 2. stored waitlist users under the same rule, in stored order
//! 3. newly observed users, in observation order
//!
//! The first `capacity` entries become the roster and the rest the waitlist.
//! A stored user who now reacts only to other slots has switched and is
//! picked up there. A user reacting to several slots stays in their stored
//! slot if it is among them (other slots log [`ChangeAction::Deferred`]),
//! otherwise the first slot that reaches them takes them
//! ([`ChangeAction::Ambiguous`]). Everyone placed or queued is claimed before
//! the next slot runs, which is what keeps a user on one roster.
//!
//! Slots whose membership could not be fetched ([`Observation::Unavailable`])
//! are frozen: they keep their stored state and their users are claimed up
//! front, so a transient failure never moves anybody.
//!
//! # Flat and team rosters
//!
//! One reaction key feeds the whole roster: stored roster, then stored
//! waitlist, then new arrivals fill the capacity in that order and the
//! remainder is queued.

use crate::ids::{ReactionKey, UserId};
use crate::record::{EventRecord, FlatRoster, Placement, RoleSlot, Roster, TeamRoster};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

// ============================================================================
// Inputs
// ============================================================================

/// What the platform reported for one reaction key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Observation {
    /// Users currently reacting, in the order the platform returned them
    Observed(Vec<UserId>),
    /// The fetch failed; treat the slot as unknown
    Unavailable,
}

/// Reaction membership for one record, keyed by reaction key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    observations: HashMap<ReactionKey, Observation>,
}

impl MembershipSnapshot {
    /// Creates an empty snapshot (every key unavailable)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the users reacting with `key`
    pub fn observe(&mut self, key: impl Into<ReactionKey>, users: Vec<UserId>) {
        self.observations
            .insert(key.into(), Observation::Observed(users));
    }

    /// Record that `key` could not be fetched
    pub fn mark_unavailable(&mut self, key: impl Into<ReactionKey>) {
        self.observations
            .insert(key.into(), Observation::Unavailable);
    }

    /// Builder-style [`observe`](Self::observe)
    #[must_use]
    pub fn with(mut self, key: impl Into<ReactionKey>, users: Vec<UserId>) -> Self {
        self.observe(key, users);
        self
    }

    /// Observation for a key (`None` means never fetched)
    #[must_use]
    pub fn get(&self, key: &ReactionKey) -> Option<&Observation> {
        self.observations.get(key)
    }

    /// Number of keys with an observation (including unavailable ones)
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// `true` if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Keys whose fetch failed
    #[must_use]
    pub fn unavailable_keys(&self) -> Vec<&ReactionKey> {
        self.observations
            .iter()
            .filter(|(_, observation)| matches!(observation, Observation::Unavailable))
            .map(|(key, _)| key)
            .collect()
    }

    fn observed(&self, key: &ReactionKey, options: &ReconcileOptions) -> Option<Vec<UserId>> {
        match self.observations.get(key) {
            Some(Observation::Observed(users)) => {
                let mut seen = HashSet::new();
                Some(
                    users
                        .iter()
                        .filter(|user| !options.ignored_users.contains(*user))
                        .filter(|user| seen.insert((*user).clone()))
                        .cloned()
                        .collect(),
                )
            },
            Some(Observation::Unavailable) | None => None,
        }
    }
}

/// Tuning for a reconciliation pass.
#[derive(Clone, Debug, Default)]
pub struct ReconcileOptions {
    /// Users whose reactions never count (the bot's own seed reactions)
    pub ignored_users: HashSet<UserId>,
}

impl ReconcileOptions {
    /// Ignore reactions from `user`
    #[must_use]
    pub fn ignoring(mut self, user: impl Into<UserId>) -> Self {
        self.ignored_users.insert(user.into());
        self
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Kind of difference resolved during reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// New reaction placed on the roster
    Added,
    /// Duplicate placement cleaned up
    Removed,
    /// Placed (or pushed back) on the waitlist
    Waitlisted,
    /// Moved from the waitlist onto the roster
    Promoted,
    /// Reaction here ignored in favour of the stored slot
    Deferred,
    /// Stored under one slot, now reacting only to another
    Switched,
    /// Reacting to several slots, none of them stored; first slot won
    Ambiguous,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Waitlisted => "waitlisted",
            Self::Promoted => "promoted",
            Self::Deferred => "deferred",
            Self::Switched => "switched",
            Self::Ambiguous => "ambiguous",
        };
        f.write_str(name)
    }
}

/// One structured audit entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Affected user
    pub user: UserId,
    /// What happened
    pub action: ChangeAction,
    /// Slot (or team/roster) name it happened in
    pub slot: String,
    /// Human-readable detail
    pub reason: String,
}

impl Change {
    fn new(user: &UserId, action: ChangeAction, slot: &str, reason: impl Into<String>) -> Self {
        Self {
            user: user.clone(),
            action,
            slot: slot.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result of a reconciliation pass over one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    /// The converged record
    pub record: EventRecord,
    /// Every difference resolved, in processing order
    pub changes: Vec<Change>,
}

impl Reconciliation {
    /// `true` if the pass changed the record.
    ///
    /// Deferred entries are informational: the user stays where they were.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changes
            .iter()
            .any(|change| change.action != ChangeAction::Deferred)
    }
}

// ============================================================================
// Algorithm
// ============================================================================

/// Merge live reaction membership into a stored record.
///
/// Pure: the input record is not modified. Feeding back a snapshot that
/// matches the stored rosters yields no changes and an identical record.
#[must_use]
pub fn reconcile(
    record: &EventRecord,
    snapshot: &MembershipSnapshot,
    options: &ReconcileOptions,
) -> Reconciliation {
    let mut reconciled = record.clone();
    let changes = match &mut reconciled.roster {
        Roster::Roles(slots) => reconcile_roles(slots, snapshot, options),
        Roster::Flat(flat) => reconcile_flat(flat, snapshot, options),
        Roster::Teams(teams) => reconcile_teams(teams, snapshot, options),
    };
    Reconciliation {
        record: reconciled,
        changes,
    }
}

/// Where an eligible user came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Roster,
    Waitlist,
    /// Newly observed, with how they were classified
    New(Arrival),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Arrival {
    Fresh,
    SwitchedFrom(usize),
    Ambiguous,
}

#[allow(clippy::too_many_lines)] // One pass over the slots, kept together for readability
fn reconcile_roles(
    slots: &mut [RoleSlot],
    snapshot: &MembershipSnapshot,
    options: &ReconcileOptions,
) -> Vec<Change> {
    let mut changes = Vec::new();
    let names: Vec<String> = slots.iter().map(|slot| slot.name.clone()).collect();
    let observed: Vec<Option<Vec<UserId>>> = slots
        .iter()
        .map(|slot| snapshot.observed(&slot.key, options))
        .collect();

    // user -> slots they currently react to, in slot order
    let mut shows: HashMap<UserId, Vec<usize>> = HashMap::new();
    for (index, users) in observed.iter().enumerate() {
        for user in users.iter().flatten() {
            shows.entry(user.clone()).or_default().push(index);
        }
    }

    // user -> stored placement, roster wins over waitlist
    let mut stored: HashMap<UserId, Placement> = HashMap::new();
    for (index, slot) in slots.iter().enumerate() {
        for user in &slot.users {
            stored.entry(user.clone()).or_insert(Placement {
                target: index,
                waitlisted: false,
            });
        }
    }
    for (index, slot) in slots.iter().enumerate() {
        for user in &slot.waitlist {
            stored.entry(user.clone()).or_insert(Placement {
                target: index,
                waitlisted: true,
            });
        }
    }

    // Frozen slots keep their people.
    let mut claimed: HashSet<UserId> = HashSet::new();
    for (index, slot) in slots.iter().enumerate() {
        if observed[index].is_none() {
            claimed.extend(slot.users.iter().cloned());
            claimed.extend(slot.waitlist.iter().cloned());
        }
    }

    let empty: Vec<usize> = Vec::new();
    for index in 0..slots.len() {
        let Some(seen) = &observed[index] else {
            tracing::debug!(slot = %names[index], "Membership unavailable; slot left as stored");
            continue;
        };
        let slot_name = names[index].as_str();
        let here_roster = Placement {
            target: index,
            waitlisted: false,
        };
        let here_waitlist = Placement {
            target: index,
            waitlisted: true,
        };

        let mut stored_roster: Vec<UserId> = Vec::new();
        for user in &slots[index].users {
            if stored.get(user) == Some(&here_roster) && !stored_roster.contains(user) {
                stored_roster.push(user.clone());
            } else {
                changes.push(Change::new(
                    user,
                    ChangeAction::Removed,
                    slot_name,
                    "duplicate placement",
                ));
            }
        }
        let mut stored_waitlist: Vec<UserId> = Vec::new();
        for user in &slots[index].waitlist {
            if stored.get(user) == Some(&here_waitlist) && !stored_waitlist.contains(user) {
                stored_waitlist.push(user.clone());
            } else {
                changes.push(Change::new(
                    user,
                    ChangeAction::Removed,
                    slot_name,
                    "duplicate placement",
                ));
            }
        }

        let mut eligible: Vec<(UserId, Origin)> = Vec::new();
        for (list, origin) in [
            (&stored_roster, Origin::Roster),
            (&stored_waitlist, Origin::Waitlist),
        ] {
            for user in list {
                if claimed.contains(user) {
                    continue;
                }
                let reacting = shows.get(user).unwrap_or(&empty);
                if reacting.is_empty() || reacting.contains(&index) {
                    eligible.push((user.clone(), origin));
                }
                // Otherwise they switched; the slot they react to picks them up.
            }
        }

        for user in seen {
            if stored_roster.contains(user) || stored_waitlist.contains(user) {
                continue;
            }
            let reacting = shows.get(user).unwrap_or(&empty);
            let previous = stored.get(user).copied();
            if reacting.len() > 1 {
                if let Some(placement) = previous {
                    if placement.target != index && reacting.contains(&placement.target) {
                        changes.push(Change::new(
                            user,
                            ChangeAction::Deferred,
                            slot_name,
                            format!("kept under {}", names[placement.target]),
                        ));
                        continue;
                    }
                }
            }
            if claimed.contains(user) {
                continue;
            }
            let arrival = if reacting.len() > 1 {
                Arrival::Ambiguous
            } else {
                match previous {
                    Some(placement) if placement.target != index => {
                        Arrival::SwitchedFrom(placement.target)
                    },
                    _ => Arrival::Fresh,
                }
            };
            eligible.push((user.clone(), Origin::New(arrival)));
        }

        let capacity = slots[index].capacity as usize;
        let mut users = Vec::new();
        let mut waitlist = Vec::new();
        for (position, (user, origin)) in eligible.iter().enumerate() {
            let placed = position < capacity;
            let also = || {
                shows
                    .get(user)
                    .unwrap_or(&empty)
                    .iter()
                    .filter(|&&other| other != index)
                    .map(|&other| names[other].clone())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let queued = if placed { "" } else { " (waitlisted)" };
            match (origin, placed) {
                (Origin::Roster, true) | (Origin::Waitlist, false) => {},
                (Origin::Roster, false) => changes.push(Change::new(
                    user,
                    ChangeAction::Waitlisted,
                    slot_name,
                    "over capacity",
                )),
                (Origin::Waitlist, true) => changes.push(Change::new(
                    user,
                    ChangeAction::Promoted,
                    slot_name,
                    "seat available",
                )),
                (Origin::New(Arrival::Fresh), true) => changes.push(Change::new(
                    user,
                    ChangeAction::Added,
                    slot_name,
                    "reaction observed",
                )),
                (Origin::New(Arrival::Fresh), false) => changes.push(Change::new(
                    user,
                    ChangeAction::Waitlisted,
                    slot_name,
                    "reaction observed; slot full",
                )),
                (Origin::New(Arrival::SwitchedFrom(from)), _) => changes.push(Change::new(
                    user,
                    ChangeAction::Switched,
                    slot_name,
                    format!("from {}{queued}", names[*from]),
                )),
                (Origin::New(Arrival::Ambiguous), _) => changes.push(Change::new(
                    user,
                    ChangeAction::Ambiguous,
                    slot_name,
                    format!("also reacting to {}{queued}", also()),
                )),
            }
            claimed.insert(user.clone());
            if placed {
                users.push(user.clone());
            } else {
                waitlist.push(user.clone());
            }
        }

        let slot = &mut slots[index];
        let keep: HashSet<&UserId> = users.iter().chain(waitlist.iter()).collect();
        slot.labels.retain(|user, _| keep.contains(user));
        slot.users = users;
        slot.waitlist = waitlist;
    }

    changes
}

fn reconcile_flat(
    flat: &mut FlatRoster,
    snapshot: &MembershipSnapshot,
    options: &ReconcileOptions,
) -> Vec<Change> {
    let Some(seen) = snapshot.observed(&flat.key, options) else {
        return Vec::new();
    };
    let name = flat.key.to_string();
    let mut changes = Vec::new();
    let (roster, waitlist) = dedupe_lists(&flat.users, &flat.waitlist, &name, &mut changes);

    let mut eligible: Vec<(UserId, Origin)> = Vec::new();
    eligible.extend(roster.iter().map(|user| (user.clone(), Origin::Roster)));
    eligible.extend(waitlist.iter().map(|user| (user.clone(), Origin::Waitlist)));
    for user in seen {
        if !roster.contains(&user) && !waitlist.contains(&user) {
            eligible.push((user, Origin::New(Arrival::Fresh)));
        }
    }

    let capacity = flat.capacity as usize;
    let mut users = Vec::new();
    let mut queue = Vec::new();
    for (position, (user, origin)) in eligible.into_iter().enumerate() {
        let placed = position < capacity;
        record_single_key_change(&mut changes, &user, origin, placed, &name);
        if placed {
            users.push(user);
        } else {
            queue.push(user);
        }
    }

    let keep: HashSet<&UserId> = users.iter().chain(queue.iter()).collect();
    flat.labels.retain(|user, _| keep.contains(user));
    flat.users = users;
    flat.waitlist = queue;
    changes
}

fn reconcile_teams(
    teams: &mut TeamRoster,
    snapshot: &MembershipSnapshot,
    options: &ReconcileOptions,
) -> Vec<Change> {
    let Some(seen) = snapshot.observed(&teams.key, options) else {
        return Vec::new();
    };
    let mut changes = Vec::new();
    let ceiling = teams.ceiling();

    // Keep stored team placements, first occurrence wins.
    let mut members: HashSet<UserId> = HashSet::new();
    let mut demoted: Vec<UserId> = Vec::new();
    for team in &mut teams.teams {
        let mut kept = Vec::new();
        for user in &team.users {
            if !members.insert(user.clone()) {
                changes.push(Change::new(
                    user,
                    ChangeAction::Removed,
                    &team.name,
                    "duplicate placement",
                ));
                continue;
            }
            if kept.len() < team.capacity as usize {
                kept.push(user.clone());
            } else {
                demoted.push(user.clone());
            }
        }
        team.users = kept;
    }
    // Enforce the record-wide ceiling from the back.
    while teams.member_count() > ceiling {
        let Some(team) = teams.teams.iter_mut().rev().find(|team| !team.users.is_empty()) else {
            break;
        };
        if let Some(user) = team.users.pop() {
            demoted.insert(0, user);
        }
    }
    let roster_name = teams.key.to_string();
    for user in &demoted {
        changes.push(Change::new(
            user,
            ChangeAction::Waitlisted,
            &roster_name,
            "over capacity",
        ));
    }

    let placed_now: HashSet<UserId> = teams
        .teams
        .iter()
        .flat_map(|team| team.users.iter().cloned())
        .collect();
    let mut queue: Vec<(UserId, Origin)> = demoted
        .into_iter()
        .map(|user| (user, Origin::Roster))
        .collect();
    let mut queued: HashSet<UserId> = queue.iter().map(|(user, _)| user.clone()).collect();
    for user in &teams.waitlist {
        if placed_now.contains(user) || !queued.insert(user.clone()) {
            changes.push(Change::new(
                user,
                ChangeAction::Removed,
                &roster_name,
                "duplicate placement",
            ));
            continue;
        }
        queue.push((user.clone(), Origin::Waitlist));
    }
    for user in seen {
        if !placed_now.contains(&user) && queued.insert(user.clone()) {
            queue.push((user, Origin::New(Arrival::Fresh)));
        }
    }

    let mut waitlist = Vec::new();
    for (user, origin) in queue {
        let open_team = if teams.member_count() < ceiling {
            teams
                .teams
                .iter_mut()
                .find(|team| team.users.len() < team.capacity as usize)
        } else {
            None
        };
        match open_team {
            Some(team) if origin != Origin::Roster => {
                record_single_key_change(&mut changes, &user, origin, true, &team.name);
                team.users.push(user);
            },
            _ => {
                if origin != Origin::Roster {
                    record_single_key_change(&mut changes, &user, origin, false, &roster_name);
                }
                waitlist.push(user);
            },
        }
    }

    let keep: HashSet<UserId> = teams
        .teams
        .iter()
        .flat_map(|team| team.users.iter().cloned())
        .chain(waitlist.iter().cloned())
        .collect();
    teams.labels.retain(|user, _| keep.contains(user));
    teams.waitlist = waitlist;
    changes
}

/// Drop duplicate entries from a single-key roster, reporting each one.
fn dedupe_lists(
    users: &[UserId],
    waitlist: &[UserId],
    name: &str,
    changes: &mut Vec<Change>,
) -> (Vec<UserId>, Vec<UserId>) {
    let mut seen = HashSet::new();
    let mut roster = Vec::new();
    let mut queue = Vec::new();
    for (list, out) in [(users, &mut roster), (waitlist, &mut queue)] {
        for user in list {
            if seen.insert(user.clone()) {
                out.push(user.clone());
            } else {
                changes.push(Change::new(
                    user,
                    ChangeAction::Removed,
                    name,
                    "duplicate placement",
                ));
            }
        }
    }
    (roster, queue)
}

fn record_single_key_change(
    changes: &mut Vec<Change>,
    user: &UserId,
    origin: Origin,
    placed: bool,
    slot: &str,
) {
    let change = match (origin, placed) {
        (Origin::Roster, true) | (Origin::Waitlist, false) => return,
        (Origin::Roster, false) => (ChangeAction::Waitlisted, "over capacity"),
        (Origin::Waitlist, true) => (ChangeAction::Promoted, "seat available"),
        (Origin::New(_), true) => (ChangeAction::Added, "reaction observed"),
        (Origin::New(_), false) => (ChangeAction::Waitlisted, "reaction observed; roster full"),
    };
    changes.push(Change::new(user, change.0, slot, change.1));
}

/// Count changes by action, for summaries and metrics.
#[must_use]
pub fn tally(changes: &[Change]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for change in changes {
        *counts.entry(change.action.to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PostRef;
    use chrono::Utc;

    fn u(id: &str) -> UserId {
        UserId::new(id)
    }

    fn users(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|id| u(id)).collect()
    }

    fn raid(slots: Vec<RoleSlot>) -> EventRecord {
        EventRecord::new(
            "r1",
            PostRef::new("g", "c", "m"),
            "Raid",
            Roster::Roles(slots),
            Utc::now(),
        )
    }

    fn slot(name: &str, key: &str, capacity: u32, roster: &[&str], queue: &[&str]) -> RoleSlot {
        let mut slot = RoleSlot::new(name, key, capacity);
        slot.users = users(roster);
        slot.waitlist = users(queue);
        slot
    }

    #[test]
    fn missing_slot_observation_freezes_it() {
        let record = raid(vec![
            slot("Tank", "T", 1, &["a"], &[]),
            slot("Healer", "H", 1, &[], &[]),
        ]);
        // Tank fetch failed; a reacts to Healer only.
        let snapshot = MembershipSnapshot::new().with("H", users(&["a"]));
        let result = reconcile(&record, &snapshot, &ReconcileOptions::default());
        assert!(result.changes.is_empty());
        assert_eq!(result.record, record);
    }

    #[test]
    fn overflow_goes_to_waitlist_after_stored_queue() {
        let record = raid(vec![slot("Tank", "T", 1, &["a"], &["b"])]);
        let snapshot = MembershipSnapshot::new().with("T", users(&["c", "a", "b"]));
        let result = reconcile(&record, &snapshot, &ReconcileOptions::default());
        assert_eq!(result.record.users_of(0), users(&["a"]).as_slice());
        assert_eq!(result.record.waitlist_of(0), users(&["b", "c"]).as_slice());
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].action, ChangeAction::Waitlisted);
        assert_eq!(result.changes[0].user, u("c"));
    }

    #[test]
    fn ignored_users_never_sign_up() {
        let record = raid(vec![slot("Tank", "T", 2, &[], &[])]);
        let snapshot = MembershipSnapshot::new().with("T", users(&["bot", "a"]));
        let options = ReconcileOptions::default().ignoring("bot");
        let result = reconcile(&record, &snapshot, &options);
        assert_eq!(result.record.users_of(0), users(&["a"]).as_slice());
    }

    #[test]
    fn tally_counts_by_action() {
        let changes = vec![
            Change::new(&u("a"), ChangeAction::Added, "Tank", "x"),
            Change::new(&u("b"), ChangeAction::Added, "Tank", "x"),
            Change::new(&u("c"), ChangeAction::Deferred, "Tank", "x"),
        ];
        let counts = tally(&changes);
        assert_eq!(counts.get("added"), Some(&2));
        assert_eq!(counts.get("deferred"), Some(&1));
    }
}
