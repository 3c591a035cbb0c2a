//! Signup record model.
//!
//! An [`EventRecord`] holds the complete signup state for one scheduled event.
//! Its [`Roster`] takes one of three shapes:
//!
//! - **Roles**: typed-role raid, one [`RoleSlot`] per role, each with its own
//!   reaction key, capacity and FIFO waitlist
//! - **Flat**: a single capacity-bounded list with a waitlist
//! - **Teams**: fixed-size [`Team`]s sharing one reaction key, one waitlist and
//!   a record-wide capacity ceiling
//!
//! Assignment code addresses roster positions through a *target* index: a
//! role slot, a team, or (for flat rosters) the single list at index 0.

use crate::ids::{PostRef, ReactionKey, RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

// ============================================================================
// Record
// ============================================================================

/// Persisted signup state for one scheduled event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Record identifier
    pub id: RecordId,
    /// Hosting post on the chat platform
    pub post: PostRef,
    /// Event title
    pub title: String,
    /// Schedule information
    #[serde(default)]
    pub schedule: Schedule,
    /// Open/closed status
    pub status: RecordStatus,
    /// Close metadata (present while closed)
    #[serde(default)]
    pub close: Option<CloseInfo>,
    /// One-way flag: stats were finalized on first close
    #[serde(default)]
    pub stats_finalized: bool,
    /// Who created the signup post
    #[serde(default)]
    pub created_by: Option<UserId>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Who signed up where
    pub roster: Roster,
    /// Users marked as no-shows by an administrator
    #[serde(default)]
    pub no_shows: BTreeSet<UserId>,
}

/// Record type, derived from the roster shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Typed-role raid
    Raid,
    /// Flat roster
    Roster,
    /// Team roster
    Teams,
}

impl RecordKind {
    /// Short lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raid => "raid",
            Self::Roster => "roster",
            Self::Teams => "teams",
        }
    }

    /// Parse a short lowercase name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raid" => Some(Self::Raid),
            "roster" => Some(Self::Roster),
            "teams" => Some(Self::Teams),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the event happens.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Start time, if known
    pub starts_at: Option<DateTime<Utc>>,
    /// Free-form description of the time as the organizer wrote it
    pub description: Option<String>,
}

/// Lifecycle status of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Accepting signups
    Open,
    /// Signups frozen; only no-show marking allowed
    Closed,
}

/// Metadata recorded when a record is closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Who closed it (`None` when closed by an external trigger)
    pub closed_by: Option<UserId>,
    /// When it was closed
    pub closed_at: DateTime<Utc>,
    /// Optional reason
    pub reason: Option<String>,
}

// ============================================================================
// Roster shapes
// ============================================================================

/// A named, capacity-limited role within a raid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSlot {
    /// Display name ("Tank")
    pub name: String,
    /// Reaction identity key
    pub key: ReactionKey,
    /// Maximum roster size
    pub capacity: u32,
    /// Roster, in signup order
    #[serde(default)]
    pub users: Vec<UserId>,
    /// FIFO overflow queue
    #[serde(default)]
    pub waitlist: Vec<UserId>,
    /// Optional per-user auxiliary label (class, spec, note)
    #[serde(default)]
    pub labels: BTreeMap<UserId, String>,
}

impl RoleSlot {
    /// Creates an empty slot
    #[must_use]
    pub fn new(name: impl Into<String>, key: impl Into<ReactionKey>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            capacity,
            users: Vec::new(),
            waitlist: Vec::new(),
            labels: BTreeMap::new(),
        }
    }
}

/// Single-list roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRoster {
    /// Reaction identity key
    pub key: ReactionKey,
    /// Maximum roster size
    pub capacity: u32,
    /// Roster, in signup order
    #[serde(default)]
    pub users: Vec<UserId>,
    /// FIFO overflow queue
    #[serde(default)]
    pub waitlist: Vec<UserId>,
    /// Optional per-user auxiliary label
    #[serde(default)]
    pub labels: BTreeMap<UserId, String>,
}

/// A fixed-size sub-group within a team roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Display name ("Team 1")
    pub name: String,
    /// Maximum team size
    pub capacity: u32,
    /// Members, in signup order
    #[serde(default)]
    pub users: Vec<UserId>,
}

/// Teams sharing one reaction key, one waitlist and a record-wide ceiling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRoster {
    /// Reaction identity key
    pub key: ReactionKey,
    /// Record-wide capacity ceiling
    pub capacity: u32,
    /// Teams, in declared order
    pub teams: Vec<Team>,
    /// Shared FIFO overflow queue
    #[serde(default)]
    pub waitlist: Vec<UserId>,
    /// Optional per-user auxiliary label
    #[serde(default)]
    pub labels: BTreeMap<UserId, String>,
}

impl TeamRoster {
    /// Number of users placed across all teams
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.teams.iter().map(|team| team.users.len()).sum()
    }

    /// Effective ceiling: the declared capacity, bounded by the team sizes
    #[must_use]
    pub fn ceiling(&self) -> usize {
        let team_total: usize = self.teams.iter().map(|team| team.capacity as usize).sum();
        team_total.min(self.capacity as usize)
    }
}

/// The roster shape of a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Roster {
    /// Typed-role raid
    Roles(Vec<RoleSlot>),
    /// Flat roster
    Flat(FlatRoster),
    /// Team roster
    Teams(TeamRoster),
}

/// Where a user currently sits in a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    /// Target index (slot, team, or 0 for flat rosters)
    pub target: usize,
    /// `true` if the user is queued rather than rostered
    pub waitlisted: bool,
}

// ============================================================================
// Read access
// ============================================================================

impl EventRecord {
    /// Creates a new open record.
    #[must_use]
    pub fn new(
        id: impl Into<RecordId>,
        post: PostRef,
        title: impl Into<String>,
        roster: Roster,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            post,
            title: title.into(),
            schedule: Schedule::default(),
            status: RecordStatus::Open,
            close: None,
            stats_finalized: false,
            created_by: None,
            created_at,
            roster,
            no_shows: BTreeSet::new(),
        }
    }

    /// Record type
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self.roster {
            Roster::Roles(_) => RecordKind::Raid,
            Roster::Flat(_) => RecordKind::Roster,
            Roster::Teams(_) => RecordKind::Teams,
        }
    }

    /// `true` while signups are accepted
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == RecordStatus::Open
    }

    /// Number of addressable targets (slots, teams, or 1 for flat rosters)
    #[must_use]
    pub fn target_count(&self) -> usize {
        match &self.roster {
            Roster::Roles(slots) => slots.len(),
            Roster::Flat(_) => 1,
            Roster::Teams(teams) => teams.teams.len(),
        }
    }

    /// Display name of a target
    #[must_use]
    pub fn target_name(&self, target: usize) -> &str {
        match &self.roster {
            Roster::Roles(slots) => slots.get(target).map_or("", |slot| slot.name.as_str()),
            Roster::Flat(flat) => flat.key.as_str(),
            Roster::Teams(teams) => teams
                .teams
                .get(target)
                .map_or("", |team| team.name.as_str()),
        }
    }

    /// Reaction key that feeds a target
    #[must_use]
    pub fn target_key(&self, target: usize) -> Option<&ReactionKey> {
        match &self.roster {
            Roster::Roles(slots) => slots.get(target).map(|slot| &slot.key),
            Roster::Flat(flat) => Some(&flat.key),
            Roster::Teams(teams) => Some(&teams.key),
        }
    }

    /// Capacity of a target (per team for team rosters)
    #[must_use]
    pub fn target_capacity(&self, target: usize) -> u32 {
        match &self.roster {
            Roster::Roles(slots) => slots.get(target).map_or(0, |slot| slot.capacity),
            Roster::Flat(flat) => flat.capacity,
            Roster::Teams(teams) => teams.teams.get(target).map_or(0, |team| team.capacity),
        }
    }

    /// Roster of a target
    #[must_use]
    pub fn users_of(&self, target: usize) -> &[UserId] {
        match &self.roster {
            Roster::Roles(slots) => slots
                .get(target)
                .map(|slot| slot.users.as_slice())
                .unwrap_or_default(),
            Roster::Flat(flat) => &flat.users,
            Roster::Teams(teams) => teams
                .teams
                .get(target)
                .map(|team| team.users.as_slice())
                .unwrap_or_default(),
        }
    }

    /// Waitlist serving a target (shared for flat and team rosters)
    #[must_use]
    pub fn waitlist_of(&self, target: usize) -> &[UserId] {
        match &self.roster {
            Roster::Roles(slots) => slots
                .get(target)
                .map(|slot| slot.waitlist.as_slice())
                .unwrap_or_default(),
            Roster::Flat(flat) => &flat.waitlist,
            Roster::Teams(teams) => &teams.waitlist,
        }
    }

    /// Whether a target can take one more user right now.
    ///
    /// Team rosters also respect the record-wide ceiling.
    #[must_use]
    pub fn has_room(&self, target: usize) -> bool {
        match &self.roster {
            Roster::Roles(slots) => slots
                .get(target)
                .is_some_and(|slot| slot.users.len() < slot.capacity as usize),
            Roster::Flat(flat) => target == 0 && flat.users.len() < flat.capacity as usize,
            Roster::Teams(teams) => {
                teams.member_count() < teams.ceiling()
                    && teams
                        .teams
                        .get(target)
                        .is_some_and(|team| team.users.len() < team.capacity as usize)
            },
        }
    }

    /// Where a user sits. Roster membership wins over waitlist membership.
    #[must_use]
    pub fn placement(&self, user: &UserId) -> Option<Placement> {
        let rostered = (0..self.target_count()).find(|&t| self.users_of(t).contains(user));
        if let Some(target) = rostered {
            return Some(Placement {
                target,
                waitlisted: false,
            });
        }
        match &self.roster {
            Roster::Roles(slots) => slots
                .iter()
                .position(|slot| slot.waitlist.contains(user))
                .map(|target| Placement {
                    target,
                    waitlisted: true,
                }),
            Roster::Flat(flat) => flat.waitlist.contains(user).then_some(Placement {
                target: 0,
                waitlisted: true,
            }),
            Roster::Teams(teams) => teams.waitlist.contains(user).then_some(Placement {
                target: 0,
                waitlisted: true,
            }),
        }
    }

    /// Distinct reaction keys of this record, in declared order
    #[must_use]
    pub fn reaction_keys(&self) -> Vec<ReactionKey> {
        match &self.roster {
            Roster::Roles(slots) => slots.iter().map(|slot| slot.key.clone()).collect(),
            Roster::Flat(flat) => vec![flat.key.clone()],
            Roster::Teams(teams) => vec![teams.key.clone()],
        }
    }

    /// Every rostered user, in target order
    #[must_use]
    pub fn rostered_users(&self) -> Vec<&UserId> {
        (0..self.target_count())
            .flat_map(|target| self.users_of(target))
            .collect()
    }

    /// Auxiliary label for a user, if any
    #[must_use]
    pub fn label_of(&self, user: &UserId) -> Option<&str> {
        let labels = match &self.roster {
            Roster::Roles(slots) => {
                return slots
                    .iter()
                    .find_map(|slot| slot.labels.get(user).map(String::as_str));
            },
            Roster::Flat(flat) => &flat.labels,
            Roster::Teams(teams) => &teams.labels,
        };
        labels.get(user).map(String::as_str)
    }

    // ------------------------------------------------------------------------
    // Raw mutable access for the assignment engine
    // ------------------------------------------------------------------------

    pub(crate) fn users_mut(&mut self, target: usize) -> Option<&mut Vec<UserId>> {
        match &mut self.roster {
            Roster::Roles(slots) => slots.get_mut(target).map(|slot| &mut slot.users),
            Roster::Flat(flat) => (target == 0).then_some(&mut flat.users),
            Roster::Teams(teams) => teams.teams.get_mut(target).map(|team| &mut team.users),
        }
    }

    pub(crate) fn waitlist_mut(&mut self, target: usize) -> Option<&mut Vec<UserId>> {
        match &mut self.roster {
            Roster::Roles(slots) => slots.get_mut(target).map(|slot| &mut slot.waitlist),
            Roster::Flat(flat) => Some(&mut flat.waitlist),
            Roster::Teams(teams) => Some(&mut teams.waitlist),
        }
    }

    pub(crate) fn labels_mut(&mut self, target: usize) -> Option<&mut BTreeMap<UserId, String>> {
        match &mut self.roster {
            Roster::Roles(slots) => slots.get_mut(target).map(|slot| &mut slot.labels),
            Roster::Flat(flat) => Some(&mut flat.labels),
            Roster::Teams(teams) => Some(&mut teams.labels),
        }
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Structural validation for a freshly created record.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found: no slots, duplicate
    /// reaction keys or names, a zero capacity, or a line break in text that
    /// is rendered on a single line.
    pub fn validate_shape(&self) -> Result<(), String> {
        let mut single_line = vec![("title", self.title.as_str())];
        if let Some(description) = &self.schedule.description {
            single_line.push(("description", description.as_str()));
        }
        match &self.roster {
            Roster::Roles(slots) => {
                single_line.extend(slots.iter().map(|slot| ("slot name", slot.name.as_str())));
            },
            Roster::Flat(_) => {},
            Roster::Teams(teams) => {
                single_line.extend(teams.teams.iter().map(|team| ("team name", team.name.as_str())));
            },
        }
        if let Some((field, _)) = single_line.iter().find(|(_, text)| text.contains(['\n', '\r'])) {
            return Err(format!("{field} contains a line break"));
        }

        match &self.roster {
            Roster::Roles(slots) => {
                if slots.is_empty() {
                    return Err("a raid needs at least one role slot".to_string());
                }
                let mut keys = HashSet::new();
                let mut names = HashSet::new();
                for slot in slots {
                    if slot.capacity == 0 {
                        return Err(format!("slot '{}' has zero capacity", slot.name));
                    }
                    if !keys.insert(&slot.key) {
                        return Err(format!("duplicate reaction key '{}'", slot.key));
                    }
                    if !names.insert(slot.name.to_lowercase()) {
                        return Err(format!("duplicate slot name '{}'", slot.name));
                    }
                }
            },
            Roster::Flat(flat) => {
                if flat.capacity == 0 {
                    return Err("roster has zero capacity".to_string());
                }
            },
            Roster::Teams(teams) => {
                if teams.teams.is_empty() {
                    return Err("a team roster needs at least one team".to_string());
                }
                if teams.capacity == 0 {
                    return Err("team roster has zero capacity".to_string());
                }
                let mut names = HashSet::new();
                for team in &teams.teams {
                    if team.capacity == 0 {
                        return Err(format!("team '{}' has zero capacity", team.name));
                    }
                    if !names.insert(team.name.to_lowercase()) {
                        return Err(format!("duplicate team name '{}'", team.name));
                    }
                }
            },
        }
        Ok(())
    }

    /// Check the roster invariants that must hold after every mutation:
    ///
    /// 1. a user is on at most one roster across the whole record
    /// 2. no roster exceeds its capacity (and team rosters stay under the ceiling)
    /// 3. no user is on a roster and on the waitlist serving it
    ///
    /// Duplicates inside a single waitlist are reported as well.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen: HashMap<&UserId, usize> = HashMap::new();
        for target in 0..self.target_count() {
            let users = self.users_of(target);
            if users.len() > self.target_capacity(target) as usize {
                return Err(format!(
                    "'{}' holds {} users over capacity {}",
                    self.target_name(target),
                    users.len(),
                    self.target_capacity(target)
                ));
            }
            for user in users {
                if let Some(other) = seen.insert(user, target) {
                    return Err(format!(
                        "user {user} is on both '{}' and '{}'",
                        self.target_name(other),
                        self.target_name(target)
                    ));
                }
            }
        }

        if let Roster::Teams(teams) = &self.roster {
            if teams.member_count() > teams.ceiling() {
                return Err(format!(
                    "team roster holds {} users over ceiling {}",
                    teams.member_count(),
                    teams.ceiling()
                ));
            }
        }

        // `None` marks a waitlist shared by every target.
        let waitlists: Vec<(Option<usize>, &[UserId])> = match &self.roster {
            Roster::Roles(slots) => slots
                .iter()
                .enumerate()
                .map(|(i, slot)| (Some(i), slot.waitlist.as_slice()))
                .collect(),
            Roster::Flat(flat) => vec![(None, flat.waitlist.as_slice())],
            Roster::Teams(teams) => vec![(None, teams.waitlist.as_slice())],
        };
        for (target, queue) in waitlists {
            let mut queued = HashSet::new();
            for user in queue {
                if !queued.insert(user) {
                    return Err(format!("user {user} is queued twice"));
                }
                let conflicts = seen
                    .get(user)
                    .is_some_and(|&rostered| target.is_none_or(|t| t == rostered));
                if conflicts {
                    return Err(format!(
                        "user {user} is both rostered and waitlisted for the same slot"
                    ));
                }
            }
        }
        Ok(())
    }
}
