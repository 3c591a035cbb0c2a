//! Record builders for tests.
//!
//! Builders write straight into the roster without going through the
//! assignment engine, so tests can set up inconsistent or stale states on
//! purpose (the kind reconciliation has to repair).

use crate::mocks::test_clock;
use rollcall_core::environment::Clock;
use rollcall_core::ids::{PostRef, ReactionKey, RecordId, UserId};
use rollcall_core::record::{EventRecord, FlatRoster, RoleSlot, Roster, Team, TeamRoster};
use std::collections::BTreeMap;

/// Turn string ids into users.
#[must_use]
pub fn users(ids: &[&str]) -> Vec<UserId> {
    ids.iter().map(|id| UserId::new(*id)).collect()
}

/// Default hosting post for a record id, in guild `g1`.
#[must_use]
pub fn post_for(id: &str) -> PostRef {
    PostRef::new("g1", "c1", format!("m-{id}"))
}

/// Builder for typed-role raids.
#[derive(Clone, Debug)]
pub struct RaidBuilder {
    id: RecordId,
    post: PostRef,
    title: String,
    slots: Vec<RoleSlot>,
}

impl RaidBuilder {
    /// Start a raid with no slots
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: RecordId::new(id),
            post: post_for(id),
            title: "Raid night".to_string(),
            slots: Vec::new(),
        }
    }

    /// Host the raid in another guild
    #[must_use]
    pub fn guild(mut self, guild_id: &str) -> Self {
        self.post.guild_id = guild_id.to_string();
        self
    }

    /// Set the title
    #[must_use]
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Append an empty slot
    #[must_use]
    pub fn slot(mut self, name: &str, key: &str, capacity: u32) -> Self {
        self.slots.push(RoleSlot::new(name, key, capacity));
        self
    }

    /// Put users on a slot's roster (no capacity checks)
    #[must_use]
    pub fn rostered(mut self, slot: usize, ids: &[&str]) -> Self {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.users.extend(users(ids));
        }
        self
    }

    /// Put users on a slot's waitlist
    #[must_use]
    pub fn waitlisted(mut self, slot: usize, ids: &[&str]) -> Self {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.waitlist.extend(users(ids));
        }
        self
    }

    /// Give a user a label on a slot
    #[must_use]
    pub fn label(mut self, slot: usize, id: &str, label: &str) -> Self {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.labels.insert(UserId::new(id), label.to_string());
        }
        self
    }

    /// Finish the record
    #[must_use]
    pub fn build(self) -> EventRecord {
        EventRecord::new(
            self.id,
            self.post,
            self.title,
            Roster::Roles(self.slots),
            test_clock().now(),
        )
    }
}

/// A flat roster keyed by `✅`.
#[must_use]
pub fn flat_roster(id: &str, capacity: u32, rostered: &[&str], waitlist: &[&str]) -> EventRecord {
    EventRecord::new(
        id,
        post_for(id),
        "Roster",
        Roster::Flat(FlatRoster {
            key: ReactionKey::new("✅"),
            capacity,
            users: users(rostered),
            waitlist: users(waitlist),
            labels: BTreeMap::new(),
        }),
        test_clock().now(),
    )
}

/// A team roster keyed by `✅`, one team per `(name, capacity, members)`.
#[must_use]
pub fn team_roster(
    id: &str,
    capacity: u32,
    teams: &[(&str, u32, &[&str])],
    waitlist: &[&str],
) -> EventRecord {
    EventRecord::new(
        id,
        post_for(id),
        "Teams",
        Roster::Teams(TeamRoster {
            key: ReactionKey::new("✅"),
            capacity,
            teams: teams
                .iter()
                .map(|(name, team_capacity, members)| Team {
                    name: (*name).to_string(),
                    capacity: *team_capacity,
                    users: users(members),
                })
                .collect(),
            waitlist: users(waitlist),
            labels: BTreeMap::new(),
        }),
        test_clock().now(),
    )
}

/// The usual four-role raid: Tank 2, Healer 2, Melee DPS 3, Ranged DPS 3.
#[must_use]
pub fn standard_raid(id: &str) -> EventRecord {
    RaidBuilder::new(id)
        .slot("Tank", "🛡️", 2)
        .slot("Healer", "💚", 2)
        .slot("Melee DPS", "⚔️", 3)
        .slot("Ranged DPS", "🏹", 3)
        .build()
}
