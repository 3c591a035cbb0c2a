//! Waitlist promotion.
//!
//! When a roster loses an occupant, the head of the waitlist serving it moves
//! up. Promotion only mutates state and reports who moved; telling the user is
//! somebody else's job.

use crate::ids::UserId;
use crate::record::{EventRecord, Roster};
use serde::{Deserialize, Serialize};

/// A user moved from a waitlist onto a roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Who was promoted
    pub user: UserId,
    /// Target index they landed in
    pub target: usize,
    /// Display name of that target
    pub slot: String,
}

/// Fill one vacancy in `target` from the head of its waitlist.
///
/// Safe to call redundantly: returns `None` when the waitlist is empty or the
/// target (or a team roster's record-wide ceiling) is already full. Queue
/// entries for users who are already rostered elsewhere are dropped.
pub fn promote(record: &mut EventRecord, target: usize) -> Option<Promotion> {
    while record.has_room(target) {
        let head = {
            let waitlist = record.waitlist_mut(target)?;
            if waitlist.is_empty() {
                return None;
            }
            waitlist.remove(0)
        };

        if record.rostered_users().contains(&&head) {
            tracing::debug!(user = %head, "Dropping stale waitlist entry for rostered user");
            continue;
        }

        record.users_mut(target)?.push(head.clone());
        return Some(Promotion {
            user: head,
            target,
            slot: record.target_name(target).to_string(),
        });
    }
    None
}

/// Fill every vacancy in the record, targets in declared order.
///
/// Idempotent: a second call on the result returns an empty list.
pub fn promote_all(record: &mut EventRecord) -> Vec<Promotion> {
    let mut promoted = Vec::new();
    for target in 0..record.target_count() {
        while let Some(promotion) = promote(record, target) {
            promoted.push(promotion);
        }
    }
    promoted
}

/// Promote into each vacated target once per vacancy.
pub(crate) fn promote_vacated(record: &mut EventRecord, vacated: &[usize]) -> Vec<Promotion> {
    let mut promoted = Vec::new();
    for &target in vacated {
        if let Some(promotion) = promote(record, target) {
            promoted.push(promotion);
        }
    }
    // A team roster's shared queue can also fill another team once the
    // ceiling frees up.
    if matches!(record.roster, Roster::Teams(_)) && !vacated.is_empty() {
        promoted.extend(promote_all(record));
    }
    promoted
}
