//! Slot selection.
//!
//! Commands name their destination either by 1-based position or by free-text
//! label. A [`SlotIndex`] is built once per record and resolves selectors to a
//! target index:
//!
//! 1. exact match on reaction key or name (case-sensitive key, case-insensitive name)
//! 2. otherwise a case-insensitive substring match on name or key, which must be unique
//!
//! Ambiguity is always an error; the index never guesses.

use crate::error::SignupError;
use crate::ids::ReactionKey;
use crate::record::{EventRecord, Roster};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a command names its destination slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selector {
    /// 1-based position in declared order
    Position(usize),
    /// Free-text label (reaction key or slot name, full or partial)
    Label(String),
}

impl Selector {
    /// Build a selector from raw user input: digits become a position.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        trimmed
            .parse::<usize>()
            .map_or_else(|_| Self::Label(trimmed.to_string()), Self::Position)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(position) => write!(f, "#{position}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<usize> for Selector {
    fn from(value: usize) -> Self {
        Self::Position(value)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    target: usize,
    name: String,
    name_folded: String,
    key: Option<ReactionKey>,
}

/// Typed lookup index for one record.
#[derive(Debug, Clone)]
pub struct SlotIndex {
    entries: Vec<Entry>,
    by_key: HashMap<ReactionKey, usize>,
}

impl SlotIndex {
    /// Build the index for a record.
    #[must_use]
    pub fn build(record: &EventRecord) -> Self {
        let entries: Vec<Entry> = match &record.roster {
            Roster::Roles(slots) => slots
                .iter()
                .enumerate()
                .map(|(target, slot)| Entry {
                    target,
                    name: slot.name.clone(),
                    name_folded: slot.name.to_lowercase(),
                    key: Some(slot.key.clone()),
                })
                .collect(),
            Roster::Flat(flat) => vec![Entry {
                target: 0,
                name: flat.key.to_string(),
                name_folded: flat.key.as_str().to_lowercase(),
                key: Some(flat.key.clone()),
            }],
            Roster::Teams(teams) => teams
                .teams
                .iter()
                .enumerate()
                .map(|(target, team)| Entry {
                    target,
                    name: team.name.clone(),
                    name_folded: team.name.to_lowercase(),
                    key: None,
                })
                .collect(),
        };

        let by_key = entries
            .iter()
            .filter_map(|entry| entry.key.clone().map(|key| (key, entry.target)))
            .collect();

        Self { entries, by_key }
    }

    /// Number of selectable targets
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the record has nothing to select
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Target fed by a reaction key (raid slots and flat rosters)
    #[must_use]
    pub fn by_key(&self, key: &ReactionKey) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    /// Resolve a selector to a target index.
    ///
    /// # Errors
    ///
    /// - [`SignupError::PositionOutOfRange`] for a position outside `1..=len`
    /// - [`SignupError::AmbiguousSelector`] when several slots partially match
    /// - [`SignupError::SlotNotFound`] when nothing matches
    pub fn resolve(&self, selector: &Selector) -> Result<usize, SignupError> {
        match selector {
            Selector::Position(position) => {
                if *position == 0 || *position > self.entries.len() {
                    return Err(SignupError::PositionOutOfRange {
                        position: *position,
                        len: self.entries.len(),
                    });
                }
                Ok(self.entries[*position - 1].target)
            },
            Selector::Label(label) => self.resolve_label(label),
        }
    }

    fn resolve_label(&self, label: &str) -> Result<usize, SignupError> {
        let needle = label.trim();
        if needle.is_empty() {
            return Err(SignupError::SlotNotFound {
                selector: label.to_string(),
            });
        }

        if let Some(target) = self.by_key.get(&ReactionKey::new(needle)) {
            return Ok(*target);
        }

        let folded = needle.to_lowercase();
        if let Some(entry) = self.entries.iter().find(|entry| entry.name_folded == folded) {
            return Ok(entry.target);
        }

        let partial: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.name_folded.contains(&folded)
                    || entry
                        .key
                        .as_ref()
                        .is_some_and(|key| key.as_str().to_lowercase().contains(&folded))
            })
            .collect();

        match partial.as_slice() {
            [] => Err(SignupError::SlotNotFound {
                selector: label.to_string(),
            }),
            [entry] => Ok(entry.target),
            many => Err(SignupError::AmbiguousSelector {
                selector: label.to_string(),
                matches: many.iter().map(|entry| entry.name.clone()).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PostRef;
    use crate::record::RoleSlot;
    use chrono::Utc;

    fn index() -> SlotIndex {
        let record = EventRecord::new(
            "r1",
            PostRef::new("g", "c", "m"),
            "Raid",
            Roster::Roles(vec![
                RoleSlot::new("Tank", "🛡️", 2),
                RoleSlot::new("Healer", "💚", 2),
                RoleSlot::new("Melee DPS", "⚔️", 4),
                RoleSlot::new("Ranged DPS", "🏹", 4),
            ]),
            Utc::now(),
        );
        SlotIndex::build(&record)
    }

    #[test]
    fn resolves_positions() {
        let index = index();
        assert_eq!(index.resolve(&Selector::Position(1)), Ok(0));
        assert_eq!(index.resolve(&Selector::Position(4)), Ok(3));
        assert!(matches!(
            index.resolve(&Selector::Position(0)),
            Err(SignupError::PositionOutOfRange { .. })
        ));
        assert!(matches!(
            index.resolve(&Selector::Position(5)),
            Err(SignupError::PositionOutOfRange { position: 5, len: 4 })
        ));
    }

    #[test]
    fn exact_match_beats_partial() {
        let index = index();
        assert_eq!(index.resolve(&Selector::Label("healer".into())), Ok(1));
        assert_eq!(index.resolve(&Selector::Label("💚".into())), Ok(1));
        assert_eq!(index.resolve(&Selector::Label("TANK".into())), Ok(0));
    }

    #[test]
    fn unique_partial_match_resolves() {
        let index = index();
        assert_eq!(index.resolve(&Selector::Label("heal".into())), Ok(1));
        assert_eq!(index.resolve(&Selector::Label("melee".into())), Ok(2));
    }

    #[test]
    fn ambiguous_partial_match_is_an_error() {
        let index = index();
        let err = index.resolve(&Selector::Label("dps".into()));
        assert_eq!(
            err,
            Err(SignupError::AmbiguousSelector {
                selector: "dps".into(),
                matches: vec!["Melee DPS".into(), "Ranged DPS".into()],
            })
        );
    }

    #[test]
    fn unknown_label_is_not_found() {
        let index = index();
        assert!(matches!(
            index.resolve(&Selector::Label("bard".into())),
            Err(SignupError::SlotNotFound { .. })
        ));
    }

    #[test]
    fn parse_turns_digits_into_positions() {
        assert_eq!(Selector::parse(" 3 "), Selector::Position(3));
        assert_eq!(Selector::parse("Tank"), Selector::Label("Tank".into()));
    }
}
