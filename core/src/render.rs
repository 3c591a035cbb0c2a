//! Canonical text view of a record.
//!
//! The rendering collaborator may decorate posts however it likes, but the
//! content it publishes starts from [`render_text`]. The layout is stable
//! because [`crate::recovery::parse_rendered`] reads it back when a record's
//! persisted state is lost.
//!
//! ```text
//! # Raid night
//! Starts: 2025-01-01T20:00:00+00:00
//! When: Friday 8pm
//! Status: open
//!
//! ## Tank [🛡️] (1/2)
//! - <@111> (Paladin)
//! Waitlist: <@222>, <@333>
//!
//! -# rollcall:v1:raid:r-42
//! ```

use crate::ids::{RecordId, UserId};
use crate::record::{EventRecord, RecordKind, RecordStatus, Roster};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Prefix of the footer line that identifies a post as ours.
pub const MARKER_PREFIX: &str = "-# rollcall:";

/// Current marker format version.
pub const MARKER_VERSION: &str = "v1";

/// The footer marker line for a record.
#[must_use]
pub fn marker(kind: RecordKind, id: &RecordId) -> String {
    format!("{MARKER_PREFIX}{MARKER_VERSION}:{kind}:{id}")
}

/// Format a user mention.
#[must_use]
pub fn mention(user: &UserId) -> String {
    format!("<@{user}>")
}

/// Render the canonical text view of `record`.
#[must_use]
pub fn render_text(record: &EventRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", record.title);
    if let Some(starts_at) = record.schedule.starts_at {
        let _ = writeln!(out, "Starts: {}", starts_at.to_rfc3339());
    }
    if let Some(description) = &record.schedule.description {
        let _ = writeln!(out, "When: {description}");
    }
    let status = match record.status {
        RecordStatus::Open => "open",
        RecordStatus::Closed => "closed",
    };
    let _ = writeln!(out, "Status: {status}");

    match &record.roster {
        Roster::Roles(slots) => {
            for slot in slots {
                let _ = writeln!(
                    out,
                    "\n## {} [{}] ({}/{})",
                    slot.name,
                    slot.key,
                    slot.users.len(),
                    slot.capacity
                );
                write_rows(&mut out, &slot.users, &slot.labels);
                write_waitlist(&mut out, &slot.waitlist);
            }
        },
        Roster::Flat(flat) => {
            let _ = writeln!(
                out,
                "\n## Roster [{}] ({}/{})",
                flat.key,
                flat.users.len(),
                flat.capacity
            );
            write_rows(&mut out, &flat.users, &flat.labels);
            write_waitlist(&mut out, &flat.waitlist);
        },
        Roster::Teams(teams) => {
            let _ = writeln!(
                out,
                "Signups: [{}] ({}/{})",
                teams.key,
                teams.member_count(),
                teams.capacity
            );
            for team in &teams.teams {
                let _ = writeln!(
                    out,
                    "\n## {} ({}/{})",
                    team.name,
                    team.users.len(),
                    team.capacity
                );
                write_rows(&mut out, &team.users, &teams.labels);
            }
            if !teams.waitlist.is_empty() {
                out.push('\n');
                write_waitlist(&mut out, &teams.waitlist);
            }
        },
    }

    let _ = write!(out, "\n{}", marker(record.kind(), &record.id));
    out
}

fn write_rows(out: &mut String, users: &[UserId], labels: &BTreeMap<UserId, String>) {
    for user in users {
        match labels.get(user) {
            Some(label) => {
                let _ = writeln!(out, "- {} ({label})", mention(user));
            },
            None => {
                let _ = writeln!(out, "- {}", mention(user));
            },
        }
    }
}

fn write_waitlist(out: &mut String, waitlist: &[UserId]) {
    if waitlist.is_empty() {
        return;
    }
    let queue: Vec<String> = waitlist.iter().map(mention).collect();
    let _ = writeln!(out, "Waitlist: {}", queue.join(", "));
}
