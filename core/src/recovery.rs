//! Last-resort recovery: parse a rendered post back into a record.
//!
//! Used only when a post carries our marker but no persisted record exists.
//! Anything the view does not show (waitlisters' labels, close metadata,
//! who created the record) comes back empty.

use crate::error::RecoveryError;
use crate::ids::{PostRef, ReactionKey, RecordId, UserId};
use crate::record::{
    CloseInfo, EventRecord, FlatRoster, RecordKind, RecordStatus, RoleSlot, Roster, Team,
    TeamRoster,
};
use crate::render::{MARKER_PREFIX, MARKER_VERSION};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Kind and id named by a post's marker line, if it has one.
///
/// # Errors
///
/// `UnsupportedVersion` or `UnknownKind` for a marker we cannot read.
pub fn read_marker(content: &str) -> Result<Option<(RecordKind, RecordId)>, RecoveryError> {
    let Some(line) = content
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with(MARKER_PREFIX))
    else {
        return Ok(None);
    };
    let body = line.trim().trim_start_matches(MARKER_PREFIX);
    let mut parts = body.splitn(3, ':');
    let version = parts.next().unwrap_or_default();
    if version != MARKER_VERSION {
        return Err(RecoveryError::UnsupportedVersion(version.to_string()));
    }
    let kind_name = parts.next().unwrap_or_default();
    let kind = RecordKind::parse(kind_name)
        .ok_or_else(|| RecoveryError::UnknownKind(kind_name.to_string()))?;
    match parts.next() {
        Some(id) if !id.is_empty() => Ok(Some((kind, RecordId::new(id)))),
        _ => Err(RecoveryError::Malformed {
            line: content.lines().count(),
            reason: "marker has no record id".to_string(),
        }),
    }
}

/// One `## ...` section while parsing.
struct Section {
    name: String,
    key: Option<ReactionKey>,
    capacity: u32,
    users: Vec<UserId>,
    waitlist: Vec<UserId>,
    labels: BTreeMap<UserId, String>,
}

/// Rebuild a record from the text produced by
/// [`render_text`](crate::render::render_text).
///
/// Lines the parser does not recognize are ignored, so decoration added by
/// the rendering collaborator does not break recovery. Closed posts come
/// back closed with stats already finalized, so recovery never triggers a
/// second finalization.
///
/// # Errors
///
/// - [`RecoveryError::MissingMarker`] if the post is not ours
/// - [`RecoveryError::Malformed`] for a header, row or mention that does not parse
/// - [`RecoveryError::Invalid`] if the result breaks the roster invariants
pub fn parse_rendered(
    post: &PostRef,
    content: &str,
    recovered_at: DateTime<Utc>,
) -> Result<EventRecord, RecoveryError> {
    let (kind, id) = read_marker(content)?.ok_or(RecoveryError::MissingMarker)?;

    let mut title: Option<String> = None;
    let mut starts_at = None;
    let mut description = None;
    let mut status = RecordStatus::Open;
    let mut team_signups: Option<(ReactionKey, u32)> = None;
    let mut sections: Vec<Section> = Vec::new();
    let mut shared_waitlist: Vec<UserId> = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        let malformed = |reason: &str| RecoveryError::Malformed {
            line: line_no,
            reason: reason.to_string(),
        };

        if line.is_empty() || line.starts_with(MARKER_PREFIX) {
            continue;
        }
        if let Some(rest) = line.strip_prefix("## ") {
            let (name, key, capacity) =
                parse_header(rest).ok_or_else(|| malformed("bad section header"))?;
            sections.push(Section {
                name,
                key,
                capacity,
                users: Vec::new(),
                waitlist: Vec::new(),
                labels: BTreeMap::new(),
            });
        } else if let Some(rest) = line.strip_prefix("# ") {
            title.get_or_insert_with(|| rest.to_string());
        } else if let Some(rest) = line.strip_prefix("Starts: ") {
            let parsed = DateTime::parse_from_rfc3339(rest)
                .map_err(|_| malformed("bad start time"))?;
            starts_at = Some(parsed.with_timezone(&Utc));
        } else if let Some(rest) = line.strip_prefix("When: ") {
            description = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("Status: ") {
            status = match rest {
                "open" => RecordStatus::Open,
                "closed" => RecordStatus::Closed,
                _ => return Err(malformed("unknown status")),
            };
        } else if let Some(rest) = line.strip_prefix("Signups: ") {
            let (_, key, capacity) = parse_header(&format!("Signups {rest}"))
                .ok_or_else(|| malformed("bad signups line"))?;
            let key = key.ok_or_else(|| malformed("signups line has no key"))?;
            team_signups = Some((key, capacity));
        } else if let Some(rest) = line.strip_prefix("Waitlist: ") {
            let queue = rest
                .split(',')
                .map(|part| parse_mention(part.trim()).ok_or_else(|| malformed("bad mention")))
                .collect::<Result<Vec<_>, _>>()?;
            match (kind, sections.last_mut()) {
                (RecordKind::Teams, _) => shared_waitlist.extend(queue),
                (_, Some(section)) => section.waitlist.extend(queue),
                (_, None) => return Err(malformed("waitlist outside a section")),
            }
        } else if let Some(rest) = line.strip_prefix("- ") {
            let (user, label) = parse_row(rest).ok_or_else(|| malformed("bad roster row"))?;
            let section = sections
                .last_mut()
                .ok_or_else(|| malformed("roster row outside a section"))?;
            if let Some(label) = label {
                section.labels.insert(user.clone(), label);
            }
            section.users.push(user);
        }
    }

    let roster = match kind {
        RecordKind::Raid => Roster::Roles(
            sections
                .into_iter()
                .map(|section| {
                    let key = section.key.ok_or_else(|| {
                        RecoveryError::Invalid(format!("slot '{}' has no key", section.name))
                    })?;
                    Ok(RoleSlot {
                        name: section.name,
                        key,
                        capacity: section.capacity,
                        users: section.users,
                        waitlist: section.waitlist,
                        labels: section.labels,
                    })
                })
                .collect::<Result<Vec<_>, RecoveryError>>()?,
        ),
        RecordKind::Roster => {
            let mut sections = sections.into_iter();
            let (Some(section), None) = (sections.next(), sections.next()) else {
                return Err(RecoveryError::Invalid(
                    "a flat roster has exactly one section".to_string(),
                ));
            };
            Roster::Flat(FlatRoster {
                key: section
                    .key
                    .ok_or_else(|| RecoveryError::Invalid("roster has no key".to_string()))?,
                capacity: section.capacity,
                users: section.users,
                waitlist: section.waitlist,
                labels: section.labels,
            })
        },
        RecordKind::Teams => {
            let (key, capacity) = team_signups
                .ok_or_else(|| RecoveryError::Invalid("team roster has no signups line".into()))?;
            let mut labels = BTreeMap::new();
            let teams = sections
                .into_iter()
                .map(|section| {
                    labels.extend(section.labels);
                    Team {
                        name: section.name,
                        capacity: section.capacity,
                        users: section.users,
                    }
                })
                .collect();
            Roster::Teams(TeamRoster {
                key,
                capacity,
                teams,
                waitlist: shared_waitlist,
                labels,
            })
        },
    };

    let mut record = EventRecord::new(
        id,
        post.clone(),
        title.unwrap_or_default(),
        roster,
        recovered_at,
    );
    record.schedule.starts_at = starts_at;
    record.schedule.description = description;
    if status == RecordStatus::Closed {
        record.status = RecordStatus::Closed;
        record.close = Some(CloseInfo {
            closed_by: None,
            closed_at: recovered_at,
            reason: None,
        });
        record.stats_finalized = true;
    }

    record.validate_shape().map_err(RecoveryError::Invalid)?;
    record.check_invariants().map_err(RecoveryError::Invalid)?;
    Ok(record)
}

/// `"Tank [🛡️] (1/2)"` or `"Team 1 (1/2)"` into name, key and capacity.
fn parse_header(rest: &str) -> Option<(String, Option<ReactionKey>, u32)> {
    let (head, counts) = rest.rsplit_once(" (")?;
    let (_, capacity) = counts.strip_suffix(')')?.split_once('/')?;
    let capacity = capacity.trim().parse().ok()?;
    match head.rsplit_once(" [") {
        Some((name, key)) => Some((
            name.to_string(),
            Some(ReactionKey::new(key.strip_suffix(']')?)),
            capacity,
        )),
        None => Some((head.to_string(), None, capacity)),
    }
}

fn parse_row(rest: &str) -> Option<(UserId, Option<String>)> {
    match rest.split_once(' ') {
        Some((mention, label)) => {
            let label = label.strip_prefix('(')?.strip_suffix(')')?;
            Some((parse_mention(mention)?, Some(label.to_string())))
        },
        None => Some((parse_mention(rest)?, None)),
    }
}

fn parse_mention(text: &str) -> Option<UserId> {
    let id = text.strip_prefix("<@")?.strip_suffix('>')?;
    let id = id.strip_prefix('!').unwrap_or(id);
    (!id.is_empty()).then(|| UserId::new(id))
}
