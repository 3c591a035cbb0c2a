//! Lifecycle state machine.
//!
//! Every command against a record goes through [`SignupReducer`]. It gates
//! mutations on the record status, applies them through the assignment
//! engine and describes the resulting side effects; the runtime executes
//! them.
//!
//! ```text
//! Open --close--> Closed --reopen--> Open
//!   \                |
//!    +----delete-----+--> Deleted (runtime; record removed)
//! ```
//!
//! Stats are finalized once, on the first close. Reopen and delete never
//! reverse that.

use crate::assignment::{self, Mutation, MutationKind};
use crate::effect::Effect;
use crate::environment::Clock;
use crate::error::SignupError;
use crate::ids::{ReactionKey, UserId};
use crate::record::{CloseInfo, EventRecord, RecordStatus};
use crate::reducer::Reducer;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Commands accepted for one record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignupAction {
    /// Place a user on a slot (atomic move)
    Assign {
        /// Who
        user: UserId,
        /// Where
        selector: Selector,
    },
    /// Take a user off a slot's roster
    Remove {
        /// Who
        user: UserId,
        /// Which slot
        selector: Selector,
    },
    /// Queue a user on a slot's waitlist
    Waitlist {
        /// Who
        user: UserId,
        /// Which slot
        selector: Selector,
    },
    /// Live reaction added
    Join {
        /// Who reacted
        user: UserId,
        /// With what
        key: ReactionKey,
    },
    /// Live reaction removed
    Leave {
        /// Who un-reacted
        user: UserId,
        /// Which reaction
        key: ReactionKey,
    },
    /// Set or clear a user's auxiliary label
    SetLabel {
        /// Who
        user: UserId,
        /// New label (`None` clears)
        label: Option<String>,
    },
    /// Administrative no-show marking (allowed while closed)
    MarkNoShow {
        /// Who
        user: UserId,
    },
    /// Undo a no-show mark (allowed while closed)
    ClearNoShow {
        /// Who
        user: UserId,
    },
    /// Close signups
    Close {
        /// Who closed it (`None` for an external trigger)
        by: Option<UserId>,
        /// Optional reason
        reason: Option<String>,
    },
    /// Reopen signups
    Reopen,
}

impl SignupAction {
    /// Short name, used as a metrics label
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Assign { .. } => "assign",
            Self::Remove { .. } => "remove",
            Self::Waitlist { .. } => "waitlist",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::SetLabel { .. } => "set_label",
            Self::MarkNoShow { .. } => "mark_no_show",
            Self::ClearNoShow { .. } => "clear_no_show",
            Self::Close { .. } => "close",
            Self::Reopen => "reopen",
        }
    }
}

/// Dependencies of the lifecycle reducer.
#[derive(Clone)]
pub struct SignupEnvironment {
    /// Time source for close metadata
    pub clock: Arc<dyn Clock>,
}

impl SignupEnvironment {
    /// Creates a new environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl std::fmt::Debug for SignupEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignupEnvironment").finish_non_exhaustive()
    }
}

/// Reducer for signup records.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignupReducer;

impl SignupReducer {
    /// Creates a new reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for SignupReducer {
    type State = EventRecord;
    type Action = SignupAction;
    type Environment = SignupEnvironment;
    type Error = SignupError;

    fn reduce(
        &self,
        record: &mut EventRecord,
        action: SignupAction,
        env: &SignupEnvironment,
    ) -> Result<SmallVec<[Effect; 4]>, SignupError> {
        match action {
            SignupAction::Assign { user, selector } => {
                mutation_effects(assignment::assign(record, &user, &selector)?)
            },
            SignupAction::Remove { user, selector } => {
                mutation_effects(assignment::remove(record, &user, &selector)?)
            },
            SignupAction::Waitlist { user, selector } => {
                mutation_effects(assignment::waitlist(record, &user, &selector)?)
            },
            SignupAction::Join { user, key } => {
                mutation_effects(assignment::join(record, &user, &key)?)
            },
            SignupAction::Leave { user, key } => {
                mutation_effects(assignment::leave(record, &user, &key)?)
            },
            SignupAction::SetLabel { user, label } => {
                mutation_effects(assignment::set_label(record, &user, label)?)
            },
            SignupAction::MarkNoShow { user } => {
                if !record.rostered_users().contains(&&user) {
                    return Err(SignupError::NotSignedUp {
                        user,
                        slot: record.title.clone(),
                    });
                }
                if record.no_shows.insert(user) {
                    Ok(smallvec![Effect::Render])
                } else {
                    Ok(SmallVec::new())
                }
            },
            SignupAction::ClearNoShow { user } => {
                if record.no_shows.remove(&user) {
                    Ok(smallvec![Effect::Render])
                } else {
                    Ok(SmallVec::new())
                }
            },
            SignupAction::Close { by, reason } => {
                if record.status == RecordStatus::Closed {
                    return Err(SignupError::AlreadyClosed(record.id.clone()));
                }
                record.status = RecordStatus::Closed;
                record.close = Some(CloseInfo {
                    closed_by: by,
                    closed_at: env.clock.now(),
                    reason,
                });
                let mut effects: SmallVec<[Effect; 4]> =
                    smallvec![Effect::RemoveReactions, Effect::Render];
                if !record.stats_finalized {
                    record.stats_finalized = true;
                    effects.push(Effect::FinalizeStats);
                }
                tracing::info!(record_id = %record.id, "Record closed");
                Ok(effects)
            },
            SignupAction::Reopen => {
                if record.status == RecordStatus::Open {
                    return Err(SignupError::AlreadyOpen(record.id.clone()));
                }
                record.status = RecordStatus::Open;
                record.close = None;
                tracing::info!(record_id = %record.id, "Record reopened");
                Ok(smallvec![Effect::RestoreReactions, Effect::Render])
            },
        }
    }
}

fn mutation_effects(mutation: Mutation) -> Result<SmallVec<[Effect; 4]>, SignupError> {
    if mutation.kind == MutationKind::Unchanged {
        return Ok(SmallVec::new());
    }
    let mut effects: SmallVec<[Effect; 4]> = smallvec![Effect::Render];
    effects.extend(mutation.promotions.into_iter().map(Effect::Promoted));
    Ok(effects)
}
