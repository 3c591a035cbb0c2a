//! # Rollcall Core
//!
//! Signup state and reconciliation engine for scheduled group events.
//!
//! This crate is the functional core: every operation takes a record, mutates
//! or rebuilds it in memory, and describes side effects for the runtime to
//! execute. Nothing here performs I/O.
//!
//! ## Components
//!
//! - **Record model** ([`record`]): one [`EventRecord`] per event, holding role
//!   slots, a flat roster or teams, each with a FIFO waitlist
//! - **Assignment engine** ([`assignment`]): assign/remove/waitlist plus the
//!   live reaction paths, built on `detach_from_all` + `attach`
//! - **Promotion processor** ([`promotion`]): fills freed seats from waitlists
//! - **Reconciliation engine** ([`reconcile`]): merges live reaction membership
//!   with the stored record and returns an audit trail
//! - **Lifecycle state machine** ([`lifecycle`]): Open → Closed → Open, gating
//!   mutations and emitting one-shot stats finalization
//! - **Recovery** ([`render`], [`recovery`]): canonical text view and its inverse
//!
//! ## Example
//!
//! ```
//! use rollcall_core::prelude::*;
//! use chrono::Utc;
//!
//! let mut record = EventRecord::new(
//!     "raid-1",
//!     PostRef::new("guild", "channel", "message"),
//!     "Raid night",
//!     Roster::Roles(vec![RoleSlot::new("Tank", "🛡️", 1)]),
//!     Utc::now(),
//! );
//! let user = UserId::new("1234");
//! assignment::assign(&mut record, &user, &Selector::parse("tank")).ok();
//! assert_eq!(record.users_of(0), &[user]);
//! ```

pub mod assignment;
pub mod backend;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod platform;
pub mod promotion;
pub mod reconcile;
pub mod record;
pub mod recovery;
pub mod render;
pub mod selector;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ErrorKind, PlatformError, RecoveryError, SignupError, StorageError};
pub use ids::{PostRef, ReactionKey, RecordId, UserId};
pub use record::{EventRecord, RecordKind, RecordStatus, RoleSlot, Roster};

/// Reducer module - the core trait for command handling
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// Invalid commands are rejected with a typed error and leave the state as it
/// was; the caller is expected to reduce against a scratch copy and commit it
/// only on success.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Error`: Why an action was rejected
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The rejection type
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// Uses `SmallVec<[Effect; 4]>` to avoid heap allocations for the
        /// common case of 0-4 effects.
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is not legal in the current state.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<SmallVec<[Effect; 4]>, Self::Error>;
    }
}

/// Effect module - side effect descriptions
///
/// Effects are values, not execution. The runtime's `SignupService` runs
/// them after the mutated record has been committed to the store.
pub mod effect {
    use crate::promotion::Promotion;
    use crate::reconcile::Change;

    /// Effect type - describes a side effect to be executed
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Effect {
        /// Re-render the hosting post from the committed record
        Render,
        /// Tell a user they moved up off a waitlist
        Promoted(Promotion),
        /// Record final attendance (first close only)
        FinalizeStats,
        /// Strip signup reactions from the post
        RemoveReactions,
        /// Seed signup reactions on the post again
        RestoreReactions,
        /// Forward structured change records to the audit collaborator
        Audit(Vec<Change>),
    }

    impl Effect {
        /// Short name, for logging
        #[must_use]
        pub const fn name(&self) -> &'static str {
            match self {
                Self::Render => "render",
                Self::Promoted(_) => "promoted",
                Self::FinalizeStats => "finalize_stats",
                Self::RemoveReactions => "remove_reactions",
                Self::RestoreReactions => "restore_reactions",
                Self::Audit(_) => "audit",
            }
        }
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by [`Utc::now`].
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Everything a caller usually needs.
pub mod prelude {
    pub use crate::assignment::{self, Mutation, MutationKind};
    pub use crate::effect::Effect;
    pub use crate::environment::{Clock, SystemClock};
    pub use crate::error::{ErrorKind, PlatformError, RecoveryError, SignupError, StorageError};
    pub use crate::ids::{PostRef, ReactionKey, RecordId, UserId};
    pub use crate::lifecycle::{SignupAction, SignupEnvironment, SignupReducer};
    pub use crate::promotion::{Promotion, promote, promote_all};
    pub use crate::reconcile::{
        Change, ChangeAction, MembershipSnapshot, Observation, ReconcileOptions, Reconciliation,
        reconcile,
    };
    pub use crate::record::{
        EventRecord, FlatRoster, Placement, RecordKind, RecordStatus, RoleSlot, Roster, Team,
        TeamRoster,
    };
    pub use crate::reducer::Reducer;
    pub use crate::selector::{Selector, SlotIndex};
}
