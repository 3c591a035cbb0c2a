//! Command surface.
//!
//! [`SignupService`] is what the transport layer calls. Each command is a
//! read-modify-write of one record under the store's write gate: the
//! reducer runs on a scratch copy, the copy is committed and persisted on
//! success, then the described effects are delivered. The whole
//! assignment → promotion chain completes before the call returns.

use crate::effects::Collaborators;
use crate::error::ServiceError;
use crate::metrics::CommandMetrics;
use crate::store::{Persist, RecordStore};
use rollcall_core::effect::Effect;
use rollcall_core::environment::Clock;
use rollcall_core::ids::{ReactionKey, RecordId, UserId};
use rollcall_core::lifecycle::{SignupAction, SignupEnvironment, SignupReducer};
use rollcall_core::record::EventRecord;
use rollcall_core::reducer::Reducer;
use rollcall_core::selector::Selector;
use rollcall_core::SignupError;
use std::sync::Arc;
use std::time::Instant;

/// Typed command API over the record store.
#[derive(Debug)]
pub struct SignupService {
    store: Arc<RecordStore>,
    reducer: SignupReducer,
    env: SignupEnvironment,
    collaborators: Collaborators,
}

impl SignupService {
    /// Create a service.
    #[must_use]
    pub fn new(store: Arc<RecordStore>, clock: Arc<dyn Clock>, collaborators: Collaborators) -> Self {
        Self {
            store,
            reducer: SignupReducer::new(),
            env: SignupEnvironment::new(clock),
            collaborators,
        }
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Register a new record and render it.
    ///
    /// # Errors
    ///
    /// - `INVALID_RECORD` if the roster shape or invariants are broken
    /// - [`ServiceError::Duplicate`] if the id is taken
    pub async fn create(&self, record: EventRecord) -> Result<EventRecord, ServiceError> {
        record
            .validate_shape()
            .and_then(|()| record.check_invariants())
            .map_err(SignupError::InvalidRecord)?;

        if !self.store.insert_new(record.clone(), Persist::WriteThrough).await {
            return Err(ServiceError::Duplicate(record.id));
        }
        tracing::info!(record_id = %record.id, kind = record.kind().as_str(), "Record created");
        self.collaborators.run(&record, [Effect::Render]).await;
        Ok(record)
    }

    /// Read a record.
    ///
    /// # Errors
    ///
    /// `RECORD_NOT_FOUND` if the id is unknown.
    pub async fn get(&self, id: &RecordId) -> Result<EventRecord, ServiceError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| SignupError::RecordNotFound(id.clone()).into())
    }

    /// Apply one command and deliver its effects.
    ///
    /// Returns the committed record.
    ///
    /// # Errors
    ///
    /// Any [`SignupError`] the reducer rejects the command with; the record
    /// is untouched in that case.
    #[tracing::instrument(skip(self, id, action), fields(record_id = %id, action = action.name()))]
    pub async fn execute(
        &self,
        id: &RecordId,
        action: SignupAction,
    ) -> Result<EventRecord, ServiceError> {
        let name = action.name();
        let start = Instant::now();

        let result = self
            .store
            .update(id, Persist::WriteThrough, |record| {
                self.reducer
                    .reduce(record, action, &self.env)
                    .map_err(ServiceError::from)
            })
            .await;

        match result {
            Ok((record, effects)) => {
                CommandMetrics::record(name, "ok", start.elapsed());
                CommandMetrics::record_promotions(
                    effects
                        .iter()
                        .filter(|effect| matches!(effect, Effect::Promoted(_)))
                        .count(),
                );
                if matches!(name, "close" | "reopen") {
                    tracing::info!(status = ?record.status, "Lifecycle transition");
                } else {
                    tracing::debug!(effects = effects.len(), "Command applied");
                }
                self.collaborators.run(&record, effects).await;
                Ok(record)
            },
            Err(error) => {
                CommandMetrics::record(name, "rejected", start.elapsed());
                tracing::debug!(code = error.code(), %error, "Command rejected");
                Err(error)
            },
        }
    }

    /// Place `user` on the slot `selector` names.
    ///
    /// # Errors
    ///
    /// See [`SignupService::execute`].
    pub async fn assign(
        &self,
        id: &RecordId,
        user: UserId,
        selector: Selector,
    ) -> Result<EventRecord, ServiceError> {
        self.execute(id, SignupAction::Assign { user, selector }).await
    }

    /// Take `user` off the slot `selector` names.
    ///
    /// # Errors
    ///
    /// See [`SignupService::execute`].
    pub async fn remove(
        &self,
        id: &RecordId,
        user: UserId,
        selector: Selector,
    ) -> Result<EventRecord, ServiceError> {
        self.execute(id, SignupAction::Remove { user, selector }).await
    }

    /// Queue `user` on the slot `selector` names.
    ///
    /// # Errors
    ///
    /// See [`SignupService::execute`].
    pub async fn waitlist(
        &self,
        id: &RecordId,
        user: UserId,
        selector: Selector,
    ) -> Result<EventRecord, ServiceError> {
        self.execute(id, SignupAction::Waitlist { user, selector }).await
    }

    /// Live "reaction added".
    ///
    /// # Errors
    ///
    /// See [`SignupService::execute`].
    pub async fn reaction_added(
        &self,
        id: &RecordId,
        user: UserId,
        key: ReactionKey,
    ) -> Result<EventRecord, ServiceError> {
        self.execute(id, SignupAction::Join { user, key }).await
    }

    /// Live "reaction removed".
    ///
    /// # Errors
    ///
    /// See [`SignupService::execute`].
    pub async fn reaction_removed(
        &self,
        id: &RecordId,
        user: UserId,
        key: ReactionKey,
    ) -> Result<EventRecord, ServiceError> {
        self.execute(id, SignupAction::Leave { user, key }).await
    }

    /// Close signups.
    ///
    /// # Errors
    ///
    /// `ALREADY_CLOSED`, or `RECORD_NOT_FOUND`.
    pub async fn close(
        &self,
        id: &RecordId,
        by: Option<UserId>,
        reason: Option<String>,
    ) -> Result<EventRecord, ServiceError> {
        self.execute(id, SignupAction::Close { by, reason }).await
    }

    /// Reopen signups.
    ///
    /// # Errors
    ///
    /// `ALREADY_OPEN`, or `RECORD_NOT_FOUND`.
    pub async fn reopen(&self, id: &RecordId) -> Result<EventRecord, ServiceError> {
        self.execute(id, SignupAction::Reopen).await
    }

    /// Remove a record outright. Returns the record as it was.
    ///
    /// Deleting never finalizes stats, whatever the record's status.
    ///
    /// # Errors
    ///
    /// `RECORD_NOT_FOUND` if the id is unknown.
    pub async fn delete(&self, id: &RecordId) -> Result<EventRecord, ServiceError> {
        let start = Instant::now();
        let record = self.get(id).await?;
        self.store.delete(id).await;
        CommandMetrics::record("delete", "ok", start.elapsed());
        tracing::info!(record_id = %id, "Record deleted");
        Ok(record)
    }
}
