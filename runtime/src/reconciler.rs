//! Startup and resync reconciliation.
//!
//! The pure merge lives in [`rollcall_core::reconcile`]; this module feeds it.
//! For each record it confirms the hosting post still exists, fetches every
//! slot's live membership with a bounded number of requests in flight, merges,
//! fills vacancies from waitlists and writes the result back as a deferred
//! store write. [`Reconciler::reconcile_all`] runs guilds in parallel and
//! records within a guild one after another, then flushes once.
//!
//! A failure touches only its own unit: a slot whose fetch fails is frozen
//! for this pass, a record whose post lookup fails is skipped, a render that
//! fails is logged. The next pass picks up whatever was missed.

use crate::config::ReconcileConfig;
use crate::effects::Collaborators;
use crate::error::ReconcileError;
use crate::health::HealthCheck;
use crate::metrics::ReconcileMetrics;
use crate::store::{FlushReport, Persist, RecordStore};
use futures::stream::{self, StreamExt};
use rollcall_core::effect::Effect;
use rollcall_core::error::{PlatformError, SignupError};
use rollcall_core::ids::{RecordId, UserId};
use rollcall_core::platform::MembershipSource;
use rollcall_core::promotion::{Promotion, promote_all};
use rollcall_core::reconcile::{
    Change, ChangeAction, MembershipSnapshot, ReconcileOptions, reconcile, tally,
};
use rollcall_core::record::EventRecord;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Tuning for a reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Slot fetches in flight per record
    pub membership_concurrency: usize,
    /// Guilds processed in parallel
    pub guild_concurrency: usize,
    /// Options handed to the merge
    pub options: ReconcileOptions,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from(&ReconcileConfig::default())
    }
}

impl From<&ReconcileConfig> for ReconcilerSettings {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            membership_concurrency: config.membership_concurrency.max(1),
            guild_concurrency: config.guild_concurrency.max(1),
            options: ReconcileOptions {
                ignored_users: config.ignored_users.iter().map(UserId::new).collect(),
            },
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Live membership agreed with the record
    Unchanged {
        /// Informational `deferred` entries emitted anyway
        deferred: usize,
    },
    /// The record converged to a new state
    Updated {
        /// Audit entries, in processing order
        changes: Vec<Change>,
        /// Waitlisted users moved up afterwards
        promotions: Vec<Promotion>,
    },
    /// The hosting post is gone; the record was removed
    Purged,
    /// Closed records keep their roster; only the post check ran
    Closed,
}

/// Summary of a full pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records visited
    pub records: usize,
    /// Records whose roster changed
    pub updated: usize,
    /// Records that already agreed
    pub unchanged: usize,
    /// Records purged for a missing post
    pub purged: usize,
    /// Closed records skipped
    pub closed: usize,
    /// Records skipped because of an error
    pub failed: usize,
    /// Audit entries by action name
    pub changes: BTreeMap<String, usize>,
    /// Users promoted off waitlists
    pub promotions: usize,
    /// Outcome of the closing flush
    pub flush: FlushReport,
    /// Wall-clock duration of the pass
    pub duration: Duration,
}

impl ReconcileReport {
    fn absorb(&mut self, id: &RecordId, result: Result<RecordOutcome, ReconcileError>) {
        self.records += 1;
        match result {
            Ok(RecordOutcome::Unchanged { deferred }) => {
                self.unchanged += 1;
                if deferred > 0 {
                    *self
                        .changes
                        .entry(ChangeAction::Deferred.to_string())
                        .or_insert(0) += deferred;
                }
            },
            Ok(RecordOutcome::Updated { changes, promotions }) => {
                self.updated += 1;
                for (action, count) in tally(&changes) {
                    *self.changes.entry(action).or_insert(0) += count;
                }
                self.promotions += promotions.len();
            },
            Ok(RecordOutcome::Purged) => self.purged += 1,
            Ok(RecordOutcome::Closed) => self.closed += 1,
            Err(error) => {
                self.failed += 1;
                ReconcileMetrics::record_failure();
                tracing::warn!(record_id = %id, %error, "Record skipped by reconciliation");
            },
        }
    }
}

/// Drives reconciliation against the record store.
pub struct Reconciler {
    store: Arc<RecordStore>,
    membership: Arc<dyn MembershipSource>,
    collaborators: Collaborators,
    settings: ReconcilerSettings,
    has_run: AtomicBool,
    last_failures: AtomicUsize,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        store: Arc<RecordStore>,
        membership: Arc<dyn MembershipSource>,
        collaborators: Collaborators,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            membership,
            collaborators,
            settings,
            has_run: AtomicBool::new(false),
            last_failures: AtomicUsize::new(0),
        }
    }

    /// Reconcile every stored record and flush once.
    #[tracing::instrument(skip(self), name = "reconcile_all")]
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let start = Instant::now();

        let mut by_guild: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
        for record in self.store.all().await {
            by_guild
                .entry(record.post.guild_id.clone())
                .or_default()
                .push(record.id);
        }
        for ids in by_guild.values_mut() {
            ids.sort();
        }
        let guilds = by_guild.len();

        let results: Vec<Vec<(RecordId, Result<RecordOutcome, ReconcileError>)>> =
            stream::iter(by_guild)
                .map(|(guild_id, ids)| async move {
                    tracing::debug!(%guild_id, records = ids.len(), "Reconciling guild");
                    let mut results = Vec::with_capacity(ids.len());
                    for id in ids {
                        let result = self.reconcile_record(&id).await;
                        results.push((id, result));
                    }
                    results
                })
                .buffer_unordered(self.settings.guild_concurrency)
                .collect()
                .await;

        let mut report = ReconcileReport::default();
        for (id, result) in results.into_iter().flatten() {
            report.absorb(&id, result);
        }
        report.flush = self.store.flush().await;
        report.duration = start.elapsed();

        ReconcileMetrics::record_pass(report.duration, &report.changes);
        self.has_run.store(true, Ordering::Release);
        self.last_failures.store(report.failed, Ordering::Release);

        tracing::info!(
            guilds,
            records = report.records,
            updated = report.updated,
            purged = report.purged,
            failed = report.failed,
            promotions = report.promotions,
            changes = ?report.changes,
            duration_ms = report.duration.as_millis(),
            "Reconciliation pass complete"
        );
        report
    }

    /// Reconcile one record and flush it straight away.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile_record`].
    pub async fn resync(&self, id: &RecordId) -> Result<RecordOutcome, ReconcileError> {
        let outcome = self.reconcile_record(id).await?;
        self.store.flush().await;
        Ok(outcome)
    }

    /// Reconcile one record. The write is deferred to the next flush.
    ///
    /// # Errors
    ///
    /// - `RECORD_NOT_FOUND` if the record is not in the store
    /// - [`ReconcileError::Platform`] if the post lookup fails
    #[tracing::instrument(skip(self, id), fields(record_id = %id))]
    pub async fn reconcile_record(&self, id: &RecordId) -> Result<RecordOutcome, ReconcileError> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| SignupError::RecordNotFound(id.clone()))?;

        if !self.membership.post_exists(&record.post).await? {
            self.store.delete(id).await;
            ReconcileMetrics::record_purge();
            tracing::info!("Hosting post is gone; record purged");
            return Ok(RecordOutcome::Purged);
        }
        if !record.is_open() {
            return Ok(RecordOutcome::Closed);
        }

        let snapshot = self.snapshot(&record).await;
        let options = &self.settings.options;
        let (committed, merged) = self
            .store
            .update(id, Persist::Deferred, |current| {
                // A close may have committed while membership was fetched.
                if !current.is_open() {
                    return Ok::<_, ReconcileError>(None);
                }
                let result = reconcile(current, &snapshot, options);
                let changed = result.is_changed();
                *current = result.record;
                let promotions = promote_all(current);
                Ok(Some((result.changes, promotions, changed)))
            })
            .await?;
        let Some((changes, promotions, changed)) = merged else {
            tracing::debug!("Record closed during the pass; left untouched");
            return Ok(RecordOutcome::Closed);
        };

        if !changed && promotions.is_empty() {
            let deferred = changes.len();
            if deferred > 0 {
                self.collaborators
                    .run(&committed, [Effect::Audit(changes)])
                    .await;
            }
            return Ok(RecordOutcome::Unchanged { deferred });
        }

        tracing::debug!(
            changes = changes.len(),
            promotions = promotions.len(),
            "Record converged"
        );
        self.collaborators
            .run(&committed, convergence_effects(&changes, &promotions))
            .await;
        Ok(RecordOutcome::Updated {
            changes,
            promotions,
        })
    }

    /// Reconciler health: degraded if the last pass skipped records.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let failures = self.last_failures.load(Ordering::Acquire);
        let check = if failures > 0 {
            HealthCheck::degraded(
                "reconciler",
                format!("last pass skipped {failures} records"),
            )
        } else {
            HealthCheck::healthy("reconciler")
        };
        check
            .with_metadata("has_run", self.has_run.load(Ordering::Acquire))
            .with_metadata("last_failures", failures)
    }

    async fn snapshot(&self, record: &EventRecord) -> MembershipSnapshot {
        let post = &record.post;
        let fetched: Vec<_> = stream::iter(record.reaction_keys())
            .map(|key| async move {
                let result: Result<Vec<UserId>, PlatformError> =
                    self.membership.fetch_members(post, &key).await;
                (key, result)
            })
            .buffer_unordered(self.settings.membership_concurrency)
            .collect()
            .await;

        let mut snapshot = MembershipSnapshot::new();
        for (key, result) in fetched {
            match result {
                Ok(users) => snapshot.observe(key, users),
                Err(error) => {
                    ReconcileMetrics::record_fetch_failure();
                    tracing::warn!(%key, %error, "Membership fetch failed; slot left as stored");
                    snapshot.mark_unavailable(key);
                },
            }
        }
        snapshot
    }
}

fn convergence_effects(changes: &[Change], promotions: &[Promotion]) -> Vec<Effect> {
    let mut effects = Vec::with_capacity(promotions.len() + 2);
    if !changes.is_empty() {
        effects.push(Effect::Audit(changes.to_vec()));
    }
    effects.extend(promotions.iter().cloned().map(Effect::Promoted));
    effects.push(Effect::Render);
    effects
}
