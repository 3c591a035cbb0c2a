//! Effect execution.
//!
//! Effects are run in the order the reducer returned them, after the record
//! they describe has been committed. Every collaborator call is transient
//! I/O: a failure is logged, counted and skipped, and the remaining effects
//! still run.

use crate::metrics::CommandMetrics;
use rollcall_core::effect::Effect;
use rollcall_core::platform::{AuditSink, ReactionControl, Renderer, StatsSink};
use rollcall_core::record::EventRecord;
use std::sync::Arc;

/// The platform-side collaborators effects are delivered to.
#[derive(Clone)]
pub struct Collaborators {
    /// Re-renders hosting posts
    pub renderer: Arc<dyn Renderer>,
    /// Receives audit entries and promotion notices
    pub audit: Arc<dyn AuditSink>,
    /// Adds and strips reaction affordances
    pub reactions: Arc<dyn ReactionControl>,
    /// One-shot attendance statistics
    pub stats: Arc<dyn StatsSink>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Execute `effects` against `record`. Returns how many failed.
    pub async fn run<I>(&self, record: &EventRecord, effects: I) -> usize
    where
        I: IntoIterator<Item = Effect>,
    {
        let mut failed = 0;
        for effect in effects {
            let name = effect.name();
            let outcome = match &effect {
                Effect::Render => self.renderer.render(record).await,
                Effect::Promoted(promotion) => self.audit.promoted(record, promotion).await,
                Effect::FinalizeStats => self.stats.finalize(record).await,
                Effect::RemoveReactions => self.reactions.remove_reactions(record).await,
                Effect::RestoreReactions => self.reactions.restore_reactions(record).await,
                Effect::Audit(changes) => self.audit.changes(record, changes).await,
            };
            match outcome {
                Ok(()) => tracing::trace!(record_id = %record.id, effect = name, "Effect executed"),
                Err(error) => {
                    failed += 1;
                    CommandMetrics::record_effect_failure(name);
                    if matches!(effect, Effect::FinalizeStats) {
                        // The flag is already set; this close will not be counted.
                        tracing::error!(record_id = %record.id, %error, "Stats finalization failed");
                    } else {
                        tracing::warn!(record_id = %record.id, effect = name, %error, "Effect failed; skipping");
                    }
                },
            }
        }
        failed
    }
}
