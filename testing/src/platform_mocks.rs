//! Stub and recording platform collaborators.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use rollcall_core::error::PlatformError;
use rollcall_core::ids::{PostRef, ReactionKey, RecordId, UserId};
use rollcall_core::platform::{
    AuditSink, ChannelHistory, MembershipSource, PlatformFuture, ReactionControl, RenderedPost,
    Renderer, StatsSink,
};
use rollcall_core::promotion::Promotion;
use rollcall_core::reconcile::Change;
use rollcall_core::record::EventRecord;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

// ============================================================================
// Membership
// ============================================================================

#[derive(Debug, Default)]
struct MembershipState {
    members: HashMap<(PostRef, ReactionKey), Vec<UserId>>,
    missing_posts: HashSet<PostRef>,
    unreachable_posts: HashSet<PostRef>,
    failing_keys: HashSet<(PostRef, ReactionKey)>,
}

/// Scripted reaction membership.
///
/// Unscripted keys report no reactions. Tracks the peak number of fetches in
/// flight so tests can check concurrency bounds.
#[derive(Clone, Debug, Default)]
pub struct StubMembershipSource {
    state: Arc<RwLock<MembershipState>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

impl StubMembershipSource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every fetch
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Script the users reacting to `post` with `key`
    pub fn set_members(&self, post: &PostRef, key: &str, users: Vec<UserId>) {
        self.state
            .write()
            .unwrap()
            .members
            .insert((post.clone(), ReactionKey::new(key)), users);
    }

    /// Report `post` as deleted
    pub fn mark_missing(&self, post: &PostRef) {
        self.state.write().unwrap().missing_posts.insert(post.clone());
    }

    /// Fail the existence check for `post`
    pub fn mark_unreachable(&self, post: &PostRef) {
        self.state
            .write()
            .unwrap()
            .unreachable_posts
            .insert(post.clone());
    }

    /// Fail every fetch of `key` on `post`
    pub fn fail_key(&self, post: &PostRef, key: &str) {
        self.state
            .write()
            .unwrap()
            .failing_keys
            .insert((post.clone(), ReactionKey::new(key)));
    }

    /// Highest number of concurrent fetches seen
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Total fetches made
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl MembershipSource for StubMembershipSource {
    fn post_exists<'a>(&'a self, post: &'a PostRef) -> PlatformFuture<'a, bool> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            if state.unreachable_posts.contains(post) {
                return Err(PlatformError::Request("post lookup failed".to_string()));
            }
            Ok(!state.missing_posts.contains(post))
        })
    }

    fn fetch_members<'a>(
        &'a self,
        post: &'a PostRef,
        key: &'a ReactionKey,
    ) -> PlatformFuture<'a, Vec<UserId>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let result = {
                let state = self.state.read().unwrap();
                let lookup = (post.clone(), key.clone());
                if state.failing_keys.contains(&lookup) {
                    Err(PlatformError::Request(format!("fetch of {key} failed")))
                } else {
                    Ok(state.members.get(&lookup).cloned().unwrap_or_default())
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

// ============================================================================
// Recording collaborators
// ============================================================================

/// Renderer that records which records were rendered.
#[derive(Clone, Debug, Default)]
pub struct RecordingRenderer {
    rendered: Arc<Mutex<Vec<EventRecord>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingRenderer {
    /// Create a new renderer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every render fail
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Ids rendered, in order
    #[must_use]
    pub fn rendered_ids(&self) -> Vec<RecordId> {
        self.rendered
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.id.clone())
            .collect()
    }

    /// The most recent render of a record
    #[must_use]
    pub fn last(&self, id: &RecordId) -> Option<EventRecord> {
        self.rendered
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|record| &record.id == id)
            .cloned()
    }
}

impl Renderer for RecordingRenderer {
    fn render<'a>(&'a self, record: &'a EventRecord) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PlatformError::Request("edit failed".to_string()));
            }
            self.rendered.lock().unwrap().push(record.clone());
            Ok(())
        })
    }
}

/// Audit sink that keeps everything it is told.
#[derive(Clone, Debug, Default)]
pub struct RecordingAuditSink {
    changes: Arc<Mutex<Vec<(RecordId, Change)>>>,
    promotions: Arc<Mutex<Vec<(RecordId, Promotion)>>>,
}

impl RecordingAuditSink {
    /// Create a new sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every change received, with its record id
    #[must_use]
    pub fn changes(&self) -> Vec<(RecordId, Change)> {
        self.changes.lock().unwrap().clone()
    }

    /// Every promotion received, with its record id
    #[must_use]
    pub fn promotions(&self) -> Vec<(RecordId, Promotion)> {
        self.promotions.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn changes<'a>(
        &'a self,
        record: &'a EventRecord,
        changes: &'a [Change],
    ) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            let mut recorded = self.changes.lock().unwrap();
            recorded.extend(changes.iter().map(|c| (record.id.clone(), c.clone())));
            Ok(())
        })
    }

    fn promoted<'a>(
        &'a self,
        record: &'a EventRecord,
        promotion: &'a Promotion,
    ) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.promotions
                .lock()
                .unwrap()
                .push((record.id.clone(), promotion.clone()));
            Ok(())
        })
    }
}

/// Reaction control that records removals and restorations.
#[derive(Clone, Debug, Default)]
pub struct RecordingReactions {
    removed: Arc<Mutex<Vec<RecordId>>>,
    restored: Arc<Mutex<Vec<RecordId>>>,
}

impl RecordingReactions {
    /// Create a new recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records whose reactions were removed
    #[must_use]
    pub fn removed(&self) -> Vec<RecordId> {
        self.removed.lock().unwrap().clone()
    }

    /// Records whose reactions were restored
    #[must_use]
    pub fn restored(&self) -> Vec<RecordId> {
        self.restored.lock().unwrap().clone()
    }
}

impl ReactionControl for RecordingReactions {
    fn remove_reactions<'a>(&'a self, record: &'a EventRecord) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.removed.lock().unwrap().push(record.id.clone());
            Ok(())
        })
    }

    fn restore_reactions<'a>(&'a self, record: &'a EventRecord) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.restored.lock().unwrap().push(record.id.clone());
            Ok(())
        })
    }
}

/// Stats sink that counts finalizations per record.
#[derive(Clone, Debug, Default)]
pub struct RecordingStats {
    finalized: Arc<Mutex<Vec<RecordId>>>,
}

impl RecordingStats {
    /// Create a new recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `id` was finalized
    #[must_use]
    pub fn finalized_count(&self, id: &RecordId) -> usize {
        self.finalized
            .lock()
            .unwrap()
            .iter()
            .filter(|finalized| *finalized == id)
            .count()
    }
}

impl StatsSink for RecordingStats {
    fn finalize<'a>(&'a self, record: &'a EventRecord) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.finalized.lock().unwrap().push(record.id.clone());
            Ok(())
        })
    }
}

// ============================================================================
// Channel history
// ============================================================================

/// Scripted channel history.
#[derive(Clone, Debug, Default)]
pub struct StubChannelHistory {
    posts: Arc<RwLock<HashMap<(String, String), Vec<RenderedPost>>>>,
    delay: Option<Duration>,
}

impl StubChannelHistory {
    /// Create an empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every history call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add a post (newest last)
    pub fn push(&self, post: PostRef, content: impl Into<String>) {
        self.posts
            .write()
            .unwrap()
            .entry((post.guild_id.clone(), post.channel_id.clone()))
            .or_default()
            .push(RenderedPost {
                post,
                content: content.into(),
            });
    }
}

impl ChannelHistory for StubChannelHistory {
    fn recent_posts<'a>(
        &'a self,
        guild_id: &'a str,
        channel_id: &'a str,
        limit: usize,
    ) -> PlatformFuture<'a, Vec<RenderedPost>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let posts = self.posts.read().unwrap();
            Ok(posts
                .get(&(guild_id.to_string(), channel_id.to_string()))
                .map(|posts| posts.iter().rev().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }
}
