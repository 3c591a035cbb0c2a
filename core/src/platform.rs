//! Collaborators on the chat platform side.
//!
//! The core never talks to the platform directly. The runtime drives these
//! traits: reaction membership comes in through [`MembershipSource`], rendered
//! posts and notifications go out through the rest. All calls are treated as
//! transient I/O: a failure is logged and skipped, never fatal.

use crate::error::PlatformError;
use crate::ids::{PostRef, ReactionKey, UserId};
use crate::promotion::Promotion;
use crate::reconcile::Change;
use crate::record::EventRecord;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by platform calls.
pub type PlatformFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, PlatformError>> + Send + 'a>>;

/// Source of live reaction membership.
pub trait MembershipSource: Send + Sync {
    /// Whether the hosting post still exists.
    ///
    /// `Ok(false)` means confirmed gone; an `Err` means we could not tell.
    fn post_exists<'a>(&'a self, post: &'a PostRef) -> PlatformFuture<'a, bool>;

    /// Users currently reacting to `post` with `key`.
    fn fetch_members<'a>(
        &'a self,
        post: &'a PostRef,
        key: &'a ReactionKey,
    ) -> PlatformFuture<'a, Vec<UserId>>;
}

/// Re-renders the hosting post after a mutation.
pub trait Renderer: Send + Sync {
    /// Replace the post's content with a fresh view of `record`.
    fn render<'a>(&'a self, record: &'a EventRecord) -> PlatformFuture<'a, ()>;
}

/// Receives structured audit entries and promotion notices.
pub trait AuditSink: Send + Sync {
    /// Changes resolved by one reconciliation pass over `record`.
    fn changes<'a>(&'a self, record: &'a EventRecord, changes: &'a [Change])
    -> PlatformFuture<'a, ()>;

    /// A user moved up off a waitlist.
    fn promoted<'a>(
        &'a self,
        record: &'a EventRecord,
        promotion: &'a Promotion,
    ) -> PlatformFuture<'a, ()>;
}

/// Adds and removes the reaction affordances on the hosting post.
pub trait ReactionControl: Send + Sync {
    /// Strip signup reactions (on close).
    fn remove_reactions<'a>(&'a self, record: &'a EventRecord) -> PlatformFuture<'a, ()>;

    /// Seed signup reactions again (on reopen).
    fn restore_reactions<'a>(&'a self, record: &'a EventRecord) -> PlatformFuture<'a, ()>;
}

/// One-shot attendance statistics, run on the first close of a record.
pub trait StatsSink: Send + Sync {
    /// Record final attendance for `record`.
    fn finalize<'a>(&'a self, record: &'a EventRecord) -> PlatformFuture<'a, ()>;
}

/// A post as it currently reads on the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPost {
    /// Where it lives
    pub post: PostRef,
    /// Its text content
    pub content: String,
}

/// Read access to recent channel history (last-resort recovery).
pub trait ChannelHistory: Send + Sync {
    /// Up to `limit` of the most recent posts in `channel`, newest first.
    fn recent_posts<'a>(
        &'a self,
        guild_id: &'a str,
        channel_id: &'a str,
        limit: usize,
    ) -> PlatformFuture<'a, Vec<RenderedPost>>;
}
