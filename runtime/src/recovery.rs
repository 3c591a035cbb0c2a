//! Last-resort recovery from channel history.
//!
//! When a record was lost entirely but its post is still up, the rendered
//! text carries enough to rebuild it. The scanner reads recent posts in the
//! configured channels, keeps the ones bearing our marker whose record is
//! missing, parses them back and stores the result.
//!
//! History scans are slow, so [`RecoveryScanner::spawn`] runs one on its own
//! task under a deadline. Commands never wait on it.

use crate::config::RecoveryConfig;
use crate::metrics::RecoveryMetrics;
use crate::store::{Persist, RecordStore};
use rollcall_core::environment::Clock;
use rollcall_core::platform::ChannelHistory;
use rollcall_core::recovery::{parse_rendered, read_marker};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A channel to scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Guild id
    pub guild_id: String,
    /// Channel id
    pub channel_id: String,
}

impl ChannelRef {
    /// Creates a new `ChannelRef`
    #[must_use]
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Channels read successfully
    pub channels: usize,
    /// Channels whose history could not be read
    pub channel_failures: usize,
    /// Posts looked at
    pub posts: usize,
    /// Posts without our marker
    pub unmarked: usize,
    /// Marked posts whose record already exists
    pub existing: usize,
    /// Records rebuilt and stored
    pub recovered: usize,
    /// Marked posts that did not parse
    pub unparsable: usize,
}

/// Rebuilds lost records from rendered posts.
pub struct RecoveryScanner {
    store: Arc<RecordStore>,
    history: Arc<dyn ChannelHistory>,
    clock: Arc<dyn Clock>,
    history_limit: usize,
    timeout: Duration,
}

impl std::fmt::Debug for RecoveryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryScanner")
            .field("history_limit", &self.history_limit)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RecoveryScanner {
    /// Create a scanner.
    #[must_use]
    pub fn new(
        store: Arc<RecordStore>,
        history: Arc<dyn ChannelHistory>,
        clock: Arc<dyn Clock>,
        config: &RecoveryConfig,
    ) -> Self {
        Self {
            store,
            history,
            clock,
            history_limit: config.history_limit,
            timeout: config.timeout(),
        }
    }

    /// Override the scan deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scan `channels` in order and store every record that can be rebuilt.
    ///
    /// A channel whose history cannot be read is logged and skipped.
    pub async fn scan(&self, channels: &[ChannelRef]) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for channel in channels {
            let posts = match self
                .history
                .recent_posts(&channel.guild_id, &channel.channel_id, self.history_limit)
                .await
            {
                Ok(posts) => posts,
                Err(error) => {
                    report.channel_failures += 1;
                    tracing::warn!(
                        guild_id = %channel.guild_id,
                        channel_id = %channel.channel_id,
                        %error,
                        "Channel history unavailable; skipping"
                    );
                    continue;
                },
            };
            report.channels += 1;

            for rendered in posts {
                report.posts += 1;
                let id = match read_marker(&rendered.content) {
                    Ok(Some((_, id))) => id,
                    Ok(None) => {
                        report.unmarked += 1;
                        continue;
                    },
                    Err(error) => {
                        report.unparsable += 1;
                        tracing::debug!(message_id = %rendered.post.message_id, %error, "Unreadable marker");
                        continue;
                    },
                };
                if self.store.contains(&id).await {
                    report.existing += 1;
                    continue;
                }

                match parse_rendered(&rendered.post, &rendered.content, self.clock.now()) {
                    Ok(record) => {
                        if self.store.insert_new(record, Persist::WriteThrough).await {
                            report.recovered += 1;
                            tracing::info!(record_id = %id, message_id = %rendered.post.message_id, "Record recovered from post");
                        } else {
                            report.existing += 1;
                        }
                    },
                    Err(error) => {
                        report.unparsable += 1;
                        tracing::warn!(record_id = %id, %error, "Marked post could not be parsed");
                    },
                }
            }
        }

        RecoveryMetrics::record_recovered(report.recovered);
        tracing::info!(
            channels = report.channels,
            posts = report.posts,
            recovered = report.recovered,
            unparsable = report.unparsable,
            "Recovery scan complete"
        );
        report
    }

    /// Run [`RecoveryScanner::scan`] on a background task.
    ///
    /// The handle resolves to `None` if the scan overran its deadline;
    /// records stored before the deadline stay stored.
    pub fn spawn(self: Arc<Self>, channels: Vec<ChannelRef>) -> JoinHandle<Option<RecoveryReport>> {
        tokio::spawn(async move {
            match tokio::time::timeout(self.timeout, self.scan(&channels)).await {
                Ok(report) => Some(report),
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.timeout.as_secs(),
                        "Recovery scan timed out"
                    );
                    None
                },
            }
        })
    }
}
