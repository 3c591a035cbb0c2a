//! # Rollcall Testing
//!
//! Testing utilities and helpers for Rollcall.
//!
//! This crate provides:
//! - A fixed clock for deterministic close metadata
//! - [`InMemoryBackend`]: persistence with failure injection
//! - Stub and recording platform collaborators
//! - Record builders for common scenarios
//! - [`ReducerTest`]: Given-When-Then harness for the lifecycle reducer
//! - proptest strategies for records and commands
//!
//! ## Example
//!
//! ```
//! use rollcall_testing::fixtures::RaidBuilder;
//!
//! let record = RaidBuilder::new("raid-1")
//!     .slot("Tank", "🛡️", 1)
//!     .slot("Healer", "💚", 2)
//!     .rostered(0, &["a"])
//!     .build();
//! assert_eq!(record.users_of(0).len(), 1);
//! ```

use chrono::{DateTime, Utc};
use rollcall_core::environment::Clock;

pub mod backend_mocks;
pub mod fixtures;
pub mod platform_mocks;
pub mod properties;
pub mod reducer_test;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rollcall_testing::mocks::FixedClock;
    /// use rollcall_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test subscriber that honours `RUST_LOG`. Safe to call from
/// every test; only the first call wins.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use backend_mocks::InMemoryBackend;
pub use mocks::{FixedClock, test_clock};
pub use platform_mocks::{
    RecordingAuditSink, RecordingReactions, RecordingRenderer, RecordingStats, StubChannelHistory,
    StubMembershipSource,
};
pub use reducer_test::ReducerTest;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
