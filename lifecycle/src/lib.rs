//! # Lifecycle
//!
//! Timeout and deadline primitives for the message-queue core.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Every wait names its bound, including
//!   "return immediately" and "wait forever"
//! - **Deadlines travel, durations don't**: A [`Timeout`] is converted to a
//!   [`Deadline`] once, at the API boundary, so retries and spurious wakeups
//!   never extend the total wait
//! - **Mechanism not policy**: Callers choose the bound, the core enforces it
//!
//! ## Core Concepts
//!
//! - `Timeout`: How long a caller is willing to wait
//! - `Deadline`: The absolute instant at which that wait ends

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// How long an operation may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeout {
    /// Do not wait; fail at once if no progress is possible
    Immediate,
    /// Wait at most this long
    After(Duration),
    /// Wait until the operation completes or is cancelled
    Forever,
}

impl Timeout {
    /// Creates a timeout from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Timeout::After(Duration::from_millis(millis))
    }

    /// Creates a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Timeout::After(Duration::from_secs(secs))
    }

    /// Returns the bounded duration, if any
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::Immediate => Some(Duration::ZERO),
            Timeout::After(duration) => Some(*duration),
            Timeout::Forever => None,
        }
    }

    /// Converts this timeout to a deadline starting at `now`
    pub fn to_deadline(&self, now: Instant) -> Deadline {
        match self {
            Timeout::Immediate => Deadline::at(now),
            Timeout::After(duration) => match now.checked_add(*duration) {
                Some(instant) => Deadline::at(instant),
                None => Deadline::never(),
            },
            Timeout::Forever => Deadline::never(),
        }
    }

    /// Converts this timeout to a deadline starting now
    pub fn start(&self) -> Deadline {
        self.to_deadline(Instant::now())
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Timeout::Immediate
        } else {
            Timeout::After(duration)
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Immediate => write!(f, "immediate"),
            Timeout::After(duration) => write!(f, "{}ms", duration.as_millis()),
            Timeout::Forever => write!(f, "forever"),
        }
    }
}

/// The absolute point in time at which a wait ends
///
/// `None` inside means the wait never ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    /// Creates a deadline at the specified instant
    pub fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// Creates a deadline that never passes
    pub fn never() -> Self {
        Self { instant: None }
    }

    /// Returns the instant of this deadline, if bounded
    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    /// Checks if the deadline has passed
    pub fn has_passed(&self, now: Instant) -> bool {
        match self.instant {
            Some(instant) => now >= instant,
            None => false,
        }
    }

    /// Checks if the deadline has passed as of now
    pub fn is_expired(&self) -> bool {
        self.has_passed(Instant::now())
    }

    /// Returns time remaining until the deadline
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed and
    /// `None` for a deadline that never passes.
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        self.instant
            .map(|instant| instant.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_durations() {
        assert_eq!(Timeout::Immediate.duration(), Some(Duration::ZERO));
        assert_eq!(
            Timeout::from_millis(100).duration(),
            Some(Duration::from_millis(100))
        );
        assert_eq!(Timeout::from_secs(5).duration(), Some(Duration::from_secs(5)));
        assert_eq!(Timeout::Forever.duration(), None);
    }

    #[test]
    fn test_timeout_to_deadline() {
        let now = Instant::now();
        let deadline = Timeout::from_millis(100).to_deadline(now);

        assert_eq!(deadline.instant(), Some(now + Duration::from_millis(100)));
        assert!(!deadline.has_passed(now));
        assert!(deadline.has_passed(now + Duration::from_millis(100)));
    }

    #[test]
    fn test_immediate_deadline_has_passed() {
        let now = Instant::now();
        let deadline = Timeout::Immediate.to_deadline(now);
        assert!(deadline.has_passed(now));
        assert_eq!(deadline.time_remaining(now), Some(Duration::ZERO));
    }

    #[test]
    fn test_forever_never_passes() {
        let now = Instant::now();
        let deadline = Timeout::Forever.to_deadline(now);
        assert!(!deadline.has_passed(now + Duration::from_secs(3600)));
        assert_eq!(deadline.time_remaining(now), None);
        assert_eq!(deadline, Deadline::never());
    }

    #[test]
    fn test_time_remaining() {
        let now = Instant::now();
        let deadline = Deadline::at(now + Duration::from_millis(50));

        assert_eq!(deadline.time_remaining(now), Some(Duration::from_millis(50)));
        assert_eq!(
            deadline.time_remaining(now + Duration::from_millis(80)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_timeout_from_duration() {
        assert_eq!(Timeout::from(Duration::ZERO), Timeout::Immediate);
        assert_eq!(
            Timeout::from(Duration::from_millis(3)),
            Timeout::After(Duration::from_millis(3))
        );
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(Timeout::Immediate.to_string(), "immediate");
        assert_eq!(Timeout::from_millis(250).to_string(), "250ms");
        assert_eq!(Timeout::Forever.to_string(), "forever");
    }

    #[test]
    fn test_timeout_serde() {
        let json = serde_json::to_string(&Timeout::Forever).unwrap();
        let back: Timeout = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Timeout::Forever);
    }
}
