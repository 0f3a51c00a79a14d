//! Wall-clock deadline and early-stop signal shared by both engines

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{CgrbError, Result};

/// Fixed wall-clock deadline captured at construction.
///
/// `Deadline` is `Copy` and never mutated after `start`, so every worker
/// gets its own copy and no synchronization is needed to query it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start_time: Instant,
    duration: Duration,
}

impl Deadline {
    /// Start a deadline `duration` from now
    pub fn start(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(CgrbError::InvalidConfig(
                "Deadline duration must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            start_time: Instant::now(),
            duration,
        })
    }

    /// Time since start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// True once the full duration has passed
    pub fn expired(&self) -> bool {
        self.elapsed() >= self.duration
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed())
    }
}

/// Cooperative early-stop flag.
///
/// The driver holds one clone and flips it on Ctrl+C; engines poll it at the
/// same points where they poll their deadline.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this signal to stop
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_zero_duration_is_invalid() {
        assert!(matches!(
            Deadline::start(Duration::ZERO),
            Err(CgrbError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_fresh_deadline_not_expired() {
        let deadline = Deadline::start(Duration::from_secs(60)).unwrap();
        assert!(!deadline.expired());
        assert!(deadline.remaining() > Duration::from_secs(59));
        assert!(deadline.remaining() <= Duration::from_secs(60));
    }

    #[test]
    fn test_deadline_expires() {
        let deadline = Deadline::start(Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(40));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(deadline.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_copies_expire_together() {
        let deadline = Deadline::start(Duration::from_millis(20)).unwrap();
        let copy = deadline;
        thread::sleep(Duration::from_millis(40));
        assert!(deadline.expired());
        assert!(copy.expired());
    }

    #[test]
    fn test_stop_signal_visible_through_clones() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_stopped());
        signal.stop();
        assert!(clone.is_stopped());
    }
}
