use std::time::{Duration, Instant};

/// When a running progress value is worth persisting
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    /// Absolute percentage-point increase that always triggers a write
    pub min_step: u8,
    /// Elapsed time since the last write that triggers a write
    pub max_interval: Duration,
    /// At or above this value every increase is written
    pub flush_at: u8,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            min_step: 5,
            max_interval: Duration::from_millis(500),
            flush_at: 95,
        }
    }
}

impl ThrottlePolicy {
    /// Pure predicate over the last write and a candidate value.
    /// Values that do not exceed the last written one are never written.
    pub fn should_write(&self, last_progress: u8, last_write: Instant, next: u8, now: Instant) -> bool {
        if next <= last_progress {
            return false;
        }
        next - last_progress >= self.min_step
            || now.saturating_duration_since(last_write) >= self.max_interval
            || next >= self.flush_at
    }
}

/// Stateful wrapper tracking the last persisted value
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    policy: ThrottlePolicy,
    last_progress: u8,
    last_write: Instant,
}

impl ProgressThrottle {
    /// Start from a value that has already been written at `at`
    pub fn starting_at(policy: ThrottlePolicy, progress: u8, at: Instant) -> Self {
        Self {
            policy,
            last_progress: progress,
            last_write: at,
        }
    }

    /// Decide whether `progress` should be written now; records it if so
    pub fn offer(&mut self, progress: u8, now: Instant) -> bool {
        if self
            .policy
            .should_write(self.last_progress, self.last_write, progress, now)
        {
            self.last_progress = progress;
            self.last_write = now;
            true
        } else {
            false
        }
    }

    pub fn last_written(&self) -> u8 {
        self.last_progress
    }
}
