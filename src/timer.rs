use std::time;

/// A single deadline, checked by the waiting loop on every iteration.
#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<time::Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arms (or re-arms) the timer to expire `timeout` from now.
    pub fn set(&mut self, timeout: time::Duration) {
        self.deadline = Some(time::Instant::now() + timeout);
    }

    pub fn unset(&mut self) {
        self.deadline = None;
    }

    pub fn is_set(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => time::Instant::now() >= deadline,
            None => false,
        }
    }

    /// Returns the time remaining until the timer expires, or `None` if it is not armed.
    pub fn remaining(&self) -> Option<time::Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(time::Instant::now()))
    }
}

/// The shorter of two optional waits, where `None` means unbounded.
pub fn min_timeout(
    a: Option<time::Duration>,
    b: Option<time::Duration>,
) -> Option<time::Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
