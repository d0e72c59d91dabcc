use std::time::Instant;

/// Monotonic time source, injected into the harness so tests can script
/// deterministic samples.
pub trait MonotonicClock {
    /// Seconds elapsed since an arbitrary fixed origin. Only differences
    /// between two samples are meaningful.
    fn now_sec(&self) -> f64;
}

/// Production clock over [`std::time::Instant`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now_sec(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
