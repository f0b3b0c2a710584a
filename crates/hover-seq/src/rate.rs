use std::time::{Duration, Instant};

use anyhow::Result;

/// Fixed-rate loop ticker.
#[derive(Debug)]
pub struct Rate {
    period: Duration,
    next: Instant,
}

impl Rate {
    pub fn new(hz: f32) -> Result<Self> {
        anyhow::ensure!(hz.is_finite() && hz > 0.0, "loop rate must be positive, got {} Hz", hz);
        // whole nanoseconds, rounded down so the loop never runs slower than `hz`
        let period = Duration::from_nanos((1e9 / f64::from(hz)).floor() as u64);
        Ok(Self { period, next: Instant::now() + period })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next tick. Returns false when the tick was already missed.
    pub fn sleep(&mut self) -> bool {
        let now = Instant::now();
        if now < self.next {
            std::thread::sleep(self.next - now);
            self.next += self.period;
            return true;
        }
        // More than a full period behind: restart the schedule instead of bursting.
        if now - self.next > self.period {
            self.next = now + self.period;
        } else {
            self.next += self.period;
        }
        false
    }
}
