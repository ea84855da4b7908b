use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of wall-clock stamps and timers for the capture loop. Swapping it out lets tests run
/// the scheduler on paused tokio time with a fixed calendar date.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    /// Wall-clock time used for artifact names and capture stamps.
    fn time(&self) -> DateTime<Utc>;

    /// Monotonic time used for ordering ticks.
    fn instant(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock anchored at a fixed calendar time that advances together with tokio's (possibly
/// paused) timer.
#[derive(Clone)]
pub struct AnchoredClock {
    start_time: DateTime<Utc>,
    reference: Instant,
}

impl AnchoredClock {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            reference: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for AnchoredClock {
    fn time(&self) -> DateTime<Utc> {
        self.start_time + self.reference.elapsed()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
