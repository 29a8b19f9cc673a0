//! Server-authoritative time.
//!
//! Clients never trust their local wall clock for request timestamps: they
//! fetch the server's time once and then advance it themselves, one second per
//! tick. The server uses its own wall clock directly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{self, Duration, Instant},
};
use tracing::debug;

use crate::error::{Error, Result};

const TICK: Duration = Duration::from_secs(1);

/// Anything able to tell the current time for request stamping and checks.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Result<DateTime<Utc>>;
}

/// The local wall clock; authoritative on the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

/// Remote source of the authoritative time (the server's `GET /now`).
#[async_trait]
pub trait ServerTime: Send + Sync {
    async fn fetch_now(&self) -> Result<DateTime<Utc>>;
}

/// Client clock: synchronised once, then advanced by a local ticker.
///
/// Resolution is one second and drift is never corrected.
#[derive(Default)]
pub struct Clock {
    now: Arc<Mutex<Option<DateTime<Utc>>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the authoritative time and start ticking.
    ///
    /// Only the first call has any effect; returns whether this call synced.
    /// Must be called from inside a Tokio runtime.
    pub fn sync(&self, authoritative: DateTime<Utc>) -> bool {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            debug!("clock already synced, ignoring {authoritative}");
            return false;
        }
        *self.now.lock() = Some(authoritative);

        let now = Arc::clone(&self.now);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + TICK, TICK);
            loop {
                interval.tick().await;
                if let Some(t) = now.lock().as_mut() {
                    *t = *t + chrono::Duration::seconds(1);
                }
            }
        }));
        debug!(time = %authoritative, "clock synced");
        true
    }

    /// Fetch the authoritative time from `source` and sync with it.
    pub async fn sync_from(&self, source: &dyn ServerTime) -> Result<DateTime<Utc>> {
        let authoritative = source.fetch_now().await?;
        self.sync(authoritative);
        self.time()
    }

    pub fn time(&self) -> Result<DateTime<Utc>> {
        (*self.now.lock()).ok_or(Error::NotSynced)
    }

    pub fn is_synced(&self) -> bool {
        self.now.lock().is_some()
    }

    /// Stop the ticker; the last reading stays available.
    pub fn stop(&self) {
        if let Some(ticker) = self.ticker.lock().as_ref() {
            ticker.abort();
        }
    }
}

impl TimeSource for Clock {
    fn now(&self) -> Result<DateTime<Utc>> {
        self.time()
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    struct FixedServer(DateTime<Utc>);

    #[async_trait]
    impl ServerTime for FixedServer {
        async fn fetch_now(&self) -> Result<DateTime<Utc>> {
            Ok(self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unsynced_clock_refuses_to_answer() {
        let clock = Clock::new();
        assert!(matches!(clock.time(), Err(Error::NotSynced)));
        assert!(!clock.is_synced());
    }

    #[tokio::test(start_paused = true)]
    async fn advances_one_second_per_tick() {
        let clock = Clock::new();
        assert!(clock.sync(t0()));
        assert_eq!(clock.time().unwrap(), t0());

        time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(clock.time().unwrap(), t0() + chrono::Duration::seconds(3));
    }

    #[tokio::test(start_paused = true)]
    async fn second_sync_is_ignored() {
        let clock = Clock::new();
        clock.sync(t0());
        assert!(!clock.sync(t0() + chrono::Duration::hours(1)));
        assert_eq!(clock.time().unwrap(), t0());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_freezes_the_reading() {
        let clock = Clock::new();
        clock.sync(t0());
        time::sleep(Duration::from_millis(1_500)).await;
        clock.stop();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(clock.time().unwrap(), t0() + chrono::Duration::seconds(1));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_from_server_time() {
        let clock = Clock::new();
        let synced = clock.sync_from(&FixedServer(t0())).await.unwrap();
        assert_eq!(synced, t0());
        assert_eq!(TimeSource::now(&clock).unwrap(), t0());
    }
}
