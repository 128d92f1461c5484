use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info, warn};

use common::UiDriver;

/// Outcome of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub instrument: String,
    pub timeframe: String,
}

/// Polls the UI driver until the target instrument and timeframe are both
/// selected, or the deadline before entry passes.
///
/// Driver errors count as a failed poll. Only the deadline stops retrying,
/// and a failed gate is reported rather than raised. A poll still in flight
/// at the deadline is abandoned.
pub struct ReadinessGate {
    driver: Arc<dyn UiDriver>,
    poll_interval: Duration,
}

impl ReadinessGate {
    pub fn new(driver: Arc<dyn UiDriver>, poll_interval: Duration) -> Self {
        Self {
            driver,
            poll_interval,
        }
    }

    pub async fn confirm_ready(
        &self,
        instrument: &str,
        entry_instant: DateTime<FixedOffset>,
        timeframe: &str,
        deadline_margin: chrono::Duration,
    ) -> Readiness {
        let deadline = entry_instant.with_timezone(&Utc) - deadline_margin;
        let mut attempts = 0u32;

        let ready = loop {
            let remaining = match (deadline - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => break false,
            };
            attempts += 1;
            match tokio::time::timeout(remaining, self.poll(instrument, timeframe)).await {
                // A confirmation that lands after the deadline is too late to use.
                Ok(true) => break Utc::now() < deadline,
                Ok(false) => {}
                Err(_) => {
                    warn!(instrument, timeframe, "Readiness poll still running at deadline");
                    break false;
                }
            }
            let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(remaining.min(self.poll_interval)).await;
        };

        if ready {
            info!(instrument, timeframe, attempts, "UI ready");
        } else {
            warn!(instrument, timeframe, attempts, deadline = %deadline, "UI not ready before deadline");
        }
        Readiness {
            ready,
            instrument: instrument.to_string(),
            timeframe: timeframe.to_string(),
        }
    }

    /// One attempt at both selections. Both must succeed in the same poll.
    async fn poll(&self, instrument: &str, timeframe: &str) -> bool {
        match self.driver.select_instrument(instrument).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(instrument, "Instrument not selected yet");
                return false;
            }
            Err(e) => {
                warn!(instrument, error = %e, "select_instrument failed");
                return false;
            }
        }
        match self.driver.select_timeframe(timeframe).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(timeframe, "Timeframe not selected yet");
                false
            }
            Err(e) => {
                warn!(timeframe, error = %e, "select_timeframe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{Direction, Error, Result};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Instrument selection fails with an error on the first poll, returns
    /// false until `ready_after` polls, then succeeds.
    struct FlakyDriver {
        polls: AtomicU32,
        ready_after: u32,
    }

    #[async_trait]
    impl UiDriver for FlakyDriver {
        async fn select_instrument(&self, _name: &str) -> Result<bool> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                return Err(Error::Driver("page still loading".into()));
            }
            Ok(n >= self.ready_after)
        }

        async fn select_timeframe(&self, _timeframe: &str) -> Result<bool> {
            Ok(true)
        }

        async fn place_trade(&self, _direction: Direction, _amount: f64) -> Result<bool> {
            Ok(true)
        }
    }

    fn gate(ready_after: u32) -> (ReadinessGate, Arc<FlakyDriver>) {
        let driver = Arc::new(FlakyDriver {
            polls: AtomicU32::new(0),
            ready_after,
        });
        (ReadinessGate::new(driver.clone(), Duration::from_millis(10)), driver)
    }

    fn entry_in(ms: i64) -> DateTime<FixedOffset> {
        (Utc::now() + chrono::Duration::milliseconds(ms)).fixed_offset()
    }

    #[tokio::test]
    async fn retries_through_errors_until_ready() {
        let (gate, driver) = gate(3);
        let readiness = tokio::time::timeout(
            Duration::from_secs(2),
            gate.confirm_ready("EUR/USD", entry_in(1_000), "M1", chrono::Duration::zero()),
        )
        .await
        .unwrap();

        assert!(readiness.ready);
        assert_eq!(readiness.instrument, "EUR/USD");
        assert_eq!(readiness.timeframe, "M1");
        assert_eq!(driver.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_at_deadline() {
        let (gate, driver) = gate(u32::MAX);
        let started = std::time::Instant::now();
        let readiness = tokio::time::timeout(
            Duration::from_secs(2),
            gate.confirm_ready("EUR/USD", entry_in(250), "M1", chrono::Duration::milliseconds(100)),
        )
        .await
        .unwrap();

        assert!(!readiness.ready);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(driver.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn past_deadline_fails_without_polling() {
        let (gate, driver) = gate(1);
        let readiness = gate
            .confirm_ready("EUR/USD", entry_in(10_000), "M1", chrono::Duration::seconds(20))
            .await;
        assert!(!readiness.ready);
        assert_eq!(driver.polls.load(Ordering::SeqCst), 0);
    }

    /// Selection never returns.
    struct HungDriver;

    #[async_trait]
    impl UiDriver for HungDriver {
        async fn select_instrument(&self, _name: &str) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(true)
        }

        async fn select_timeframe(&self, _timeframe: &str) -> Result<bool> {
            Ok(true)
        }

        async fn place_trade(&self, _direction: Direction, _amount: f64) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn hung_poll_is_cut_off_at_deadline() {
        let gate = ReadinessGate::new(Arc::new(HungDriver), Duration::from_millis(10));
        let started = std::time::Instant::now();
        let readiness = tokio::time::timeout(
            Duration::from_secs(2),
            gate.confirm_ready("EUR/USD", entry_in(300), "M1", chrono::Duration::milliseconds(100)),
        )
        .await
        .unwrap();

        assert!(!readiness.ready);
        assert!(started.elapsed() < Duration::from_millis(800));
    }
}
