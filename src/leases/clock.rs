// Renewal clock - decides when a held lease must be renewed

use crate::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks time since the lease was last acquired or renewed
///
/// A renewal is due once the elapsed time reaches `lease_duration -
/// safety_margin`. The clock only moves forward through [`reset`], which
/// callers invoke after a renewal has succeeded.
///
/// [`reset`]: RenewalClock::reset
#[derive(Debug, Clone)]
pub struct RenewalClock {
    last_renewal: Instant,
    threshold: Duration,
    renewals: u32,
}

impl RenewalClock {
    /// Starts the clock now. Fails unless `0 < safety_margin < lease_duration`.
    pub fn start(lease_duration: Duration, safety_margin: Duration) -> Result<Self> {
        if safety_margin.is_zero() || safety_margin >= lease_duration {
            return Err(Error::Config(format!(
                "safety margin {safety_margin:?} must be positive and shorter than the lease duration {lease_duration:?}"
            )));
        }

        Ok(Self {
            last_renewal: Instant::now(),
            threshold: lease_duration - safety_margin,
            renewals: 0,
        })
    }

    /// Elapsed time after which a renewal is due
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn elapsed(&self) -> Duration {
        self.last_renewal.elapsed()
    }

    /// Time left until a renewal is due, zero once it is.
    pub fn until_due(&self) -> Duration {
        self.threshold.saturating_sub(self.elapsed())
    }

    pub fn is_due(&self) -> bool {
        self.elapsed() >= self.threshold
    }

    /// Records a successful renewal and restarts the clock.
    pub fn reset(&mut self) {
        self.last_renewal = Instant::now();
        self.renewals += 1;
    }

    pub fn renewals(&self) -> u32 {
        self.renewals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_margin_not_below_duration() {
        let lease = Duration::from_secs(60);
        assert!(RenewalClock::start(lease, Duration::from_secs(60)).is_err());
        assert!(RenewalClock::start(lease, Duration::from_secs(61)).is_err());
        assert!(RenewalClock::start(lease, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_at_threshold() {
        let mut clock =
            RenewalClock::start(Duration::from_secs(60), Duration::from_secs(5)).unwrap();
        assert_eq!(clock.threshold(), Duration::from_secs(55));

        tokio::time::sleep(Duration::from_secs(54)).await;
        assert!(!clock.is_due());
        assert_eq!(clock.until_due(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(clock.is_due());
        assert_eq!(clock.until_due(), Duration::ZERO);

        clock.reset();
        assert!(!clock.is_due());
        assert_eq!(clock.renewals(), 1);
    }

    proptest! {
        #[test]
        fn threshold_leaves_exactly_the_margin(lease_secs in 2u64..=3600, margin_secs in 1u64..3600) {
            prop_assume!(margin_secs < lease_secs);
            let lease = Duration::from_secs(lease_secs);
            let margin = Duration::from_secs(margin_secs);

            let clock = RenewalClock::start(lease, margin).unwrap();
            prop_assert_eq!(clock.threshold() + margin, lease);
        }
    }
}
