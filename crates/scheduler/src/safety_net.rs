use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// One-shot liveness timer raced against the authoritative re-sample.
#[derive(Clone, Copy, Debug)]
pub struct SafetyNet {
    window: Duration,
}

impl SafetyNet {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn arm(&self) -> ArmedSafetyNet {
        ArmedSafetyNet {
            deadline: Instant::now() + self.window,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum NetOutcome<T> {
    Completed(T),
    Fired,
}

#[derive(Debug)]
pub struct ArmedSafetyNet {
    deadline: Instant,
}

impl ArmedSafetyNet {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Drives `work` until it finishes or the deadline passes. Dropping the
    /// losing branch disarms the timer or abandons the work.
    pub async fn guard<F>(self, work: F) -> NetOutcome<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            output = work => NetOutcome::Completed(output),
            _ = sleep_until(self.deadline) => NetOutcome::Fired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn completes_when_work_finishes_first() {
        let net = SafetyNet::new(Duration::from_secs(8));
        let outcome = net
            .arm()
            .guard(async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "reply"
            })
            .await;
        assert_eq!(outcome, NetOutcome::Completed("reply"));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_when_work_never_returns() {
        let net = SafetyNet::new(Duration::from_secs(8));
        let started = Instant::now();
        let outcome = net.arm().guard(std::future::pending::<()>()).await;
        assert_eq!(outcome, NetOutcome::Fired);
        assert!(started.elapsed() >= Duration::from_secs(8));
    }
}
