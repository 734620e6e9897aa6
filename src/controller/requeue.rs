//! Next-pass directive returned by every reconcile step
//!
//! Steps never sleep; the controller runtime performs the delay.

use std::time::Duration;

use kube::runtime::controller::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Run another pass immediately
    Now,
    /// Wait for an external precondition or a fixed interval
    After(Duration),
    /// Converged; re-check drift at the steady interval
    Steady,
}

impl Requeue {
    pub fn delay(self, steady: Duration) -> Duration {
        match self {
            Requeue::Now => Duration::ZERO,
            Requeue::After(d) => d,
            Requeue::Steady => steady,
        }
    }

    pub fn into_action(self, steady: Duration) -> Action {
        Action::requeue(self.delay(steady))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays() {
        let steady = Duration::from_secs(300);
        assert_eq!(Requeue::Now.delay(steady), Duration::ZERO);
        assert_eq!(
            Requeue::After(Duration::from_secs(30)).delay(steady),
            Duration::from_secs(30)
        );
        assert_eq!(Requeue::Steady.delay(steady), steady);
    }
}
