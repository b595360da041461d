//! Session-wide retry budget shared by concurrently running steps.

use std::sync::atomic::{AtomicU32, Ordering};

/// Remaining retries for the session, drawn down without locking.
///
/// The engine builds one from the session before a step (or parallel group)
/// runs and reports the retries actually taken back to the session store at
/// the barrier.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: AtomicU32,
}

impl RetryBudget {
    pub fn new(retry_count: u32, max_retries: u32) -> Self {
        Self {
            remaining: AtomicU32::new(max_retries.saturating_sub(retry_count)),
        }
    }

    /// Take one retry; false when the budget is spent.
    pub fn try_take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn budget_starts_from_unspent_retries() {
        let budget = RetryBudget::new(1, 3);
        assert_eq!(budget.remaining(), 2);
        assert!(budget.try_take());
        assert!(budget.try_take());
        assert!(!budget.try_take());
        assert_eq!(budget.remaining(), 0);

        assert_eq!(RetryBudget::new(5, 3).remaining(), 0);
    }

    #[test]
    fn concurrent_takes_never_exceed_budget() {
        let budget = RetryBudget::new(0, 10);
        let taken: u32 = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| (0..10).filter(|_| budget.try_take()).count() as u32))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("join"))
                .sum()
        });
        assert_eq!(taken, 10);
    }
}
