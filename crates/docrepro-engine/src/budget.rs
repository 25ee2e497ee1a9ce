//! Per-artifact work budget.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Result of asking the budget for one more snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The per-artifact snippet cap has been used up.
    SnippetCapReached,
    /// The aggregate wall-clock budget has run out.
    DeadlineReached,
}

#[derive(Debug)]
struct BudgetState {
    remaining: usize,
    exhausted: Option<Admission>,
}

/// Snippet-count and wall-clock ceiling for one scoring pass.
///
/// Only the orchestrator's dispatch loop calls [`Budget::admit`]; workers
/// never touch the counter.  Exhaustion is sticky, so once one snippet is
/// refused every later snippet is refused too.
#[derive(Debug)]
pub struct Budget {
    state: Mutex<BudgetState>,
    deadline: Instant,
}

impl Budget {
    /// Start a budget of `max_snippets` snippets lasting `total` from now.
    pub fn new(max_snippets: usize, total: Duration) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                remaining: max_snippets,
                exhausted: None,
            }),
            deadline: Instant::now() + total,
        }
    }

    /// Claim one snippet's worth of budget.
    pub async fn admit(&self) -> Admission {
        let mut state = self.state.lock().await;
        if let Some(reason) = state.exhausted {
            return reason;
        }

        let verdict = if Instant::now() >= self.deadline {
            Admission::DeadlineReached
        } else if state.remaining == 0 {
            Admission::SnippetCapReached
        } else {
            state.remaining -= 1;
            return Admission::Admitted;
        };

        tracing::warn!(reason = ?verdict, "artifact budget exhausted");
        state.exhausted = Some(verdict);
        verdict
    }

    /// When the aggregate budget runs out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}
