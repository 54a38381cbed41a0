//! Cost tracking for budget enforcement.
//!
//! The tracker keeps two running sums — *daily* and *task* (reset at each
//! new user turn) — plus an append-only buffer of pending records flushed
//! opportunistically into the `llm_usage` table.  Loss of un-flushed records
//! is acceptable; budget enforcement degrades rather than blocks.

use std::sync::Mutex;

use crate::database::Store;

/// One completed LLM call.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub task_type: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default)]
struct CostState {
    daily_total: f64,
    task_total: f64,
    pending: Vec<UsageRecord>,
}

/// Tracks LLM spending.  Shared across loops behind `Arc`; interior state is
/// mutex-guarded.
#[derive(Debug, Default)]
pub struct CostTracker {
    state: Mutex<CostState>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed call.  Cost may be zero when the provider returned
    /// no usage metadata.
    pub fn record(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cost: f64,
        task_type: &str,
    ) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.daily_total += cost;
        state.task_total += cost;
        state.pending.push(UsageRecord {
            provider: provider.to_owned(),
            model: model.to_owned(),
            input_tokens,
            output_tokens,
            cost,
            task_type: task_type.to_owned(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Reset the per-task sum.  Called at each new user turn.
    pub fn reset_task(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .task_total = 0.0;
    }

    /// True while both running sums are strictly under their limits.
    pub fn within_budget(&self, daily_limit: f64, task_limit: f64) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.daily_total < daily_limit && state.task_total < task_limit
    }

    pub fn daily_total(&self) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .daily_total
    }

    pub fn task_total(&self) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .task_total
    }

    /// Persist pending records to the `llm_usage` table.  Non-fatal: records
    /// that fail to insert are dropped.
    pub fn flush(&self, store: &Store) {
        let pending: Vec<UsageRecord> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut state.pending)
        };
        for record in &pending {
            if let Err(e) = store.insert_llm_usage(record) {
                log::debug!("llm_usage flush failed (dropping record): {e}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_both_sums() {
        let tracker = CostTracker::new();
        tracker.record("glm", "glm-4.7", 100, 50, 0.01, "simple");
        tracker.record("glm", "glm-4.7", 100, 50, 0.02, "simple");
        assert!((tracker.daily_total() - 0.03).abs() < 1e-9);
        assert!((tracker.task_total() - 0.03).abs() < 1e-9);
        assert_eq!(tracker.pending_len(), 2);
    }

    #[test]
    fn reset_task_leaves_daily_untouched() {
        let tracker = CostTracker::new();
        tracker.record("glm", "glm-4.7", 10, 10, 0.5, "coding");
        tracker.reset_task();
        assert_eq!(tracker.task_total(), 0.0);
        assert!((tracker.daily_total() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn within_budget_is_strict() {
        let tracker = CostTracker::new();
        tracker.record("glm", "glm-4.7", 10, 10, 1.0, "simple");
        assert!(tracker.within_budget(2.0, 2.0));
        assert!(!tracker.within_budget(1.0, 2.0), "at the limit is over");
        assert!(!tracker.within_budget(2.0, 1.0));
    }

    #[test]
    fn zero_cost_records_still_buffered() {
        let tracker = CostTracker::new();
        tracker.record("ollama", "llama3", 0, 0, 0.0, "simple");
        assert!(tracker.within_budget(0.01, 0.01));
        assert_eq!(tracker.pending_len(), 1);
    }

    #[test]
    fn flush_drains_pending() {
        let tracker = CostTracker::new();
        tracker.record("glm", "glm-4.7", 10, 10, 0.1, "simple");
        let store = Store::open_in_memory().unwrap();
        tracker.flush(&store);
        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(store.llm_usage_count().unwrap(), 1);
    }
}
