//! Payment audit trail.
//!
//! Every payment writes a `pending` record *before* execution and
//! transitions to `executed` (with a transaction ref) or `failed` (with the
//! error) afterwards.  Limit queries only ever scan `executed` records.

use std::sync::Arc;

use chrono::{Datelike, Duration, TimeZone, Utc};

use crate::database::{PaymentRecord, Store, StoreError};

pub struct PaymentAuditor {
    store: Arc<Store>,
}

impl PaymentAuditor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Write the pre-execution `pending` record.  Returns the audit id.
    #[allow(clippy::too_many_arguments)]
    pub fn log_pending(
        &self,
        tool_name: &str,
        amount: f64,
        currency: &str,
        recipient: &str,
        payment_type: &str,
        provider: Option<&str>,
        chain: Option<&str>,
    ) -> Result<i64, StoreError> {
        self.store.insert_payment(&PaymentRecord {
            id: 0,
            timestamp: Utc::now(),
            tool_name: tool_name.to_owned(),
            amount,
            currency: currency.to_owned(),
            recipient: recipient.to_owned(),
            payment_type: payment_type.to_owned(),
            provider: provider.map(str::to_owned),
            chain: chain.map(str::to_owned),
            status: "pending".to_owned(),
            transaction_ref: None,
            error: None,
        })
    }

    /// Transition a record to `executed`.
    pub fn mark_executed(&self, audit_id: i64, transaction_ref: &str) -> Result<(), StoreError> {
        self.store
            .update_payment_status(audit_id, "executed", Some(transaction_ref), None)
    }

    /// Transition a record to `failed`.
    pub fn mark_failed(&self, audit_id: i64, error: &str) -> Result<(), StoreError> {
        self.store
            .update_payment_status(audit_id, "failed", None, Some(error))
    }

    pub fn history(
        &self,
        limit: usize,
        status: Option<&str>,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        self.store.payment_history(limit, status)
    }

    /// Sum of executed amounts in the rolling last 24 hours.
    pub fn daily_total(&self) -> Result<f64, StoreError> {
        self.store.executed_sum_since(Utc::now() - Duration::hours(24))
    }

    /// Sum of executed amounts in the current calendar month.
    pub fn monthly_total(&self) -> Result<f64, StoreError> {
        let now = Utc::now();
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        self.store.executed_sum_since(month_start)
    }

    /// Sum of executed amounts to `recipient` in the last 24 hours.
    pub fn recipient_daily_total(&self, recipient: &str) -> Result<f64, StoreError> {
        self.store
            .executed_sum_recipient_since(recipient, Utc::now() - Duration::hours(24))
    }

    /// Count of executed transactions in the last hour.
    pub fn hourly_count(&self) -> Result<i64, StoreError> {
        self.store.executed_count_since(Utc::now() - Duration::hours(1))
    }

    /// True when an executed payment with the same amount and recipient
    /// exists within the last hour.
    pub fn has_recent_duplicate(&self, amount: f64, recipient: &str) -> Result<bool, StoreError> {
        self.store
            .executed_duplicate_exists(amount, recipient, Utc::now() - Duration::hours(1))
    }
}
