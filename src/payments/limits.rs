//! Spending limit enforcement for agent payments.

use std::sync::Arc;

use crate::config::{PaymentApprovalConfig, SpendingLimitsConfig};

use super::audit::PaymentAuditor;

/// Result of a spending limit check.  The reason names the bound that was
/// hit.
#[derive(Debug, Clone)]
pub struct SpendingCheck {
    pub allowed: bool,
    pub reason: String,
    pub daily_spent: f64,
    pub monthly_spent: f64,
}

impl SpendingCheck {
    fn denied(reason: String, daily_spent: f64, monthly_spent: f64) -> Self {
        Self {
            allowed: false,
            reason,
            daily_spent,
            monthly_spent,
        }
    }
}

/// Approval tier selected by amount, descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalTier {
    Standard,
    AlwaysAsk,
    Confirm,
    /// Requires a configured delay between preview and execute.
    Cooldown,
}

/// Maximum executed transactions per hour.
const HOURLY_RATE_CAP: i64 = 10;

/// Enforces per-transaction, daily, monthly, per-recipient, rate, and
/// duplicate limits.
pub struct SpendingLimiter {
    auditor: Arc<PaymentAuditor>,
    limits: SpendingLimitsConfig,
    approval: PaymentApprovalConfig,
}

impl SpendingLimiter {
    pub fn new(
        auditor: Arc<PaymentAuditor>,
        limits: SpendingLimitsConfig,
        approval: PaymentApprovalConfig,
    ) -> Self {
        Self {
            auditor,
            limits,
            approval,
        }
    }

    /// Run all checks in order, short-circuiting on the first violation.
    pub fn check(&self, amount: f64, _currency: &str, recipient: &str) -> SpendingCheck {
        // (a) Per-transaction cap: exactly equal is allowed.
        if amount > self.limits.per_transaction {
            return SpendingCheck::denied(
                format!(
                    "amount ${amount:.2} exceeds per-transaction limit of ${:.2}",
                    self.limits.per_transaction
                ),
                0.0,
                0.0,
            );
        }

        // (b) Rolling-24h daily cap.
        let daily_spent = self.auditor.daily_total().unwrap_or(0.0);
        if daily_spent + amount > self.limits.daily {
            return SpendingCheck::denied(
                format!(
                    "would exceed daily limit: ${daily_spent:.2} spent + ${amount:.2} > ${:.2}",
                    self.limits.daily
                ),
                daily_spent,
                0.0,
            );
        }

        // (c) Calendar-month cap.
        let monthly_spent = self.auditor.monthly_total().unwrap_or(0.0);
        if monthly_spent + amount > self.limits.monthly {
            return SpendingCheck::denied(
                format!(
                    "would exceed monthly limit: ${monthly_spent:.2} spent + ${amount:.2} > ${:.2}",
                    self.limits.monthly
                ),
                daily_spent,
                monthly_spent,
            );
        }

        // (d) Per-recipient-per-24h cap.
        let recipient_daily = self.auditor.recipient_daily_total(recipient).unwrap_or(0.0);
        if recipient_daily + amount > self.limits.per_recipient_daily {
            return SpendingCheck::denied(
                format!(
                    "would exceed per-recipient daily limit for {recipient}: \
                     ${recipient_daily:.2} + ${amount:.2} > ${:.2}",
                    self.limits.per_recipient_daily
                ),
                daily_spent,
                monthly_spent,
            );
        }

        // (e) Hourly rate cap.
        let hourly = self.auditor.hourly_count().unwrap_or(0);
        if hourly >= HOURLY_RATE_CAP {
            return SpendingCheck::denied(
                format!("rate limit: maximum {HOURLY_RATE_CAP} transactions per hour reached"),
                daily_spent,
                monthly_spent,
            );
        }

        // (f) Duplicate: same amount + recipient executed within the hour.
        if self
            .auditor
            .has_recent_duplicate(amount, recipient)
            .unwrap_or(false)
        {
            return SpendingCheck::denied(
                format!(
                    "duplicate detected: ${amount:.2} to {recipient} already sent within the last hour"
                ),
                daily_spent,
                monthly_spent,
            );
        }

        SpendingCheck {
            allowed: true,
            reason: String::new(),
            daily_spent,
            monthly_spent,
        }
    }

    /// Select the approval tier for an amount (thresholds descending).
    pub fn approval_tier(&self, amount: f64) -> ApprovalTier {
        if amount >= self.approval.cooldown_above {
            ApprovalTier::Cooldown
        } else if amount >= self.approval.confirm_above {
            ApprovalTier::Confirm
        } else if amount >= self.approval.always_ask_above {
            ApprovalTier::AlwaysAsk
        } else {
            ApprovalTier::Standard
        }
    }

    pub fn cooldown_seconds(&self) -> u64 {
        self.approval.cooldown_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Store;

    fn limiter_with(limits: SpendingLimitsConfig) -> (SpendingLimiter, Arc<PaymentAuditor>) {
        let auditor = Arc::new(PaymentAuditor::new(Arc::new(
            Store::open_in_memory().unwrap(),
        )));
        (
            SpendingLimiter::new(auditor.clone(), limits, PaymentApprovalConfig::default()),
            auditor,
        )
    }

    fn execute(auditor: &PaymentAuditor, amount: f64, recipient: &str) {
        let id = auditor
            .log_pending("payment_send", amount, "USD", recipient, "crypto", None, None)
            .unwrap();
        auditor.mark_executed(id, "tx").unwrap();
    }

    #[test]
    fn per_transaction_boundary_exact_allowed_above_rejected() {
        let (limiter, _) = limiter_with(SpendingLimitsConfig {
            per_transaction: 50.0,
            ..Default::default()
        });
        assert!(limiter.check(50.0, "USD", "alice").allowed);
        let check = limiter.check(50.01, "USD", "alice");
        assert!(!check.allowed);
        assert!(check.reason.contains("per-transaction"));
    }

    #[test]
    fn daily_cap_counts_executed_history() {
        let (limiter, auditor) = limiter_with(SpendingLimitsConfig {
            per_transaction: 100.0,
            daily: 100.0,
            ..Default::default()
        });
        execute(&auditor, 95.0, "alice");
        let check = limiter.check(10.0, "USD", "bob");
        assert!(!check.allowed);
        assert!(check.reason.contains("daily limit"));
        assert_eq!(check.daily_spent, 95.0);
    }

    #[test]
    fn monthly_cap_enforced() {
        let (limiter, auditor) = limiter_with(SpendingLimitsConfig {
            per_transaction: 500.0,
            daily: 1000.0,
            monthly: 100.0,
            ..Default::default()
        });
        execute(&auditor, 95.0, "alice");
        let check = limiter.check(10.0, "USD", "bob");
        assert!(!check.allowed);
        assert!(check.reason.contains("monthly limit"));
    }

    #[test]
    fn per_recipient_cap_is_recipient_scoped() {
        let (limiter, auditor) = limiter_with(SpendingLimitsConfig {
            per_transaction: 100.0,
            daily: 1000.0,
            monthly: 5000.0,
            per_recipient_daily: 50.0,
        });
        execute(&auditor, 45.0, "alice");
        assert!(!limiter.check(10.0, "USD", "alice").allowed);
        assert!(limiter.check(10.0, "USD", "bob").allowed);
    }

    #[test]
    fn hourly_rate_cap_at_ten() {
        let (limiter, auditor) = limiter_with(SpendingLimitsConfig {
            per_transaction: 100.0,
            daily: 10_000.0,
            monthly: 50_000.0,
            per_recipient_daily: 10_000.0,
        });
        for i in 0..10 {
            execute(&auditor, 1.0 + f64::from(i), &format!("merchant-{i}"));
        }
        let check = limiter.check(1.0, "USD", "someone-new");
        assert!(!check.allowed);
        assert!(check.reason.contains("rate limit"));
    }

    #[test]
    fn duplicate_same_amount_and_recipient_rejected() {
        let (limiter, auditor) = limiter_with(SpendingLimitsConfig {
            per_transaction: 100.0,
            daily: 1000.0,
            monthly: 5000.0,
            per_recipient_daily: 1000.0,
        });
        execute(&auditor, 25.0, "alice");
        let check = limiter.check(25.0, "USD", "alice");
        assert!(!check.allowed);
        assert!(check.reason.contains("duplicate"));
        // Different amount or recipient passes.
        assert!(limiter.check(26.0, "USD", "alice").allowed);
        assert!(limiter.check(25.0, "USD", "bob").allowed);
    }

    #[test]
    fn approval_tiers_by_amount() {
        let (limiter, _) = limiter_with(SpendingLimitsConfig::default());
        // Default thresholds: always_ask 5, confirm 20, cooldown 100.
        assert_eq!(limiter.approval_tier(1.0), ApprovalTier::Standard);
        assert_eq!(limiter.approval_tier(5.0), ApprovalTier::AlwaysAsk);
        assert_eq!(limiter.approval_tier(20.0), ApprovalTier::Confirm);
        assert_eq!(limiter.approval_tier(100.0), ApprovalTier::Cooldown);
    }
}
