pub mod audit;
pub mod limits;

pub use audit::PaymentAuditor;
pub use limits::{ApprovalTier, SpendingCheck, SpendingLimiter};
