use chrono::{DateTime, Utc};
use deposit_engine::{
    db_types::Amount,
    traits::{CommissionAccounting, CommissionError},
};
use log::*;

/// Commission sink that only writes settled deposits to the log. Referral payouts are worked out from these lines by
/// the back office.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCommission;

impl CommissionAccounting for LoggingCommission {
    async fn on_deposit_settled(
        &self,
        user_id: i64,
        amount: Amount,
        platform: &str,
        request_id: i64,
        request_created_at: DateTime<Utc>,
    ) -> Result<(), CommissionError> {
        info!(
            target: "commission",
            "user_id={user_id} amount={amount} platform={platform} request_id={request_id} requested_at={}",
            request_created_at.to_rfc3339()
        );
        Ok(())
    }
}
