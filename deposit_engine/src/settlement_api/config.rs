use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::{lock_coordinator::LockConfig, matcher::MatchRules, notifications::NotificationDelays};

/// Tunables for [`super::SettlementFlowApi`].
///
/// The gateway timeout must stay below the payment lease. Otherwise a slow credit call could outlive the lease, and
/// another worker could take the payment over while the first credit is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementConfig {
    pub match_rules: MatchRules,
    pub lock_config: LockConfig,
    /// A success for the same account and amount within this window is treated as a double submission.
    pub duplicate_window: Duration,
    /// How far back the reconciliation verifier looks for evidence that an ambiguous failure actually succeeded.
    pub verifier_window: Duration,
    pub gateway_timeout: StdDuration,
    /// How long to keep re-checking a request that another payment is in the middle of settling.
    pub claim_wait: StdDuration,
    pub claim_poll_interval: StdDuration,
    pub notification_delays: NotificationDelays,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            match_rules: MatchRules::default(),
            lock_config: LockConfig::default(),
            duplicate_window: Duration::minutes(5),
            verifier_window: Duration::minutes(5),
            gateway_timeout: StdDuration::from_secs(20),
            claim_wait: StdDuration::from_secs(2),
            claim_poll_interval: StdDuration::from_millis(100),
            notification_delays: NotificationDelays::default(),
        }
    }
}

impl SettlementConfig {
    /// Returns `false` if a credit call could outlive the payment lease it runs under.
    pub fn gateway_timeout_fits_lease(&self) -> bool {
        match self.lock_config.payment_lease.to_std() {
            Ok(lease) => self.gateway_timeout < lease,
            Err(_) => false,
        }
    }
}
