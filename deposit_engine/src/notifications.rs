//! User notifications for settled deposits.
//!
//! A notification goes out at most once per settlement. The [`notification_hook`] waits a short moment (so that the
//! "request received" message the user may still be waiting for arrives first), then takes the strict notification
//! lock on the request, and only then calls the dispatcher.
use std::{future::Future, pin::Pin, sync::Arc, time::Duration as StdDuration};

use chrono::Duration;
use log::*;

use crate::{
    clock::Clock,
    db_types::DepositRequest,
    events::DepositSettledEvent,
    lock_coordinator::{LockConfig, LockCoordinator},
    traits::{LedgerStore, NotificationDispatcher},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationDelays {
    /// Requests younger than this are considered "just created".
    pub fresh_request_age: Duration,
    /// Delay before notifying about a request that was just created.
    pub fresh_delay: StdDuration,
    /// Delay before notifying about any other request.
    pub default_delay: StdDuration,
}

impl Default for NotificationDelays {
    fn default() -> Self {
        Self {
            fresh_request_age: Duration::seconds(2),
            fresh_delay: StdDuration::from_millis(1500),
            default_delay: StdDuration::from_millis(500),
        }
    }
}

impl NotificationDelays {
    pub fn delay_for(&self, request_age: Duration) -> StdDuration {
        if request_age < self.fresh_request_age {
            self.fresh_delay
        } else {
            self.default_delay
        }
    }
}

pub fn settlement_message(request: &DepositRequest) -> String {
    format!(
        "✅ <b>Your balance has been topped up!</b>\n\n💰 Amount: {}\n🎰 Account: {} ({})",
        request.amount,
        request.platform.to_uppercase(),
        request.account_id
    )
}

/// Builds the handler that tells users their deposit has landed.
pub fn notification_hook<B, C, N>(
    db: B,
    clock: C,
    locks: LockConfig,
    delays: NotificationDelays,
    notifier: N,
) -> impl Fn(DepositSettledEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>
where
    B: LedgerStore,
    C: Clock + Clone + 'static,
    N: NotificationDispatcher + 'static,
{
    let coordinator = LockCoordinator::new(db, locks);
    let notifier = Arc::new(notifier);
    move |ev: DepositSettledEvent| {
        let coordinator = coordinator.clone();
        let clock = clock.clone();
        let notifier = Arc::clone(&notifier);
        Box::pin(async move {
            let request = ev.request;
            let delay = delays.delay_for(clock.now() - request.created_at);
            trace!("📬️ Notifying user {} about request #{} in {}ms", request.user_id, request.id, delay.as_millis());
            tokio::time::sleep(delay).await;
            if let Err(e) = coordinator.try_acquire_notification(request.id, clock.now()).await {
                info!("📬️ Not notifying user {} about request #{}. {e}", request.user_id, request.id);
                return;
            }
            let message = settlement_message(&request);
            match notifier.notify_user(request.user_id, &message).await {
                Ok(()) => info!("📬️ User {} notified about deposit request #{}", request.user_id, request.id),
                Err(e) => error!("📬️ Failed to notify user {} about request #{}. {e}", request.user_id, request.id),
            }
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    }
}
