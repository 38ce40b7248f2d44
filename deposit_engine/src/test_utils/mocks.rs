//! Stand-ins for the engine's external collaborators.
//!
//! `MockGateway` clones share their state, so a test can hand one clone to the engine and inspect another. The
//! commission and notification mocks are `mockall` mocks that write to a [`CallLog`] the test keeps.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use mockall::mock;
use tokio::sync::Notify;

use crate::{
    db_types::Amount,
    traits::{
        CommissionAccounting,
        CommissionError,
        CreditInstruction,
        CreditReceipt,
        GatewayError,
        NotificationDispatcher,
        NotificationError,
        SettlementGateway,
    },
};

//--------------------------------------      MockGateway       -------------------------------------------------------
#[derive(Default)]
struct GatewayState {
    calls: Mutex<Vec<CreditInstruction>>,
    responses: Mutex<VecDeque<Result<CreditReceipt, GatewayError>>>,
    delay: Mutex<Duration>,
    called: Notify,
}

/// A settlement gateway that records every credit instruction. It succeeds unless a response has been scripted.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<GatewayState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every credit call takes this long before it answers.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().unwrap() = delay;
        self
    }

    /// Queue the answer for the next credit call that has not been answered from the queue yet.
    pub fn push_response(&self, response: Result<CreditReceipt, GatewayError>) {
        self.state.responses.lock().unwrap().push_back(response);
    }

    pub fn fail_next(&self, error: GatewayError) {
        self.push_response(Err(error));
    }

    pub fn calls(&self) -> Vec<CreditInstruction> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    /// Resolves once a credit call has arrived (immediately, if one arrived before this was called).
    pub async fn wait_for_call(&self) {
        self.state.called.notified().await;
    }
}

impl SettlementGateway for MockGateway {
    async fn credit(&self, instruction: CreditInstruction) -> Result<CreditReceipt, GatewayError> {
        self.state.calls.lock().unwrap().push(instruction);
        self.state.called.notify_one();
        let delay = *self.state.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let response = self.state.responses.lock().unwrap().pop_front();
        response.unwrap_or_else(|| Ok(CreditReceipt { message: Some("Deposit successful".into()) }))
    }
}

//--------------------------------------    MockCommission      -------------------------------------------------------
mock! {
    pub Commission {}
    impl CommissionAccounting for Commission {
        async fn on_deposit_settled(
            &self,
            user_id: i64,
            amount: Amount,
            platform: &str,
            request_id: i64,
            request_created_at: DateTime<Utc>,
        ) -> Result<(), CommissionError>;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionCall {
    pub user_id: i64,
    pub amount: Amount,
    pub platform: String,
    pub request_id: i64,
    pub request_created_at: DateTime<Utc>,
}

/// A shared, append-only list of the calls a mock received.
#[derive(Clone)]
pub struct CallLog<T> {
    calls: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for CallLog<T> {
    fn default() -> Self {
        Self { calls: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<T: Clone> CallLog<T> {
    fn push(&self, call: T) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<T> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A commission mock that accepts any number of calls, writes each one to `log`, and answers with `result`.
pub fn logging_commission(log: &CallLog<CommissionCall>, result: Result<(), CommissionError>) -> MockCommission {
    let log = log.clone();
    let mut commission = MockCommission::new();
    commission.expect_on_deposit_settled().returning(move |user_id, amount, platform, request_id, request_created_at| {
        log.push(CommissionCall { user_id, amount, platform: platform.to_string(), request_id, request_created_at });
        result.clone()
    });
    commission
}

//--------------------------------------     MockNotifier       -------------------------------------------------------
mock! {
    pub Notifier {}
    impl NotificationDispatcher for Notifier {
        async fn notify_user(&self, user_id: i64, message: &str) -> Result<(), NotificationError>;
    }
}

/// A notifier mock that writes every message it is asked to send to `log`. Several of them may share one log.
pub fn logging_notifier(log: &CallLog<(i64, String)>) -> MockNotifier {
    let log = log.clone();
    let mut notifier = MockNotifier::new();
    notifier.expect_notify_user().returning(move |user_id, message| {
        log.push((user_id, message.to_string()));
        Ok(())
    });
    notifier
}
