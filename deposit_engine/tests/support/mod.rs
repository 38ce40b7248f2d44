#![allow(dead_code)]
use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, TimeZone, Utc};
use deposit_engine::{
    clock::ManualClock,
    db_types::{Amount, DepositRequest, IncomingPayment, NewDepositRequest, NewIncomingPayment, RequestStatus},
    events::EventProducers,
    notifications::NotificationDelays,
    test_utils::{
        mocks::MockGateway,
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::{GatewayErrorKind, LedgerStore},
    SettlementConfig,
    SettlementFlowApi,
    SqliteDatabase,
};

pub type TestFlow = SettlementFlowApi<SqliteDatabase, MockGateway>;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 17, 12, 0, 0).unwrap()
}

pub async fn new_ledger() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

pub fn test_config() -> SettlementConfig {
    SettlementConfig {
        notification_delays: NotificationDelays {
            fresh_request_age: chrono::Duration::seconds(2),
            fresh_delay: StdDuration::from_millis(250),
            default_delay: StdDuration::from_millis(150),
        },
        ..SettlementConfig::default()
    }
}

pub fn flow(db: &SqliteDatabase, gateway: &MockGateway, clock: &ManualClock) -> TestFlow {
    flow_with(db, gateway, clock, test_config(), EventProducers::default())
}

pub fn flow_with(
    db: &SqliteDatabase,
    gateway: &MockGateway,
    clock: &ManualClock,
    config: SettlementConfig,
    producers: EventProducers,
) -> TestFlow {
    SettlementFlowApi::new(db.clone(), gateway.clone(), Arc::new(clock.clone()), config, producers)
}

pub fn amount(major: i64) -> Amount {
    Amount::from_major(major)
}

pub async fn new_request(
    db: &SqliteDatabase,
    user_id: i64,
    account_id: &str,
    value: Amount,
    created_at: DateTime<Utc>,
) -> DepositRequest {
    let request = NewDepositRequest::new(user_id, "melbet", account_id, value, created_at);
    db.insert_deposit_request(request).await.expect("Error inserting request")
}

/// A payment that was ingested at the moment the bank says it happened.
pub async fn new_payment(db: &SqliteDatabase, value: Amount, payment_time: DateTime<Utc>) -> IncomingPayment {
    let payment = NewIncomingPayment::new(value, payment_time, payment_time);
    db.insert_incoming_payment(payment).await.expect("Error inserting payment")
}

pub async fn request(db: &SqliteDatabase, id: i64) -> DepositRequest {
    db.fetch_request(id).await.expect("Error fetching request").expect("Request does not exist")
}

pub async fn payment(db: &SqliteDatabase, id: i64) -> IncomingPayment {
    db.fetch_payment(id).await.expect("Error fetching payment").expect("Payment does not exist")
}

/// Operator-style status change, bypassing the engine.
pub async fn set_status(
    db: &SqliteDatabase,
    request_id: i64,
    status: RequestStatus,
    detail: Option<&str>,
    kind: Option<GatewayErrorKind>,
    at: DateTime<Utc>,
) {
    sqlx::query(
        "UPDATE deposit_requests SET status = $1, status_detail = $2, error_kind = $3, processed_at = $4, updated_at \
         = $4 WHERE id = $5",
    )
    .bind(status)
    .bind(detail)
    .bind(kind)
    .bind(at)
    .bind(request_id)
    .execute(db.pool())
    .await
    .expect("Error updating request status");
}
