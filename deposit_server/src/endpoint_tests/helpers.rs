use std::sync::Arc;

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web, App};
use chrono::{DateTime, Duration, TimeZone, Utc};
use deposit_engine::{
    clock::ManualClock,
    db_types::{Amount, DepositRequest, IncomingPayment, NewDepositRequest, NewIncomingPayment},
    events::EventProducers,
    test_utils::{
        mocks::MockGateway,
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::LedgerStore,
    SettlementConfig,
    SettlementFlowApi,
    SqliteDatabase,
};
use log::debug;

use crate::routes::ProcessPaymentRoute;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 17, 12, 0, 0).unwrap()
}

pub struct TestBackend {
    pub db: SqliteDatabase,
    pub gateway: MockGateway,
    pub clock: ManualClock,
}

impl TestBackend {
    pub async fn new() -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        Self { db, gateway: MockGateway::new(), clock: ManualClock::new(t0()) }
    }

    pub fn api(&self) -> SettlementFlowApi<SqliteDatabase, MockGateway> {
        SettlementFlowApi::new(
            self.db.clone(),
            self.gateway.clone(),
            Arc::new(self.clock.clone()),
            SettlementConfig::default(),
            EventProducers::default(),
        )
    }

    /// A pending request for `major` units, created a minute before [`t0`]
    pub async fn request(&self, major: i64) -> DepositRequest {
        let request =
            NewDepositRequest::new(5, "1xbet", "acc-5", Amount::from_major(major), t0() - Duration::minutes(1));
        self.db.insert_deposit_request(request).await.expect("Error inserting request")
    }

    pub async fn payment(&self, major: i64) -> IncomingPayment {
        let payment = NewIncomingPayment::new(Amount::from_major(major), t0(), t0());
        self.db.insert_incoming_payment(payment).await.expect("Error inserting payment")
    }

    pub async fn db_request(&self, id: i64) -> DepositRequest {
        self.db.fetch_request(id).await.expect("Error fetching request").expect("Request does not exist")
    }
}

pub async fn post_request(backend: &TestBackend, path: &str) -> (StatusCode, String) {
    let app = App::new()
        .app_data(web::Data::new(backend.api()))
        .service(ProcessPaymentRoute::<SqliteDatabase, MockGateway>::new());
    let service = test::init_service(app).await;
    let req = TestRequest::post().uri(path).to_request();
    debug!("Making request to {path}");
    let (_, res) = test::call_service(&service, req).await.into_parts();
    let status = res.status();
    let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
    (status, body)
}
