use actix_web::http::StatusCode;
use deposit_engine::{db_types::RequestStatus, traits::GatewayError};

use super::helpers::{post_request, TestBackend};
use crate::data_objects::SettlementResponse;

#[actix_web::test]
async fn trigger_settles_a_matching_payment() {
    let backend = TestBackend::new().await;
    let req = backend.request(500).await;
    let pay = backend.payment(500).await;

    let (status, body) = post_request(&backend, &format!("/payments/{}/process", pay.id)).await;
    assert_eq!(status, StatusCode::OK);
    let response = serde_json::from_str::<SettlementResponse>(&body).unwrap();
    assert_eq!(response.outcome, "settled");
    assert_eq!(response.request_id, Some(req.id));
    let report = response.report.expect("Settled responses carry a report");
    assert_eq!(report.payment_id, pay.id);
    assert!(report.verified);
    assert_eq!(backend.gateway.call_count(), 1);
}

#[actix_web::test]
async fn repeated_triggers_are_skipped() {
    let backend = TestBackend::new().await;
    backend.request(500).await;
    let pay = backend.payment(500).await;
    let path = format!("/payments/{}/process", pay.id);

    let (status, _) = post_request(&backend, &path).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = post_request(&backend, &path).await;
    assert_eq!(status, StatusCode::OK);
    let response = serde_json::from_str::<SettlementResponse>(&body).unwrap();
    assert_eq!(response.outcome, "skipped");
    assert!(response.reason.unwrap().starts_with("locked"));
    assert_eq!(backend.gateway.call_count(), 1);
}

#[actix_web::test]
async fn payments_without_a_request_report_no_match() {
    let backend = TestBackend::new().await;
    backend.request(499).await;
    let pay = backend.payment(500).await;

    let (status, body) = post_request(&backend, &format!("/payments/{}/process", pay.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"outcome":"no_match"}"#);
    assert_eq!(backend.gateway.call_count(), 0);
}

#[actix_web::test]
async fn unknown_payments_are_not_found() {
    let backend = TestBackend::new().await;
    let (status, body) = post_request(&backend, "/payments/999/process").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("Payment #999 does not exist"));
}

#[actix_web::test]
async fn gateway_failures_are_bad_gateway() {
    let backend = TestBackend::new().await;
    let req = backend.request(500).await;
    let pay = backend.payment(500).await;
    backend.gateway.fail_next(GatewayError::from_message("Player account is blocked"));

    let (status, body) = post_request(&backend, &format!("/payments/{}/process", pay.id)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("Player account is blocked"));
    let request = backend.db_request(req.id).await;
    assert_eq!(request.status, RequestStatus::ApiError);
}
