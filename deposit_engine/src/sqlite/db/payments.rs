use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db_types::{IncomingPayment, NewIncomingPayment},
    traits::LedgerError,
};

pub async fn insert(payment: NewIncomingPayment, conn: &mut SqliteConnection) -> Result<IncomingPayment, LedgerError> {
    // Drain every row so the statement completes and the autocommit is released before the connection goes back
    // to the pool
    let rows: Vec<IncomingPayment> = sqlx::query_as(
        r#"
            INSERT INTO incoming_payments (amount, payment_time, ingested_at, is_processed, updated_at)
            VALUES ($1, $2, $3, 0, $3)
            RETURNING *;
        "#,
    )
    .bind(payment.amount)
    .bind(payment.payment_time)
    .bind(payment.ingested_at)
    .fetch_all(conn)
    .await?;
    rows.into_iter().next().ok_or_else(|| LedgerError::DatabaseError("INSERT did not return the new payment".into()))
}

pub async fn fetch(payment_id: i64, conn: &mut SqliteConnection) -> Result<Option<IncomingPayment>, LedgerError> {
    let payment =
        sqlx::query_as("SELECT * FROM incoming_payments WHERE id = $1").bind(payment_id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_unprocessed(
    since: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<IncomingPayment>, LedgerError> {
    let payments = sqlx::query_as(
        r#"
            SELECT * FROM incoming_payments
            WHERE is_processed = 0 AND ingested_at >= $1
            ORDER BY ingested_at ASC, id ASC
            LIMIT $2
        "#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(payments)
}

/// Compare-and-swap on `updated_at`. A provisional claim left behind by an expired holder is dropped, but a live
/// claim is never touched, even if its timestamp happens to equal the observed one.
pub async fn renew_lease(
    payment_id: i64,
    observed_updated_at: DateTime<Utc>,
    lease_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
            UPDATE incoming_payments SET updated_at = $1, linked_request_id = NULL
            WHERE id = $2 AND is_processed = 0 AND updated_at = $3
              AND (linked_request_id IS NULL OR updated_at < $4)
        "#,
    )
    .bind(now)
    .bind(payment_id)
    .bind(observed_updated_at)
    .bind(lease_cutoff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// The id of a processed payment, other than `payment_id`, that references the request.
pub async fn other_processed_payment(
    request_id: i64,
    payment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<i64>, LedgerError> {
    let id = sqlx::query_scalar(
        r#"
            SELECT id FROM incoming_payments
            WHERE linked_request_id = $1 AND id != $2 AND is_processed = 1
            ORDER BY id ASC LIMIT 1
        "#,
    )
    .bind(request_id)
    .bind(payment_id)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

/// The id of an unprocessed payment, other than `payment_id`, whose provisional claim on the request was refreshed at
/// or after `lease_cutoff`.
pub async fn live_claim_on_request(
    request_id: i64,
    payment_id: i64,
    lease_cutoff: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<i64>, LedgerError> {
    let id = sqlx::query_scalar(
        r#"
            SELECT id FROM incoming_payments
            WHERE linked_request_id = $1 AND id != $2 AND is_processed = 0 AND updated_at >= $3
            ORDER BY id ASC LIMIT 1
        "#,
    )
    .bind(request_id)
    .bind(payment_id)
    .bind(lease_cutoff)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

/// Provisionally claims the request for this payment. Returns `false` if the payment is processed or already carries
/// a claim.
pub async fn claim(
    payment_id: i64,
    request_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
            UPDATE incoming_payments SET linked_request_id = $1, updated_at = $2
            WHERE id = $3 AND is_processed = 0 AND linked_request_id IS NULL
        "#,
    )
    .bind(request_id)
    .bind(now)
    .bind(payment_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Marks the payment as processed and linked to the request. Returns `false` if it was already processed.
pub async fn link(
    payment_id: i64,
    request_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
            UPDATE incoming_payments SET is_processed = 1, linked_request_id = $1, updated_at = $2
            WHERE id = $3 AND is_processed = 0
        "#,
    )
    .bind(request_id)
    .bind(now)
    .bind(payment_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Drops the provisional claim of an unprocessed payment.
pub async fn release_claim(payment_id: i64, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        "UPDATE incoming_payments SET linked_request_id = NULL, updated_at = $1 WHERE id = $2 AND is_processed = 0",
    )
    .bind(now)
    .bind(payment_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Unconditionally marks the payment as processed and linked to the request.
pub async fn force_link(
    payment_id: i64,
    request_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        "UPDATE incoming_payments SET is_processed = 1, linked_request_id = $1, updated_at = $2 WHERE id = $3",
    )
    .bind(request_id)
    .bind(now)
    .bind(payment_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
