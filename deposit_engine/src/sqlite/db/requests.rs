use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{Amount, DepositRequest, MatchCandidate, NewDepositRequest, RequestStatus, AUTO_PROCESSOR},
    traits::{GatewayFailure, LedgerError},
};

#[derive(FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    request: DepositRequest,
    processed_payments: i64,
}

pub async fn insert(request: NewDepositRequest, conn: &mut SqliteConnection) -> Result<DepositRequest, LedgerError> {
    // Drain every row so the statement completes and the autocommit is released before the connection goes back
    // to the pool
    let rows: Vec<DepositRequest> = sqlx::query_as(
        r#"
            INSERT INTO deposit_requests (user_id, platform, account_id, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $5)
            RETURNING *;
        "#,
    )
    .bind(request.user_id)
    .bind(request.platform)
    .bind(request.account_id)
    .bind(request.amount)
    .bind(request.created_at)
    .fetch_all(conn)
    .await?;
    rows.into_iter().next().ok_or_else(|| LedgerError::DatabaseError("INSERT did not return the new request".into()))
}

pub async fn fetch(request_id: i64, conn: &mut SqliteConnection) -> Result<Option<DepositRequest>, LedgerError> {
    let request =
        sqlx::query_as("SELECT * FROM deposit_requests WHERE id = $1").bind(request_id).fetch_optional(conn).await?;
    Ok(request)
}

pub async fn match_candidates(
    amount: Amount,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<MatchCandidate>, LedgerError> {
    let rows: Vec<CandidateRow> = sqlx::query_as(
        r#"
            SELECT r.*,
                   (SELECT COUNT(*) FROM incoming_payments p
                    WHERE p.linked_request_id = r.id AND p.is_processed = 1) AS processed_payments
            FROM deposit_requests r
            WHERE r.status = 'pending'
              AND r.amount = $1
              AND r.created_at >= $2
              AND r.created_at <= $3
            ORDER BY r.created_at ASC, r.id ASC
        "#,
    )
    .bind(amount)
    .bind(window_start)
    .bind(window_end)
    .fetch_all(conn)
    .await?;
    let candidates =
        rows.into_iter().map(|row| MatchCandidate::new(row.request, row.processed_payments > 0)).collect();
    Ok(candidates)
}

pub async fn find_recent_settlement(
    platform: &str,
    account_id: &str,
    amount: Amount,
    since: DateTime<Utc>,
    exclude_request_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<DepositRequest>, LedgerError> {
    let request = sqlx::query_as(
        r#"
            SELECT * FROM deposit_requests
            WHERE platform = $1
              AND account_id = $2
              AND amount = $3
              AND status IN ('autodeposit_success', 'completed', 'approved', 'auto_completed')
              AND processed_at >= $4
              AND id != $5
            ORDER BY processed_at DESC, id DESC
            LIMIT 1
        "#,
    )
    .bind(platform)
    .bind(account_id)
    .bind(amount)
    .bind(since)
    .bind(exclude_request_id)
    .fetch_optional(conn)
    .await?;
    Ok(request)
}

/// Moves a pending request to `api_error`. Returns `false` if the request is no longer pending.
pub async fn mark_api_error(
    request_id: i64,
    failure: &GatewayFailure,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
            UPDATE deposit_requests
            SET status = 'api_error', status_detail = $1, error_kind = $2, processed_at = $3, updated_at = $3
            WHERE id = $4 AND status = 'pending'
        "#,
    )
    .bind(&failure.detail)
    .bind(failure.kind)
    .bind(now)
    .bind(request_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Unconditionally moves the request to the automatic success state.
pub async fn mark_auto_settled(
    request_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
            UPDATE deposit_requests
            SET status = $1, status_detail = NULL, error_kind = NULL, processed_by = $2, processed_at = $3,
                updated_at = $3
            WHERE id = $4
        "#,
    )
    .bind(RequestStatus::AutodepositSuccess)
    .bind(AUTO_PROCESSOR)
    .bind(now)
    .bind(request_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Moves an `api_error` request to the automatic success state. Returns `false` if it is no longer in `api_error`.
pub async fn reclassify_api_error(
    request_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
            UPDATE deposit_requests
            SET status = $1, status_detail = NULL, error_kind = NULL, processed_by = $2, processed_at = $3,
                updated_at = $3
            WHERE id = $4 AND status = 'api_error'
        "#,
    )
    .bind(RequestStatus::AutodepositSuccess)
    .bind(AUTO_PROCESSOR)
    .bind(now)
    .bind(request_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn renew_lease(
    request_id: i64,
    status: RequestStatus,
    older_than: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, LedgerError> {
    let result =
        sqlx::query("UPDATE deposit_requests SET updated_at = $1 WHERE id = $2 AND status = $3 AND updated_at < $4")
            .bind(now)
            .bind(request_id)
            .bind(status)
            .bind(older_than)
            .execute(conn)
            .await?;
    Ok(result.rows_affected() == 1)
}
