use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::{DesiredPlace, ExchangeRequest, NewRequest, Place, RequestStatus};
use crate::error::{Result, SwapError};
use crate::store::{join_list, split_list, RequestStore};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(db_err)?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const COLUMNS: &str = "id, requester_id, contact, order_no, phone, email, \
     orig_date, orig_slot, orig_place, desired_dates, desired_slots, \
     desired_place, verif_code, status, match_id, created_at";

fn map_row(row: &PgRow) -> Result<ExchangeRequest> {
    let orig_place: String = row.get("orig_place");
    let desired_place: String = row.get("desired_place");
    let status: String = row.get("status");

    Ok(ExchangeRequest {
        id: row.get("id"),
        requester_id: row.get("requester_id"),
        contact: row.get("contact"),
        order_no: row.get("order_no"),
        phone: row.get("phone"),
        email: row.get("email"),
        orig_date: row.get("orig_date"),
        orig_slot: row.get("orig_slot"),
        orig_place: Place::try_from(orig_place.as_str()).map_err(SwapError::Internal)?,
        desired_dates: split_list(row.get("desired_dates")),
        desired_slots: split_list(row.get("desired_slots")),
        desired_place: DesiredPlace::try_from(desired_place.as_str())
            .map_err(SwapError::Internal)?,
        verif_code: row.get("verif_code"),
        status: RequestStatus::try_from(status.as_str()).map_err(SwapError::Internal)?,
        match_id: row.get("match_id"),
        created_at: row.get("created_at"),
    })
}

/// Transient pool/connection failures become `StoreUnavailable` so the
/// controller can answer with a retry message instead of a failure log.
fn db_err(err: sqlx::Error) -> SwapError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            SwapError::StoreUnavailable(err.to_string())
        }
        other => SwapError::Database(other),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl RequestStore for PostgresStore {
    async fn insert(&self, candidate: &NewRequest) -> Result<ExchangeRequest> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO exchange_requests (
                requester_id, contact, order_no, phone, email,
                orig_date, orig_slot, orig_place,
                desired_dates, desired_slots, desired_place,
                verif_code, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending')
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&candidate.requester_id)
        .bind(&candidate.contact)
        .bind(&candidate.order_no)
        .bind(&candidate.phone)
        .bind(&candidate.email)
        .bind(&candidate.orig_date)
        .bind(&candidate.orig_slot)
        .bind(candidate.orig_place.as_str())
        .bind(join_list(&candidate.desired_dates))
        .bind(join_list(&candidate.desired_slots))
        .bind(candidate.desired_place.as_str())
        .bind(&candidate.verif_code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SwapError::DuplicatePendingRequest
            } else {
                db_err(e)
            }
        })?;

        let request = map_row(&row)?;
        debug!(id = request.id, requester = %request.requester_id, "Inserted swap request");
        Ok(request)
    }

    async fn find_pending_by_id(&self, id: i64) -> Result<Option<ExchangeRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM exchange_requests WHERE id = $1 AND status = 'pending'"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_row).transpose()
    }

    async fn find_pending_by_requester(
        &self,
        requester_id: &str,
    ) -> Result<Option<ExchangeRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM exchange_requests \
             WHERE requester_id = $1 AND status = 'pending'"
        ))
        .bind(requester_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_row).transpose()
    }

    async fn find_latest_by_requester(
        &self,
        requester_id: &str,
    ) -> Result<Option<ExchangeRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM exchange_requests \
             WHERE requester_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(requester_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_row).transpose()
    }

    async fn list_pending_candidates(
        &self,
        exclude_requester: &str,
    ) -> Result<Vec<ExchangeRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM exchange_requests \
             WHERE status = 'pending' AND requester_id <> $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(exclude_requester)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_row).collect()
    }

    async fn try_commit_pair(&self, me_id: i64, other_id: i64, match_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            r#"
            UPDATE exchange_requests
            SET status = 'matched', match_id = $3
            WHERE id IN ($1, $2) AND status = 'pending'
            "#,
        )
        .bind(me_id)
        .bind(other_id)
        .bind(match_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // Both rows or neither: anything else means a concurrent commit or
        // cancellation won, so the partial update is rolled back.
        if result.rows_affected() == 2 {
            tx.commit().await.map_err(db_err)?;
            debug!(me_id, other_id, match_id, "Committed pairing");
            Ok(true)
        } else {
            tx.rollback().await.map_err(db_err)?;
            debug!(me_id, other_id, "Pair commit lost the race");
            Ok(false)
        }
    }

    async fn mark_cancelled(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE exchange_requests SET status = 'cancelled' \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_order_and_code(
        &self,
        order_no: &str,
        code: &str,
    ) -> Result<Option<ExchangeRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM exchange_requests \
             WHERE order_no = $1 AND verif_code = $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(order_no)
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_row).transpose()
    }

    async fn find_matched_pair(&self, match_id: i64) -> Result<Vec<ExchangeRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM exchange_requests \
             WHERE match_id = $1 AND status = 'matched' ORDER BY id ASC"
        ))
        .bind(match_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_row).collect()
    }

    async fn unmatch_pair(&self, a_id: i64, b_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let requesters: Vec<String> = sqlx::query(
            "SELECT requester_id FROM exchange_requests \
             WHERE id IN ($1, $2) AND status = 'matched' FOR UPDATE",
        )
        .bind(a_id)
        .bind(b_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?
        .iter()
        .map(|row| row.get("requester_id"))
        .collect();

        if requesters.len() != 2 {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        // Reverting must not give either requester a second pending row.
        let has_open_request: bool = sqlx::query(
            "SELECT EXISTS ( \
                 SELECT 1 FROM exchange_requests \
                 WHERE requester_id = ANY($1) AND status = 'pending' \
             ) AS has_open_request",
        )
        .bind(&requesters)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?
        .get("has_open_request");

        if has_open_request {
            tx.rollback().await.map_err(db_err)?;
            debug!(a_id, b_id, "Unmatch refused, open pending request");
            return Ok(false);
        }

        let result = match sqlx::query(
            r#"
            UPDATE exchange_requests
            SET status = 'pending', match_id = NULL
            WHERE id IN ($1, $2) AND status = 'matched'
            "#,
        )
        .bind(a_id)
        .bind(b_id)
        .execute(&mut *tx)
        .await
        {
            Ok(result) => result,
            // An insert that committed after the check above trips the
            // partial unique pending index; the revert loses, not the insert.
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await.map_err(db_err)?;
                debug!(a_id, b_id, "Unmatch refused, open pending request");
                return Ok(false);
            }
            Err(e) => return Err(db_err(e)),
        };

        if result.rows_affected() == 2 {
            tx.commit().await.map_err(db_err)?;
            debug!(a_id, b_id, "Reverted pair to pending");
            Ok(true)
        } else {
            tx.rollback().await.map_err(db_err)?;
            Ok(false)
        }
    }
}
