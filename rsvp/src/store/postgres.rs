//! `PostgreSQL` stores.
//!
//! Schema lives in `rsvp/migrations`. The capacity gate runs inside a
//! transaction holding `SELECT ... FOR UPDATE` on the event row, so
//! registrations for one event serialize while other events proceed.
//! Status transitions are single conditional `UPDATE`s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsvp_core::{
    AdmissionRule, Attendance, AttendanceRef, CheckoutRequestId, Event, EventId, EventStore,
    MerchantRequestId, Money, PaymentSession, PaymentSessionStore, PaymentStatus, ReleaseOutcome,
    ReserveOutcome, SessionOutcome, StoreError, TransitionOutcome, UserId, UserProjection,
    UserProjectionStore,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

const ATTENDANCE_COLUMNS: &str = "user_id, status, payment_reference, payment_date, reserved_at";

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Conflict(format!("{what} out of range: {value}")))
}

fn status_from_row(row: &PgRow) -> Result<PaymentStatus, StoreError> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    status.parse().map_err(corrupt)
}

fn attendance_from_row(row: &PgRow) -> Result<Attendance, StoreError> {
    Ok(Attendance {
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt)?),
        status: status_from_row(row)?,
        payment_reference: row
            .try_get::<Option<String>, _>("payment_reference")
            .map_err(corrupt)?
            .map(CheckoutRequestId::new),
        payment_date: row.try_get("payment_date").map_err(corrupt)?,
        reserved_at: row.try_get("reserved_at").map_err(corrupt)?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    let capacity: i64 = row.try_get("capacity").map_err(corrupt)?;
    let price_cents: i64 = row.try_get("price_cents").map_err(corrupt)?;
    Ok(Event {
        id: EventId::from_uuid(row.try_get("id").map_err(corrupt)?),
        title: row.try_get("title").map_err(corrupt)?,
        capacity: u32::try_from(capacity).map_err(corrupt)?,
        price: Money::from_cents(u64::try_from(price_cents).map_err(corrupt)?),
        attendees: Vec::new(),
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

async fn load_event(
    conn: &mut PgConnection,
    event_id: EventId,
    for_update: bool,
) -> Result<Option<Event>, StoreError> {
    let sql = if for_update {
        "SELECT id, title, capacity, price_cents, created_at FROM events WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, title, capacity, price_cents, created_at FROM events WHERE id = $1"
    };
    let Some(row) = sqlx::query(sql)
        .bind(*event_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(unavailable)?
    else {
        return Ok(None);
    };

    let mut event = event_from_row(&row)?;
    let rows = sqlx::query(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendances WHERE event_id = $1 ORDER BY reserved_at, user_id"
    ))
    .bind(*event_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(unavailable)?;

    event.attendees = rows.iter().map(attendance_from_row).collect::<Result<_, _>>()?;
    Ok(Some(event))
}

async fn upsert_attendance(
    conn: &mut PgConnection,
    event_id: EventId,
    attendance: &Attendance,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO attendances (event_id, user_id, status, payment_reference, payment_date, reserved_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (event_id, user_id) DO UPDATE
        SET status = EXCLUDED.status,
            payment_reference = EXCLUDED.payment_reference,
            payment_date = EXCLUDED.payment_date,
            reserved_at = EXCLUDED.reserved_at
        ",
    )
    .bind(*event_id.as_uuid())
    .bind(*attendance.user_id.as_uuid())
    .bind(attendance.status.as_str())
    .bind(attendance.payment_reference.as_ref().map(CheckoutRequestId::as_str))
    .bind(attendance.payment_date)
    .bind(attendance.reserved_at)
    .execute(&mut *conn)
    .await
    .map_err(unavailable)?;
    Ok(())
}

/// Event ledger in `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query(
            "INSERT INTO events (id, title, capacity, price_cents, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(*event.id.as_uuid())
        .bind(&event.title)
        .bind(i64::from(event.capacity))
        .bind(to_i64(event.price.cents(), "price")?)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => StoreError::Conflict(format!("event {} exists", event.id)),
            _ => unavailable(e),
        })?;

        for attendance in &event.attendees {
            upsert_attendance(&mut tx, event.id, attendance).await?;
        }

        tx.commit().await.map_err(unavailable)
    }

    async fn find_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        load_event(&mut conn, event_id, false).await
    }

    async fn list_event_ids(&self) -> Result<Vec<EventId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM events ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        rows.iter()
            .map(|row| row.try_get("id").map(EventId::from_uuid).map_err(corrupt))
            .collect()
    }

    async fn reserve(&self, event_id: EventId, rule: AdmissionRule<'_>) -> Result<ReserveOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        // Row lock held until commit; dropping `tx` rolls back.
        let Some(mut event) = load_event(&mut tx, event_id, true).await? else {
            return Ok(ReserveOutcome::EventNotFound);
        };

        let attendance = match rule(&event) {
            Ok(attendance) => attendance,
            Err(rejection) => return Ok(ReserveOutcome::Rejected(rejection)),
        };

        upsert_attendance(&mut tx, event_id, &attendance).await?;
        tx.commit().await.map_err(unavailable)?;

        event.admit(attendance.clone());
        Ok(ReserveOutcome::Admitted { event, attendance })
    }

    async fn attach_reference(
        &self,
        event_id: EventId,
        user_id: UserId,
        reference: &CheckoutRequestId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE attendances SET payment_reference = $3
            WHERE event_id = $1 AND user_id = $2 AND status = 'pending' AND payment_reference IS NULL
            ",
        )
        .bind(*event_id.as_uuid())
        .bind(*user_id.as_uuid())
        .bind(reference.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_pending(&self, event_id: EventId, user_id: UserId) -> Result<ReleaseOutcome, StoreError> {
        let deleted = sqlx::query(
            r"
            DELETE FROM attendances
            WHERE event_id = $1 AND user_id = $2 AND status = 'pending' AND payment_reference IS NULL
            ",
        )
        .bind(*event_id.as_uuid())
        .bind(*user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if deleted.rows_affected() == 1 {
            return Ok(ReleaseOutcome::Released);
        }

        let remaining = sqlx::query(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendances WHERE event_id = $1 AND user_id = $2"
        ))
        .bind(*event_id.as_uuid())
        .bind(*user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match remaining {
            Some(row) => Ok(ReleaseOutcome::Retained(attendance_from_row(&row)?)),
            None => Ok(ReleaseOutcome::Absent),
        }
    }

    async fn remove_attendance(&self, event_id: EventId, user_id: UserId) -> Result<Option<Attendance>, StoreError> {
        let removed = sqlx::query(&format!(
            "DELETE FROM attendances WHERE event_id = $1 AND user_id = $2 RETURNING {ATTENDANCE_COLUMNS}"
        ))
        .bind(*event_id.as_uuid())
        .bind(*user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        removed.as_ref().map(attendance_from_row).transpose()
    }

    async fn transition(
        &self,
        reference: &CheckoutRequestId,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let applied = sqlx::query(&format!(
            r"
            UPDATE attendances
            SET status = $2,
                payment_date = CASE WHEN $2 = 'paid' THEN $3 ELSE payment_date END
            WHERE payment_reference = $1 AND status = 'pending'
            RETURNING event_id, {ATTENDANCE_COLUMNS}
            "
        ))
        .bind(reference.as_str())
        .bind(to.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        if let Some(row) = applied {
            return Ok(TransitionOutcome::Applied {
                event_id: EventId::from_uuid(row.try_get("event_id").map_err(corrupt)?),
                attendance: attendance_from_row(&row)?,
            });
        }

        let current = sqlx::query("SELECT status FROM attendances WHERE payment_reference = $1")
            .bind(reference.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        match current {
            Some(row) => Ok(TransitionOutcome::AlreadyTerminal(status_from_row(&row)?)),
            None => Ok(TransitionOutcome::NotFound),
        }
    }

    async fn unreferenced_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(EventId, UserId)>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT event_id, user_id FROM attendances
            WHERE status = 'pending' AND payment_reference IS NULL AND reserved_at < $1
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|row| {
                Ok((
                    EventId::from_uuid(row.try_get("event_id").map_err(corrupt)?),
                    UserId::from_uuid(row.try_get("user_id").map_err(corrupt)?),
                ))
            })
            .collect()
    }

    async fn referenced_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CheckoutRequestId>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT payment_reference FROM attendances
            WHERE status = 'pending' AND payment_reference IS NOT NULL AND reserved_at < $1
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("payment_reference")
                    .map(CheckoutRequestId::new)
                    .map_err(corrupt)
            })
            .collect()
    }
}

fn entry_from_row(row: &PgRow) -> Result<AttendanceRef, StoreError> {
    Ok(AttendanceRef {
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(corrupt)?),
        status: status_from_row(row)?,
        payment_reference: row
            .try_get::<Option<String>, _>("payment_reference")
            .map_err(corrupt)?
            .map(CheckoutRequestId::new),
        payment_date: row.try_get("payment_date").map_err(corrupt)?,
    })
}

async fn upsert_entry(conn: &mut PgConnection, user_id: UserId, entry: &AttendanceRef) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO user_attendances (user_id, event_id, status, payment_reference, payment_date)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, event_id) DO UPDATE
        SET status = EXCLUDED.status,
            payment_reference = EXCLUDED.payment_reference,
            payment_date = EXCLUDED.payment_date
        ",
    )
    .bind(*user_id.as_uuid())
    .bind(*entry.event_id.as_uuid())
    .bind(entry.status.as_str())
    .bind(entry.payment_reference.as_ref().map(CheckoutRequestId::as_str))
    .bind(entry.payment_date)
    .execute(&mut *conn)
    .await
    .map_err(unavailable)?;
    Ok(())
}

/// User projections in `PostgreSQL`, one row per (user, event).
#[derive(Debug, Clone)]
pub struct PostgresProjectionStore {
    pool: PgPool,
}

impl PostgresProjectionStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserProjectionStore for PostgresProjectionStore {
    async fn find(&self, user_id: UserId) -> Result<Option<UserProjection>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT event_id, status, payment_reference, payment_date
            FROM user_attendances WHERE user_id = $1 ORDER BY event_id
            ",
        )
        .bind(*user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(UserProjection {
            user_id,
            attending: rows.iter().map(entry_from_row).collect::<Result<_, _>>()?,
        }))
    }

    async fn upsert_entry(&self, user_id: UserId, entry: &AttendanceRef) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        upsert_entry(&mut conn, user_id, entry).await
    }

    async fn remove_entry(&self, user_id: UserId, event_id: EventId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM user_attendances WHERE user_id = $1 AND event_id = $2")
            .bind(*user_id.as_uuid())
            .bind(*event_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace(&self, projection: &UserProjection) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query("DELETE FROM user_attendances WHERE user_id = $1")
            .bind(*projection.user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        for entry in &projection.attending {
            upsert_entry(&mut tx, projection.user_id, entry).await?;
        }

        tx.commit().await.map_err(unavailable)
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT user_id FROM user_attendances")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        rows.iter()
            .map(|row| row.try_get("user_id").map(UserId::from_uuid).map_err(corrupt))
            .collect()
    }
}

const SESSION_COLUMNS: &str = "checkout_request_id, merchant_request_id, event_id, user_id, amount, phone, created_at, resolved_at, outcome";

fn session_from_row(row: &PgRow) -> Result<PaymentSession, StoreError> {
    let amount: i64 = row.try_get("amount").map_err(corrupt)?;
    let outcome: Option<serde_json::Value> = row.try_get("outcome").map_err(corrupt)?;
    Ok(PaymentSession {
        checkout_request_id: CheckoutRequestId::new(
            row.try_get::<String, _>("checkout_request_id").map_err(corrupt)?,
        ),
        merchant_request_id: MerchantRequestId::new(
            row.try_get::<String, _>("merchant_request_id").map_err(corrupt)?,
        ),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(corrupt)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt)?),
        amount: u64::try_from(amount).map_err(corrupt)?,
        phone: row.try_get("phone").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        resolved_at: row.try_get("resolved_at").map_err(corrupt)?,
        outcome: outcome
            .map(serde_json::from_value::<SessionOutcome>)
            .transpose()
            .map_err(corrupt)?,
    })
}

/// Payment sessions in `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentSessionStore for PostgresSessionStore {
    async fn insert(&self, session: &PaymentSession) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO payment_sessions ({SESSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(session.checkout_request_id.as_str())
        .bind(session.merchant_request_id.as_str())
        .bind(*session.event_id.as_uuid())
        .bind(*session.user_id.as_uuid())
        .bind(to_i64(session.amount, "amount")?)
        .bind(&session.phone)
        .bind(session.created_at)
        .bind(session.resolved_at)
        .bind(
            session
                .outcome
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(corrupt)?,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => StoreError::Conflict(format!(
                "payment session {} exists",
                session.checkout_request_id
            )),
            _ => unavailable(e),
        })?;
        Ok(())
    }

    async fn find(&self, checkout_request_id: &CheckoutRequestId) -> Result<Option<PaymentSession>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM payment_sessions WHERE checkout_request_id = $1"
        ))
        .bind(checkout_request_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn unresolved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentSession>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {SESSION_COLUMNS} FROM payment_sessions
            WHERE resolved_at IS NULL AND created_at < $1
            ORDER BY created_at
            "
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(session_from_row).collect()
    }

    async fn resolve(
        &self,
        checkout_request_id: &CheckoutRequestId,
        outcome: &SessionOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE payment_sessions SET resolved_at = $2, outcome = $3
            WHERE checkout_request_id = $1 AND resolved_at IS NULL
            ",
        )
        .bind(checkout_request_id.as_str())
        .bind(at)
        .bind(serde_json::to_value(outcome).map_err(corrupt)?)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected() == 1)
    }
}
