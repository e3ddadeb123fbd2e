use crate::domain::variant::CounterDelta;
use crate::metrics::event::RawEvent;
use anyhow::Result;
use sqlx::PgPool;

/// Append-only event log keyed by external event id. The primary-key
/// conflict is the authoritative replay check; the insert is idempotent.
#[derive(Clone)]
pub struct RawEventsRepo {
    pub pool: PgPool,
}

impl RawEventsRepo {
    /// Returns true when the event is new, false on a replay.
    pub async fn insert_if_new(&self, event: &RawEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_events (external_event_id, variant_id, event_kind, value_minor)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (external_event_id) DO NOTHING
            "#,
        )
        .bind(&event.external_event_id)
        .bind(event.variant_id)
        .bind(event.kind.as_db())
        .bind(event.value_minor)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Logs the event and applies its counter delta in one transaction:
    /// either both land or neither does, so a failed increment can never
    /// strand the id in the log. Returns false on a replay, leaving the
    /// counters untouched.
    pub async fn insert_and_apply(&self, event: &RawEvent, delta: &CounterDelta) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO raw_events (external_event_id, variant_id, event_kind, value_minor)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (external_event_id) DO NOTHING
            "#,
        )
        .bind(&event.external_event_id)
        .bind(event.variant_id)
        .bind(event.kind.as_db())
        .bind(event.value_minor)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE variants SET
                sent = sent + $2,
                delivered = delivered + $3,
                opens = opens + $4,
                clicks = clicks + $5,
                conversions = conversions + $6,
                impressions = impressions + $7,
                spend_minor = spend_minor + $8,
                conversion_value_minor = conversion_value_minor + $9
            WHERE variant_id=$1
            "#,
        )
        .bind(event.variant_id)
        .bind(delta.sent)
        .bind(delta.delivered)
        .bind(delta.opens)
        .bind(delta.clicks)
        .bind(delta.conversions)
        .bind(delta.impressions)
        .bind(delta.spend_minor)
        .bind(delta.conversion_value_minor)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}
