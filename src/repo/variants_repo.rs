use crate::domain::variant::{Variant, VariantContent, VariantCounters};
use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct VariantsRepo {
    pub pool: PgPool,
}

const VARIANT_COLUMNS: &str = "variant_id, experiment_id, position, content, sent, delivered, opens, \
     clicks, conversions, impressions, spend_minor, conversion_value_minor, \
     allocated_sample, is_winner, created_at";

fn map_variant(row: &PgRow) -> Result<Variant> {
    let content_raw: serde_json::Value = row.get("content");
    let content: VariantContent = serde_json::from_value(content_raw)
        .map_err(|e| anyhow!("malformed variant content payload: {e}"))?;
    Ok(Variant {
        variant_id: row.get("variant_id"),
        experiment_id: row.get("experiment_id"),
        position: row.get("position"),
        content,
        counters: VariantCounters {
            sent: row.get("sent"),
            delivered: row.get("delivered"),
            opens: row.get("opens"),
            clicks: row.get("clicks"),
            conversions: row.get("conversions"),
            impressions: row.get("impressions"),
            spend_minor: row.get("spend_minor"),
            conversion_value_minor: row.get("conversion_value_minor"),
        },
        allocated_sample: row.get("allocated_sample"),
        is_winner: row.get("is_winner"),
        created_at: row.get("created_at"),
    })
}

impl VariantsRepo {
    pub async fn add(
        &self,
        experiment_id: Uuid,
        position: i32,
        content: &VariantContent,
    ) -> Result<Variant> {
        let variant_id = Uuid::new_v4();
        let payload = serde_json::to_value(content)?;
        let row = sqlx::query(&format!(
            "INSERT INTO variants (variant_id, experiment_id, position, content) \
             VALUES ($1,$2,$3,$4) RETURNING {VARIANT_COLUMNS}"
        ))
        .bind(variant_id)
        .bind(experiment_id)
        .bind(position)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        map_variant(&row)
    }

    pub async fn get(&self, variant_id: Uuid) -> Result<Option<Variant>> {
        let row = sqlx::query(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE variant_id=$1"
        ))
        .bind(variant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_variant).transpose()
    }

    /// Variants in declaration order; allocation and tie-breaking both lean
    /// on this ordering.
    pub async fn list_for_experiment(&self, experiment_id: Uuid) -> Result<Vec<Variant>> {
        let rows = sqlx::query(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE experiment_id=$1 ORDER BY position"
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_variant).collect()
    }

    pub async fn count_for_experiment(&self, experiment_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM variants WHERE experiment_id=$1")
            .bind(experiment_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Ad refresh: the platform reports cumulative totals, so each pull
    /// replaces the reporting-window counters outright.
    pub async fn replace_counters(&self, variant_id: Uuid, counters: &VariantCounters) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE variants SET
                impressions = $2,
                clicks = $3,
                conversions = $4,
                spend_minor = $5,
                conversion_value_minor = $6
            WHERE variant_id=$1
            "#,
        )
        .bind(variant_id)
        .bind(counters.impressions)
        .bind(counters.clicks)
        .bind(counters.conversions)
        .bind(counters.spend_minor)
        .bind(counters.conversion_value_minor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
