use crate::allocation::planner::VariantShare;
use crate::domain::experiment::{
    Experiment, ExperimentKind, ExperimentStatus, SampleAllocation, SuccessMetric, TestType,
};
use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct ExperimentsRepo {
    pub pool: PgPool,
}

#[derive(Debug, Clone)]
pub struct CreateExperimentInput {
    pub name: String,
    pub description: String,
    pub kind: ExperimentKind,
    pub test_type: TestType,
    pub success_metric: SuccessMetric,
    pub sample_allocation: SampleAllocation,
    pub auto_select_winner: bool,
    pub ad_account_id: Option<String>,
    pub targeting: Option<serde_json::Value>,
}

const EXPERIMENT_COLUMNS: &str = "experiment_id, name, description, kind, test_type, success_metric, \
     sample_pct, daily_budget_minor, duration_days, auto_select_winner, status, \
     winner_variant_id, remainder_sent, ad_account_id, external_campaign_id, targeting, \
     population_size, holdback_count, last_refresh_at, last_refresh_error, \
     created_at, started_at, completed_at";

fn map_experiment(row: &PgRow) -> Result<Experiment> {
    let kind_raw: String = row.get("kind");
    let kind = ExperimentKind::from_db(&kind_raw)
        .ok_or_else(|| anyhow!("unknown experiment kind {kind_raw}"))?;
    let test_type_raw: String = row.get("test_type");
    let test_type = TestType::from_db(&test_type_raw)
        .ok_or_else(|| anyhow!("unknown test type {test_type_raw}"))?;
    let metric_raw: String = row.get("success_metric");
    let success_metric = SuccessMetric::from_db(&metric_raw)
        .ok_or_else(|| anyhow!("unknown success metric {metric_raw}"))?;
    let status_raw: String = row.get("status");
    let status = ExperimentStatus::from_db(&status_raw)
        .ok_or_else(|| anyhow!("unknown experiment status {status_raw}"))?;

    let sample_allocation = match kind {
        ExperimentKind::Content => SampleAllocation::Percentage {
            sample_pct: row
                .try_get::<f64, _>("sample_pct")
                .map_err(|_| anyhow!("content experiment missing sample_pct"))?,
        },
        ExperimentKind::Ad => SampleAllocation::DailyBudget {
            daily_budget_minor: row
                .try_get::<i64, _>("daily_budget_minor")
                .map_err(|_| anyhow!("ad experiment missing daily_budget_minor"))?,
            duration_days: row
                .try_get::<i32, _>("duration_days")
                .map_err(|_| anyhow!("ad experiment missing duration_days"))?,
        },
    };

    Ok(Experiment {
        experiment_id: row.get("experiment_id"),
        name: row.get("name"),
        description: row.get("description"),
        kind,
        test_type,
        success_metric,
        sample_allocation,
        auto_select_winner: row.get("auto_select_winner"),
        status,
        winner_variant_id: row.get("winner_variant_id"),
        remainder_sent: row.get("remainder_sent"),
        ad_account_id: row.get("ad_account_id"),
        external_campaign_id: row.get("external_campaign_id"),
        targeting: row.get("targeting"),
        population_size: row.get("population_size"),
        holdback_count: row.get("holdback_count"),
        last_refresh_at: row.get("last_refresh_at"),
        last_refresh_error: row.get("last_refresh_error"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

impl ExperimentsRepo {
    pub async fn create(&self, input: CreateExperimentInput) -> Result<Experiment> {
        let experiment_id = Uuid::new_v4();
        let (sample_pct, daily_budget_minor, duration_days) = match input.sample_allocation {
            SampleAllocation::Percentage { sample_pct } => (Some(sample_pct), None, None),
            SampleAllocation::DailyBudget {
                daily_budget_minor,
                duration_days,
            } => (None, Some(daily_budget_minor), Some(duration_days)),
        };

        sqlx::query(
            r#"
            INSERT INTO experiments (
                experiment_id, name, description, kind, test_type, success_metric,
                sample_pct, daily_budget_minor, duration_days, auto_select_winner,
                status, ad_account_id, targeting
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,'DRAFT',$11,$12)
            "#,
        )
        .bind(experiment_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.kind.as_db())
        .bind(input.test_type.as_db())
        .bind(input.success_metric.as_db())
        .bind(sample_pct)
        .bind(daily_budget_minor)
        .bind(duration_days)
        .bind(input.auto_select_winner)
        .bind(&input.ad_account_id)
        .bind(&input.targeting)
        .execute(&self.pool)
        .await?;

        self.get(experiment_id)
            .await?
            .ok_or_else(|| anyhow!("experiment {experiment_id} vanished after insert"))
    }

    pub async fn get(&self, experiment_id: Uuid) -> Result<Option<Experiment>> {
        let row = sqlx::query(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE experiment_id=$1"
        ))
        .bind(experiment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_experiment).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Experiment>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_experiment).collect()
    }

    /// Running or paused ad tests, the set the background scheduler refreshes.
    pub async fn list_refreshable(&self) -> Result<Vec<Experiment>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments \
             WHERE kind='AD' AND status IN ('RUNNING','PAUSED') ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_experiment).collect()
    }

    /// Commits a content-test start in one transaction: the status move and
    /// every variant's frozen sample size land together or not at all. The
    /// DRAFT guard means a concurrent cancel wins.
    pub async fn commit_start_content(
        &self,
        experiment_id: Uuid,
        population_size: i64,
        holdback_count: i64,
        holdback_recipients: &serde_json::Value,
        shares: &[VariantShare],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE experiments
            SET status='RUNNING', started_at=now(), population_size=$2,
                holdback_count=$3, holdback_recipients=$4
            WHERE experiment_id=$1 AND status='DRAFT'
            "#,
        )
        .bind(experiment_id)
        .bind(population_size)
        .bind(holdback_count)
        .bind(holdback_recipients)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        for share in shares {
            sqlx::query(
                "UPDATE variants SET allocated_sample=$2 WHERE variant_id=$1 AND experiment_id=$3",
            )
            .bind(share.variant_id)
            .bind(share.sample_size)
            .bind(experiment_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn commit_start_ad(
        &self,
        experiment_id: Uuid,
        external_campaign_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE experiments
            SET status='RUNNING', started_at=now(), external_campaign_id=$2
            WHERE experiment_id=$1 AND status='DRAFT'
            "#,
        )
        .bind(experiment_id)
        .bind(external_campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Guarded status move; returns false when the experiment left the
    /// expected source status in the meantime.
    pub async fn transition(
        &self,
        experiment_id: Uuid,
        from: &[ExperimentStatus],
        to: ExperimentStatus,
    ) -> Result<bool> {
        let from_db: Vec<String> = from.iter().map(|s| s.as_db().to_string()).collect();
        let result = sqlx::query(
            "UPDATE experiments SET status=$2 WHERE experiment_id=$1 AND status = ANY($3)",
        )
        .bind(experiment_id)
        .bind(to.as_db())
        .bind(&from_db)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Sets the winner exactly once and completes the experiment, both in
    /// one transaction. The `winner_variant_id IS NULL` guard makes a second
    /// declaration a no-op at the SQL level.
    pub async fn complete_with_winner(
        &self,
        experiment_id: Uuid,
        winner_variant_id: Uuid,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE experiments
            SET status='COMPLETED', winner_variant_id=$2, completed_at=now()
            WHERE experiment_id=$1 AND winner_variant_id IS NULL
              AND status IN ('RUNNING','PAUSED')
            "#,
        )
        .bind(experiment_id)
        .bind(winner_variant_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE variants SET is_winner=TRUE WHERE variant_id=$1 AND experiment_id=$2")
            .bind(winner_variant_id)
            .bind(experiment_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Claims the one-shot winner send to the held-back remainder.
    pub async fn claim_remainder(&self, experiment_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE experiments SET remainder_sent=TRUE
            WHERE experiment_id=$1 AND status='COMPLETED'
              AND winner_variant_id IS NOT NULL AND remainder_sent=FALSE
            "#,
        )
        .bind(experiment_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Releases the claim after a failed dispatch so the send can be retried.
    pub async fn release_remainder(&self, experiment_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE experiments SET remainder_sent=FALSE WHERE experiment_id=$1")
            .bind(experiment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn holdback_recipients(&self, experiment_id: Uuid) -> Result<Vec<String>> {
        let row = sqlx::query("SELECT holdback_recipients FROM experiments WHERE experiment_id=$1")
            .bind(experiment_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(Vec::new());
        };
        let value: Option<serde_json::Value> = row.get("holdback_recipients");
        Ok(value
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default())
    }

    pub async fn mark_refresh(&self, experiment_id: Uuid, error: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE experiments SET last_refresh_at=now(), last_refresh_error=$2 WHERE experiment_id=$1",
        )
        .bind(experiment_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, experiment_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM experiments WHERE experiment_id=$1 AND status='DRAFT'")
            .bind(experiment_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
