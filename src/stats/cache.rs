use crate::stats::significance::SignificanceResult;
use anyhow::Result;
use redis::AsyncCommands;
use uuid::Uuid;

/// Timestamped hot cache for the latest significance result per experiment.
/// Counters in Postgres stay the source of truth; a miss just means the
/// caller recomputes.
#[derive(Clone)]
pub struct SignificanceCache {
    pub client: redis::Client,
    pub ttl_seconds: u64,
}

impl SignificanceCache {
    pub fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            ttl_seconds,
        })
    }

    fn key(experiment_id: Uuid) -> String {
        format!("experiments:{experiment_id}:significance")
    }

    pub async fn write(&self, experiment_id: Uuid, result: &SignificanceResult) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(result)?;
        let _: () = conn
            .set_ex(Self::key(experiment_id), payload, self.ttl_seconds)
            .await?;
        Ok(())
    }

    pub async fn read(&self, experiment_id: Uuid) -> Result<Option<SignificanceResult>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::key(experiment_id)).await?;
        Ok(payload
            .map(|p| serde_json::from_str(&p))
            .transpose()?)
    }
}
