use crate::domain::experiment::Experiment;
use crate::domain::variant::{Variant, VariantCounters};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub mod http;
pub mod mock;

/// Eligible audience for a content test, resolved once at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Population {
    pub count: i64,
    pub recipient_ids: Vec<String>,
}

/// One variant's cumulative counters as reported by an ad platform. Pulls
/// are authoritative snapshots for the reporting window, not increments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantPull {
    pub variant_id: Uuid,
    pub counters: VariantCounters,
}

#[async_trait::async_trait]
pub trait PopulationProvider: Send + Sync {
    async fn resolve_eligible(&self, targeting: &serde_json::Value) -> Result<Population>;
}

#[async_trait::async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Dispatches a variant's content to the given recipients; delivery is
    /// asynchronous and outcomes arrive later as events.
    async fn dispatch(&self, variant: &Variant, recipients: &[String]) -> Result<String>;
}

#[async_trait::async_trait]
pub trait AdPlatformGateway: Send + Sync {
    async fn verify_account(&self, account_id: &str) -> Result<String>;

    async fn create_campaign(&self, experiment: &Experiment, variants: &[Variant])
        -> Result<String>;

    async fn pause_campaign(&self, campaign_id: &str) -> Result<()>;

    async fn resume_campaign(&self, campaign_id: &str) -> Result<()>;

    async fn pull_metrics(&self, campaign_id: &str) -> Result<Vec<VariantPull>>;

    async fn apply_winner(&self, campaign_id: &str, variant_id: Uuid) -> Result<()>;
}

/// The collaborator bundle the lifecycle controller talks to.
#[derive(Clone)]
pub struct EngineGateways {
    pub population: Arc<dyn PopulationProvider>,
    pub delivery: Arc<dyn DeliveryGateway>,
    pub ads: Arc<dyn AdPlatformGateway>,
}
