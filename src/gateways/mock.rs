use crate::domain::experiment::Experiment;
use crate::domain::variant::{Variant, VariantCounters};
use crate::gateways::{AdPlatformGateway, DeliveryGateway, Population, PopulationProvider, VariantPull};
use anyhow::{bail, Result};
use uuid::Uuid;

pub struct MockPopulationProvider {
    pub population_size: i64,
}

#[async_trait::async_trait]
impl PopulationProvider for MockPopulationProvider {
    async fn resolve_eligible(&self, _targeting: &serde_json::Value) -> Result<Population> {
        let recipient_ids = (0..self.population_size)
            .map(|i| format!("recipient-{i}"))
            .collect();
        Ok(Population {
            count: self.population_size,
            recipient_ids,
        })
    }
}

pub struct MockDeliveryGateway {
    pub behavior: String,
}

#[async_trait::async_trait]
impl DeliveryGateway for MockDeliveryGateway {
    async fn dispatch(&self, variant: &Variant, recipients: &[String]) -> Result<String> {
        if self.behavior == "ALWAYS_FAILURE" {
            bail!("mock delivery decline");
        }
        tracing::info!(
            variant_id = %variant.variant_id,
            recipients = recipients.len(),
            "mock dispatch"
        );
        Ok(format!("mock_dispatch_{}", Uuid::new_v4()))
    }
}

pub struct MockAdPlatformGateway {
    pub behavior: String,
}

#[async_trait::async_trait]
impl AdPlatformGateway for MockAdPlatformGateway {
    async fn verify_account(&self, account_id: &str) -> Result<String> {
        if self.behavior == "ALWAYS_AUTH_ERROR" {
            bail!("mock auth error for account {account_id}");
        }
        Ok(format!("mock-account-{account_id}"))
    }

    async fn create_campaign(
        &self,
        _experiment: &Experiment,
        _variants: &[Variant],
    ) -> Result<String> {
        if self.behavior == "ALWAYS_FAILURE" {
            bail!("mock campaign create failure");
        }
        Ok(format!("mock_campaign_{}", Uuid::new_v4()))
    }

    async fn pause_campaign(&self, campaign_id: &str) -> Result<()> {
        tracing::info!(campaign_id, "mock pause");
        Ok(())
    }

    async fn resume_campaign(&self, campaign_id: &str) -> Result<()> {
        tracing::info!(campaign_id, "mock resume");
        Ok(())
    }

    async fn pull_metrics(&self, _campaign_id: &str) -> Result<Vec<VariantPull>> {
        if self.behavior == "ALWAYS_TIMEOUT" {
            bail!("mock metrics timeout");
        }
        Ok(Vec::new())
    }

    async fn apply_winner(&self, campaign_id: &str, variant_id: Uuid) -> Result<()> {
        tracing::info!(campaign_id, %variant_id, "mock apply winner");
        Ok(())
    }
}

impl MockAdPlatformGateway {
    /// Canned cumulative counters, handy for local development refreshes.
    pub fn pull_fixture(variant_ids: &[Uuid]) -> Vec<VariantPull> {
        variant_ids
            .iter()
            .enumerate()
            .map(|(i, &variant_id)| VariantPull {
                variant_id,
                counters: VariantCounters {
                    impressions: 1_000 * (i as i64 + 1),
                    clicks: 40 * (i as i64 + 1),
                    conversions: 5 * (i as i64 + 1),
                    spend_minor: 20_000,
                    ..Default::default()
                },
            })
            .collect()
    }
}
