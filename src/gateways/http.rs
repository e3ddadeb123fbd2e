use crate::domain::experiment::{Experiment, SampleAllocation};
use crate::domain::variant::Variant;
use crate::gateways::{AdPlatformGateway, DeliveryGateway, Population, PopulationProvider, VariantPull};
use anyhow::{anyhow, bail, Result};
use serde_json::json;
use uuid::Uuid;

/// Segment/audience service client. Used only at content-test start.
pub struct HttpPopulationProvider {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

#[async_trait::async_trait]
impl PopulationProvider for HttpPopulationProvider {
    async fn resolve_eligible(&self, targeting: &serde_json::Value) -> Result<Population> {
        let resp = self
            .client
            .post(format!("{}/v1/population/resolve", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "targeting": targeting }))
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("population provider returned HTTP {}", resp.status().as_u16());
        }
        Ok(resp.json::<Population>().await?)
    }
}

/// Email delivery provider client (ESP-agnostic dispatch endpoint).
pub struct HttpDeliveryGateway {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

#[async_trait::async_trait]
impl DeliveryGateway for HttpDeliveryGateway {
    async fn dispatch(&self, variant: &Variant, recipients: &[String]) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/v1/dispatch", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "variant_id": variant.variant_id,
                "content": variant.content,
                "recipient_ids": recipients,
            }))
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("delivery gateway returned HTTP {}", resp.status().as_u16());
        }
        let body: serde_json::Value = resp.json().await?;
        body.get("dispatch_id")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("delivery gateway response missing dispatch_id"))
    }
}

/// Ad platform client. The engine never embeds provider specifics beyond
/// this normalized surface.
pub struct HttpAdPlatformGateway {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

impl HttpAdPlatformGateway {
    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

#[async_trait::async_trait]
impl AdPlatformGateway for HttpAdPlatformGateway {
    async fn verify_account(&self, account_id: &str) -> Result<String> {
        let resp = self
            .client
            .get(format!("{}/v1/accounts/{}", self.base_url, account_id))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout())
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            bail!("ad account {account_id} failed verification");
        }
        if !resp.status().is_success() {
            bail!("ad platform returned HTTP {}", resp.status().as_u16());
        }
        let body: serde_json::Value = resp.json().await?;
        body.get("account_name")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("ad platform response missing account_name"))
    }

    async fn create_campaign(
        &self,
        experiment: &Experiment,
        variants: &[Variant],
    ) -> Result<String> {
        let (daily_budget_minor, duration_days) = match experiment.sample_allocation {
            SampleAllocation::DailyBudget {
                daily_budget_minor,
                duration_days,
            } => (daily_budget_minor, duration_days),
            SampleAllocation::Percentage { .. } => {
                bail!("experiment {} is not budget allocated", experiment.experiment_id)
            }
        };
        let resp = self
            .client
            .post(format!("{}/v1/campaigns", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "account_id": experiment.ad_account_id,
                "name": experiment.name,
                "daily_budget_minor": daily_budget_minor,
                "duration_days": duration_days,
                "variants": variants
                    .iter()
                    .map(|v| json!({ "variant_id": v.variant_id, "content": v.content }))
                    .collect::<Vec<_>>(),
            }))
            .timeout(self.timeout())
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("ad platform returned HTTP {}", resp.status().as_u16());
        }
        let body: serde_json::Value = resp.json().await?;
        body.get("campaign_id")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("ad platform response missing campaign_id"))
    }

    async fn pause_campaign(&self, campaign_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/v1/campaigns/{}/pause", self.base_url, campaign_id))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout())
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("ad platform returned HTTP {}", resp.status().as_u16());
        }
        Ok(())
    }

    async fn resume_campaign(&self, campaign_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/v1/campaigns/{}/resume", self.base_url, campaign_id))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout())
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("ad platform returned HTTP {}", resp.status().as_u16());
        }
        Ok(())
    }

    async fn pull_metrics(&self, campaign_id: &str) -> Result<Vec<VariantPull>> {
        let resp = self
            .client
            .get(format!("{}/v1/campaigns/{}/metrics", self.base_url, campaign_id))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout())
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("ad platform returned HTTP {}", resp.status().as_u16());
        }
        Ok(resp.json::<Vec<VariantPull>>().await?)
    }

    async fn apply_winner(&self, campaign_id: &str, variant_id: Uuid) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/v1/campaigns/{}/winner", self.base_url, campaign_id))
            .bearer_auth(&self.api_key)
            .json(&json!({ "variant_id": variant_id }))
            .timeout(self.timeout())
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("ad platform returned HTTP {}", resp.status().as_u16());
        }
        Ok(())
    }
}
