use crate::domain::error::EngineError;
use crate::domain::variant::Variant;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantShare {
    pub variant_id: Uuid,
    pub sample_size: i64,
}

/// Frozen content-test split. `tested_total = floor(population * pct / 100)`
/// divided as evenly as possible; the rounding remainder goes to the first
/// variants in declaration order so the plan is reproducible for the same
/// input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPlan {
    pub shares: Vec<VariantShare>,
    pub population: i64,
    pub tested_total: i64,
    pub holdback: i64,
}

impl ContentPlan {
    /// A zero-population plan: the experiment may still start, dispatch is a
    /// no-op and significance can never be reached.
    pub fn is_empty(&self) -> bool {
        self.tested_total == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdPlan {
    pub daily_budget_minor: i64,
    pub duration_days: i32,
    pub per_variant_total_minor: i64,
}

pub fn plan_content(
    population: i64,
    sample_pct: f64,
    variants: &[Variant],
) -> Result<ContentPlan, EngineError> {
    if !(sample_pct > 0.0 && sample_pct <= 100.0) {
        return Err(EngineError::validation(format!(
            "sample percentage {sample_pct} is outside (0, 100]"
        )));
    }
    if population < 0 {
        return Err(EngineError::validation(format!(
            "population size {population} is negative"
        )));
    }
    if variants.is_empty() {
        return Err(EngineError::validation("cannot allocate zero variants"));
    }

    let tested_total = ((population as f64) * sample_pct / 100.0).floor() as i64;
    let n = variants.len() as i64;
    let base = tested_total / n;
    let remainder = tested_total % n;

    let mut ordered: Vec<&Variant> = variants.iter().collect();
    ordered.sort_by_key(|v| v.position);

    let shares = ordered
        .iter()
        .enumerate()
        .map(|(i, v)| VariantShare {
            variant_id: v.variant_id,
            sample_size: base + i64::from((i as i64) < remainder),
        })
        .collect();

    Ok(ContentPlan {
        shares,
        population,
        tested_total,
        holdback: population - tested_total,
    })
}

pub fn plan_ad(
    daily_budget_minor: i64,
    duration_days: i32,
    variant_count: usize,
) -> Result<AdPlan, EngineError> {
    if daily_budget_minor <= 0 {
        return Err(EngineError::validation(format!(
            "daily budget {daily_budget_minor} must be positive"
        )));
    }
    if duration_days <= 0 {
        return Err(EngineError::validation(format!(
            "duration {duration_days} days must be positive"
        )));
    }
    if variant_count == 0 {
        return Err(EngineError::validation("cannot allocate zero variants"));
    }
    Ok(AdPlan {
        daily_budget_minor,
        duration_days,
        per_variant_total_minor: daily_budget_minor * i64::from(duration_days),
    })
}

/// Slices a resolved recipient list according to a content plan. Returns the
/// per-variant slices in plan order plus the held-back remainder.
/// Deterministic for identical input lists.
pub fn split_recipients<'a>(
    recipients: &'a [String],
    plan: &ContentPlan,
) -> (Vec<(Uuid, &'a [String])>, &'a [String]) {
    let mut cursor = 0usize;
    let mut slices = Vec::with_capacity(plan.shares.len());
    for share in &plan.shares {
        let take = (share.sample_size.max(0) as usize).min(recipients.len() - cursor);
        slices.push((share.variant_id, &recipients[cursor..cursor + take]));
        cursor += take;
    }
    (slices, &recipients[cursor..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::variant::{VariantContent, VariantCounters};

    fn variant(position: i32) -> Variant {
        Variant {
            variant_id: Uuid::new_v4(),
            experiment_id: Uuid::new_v4(),
            position,
            content: VariantContent::Email {
                subject: Some(format!("subject {position}")),
                body: None,
                template_ref: None,
                sender_name: None,
            },
            counters: VariantCounters::default(),
            allocated_sample: None,
            is_winner: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn remainder_goes_to_first_declared() {
        let variants = vec![variant(0), variant(1), variant(2)];
        let plan = plan_content(1000, 10.0, &variants).unwrap();
        assert_eq!(plan.tested_total, 100);
        let sizes: Vec<i64> = plan.shares.iter().map(|s| s.sample_size).collect();
        assert_eq!(sizes, vec![34, 33, 33]);
        assert_eq!(plan.holdback, 900);
    }

    #[test]
    fn zero_population_plan_is_empty_but_valid() {
        let variants = vec![variant(0), variant(1)];
        let plan = plan_content(0, 25.0, &variants).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.holdback, 0);
    }

    #[test]
    fn percentage_bounds_enforced() {
        let variants = vec![variant(0), variant(1)];
        assert!(plan_content(100, 0.0, &variants).is_err());
        assert!(plan_content(100, -4.0, &variants).is_err());
        assert!(plan_content(100, 120.0, &variants).is_err());
        assert!(plan_content(100, 100.0, &variants).is_ok());
    }

    #[test]
    fn ad_budget_totals() {
        let plan = plan_ad(5_000, 7, 3).unwrap();
        assert_eq!(plan.per_variant_total_minor, 35_000);
        assert!(plan_ad(0, 7, 3).is_err());
        assert!(plan_ad(5_000, 0, 3).is_err());
    }
}
