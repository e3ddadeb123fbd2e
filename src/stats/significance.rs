use crate::domain::experiment::SuccessMetric;
use crate::domain::variant::Variant;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    /// Every variant must reach this many trials before a result can be
    /// called confident.
    pub min_sample_floor: i64,
    /// One-sided significance level for the leader vs runner-up comparison.
    pub alpha: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            min_sample_floor: 100,
            alpha: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantReading {
    pub variant_id: Uuid,
    pub value: f64,
    pub sample_size: i64,
}

/// Recomputed on every evaluation; cached with its timestamp, never treated
/// as a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub metric: SuccessMetric,
    pub variants: Vec<VariantReading>,
    pub leading_variant_id: Option<Uuid>,
    pub improvement_pct: f64,
    pub confident: bool,
    pub p_value: f64,
    pub test_statistic: f64,
    pub computed_at: chrono::DateTime<chrono::Utc>,
}

/// Compares all of an experiment's variants on its success metric.
///
/// Rate metrics get a one-sided two-proportion z-test (pooled standard
/// error) between the leader and the runner-up. Ratio metrics (cpm, cpc,
/// roas) are compared as means with a unit-coefficient-of-variation variance
/// model (var ~= mean^2, n = the ratio's denominator count), since only
/// cumulative counters are available. Ties on the point estimate resolve to
/// the earliest-declared variant and stay non-confident.
pub fn evaluate(
    metric: SuccessMetric,
    variants: &[Variant],
    cfg: &EvaluatorConfig,
) -> SignificanceResult {
    let computed_at = chrono::Utc::now();
    let readings: Vec<VariantReading> = variants
        .iter()
        .map(|v| VariantReading {
            variant_id: v.variant_id,
            value: v.counters.metric_value(metric),
            sample_size: v.counters.trials(metric),
        })
        .collect();

    if variants.len() < 2 {
        return SignificanceResult {
            metric,
            variants: readings,
            leading_variant_id: variants.first().map(|v| v.variant_id),
            improvement_pct: 0.0,
            confident: false,
            p_value: 1.0,
            test_statistic: 0.0,
            computed_at,
        };
    }

    // Leader by point estimate; declaration order breaks ties, so the
    // outcome is stable across evaluations with identical counters.
    let mut order: Vec<usize> = (0..variants.len()).collect();
    order.sort_by(|&a, &b| variants[a].position.cmp(&variants[b].position));
    let better = |a: f64, b: f64| {
        if metric.lower_is_better() {
            a < b
        } else {
            a > b
        }
    };
    let mut lead = order[0];
    for &i in &order[1..] {
        if better(readings[i].value, readings[lead].value) {
            lead = i;
        }
    }
    let mut runner = if order[0] == lead { order[1] } else { order[0] };
    for &i in &order {
        if i == lead || i == runner {
            continue;
        }
        if better(readings[i].value, readings[runner].value) {
            runner = i;
        }
    }

    let others: Vec<f64> = (0..readings.len())
        .filter(|&i| i != lead)
        .map(|i| readings[i].value)
        .collect();
    let mean_others = others.iter().sum::<f64>() / others.len() as f64;
    let improvement_pct = if mean_others == 0.0 {
        0.0
    } else if metric.lower_is_better() {
        (mean_others - readings[lead].value) / mean_others * 100.0
    } else {
        (readings[lead].value - mean_others) / mean_others * 100.0
    };

    let floor_met = readings.iter().all(|r| r.sample_size >= cfg.min_sample_floor);
    let (statistic, p_value) = if floor_met {
        if metric.is_rate() {
            two_proportion_one_sided(
                variants[lead].counters.successes(metric),
                readings[lead].sample_size,
                variants[runner].counters.successes(metric),
                readings[runner].sample_size,
            )
        } else {
            ratio_mean_one_sided(
                readings[lead].value,
                readings[lead].sample_size,
                readings[runner].value,
                readings[runner].sample_size,
                metric.lower_is_better(),
            )
        }
    } else {
        (0.0, 1.0)
    };

    SignificanceResult {
        metric,
        variants: readings,
        leading_variant_id: Some(variants[lead].variant_id),
        improvement_pct,
        confident: floor_met && p_value < cfg.alpha,
        p_value,
        test_statistic: statistic,
        computed_at,
    }
}

/// One-sided two-proportion z-test favoring the first (leading) sample.
/// Returns (z, p). A degenerate pooled standard error yields p = 1.
fn two_proportion_one_sided(s1: i64, n1: i64, s2: i64, n2: i64) -> (f64, f64) {
    if n1 <= 0 || n2 <= 0 {
        return (0.0, 1.0);
    }
    let p1 = s1 as f64 / n1 as f64;
    let p2 = s2 as f64 / n2 as f64;
    let pooled = (s1 + s2) as f64 / (n1 + n2) as f64;
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    if se == 0.0 {
        return (0.0, 1.0);
    }
    let z = (p1 - p2) / se;
    (z, 1.0 - normal_cdf(z))
}

/// One-sided comparison of two ratio means under a unit coefficient of
/// variation: var ~= mean^2, n = denominator count. Large floors make the
/// normal approximation acceptable; zero data cannot pass because the sample
/// floor is checked upstream and a zero standard error returns p = 1.
fn ratio_mean_one_sided(
    lead: f64,
    n_lead: i64,
    runner: f64,
    n_runner: i64,
    lower_is_better: bool,
) -> (f64, f64) {
    if n_lead <= 0 || n_runner <= 0 {
        return (0.0, 1.0);
    }
    let var_lead = lead * lead / n_lead as f64;
    let var_runner = runner * runner / n_runner as f64;
    let se = (var_lead + var_runner).sqrt();
    if se == 0.0 {
        return (0.0, 1.0);
    }
    let advantage = if lower_is_better { runner - lead } else { lead - runner };
    let z = advantage / se;
    (z, 1.0 - normal_cdf(z))
}

/// Abramowitz & Stegun 26.2.17 polynomial approximation.
fn normal_cdf(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.2316419 * x.abs());
    let d = 0.3989423 * (-x * x / 2.0).exp();
    let prob = 1.0
        - d * t
            * (0.3193815 + t * (-0.3565638 + t * (1.781478 + t * (-1.821256 + t * 1.330274))));
    if x >= 0.0 {
        prob
    } else {
        1.0 - prob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.645) - 0.95).abs() < 1e-3);
        assert!((normal_cdf(-1.645) - 0.05).abs() < 1e-3);
    }

    #[test]
    fn z_test_separates_clear_gap() {
        let (z, p) = two_proportion_one_sided(200, 1000, 100, 1000);
        assert!(z > 5.0);
        assert!(p < 0.001);
    }

    #[test]
    fn z_test_flat_on_identical_rates() {
        let (z, p) = two_proportion_one_sided(150, 1000, 150, 1000);
        assert_eq!(z, 0.0);
        assert!((p - 0.5).abs() < 1e-6);
    }

    #[test]
    fn ratio_comparison_needs_data() {
        let (_, p) = ratio_mean_one_sided(0.0, 0, 0.0, 0, false);
        assert_eq!(p, 1.0);
        let (_, p) = ratio_mean_one_sided(0.0, 500, 0.0, 500, true);
        assert_eq!(p, 1.0);
    }
}
