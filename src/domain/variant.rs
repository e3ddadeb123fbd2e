use crate::domain::experiment::{ExperimentKind, SuccessMetric};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind-specific treatment payload. Validated against the owning
/// experiment's kind at the edges; consumed uniformly everywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantContent {
    Email {
        subject: Option<String>,
        body: Option<String>,
        template_ref: Option<String>,
        sender_name: Option<String>,
    },
    Ad {
        headline: Option<String>,
        primary_text: Option<String>,
        description: Option<String>,
        call_to_action: Option<String>,
        link_url: Option<String>,
        image_url: Option<String>,
        targeting: Option<serde_json::Value>,
    },
}

impl VariantContent {
    pub fn kind(&self) -> ExperimentKind {
        match self {
            VariantContent::Email { .. } => ExperimentKind::Content,
            VariantContent::Ad { .. } => ExperimentKind::Ad,
        }
    }
}

/// Accumulated raw counters. Rates are always derived on read so the
/// counters stay the single source of truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounters {
    pub sent: i64,
    pub delivered: i64,
    pub opens: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub impressions: i64,
    pub spend_minor: i64,
    pub conversion_value_minor: i64,
}

fn ratio(num: i64, den: i64) -> f64 {
    if den <= 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl VariantCounters {
    pub fn open_rate(&self) -> f64 {
        ratio(self.opens, self.sent)
    }

    pub fn click_rate(&self) -> f64 {
        ratio(self.clicks, self.sent)
    }

    pub fn conversion_rate(&self) -> f64 {
        ratio(self.conversions, self.sent)
    }

    pub fn ctr(&self) -> f64 {
        ratio(self.clicks, self.impressions)
    }

    pub fn cpm(&self) -> f64 {
        ratio(self.spend_minor, self.impressions) * 1000.0
    }

    pub fn cpc(&self) -> f64 {
        ratio(self.spend_minor, self.clicks)
    }

    pub fn roas(&self) -> f64 {
        ratio(self.conversion_value_minor, self.spend_minor)
    }

    pub fn metric_value(&self, metric: SuccessMetric) -> f64 {
        match metric {
            SuccessMetric::OpenRate => self.open_rate(),
            SuccessMetric::ClickRate => self.click_rate(),
            SuccessMetric::ConversionRate => self.conversion_rate(),
            SuccessMetric::Ctr => self.ctr(),
            SuccessMetric::Conversions => ratio(self.conversions, self.impressions),
            SuccessMetric::Cpm => self.cpm(),
            SuccessMetric::Cpc => self.cpc(),
            SuccessMetric::Roas => self.roas(),
        }
    }

    /// Trial count backing the metric: the denominator of the rate or ratio.
    pub fn trials(&self, metric: SuccessMetric) -> i64 {
        match metric {
            SuccessMetric::OpenRate | SuccessMetric::ClickRate | SuccessMetric::ConversionRate => {
                self.sent
            }
            SuccessMetric::Ctr | SuccessMetric::Conversions | SuccessMetric::Cpm => {
                self.impressions
            }
            SuccessMetric::Cpc => self.clicks,
            SuccessMetric::Roas => self.conversions,
        }
    }

    /// Folds a normalized delta into the counters.
    pub fn apply(&mut self, delta: &CounterDelta) {
        self.sent += delta.sent;
        self.delivered += delta.delivered;
        self.opens += delta.opens;
        self.clicks += delta.clicks;
        self.conversions += delta.conversions;
        self.impressions += delta.impressions;
        self.spend_minor += delta.spend_minor;
        self.conversion_value_minor += delta.conversion_value_minor;
    }

    /// Success count for rate metrics; unused for ratio metrics.
    pub fn successes(&self, metric: SuccessMetric) -> i64 {
        match metric {
            SuccessMetric::OpenRate => self.opens,
            SuccessMetric::ClickRate | SuccessMetric::Ctr => self.clicks,
            SuccessMetric::ConversionRate | SuccessMetric::Conversions => self.conversions,
            SuccessMetric::Cpm | SuccessMetric::Cpc | SuccessMetric::Roas => 0,
        }
    }
}

/// A non-negative counter adjustment produced by the metric aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub sent: i64,
    pub delivered: i64,
    pub opens: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub impressions: i64,
    pub spend_minor: i64,
    pub conversion_value_minor: i64,
}

impl CounterDelta {
    pub fn is_empty(&self) -> bool {
        *self == CounterDelta::default()
    }

    pub fn is_monotonic(&self) -> bool {
        self.sent >= 0
            && self.delivered >= 0
            && self.opens >= 0
            && self.clicks >= 0
            && self.conversions >= 0
            && self.impressions >= 0
            && self.spend_minor >= 0
            && self.conversion_value_minor >= 0
    }

    /// Whether every populated field belongs to the metric vocabulary of the
    /// given experiment kind.
    pub fn applicable_to(&self, kind: ExperimentKind) -> bool {
        match kind {
            ExperimentKind::Content => self.impressions == 0 && self.spend_minor == 0,
            ExperimentKind::Ad => self.sent == 0 && self.delivered == 0 && self.opens == 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: Uuid,
    pub experiment_id: Uuid,
    pub position: i32,
    pub content: VariantContent,
    pub counters: VariantCounters,
    pub allocated_sample: Option<i64>,
    pub is_winner: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_guard_zero_denominators() {
        let c = VariantCounters::default();
        assert_eq!(c.open_rate(), 0.0);
        assert_eq!(c.ctr(), 0.0);
        assert_eq!(c.roas(), 0.0);
    }

    #[test]
    fn metric_value_matches_counters() {
        let c = VariantCounters {
            sent: 200,
            opens: 50,
            clicks: 20,
            impressions: 1000,
            spend_minor: 5000,
            ..Default::default()
        };
        assert!((c.metric_value(SuccessMetric::OpenRate) - 0.25).abs() < 1e-9);
        assert!((c.metric_value(SuccessMetric::Ctr) - 0.02).abs() < 1e-9);
        assert!((c.metric_value(SuccessMetric::Cpc) - 250.0).abs() < 1e-9);
    }

    #[test]
    fn delta_vocabulary_check() {
        let opens = CounterDelta {
            opens: 1,
            ..Default::default()
        };
        assert!(opens.applicable_to(ExperimentKind::Content));
        assert!(!opens.applicable_to(ExperimentKind::Ad));

        let spend = CounterDelta {
            spend_minor: 100,
            ..Default::default()
        };
        assert!(spend.applicable_to(ExperimentKind::Ad));
        assert!(!spend.applicable_to(ExperimentKind::Content));
    }
}
