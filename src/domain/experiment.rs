use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    Content,
    Ad,
}

impl ExperimentKind {
    pub fn as_db(&self) -> &'static str {
        match self {
            ExperimentKind::Content => "CONTENT",
            ExperimentKind::Ad => "AD",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "CONTENT" => Some(ExperimentKind::Content),
            "AD" => Some(ExperimentKind::Ad),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    SubjectLine,
    Content,
    Template,
    SenderName,
    AdCreative,
    Audience,
    Placement,
    Budget,
    Bidding,
}

impl TestType {
    pub fn kind(&self) -> ExperimentKind {
        match self {
            TestType::SubjectLine | TestType::Content | TestType::Template | TestType::SenderName => {
                ExperimentKind::Content
            }
            TestType::AdCreative
            | TestType::Audience
            | TestType::Placement
            | TestType::Budget
            | TestType::Bidding => ExperimentKind::Ad,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            TestType::SubjectLine => "SUBJECT_LINE",
            TestType::Content => "CONTENT",
            TestType::Template => "TEMPLATE",
            TestType::SenderName => "SENDER_NAME",
            TestType::AdCreative => "AD_CREATIVE",
            TestType::Audience => "AUDIENCE",
            TestType::Placement => "PLACEMENT",
            TestType::Budget => "BUDGET",
            TestType::Bidding => "BIDDING",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "SUBJECT_LINE" => Some(TestType::SubjectLine),
            "CONTENT" => Some(TestType::Content),
            "TEMPLATE" => Some(TestType::Template),
            "SENDER_NAME" => Some(TestType::SenderName),
            "AD_CREATIVE" => Some(TestType::AdCreative),
            "AUDIENCE" => Some(TestType::Audience),
            "PLACEMENT" => Some(TestType::Placement),
            "BUDGET" => Some(TestType::Budget),
            "BIDDING" => Some(TestType::Bidding),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessMetric {
    OpenRate,
    ClickRate,
    ConversionRate,
    Ctr,
    Conversions,
    Cpm,
    Cpc,
    Roas,
}

impl SuccessMetric {
    pub fn kind(&self) -> ExperimentKind {
        match self {
            SuccessMetric::OpenRate | SuccessMetric::ClickRate | SuccessMetric::ConversionRate => {
                ExperimentKind::Content
            }
            SuccessMetric::Ctr
            | SuccessMetric::Conversions
            | SuccessMetric::Cpm
            | SuccessMetric::Cpc
            | SuccessMetric::Roas => ExperimentKind::Ad,
        }
    }

    /// Cost metrics improve downward; everything else improves upward.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, SuccessMetric::Cpm | SuccessMetric::Cpc)
    }

    /// Rate metrics are Bernoulli proportions (successes over trials); the
    /// rest are compared as ratio means.
    pub fn is_rate(&self) -> bool {
        matches!(
            self,
            SuccessMetric::OpenRate
                | SuccessMetric::ClickRate
                | SuccessMetric::ConversionRate
                | SuccessMetric::Ctr
                | SuccessMetric::Conversions
        )
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            SuccessMetric::OpenRate => "OPEN_RATE",
            SuccessMetric::ClickRate => "CLICK_RATE",
            SuccessMetric::ConversionRate => "CONVERSION_RATE",
            SuccessMetric::Ctr => "CTR",
            SuccessMetric::Conversions => "CONVERSIONS",
            SuccessMetric::Cpm => "CPM",
            SuccessMetric::Cpc => "CPC",
            SuccessMetric::Roas => "ROAS",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "OPEN_RATE" => Some(SuccessMetric::OpenRate),
            "CLICK_RATE" => Some(SuccessMetric::ClickRate),
            "CONVERSION_RATE" => Some(SuccessMetric::ConversionRate),
            "CTR" => Some(SuccessMetric::Ctr),
            "CONVERSIONS" => Some(SuccessMetric::Conversions),
            "CPM" => Some(SuccessMetric::Cpm),
            "CPC" => Some(SuccessMetric::Cpc),
            "ROAS" => Some(SuccessMetric::Roas),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Cancelled)
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "DRAFT",
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Paused => "PAUSED",
            ExperimentStatus::Completed => "COMPLETED",
            ExperimentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(ExperimentStatus::Draft),
            "RUNNING" => Some(ExperimentStatus::Running),
            "PAUSED" => Some(ExperimentStatus::Paused),
            "COMPLETED" => Some(ExperimentStatus::Completed),
            "CANCELLED" => Some(ExperimentStatus::Cancelled),
            _ => None,
        }
    }
}

/// How the eligible audience (or budget) is committed to the test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SampleAllocation {
    /// Content tests: percentage of the eligible population entered into the
    /// test; the rest is held back for the winner send.
    Percentage { sample_pct: f64 },
    /// Ad tests: each variant spends this budget per day for the duration.
    DailyBudget {
        daily_budget_minor: i64,
        duration_days: i32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: Uuid,
    pub name: String,
    pub description: String,
    pub kind: ExperimentKind,
    pub test_type: TestType,
    pub success_metric: SuccessMetric,
    pub sample_allocation: SampleAllocation,
    pub auto_select_winner: bool,
    pub status: ExperimentStatus,
    pub winner_variant_id: Option<Uuid>,
    pub remainder_sent: bool,
    pub ad_account_id: Option<String>,
    pub external_campaign_id: Option<String>,
    pub targeting: Option<serde_json::Value>,
    pub population_size: Option<i64>,
    pub holdback_count: Option<i64>,
    pub last_refresh_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_refresh_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub const MIN_VARIANTS: usize = 2;
pub const MAX_VARIANTS: usize = 5;
