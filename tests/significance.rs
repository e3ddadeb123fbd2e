use experiment_engine::domain::experiment::SuccessMetric;
use experiment_engine::domain::variant::{Variant, VariantContent, VariantCounters};
use experiment_engine::stats::significance::{evaluate, EvaluatorConfig};
use uuid::Uuid;

fn variant(position: i32, counters: VariantCounters) -> Variant {
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
        counters,
        allocated_sample: None,
        is_winner: false,
        created_at: chrono::Utc::now(),
    }
}

fn opens(sent: i64, opens: i64) -> VariantCounters {
    VariantCounters {
        sent,
        opens,
        ..Default::default()
    }
}

fn cfg() -> EvaluatorConfig {
    EvaluatorConfig::default()
}

#[test]
fn identical_rates_are_never_confident() {
    let a = variant(0, opens(1000, 150));
    let b = variant(1, opens(1000, 150));
    let result = evaluate(SuccessMetric::OpenRate, &[a.clone(), b], &cfg());
    assert!(!result.confident);
    assert_eq!(result.improvement_pct, 0.0);
    // Tie resolves to the earliest-declared variant, deterministically.
    assert_eq!(result.leading_variant_id, Some(a.variant_id));
}

#[test]
fn clear_gap_at_scale_is_confident() {
    let a = variant(
        0,
        VariantCounters {
            sent: 1000,
            conversions: 200,
            ..Default::default()
        },
    );
    let b = variant(
        1,
        VariantCounters {
            sent: 1000,
            conversions: 100,
            ..Default::default()
        },
    );
    let a_id = a.variant_id;
    let result = evaluate(SuccessMetric::ConversionRate, &[a, b], &cfg());
    assert!(result.confident);
    assert_eq!(result.leading_variant_id, Some(a_id));
    assert!(result.p_value < 0.001);
    assert!((result.improvement_pct - 100.0).abs() < 1e-9);
}

#[test]
fn sixty_vs_forty_of_a_hundred_passes_the_one_sided_z_test() {
    // z = 0.2 / sqrt(0.5 * 0.5 * 0.02) ~= 2.83, one-sided p ~= 0.0023.
    let a = variant(0, opens(100, 60));
    let b = variant(1, opens(100, 40));
    let a_id = a.variant_id;
    let result = evaluate(SuccessMetric::OpenRate, &[a, b], &cfg());
    assert_eq!(result.leading_variant_id, Some(a_id));
    assert!((result.improvement_pct - 50.0).abs() < 1e-9);
    assert!(result.p_value < 0.05);
    assert!(result.confident);
}

#[test]
fn big_improvement_below_the_sample_floor_is_not_confident() {
    // 50% lift on 20 trials per arm must not trigger auto-selection.
    let a = variant(0, opens(20, 12));
    let b = variant(1, opens(20, 8));
    let result = evaluate(SuccessMetric::OpenRate, &[a, b], &cfg());
    assert!((result.improvement_pct - 50.0).abs() < 1e-9);
    assert!(!result.confident);
    assert_eq!(result.p_value, 1.0);
}

#[test]
fn every_variant_must_reach_the_floor() {
    let a = variant(0, opens(1000, 600));
    let b = variant(1, opens(1000, 400));
    let c = variant(2, opens(50, 10));
    let result = evaluate(SuccessMetric::OpenRate, &[a, b, c], &cfg());
    assert!(!result.confident);
}

#[test]
fn improvement_is_relative_to_the_mean_of_the_others() {
    let a = variant(0, opens(1000, 300));
    let b = variant(1, opens(1000, 150));
    let c = variant(2, opens(1000, 250));
    let a_id = a.variant_id;
    let result = evaluate(SuccessMetric::OpenRate, &[a, b, c], &cfg());
    assert_eq!(result.leading_variant_id, Some(a_id));
    // lead 0.30 vs mean(0.15, 0.25) = 0.20 -> +50%.
    assert!((result.improvement_pct - 50.0).abs() < 1e-9);
}

#[test]
fn zero_rates_everywhere_yield_zero_improvement() {
    let a = variant(0, opens(500, 0));
    let b = variant(1, opens(500, 0));
    let result = evaluate(SuccessMetric::OpenRate, &[a, b], &cfg());
    assert_eq!(result.improvement_pct, 0.0);
    assert!(!result.confident);
}

#[test]
fn cpc_leader_is_the_cheaper_variant() {
    let a = variant(
        0,
        VariantCounters {
            impressions: 10_000,
            clicks: 500,
            spend_minor: 100_000, // 200 minor per click
            ..Default::default()
        },
    );
    let b = variant(
        1,
        VariantCounters {
            impressions: 10_000,
            clicks: 400,
            spend_minor: 40_000, // 100 minor per click
            ..Default::default()
        },
    );
    let b_id = b.variant_id;
    let result = evaluate(SuccessMetric::Cpc, &[a, b], &cfg());
    assert_eq!(result.leading_variant_id, Some(b_id));
    // lead 100 vs mean(others) 200, lower is better -> +50%.
    assert!((result.improvement_pct - 50.0).abs() < 1e-9);
}

#[test]
fn continuous_metrics_cannot_pass_with_zero_data() {
    let a = variant(0, VariantCounters::default());
    let b = variant(1, VariantCounters::default());
    let result = evaluate(SuccessMetric::Roas, &[a, b], &cfg());
    assert!(!result.confident);
    assert_eq!(result.p_value, 1.0);
}

#[test]
fn ctr_uses_impressions_as_trials() {
    let a = variant(
        0,
        VariantCounters {
            impressions: 5000,
            clicks: 400,
            ..Default::default()
        },
    );
    let b = variant(
        1,
        VariantCounters {
            impressions: 5000,
            clicks: 200,
            ..Default::default()
        },
    );
    let a_id = a.variant_id;
    let result = evaluate(SuccessMetric::Ctr, &[a, b], &cfg());
    assert_eq!(result.leading_variant_id, Some(a_id));
    assert!(result.confident);
    assert_eq!(result.variants[0].sample_size, 5000);
}

#[test]
fn single_variant_never_reports_confidence() {
    let a = variant(0, opens(10_000, 5000));
    let result = evaluate(SuccessMetric::OpenRate, &[a], &cfg());
    assert!(!result.confident);
    assert_eq!(result.p_value, 1.0);
}
