use experiment_engine::allocation::planner::{plan_ad, plan_content, split_recipients};
use experiment_engine::domain::variant::{Variant, VariantContent, VariantCounters};
use uuid::Uuid;

fn email_variant(position: i32) -> Variant {
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
fn twenty_percent_of_a_thousand_splits_evenly() {
    let variants = vec![email_variant(0), email_variant(1)];
    let plan = plan_content(1000, 20.0, &variants).unwrap();
    assert_eq!(plan.tested_total, 200);
    assert_eq!(plan.holdback, 800);
    let sizes: Vec<i64> = plan.shares.iter().map(|s| s.sample_size).collect();
    assert_eq!(sizes, vec![100, 100]);
}

#[test]
fn share_sum_matches_floor_and_holdback_closes_the_books() {
    let cases = [(1000_i64, 20.0, 2usize), (997, 33.0, 3), (1, 100.0, 5), (12345, 7.5, 4)];
    for (population, pct, n) in cases {
        let variants: Vec<Variant> = (0..n as i32).map(email_variant).collect();
        let plan = plan_content(population, pct, &variants).unwrap();
        let sum: i64 = plan.shares.iter().map(|s| s.sample_size).sum();
        let expected_total = ((population as f64) * pct / 100.0).floor() as i64;
        assert_eq!(sum, expected_total);
        assert_eq!(plan.holdback, population - sum);
        let max = plan.shares.iter().map(|s| s.sample_size).max().unwrap();
        let min = plan.shares.iter().map(|s| s.sample_size).min().unwrap();
        assert!(max - min <= 1, "per-variant rounding remainder exceeds 1");
    }
}

#[test]
fn split_is_deterministic_for_identical_input() {
    let variants = vec![email_variant(0), email_variant(1), email_variant(2)];
    let a = plan_content(500, 30.0, &variants).unwrap();
    let b = plan_content(500, 30.0, &variants).unwrap();
    let sizes = |p: &experiment_engine::allocation::planner::ContentPlan| {
        p.shares.iter().map(|s| (s.variant_id, s.sample_size)).collect::<Vec<_>>()
    };
    assert_eq!(sizes(&a), sizes(&b));
}

#[test]
fn remainder_favors_declaration_order_even_when_unsorted() {
    let mut variants = vec![email_variant(2), email_variant(0), email_variant(1)];
    let first_declared = variants[1].variant_id;
    let plan = plan_content(100, 100.0, &variants).unwrap();
    // 100 over 3 variants: 34 to the earliest position.
    assert_eq!(plan.shares[0].variant_id, first_declared);
    assert_eq!(plan.shares[0].sample_size, 34);
    variants.reverse();
    let again = plan_content(100, 100.0, &variants).unwrap();
    assert_eq!(again.shares[0].variant_id, first_declared);
}

#[test]
fn invalid_percentage_is_rejected_before_any_state_change() {
    let variants = vec![email_variant(0), email_variant(1)];
    for pct in [0.0, -1.0, 100.01, 250.0] {
        assert!(plan_content(1000, pct, &variants).is_err(), "pct {pct} accepted");
    }
}

#[test]
fn zero_population_starts_but_allocates_nothing() {
    let variants = vec![email_variant(0), email_variant(1)];
    let plan = plan_content(0, 50.0, &variants).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.tested_total, 0);
    assert_eq!(plan.holdback, 0);
    assert!(plan.shares.iter().all(|s| s.sample_size == 0));
}

#[test]
fn recipient_slices_follow_the_plan() {
    let variants = vec![email_variant(0), email_variant(1)];
    let plan = plan_content(10, 50.0, &variants).unwrap();
    let recipients: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
    let (slices, holdback) = split_recipients(&recipients, &plan);
    assert_eq!(slices.len(), 2);
    assert_eq!(slices[0].1.len(), 3);
    assert_eq!(slices[1].1.len(), 2);
    assert_eq!(holdback.len(), 5);
    assert_eq!(slices[0].1[0], "r0");
    assert_eq!(holdback[0], "r5");
}

#[test]
fn ad_plan_multiplies_budget_by_duration() {
    let plan = plan_ad(10_000, 14, 2).unwrap();
    assert_eq!(plan.per_variant_total_minor, 140_000);
}

#[test]
fn ad_plan_rejects_non_positive_budget_or_duration() {
    assert!(plan_ad(0, 14, 2).is_err());
    assert!(plan_ad(-100, 14, 2).is_err());
    assert!(plan_ad(10_000, 0, 2).is_err());
    assert!(plan_ad(10_000, -3, 2).is_err());
}
