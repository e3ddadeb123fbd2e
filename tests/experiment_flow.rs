//! Drives a content test end to end through the pure layers: plan the
//! split, ingest raw open events with dedup, then evaluate significance.

use experiment_engine::allocation::planner::{plan_content, split_recipients};
use experiment_engine::domain::experiment::{ExperimentKind, SuccessMetric};
use experiment_engine::domain::variant::{Variant, VariantContent, VariantCounters};
use experiment_engine::metrics::aggregator::{normalize, DedupWindow};
use experiment_engine::metrics::event::EventKind;
use experiment_engine::stats::significance::{evaluate, EvaluatorConfig};
use uuid::Uuid;

fn email_variant(position: i32, subject: &str) -> Variant {
    Variant {
        variant_id: Uuid::new_v4(),
        experiment_id: Uuid::new_v4(),
        position,
        content: VariantContent::Email {
            subject: Some(subject.to_string()),
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

// Mirrors the ingestion order: replay check, normalize, record, and only
// then remember the id, so nothing rejected before recording occupies the
// window.
fn ingest(
    variant: &mut Variant,
    window: &mut DedupWindow,
    event: EventKind,
    event_id: &str,
) -> bool {
    if window.contains(event_id) {
        return false;
    }
    let Some(delta) = normalize(ExperimentKind::Content, event, None) else {
        return false;
    };
    variant.counters.apply(&delta);
    window.insert(event_id);
    true
}

#[test]
fn subject_line_test_finds_its_winner() {
    let mut a = email_variant(0, "Your weekly digest");
    let mut b = email_variant(1, "Don't miss this week");
    let experiment_id = a.experiment_id;
    b.experiment_id = experiment_id;

    // 1000 eligible recipients at 20%: two arms of 100, 800 held back.
    let recipients: Vec<String> = (0..1000).map(|i| format!("user-{i}@example.com")).collect();
    let plan = plan_content(recipients.len() as i64, 20.0, &[a.clone(), b.clone()]).unwrap();
    assert_eq!(plan.tested_total, 200);
    assert_eq!(plan.holdback, 800);

    let (slices, holdback) = split_recipients(&recipients, &plan);
    assert_eq!(slices[0].1.len(), 100);
    assert_eq!(slices[1].1.len(), 100);
    assert_eq!(holdback.len(), 800);

    let mut window = DedupWindow::new(10_000);

    // Delivery confirmations for everyone in the test.
    for (who, variant) in [("a", &mut a), ("b", &mut b)] {
        for i in 0..100 {
            assert!(ingest(
                variant,
                &mut window,
                EventKind::Sent,
                &format!("sent-{who}-{i}")
            ));
        }
    }

    // Variant A opens 60 of 100, variant B opens 40 of 100.
    for i in 0..60 {
        assert!(ingest(&mut a, &mut window, EventKind::Opened, &format!("open-a-{i}")));
    }
    for i in 0..40 {
        assert!(ingest(&mut b, &mut window, EventKind::Opened, &format!("open-b-{i}")));
    }

    // A replayed webhook must not move the counters.
    assert!(!ingest(&mut a, &mut window, EventKind::Opened, "open-a-0"));

    assert_eq!(a.counters.sent, 100);
    assert_eq!(a.counters.opens, 60);
    assert_eq!(b.counters.opens, 40);

    let result = evaluate(
        SuccessMetric::OpenRate,
        &[a.clone(), b],
        &EvaluatorConfig::default(),
    );
    assert_eq!(result.leading_variant_id, Some(a.variant_id));
    assert!((result.improvement_pct - 50.0).abs() < 1e-9);
    assert!(result.confident, "p = {}", result.p_value);
}

#[test]
fn out_of_vocabulary_events_leave_counters_untouched() {
    let mut a = email_variant(0, "A");
    let mut window = DedupWindow::new(16);

    assert!(!ingest(&mut a, &mut window, EventKind::Impression, "imp-1"));
    assert!(!ingest(&mut a, &mut window, EventKind::Spend, "spend-1"));
    assert_eq!(a.counters, VariantCounters::default());
}

#[test]
fn events_rejected_before_recording_do_not_occupy_the_window() {
    let mut a = email_variant(0, "A");
    let mut window = DedupWindow::new(16);

    // Dropped without being recorded, so the id stays free and a retry of
    // a valid event under the same id is counted, not swallowed.
    assert!(!ingest(&mut a, &mut window, EventKind::Impression, "evt-7"));
    assert!(!window.contains("evt-7"));
    assert!(ingest(&mut a, &mut window, EventKind::Opened, "evt-7"));
    assert_eq!(a.counters.opens, 1);
}

#[test]
fn ad_snapshot_pull_replaces_counters_and_evaluates() {
    let mut a = email_variant(0, "");
    let mut b = email_variant(1, "");
    a.content = experiment_engine::domain::variant::VariantContent::Ad {
        headline: Some("Shop the sale".into()),
        primary_text: None,
        description: None,
        call_to_action: None,
        link_url: None,
        image_url: None,
        targeting: None,
    };
    b.content = a.content.clone();

    let pulls =
        experiment_engine::gateways::mock::MockAdPlatformGateway::pull_fixture(&[
            a.variant_id,
            b.variant_id,
        ]);
    for pull in &pulls {
        // Cumulative snapshot: the pull overwrites, it never adds.
        let target = if pull.variant_id == a.variant_id { &mut a } else { &mut b };
        target.counters = pull.counters;
    }
    assert_eq!(a.counters.impressions, 1_000);
    assert_eq!(b.counters.impressions, 2_000);

    let result = evaluate(SuccessMetric::Ctr, &[a.clone(), b], &EvaluatorConfig::default());
    // Fixture CTR is 4% for every variant; a flat field picks the first.
    assert_eq!(result.leading_variant_id, Some(a.variant_id));
    assert!(!result.confident);
}

#[test]
fn conversion_events_carry_their_value() {
    let delta = normalize(ExperimentKind::Ad, EventKind::Converted, Some(2_500)).unwrap();
    let mut counters = VariantCounters::default();
    counters.apply(&delta);
    counters.apply(&delta);
    assert_eq!(counters.conversions, 2);
    assert_eq!(counters.conversion_value_minor, 5_000);
}
