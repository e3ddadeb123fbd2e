use experiment_engine::domain::error::EngineError;
use experiment_engine::domain::experiment::{
    Experiment, ExperimentKind, ExperimentStatus, SampleAllocation, SuccessMetric, TestType,
};
use experiment_engine::domain::variant::{Variant, VariantContent, VariantCounters};
use experiment_engine::lifecycle::transitions::{
    next_status, start_requirements, winner_guard, LifecycleAction,
};
use uuid::Uuid;

fn content_experiment(status: ExperimentStatus) -> Experiment {
    Experiment {
        experiment_id: Uuid::new_v4(),
        name: "welcome subject sweep".into(),
        description: String::new(),
        kind: ExperimentKind::Content,
        test_type: TestType::SubjectLine,
        success_metric: SuccessMetric::OpenRate,
        sample_allocation: SampleAllocation::Percentage { sample_pct: 20.0 },
        auto_select_winner: false,
        status,
        winner_variant_id: None,
        remainder_sent: false,
        ad_account_id: None,
        external_campaign_id: None,
        targeting: None,
        population_size: None,
        holdback_count: None,
        last_refresh_at: None,
        last_refresh_error: None,
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

fn ad_experiment(status: ExperimentStatus) -> Experiment {
    let mut exp = content_experiment(status);
    exp.kind = ExperimentKind::Ad;
    exp.test_type = TestType::AdCreative;
    exp.success_metric = SuccessMetric::Ctr;
    exp.sample_allocation = SampleAllocation::DailyBudget {
        daily_budget_minor: 50_000,
        duration_days: 7,
    };
    exp.ad_account_id = Some("acct_123".into());
    exp
}

fn member_variant(experiment_id: Uuid, position: i32) -> Variant {
    Variant {
        variant_id: Uuid::new_v4(),
        experiment_id,
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
fn draft_starts_into_running() {
    let next = next_status(
        ExperimentStatus::Draft,
        LifecycleAction::Start,
        ExperimentKind::Content,
    )
    .unwrap();
    assert_eq!(next, ExperimentStatus::Running);
}

#[test]
fn running_cannot_start_again() {
    let err = next_status(
        ExperimentStatus::Running,
        LifecycleAction::Start,
        ExperimentKind::Content,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[test]
fn terminal_states_absorb_every_action() {
    for terminal in [ExperimentStatus::Completed, ExperimentStatus::Cancelled] {
        for action in [
            LifecycleAction::Start,
            LifecycleAction::Pause,
            LifecycleAction::Resume,
            LifecycleAction::Complete,
            LifecycleAction::Cancel,
        ] {
            let err = next_status(terminal, action, ExperimentKind::Ad).unwrap_err();
            assert!(
                matches!(err, EngineError::Conflict(_)),
                "{} from {} should conflict",
                action.as_str(),
                terminal.as_db()
            );
        }
    }
}

#[test]
fn only_ad_tests_can_pause() {
    let next = next_status(
        ExperimentStatus::Running,
        LifecycleAction::Pause,
        ExperimentKind::Ad,
    )
    .unwrap();
    assert_eq!(next, ExperimentStatus::Paused);

    let err = next_status(
        ExperimentStatus::Running,
        LifecycleAction::Pause,
        ExperimentKind::Content,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test]
fn paused_resumes_into_running() {
    let next = next_status(
        ExperimentStatus::Paused,
        LifecycleAction::Resume,
        ExperimentKind::Ad,
    )
    .unwrap();
    assert_eq!(next, ExperimentStatus::Running);
}

#[test]
fn cancel_is_allowed_from_draft_running_and_paused() {
    for from in [
        ExperimentStatus::Draft,
        ExperimentStatus::Running,
        ExperimentStatus::Paused,
    ] {
        let next = next_status(from, LifecycleAction::Cancel, ExperimentKind::Ad).unwrap();
        assert_eq!(next, ExperimentStatus::Cancelled);
    }
}

#[test]
fn completing_requires_running_or_paused() {
    assert!(next_status(
        ExperimentStatus::Running,
        LifecycleAction::Complete,
        ExperimentKind::Content
    )
    .is_ok());
    assert!(next_status(
        ExperimentStatus::Paused,
        LifecycleAction::Complete,
        ExperimentKind::Ad
    )
    .is_ok());
    let err = next_status(
        ExperimentStatus::Draft,
        LifecycleAction::Complete,
        ExperimentKind::Content,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[test]
fn a_single_variant_cannot_start() {
    let exp = content_experiment(ExperimentStatus::Draft);
    let err = start_requirements(&exp, 1).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(start_requirements(&exp, 2).is_ok());
    assert!(start_requirements(&exp, 5).is_ok());
    assert!(start_requirements(&exp, 6).is_err());
}

#[test]
fn ad_tests_need_an_account_before_start() {
    let mut exp = ad_experiment(ExperimentStatus::Draft);
    exp.ad_account_id = None;
    let err = start_requirements(&exp, 2).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    exp.ad_account_id = Some("acct_123".into());
    assert!(start_requirements(&exp, 2).is_ok());
}

#[test]
fn winner_is_declared_at_most_once() {
    let mut exp = content_experiment(ExperimentStatus::Running);
    let a = member_variant(exp.experiment_id, 0);
    let b = member_variant(exp.experiment_id, 1);
    let variants = vec![a.clone(), b];

    assert!(winner_guard(&exp, &variants, a.variant_id).is_ok());

    exp.winner_variant_id = Some(a.variant_id);
    exp.status = ExperimentStatus::Completed;
    let err = winner_guard(&exp, &variants, a.variant_id).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[test]
fn winner_must_belong_to_the_experiment() {
    let exp = content_experiment(ExperimentStatus::Running);
    let variants = vec![
        member_variant(exp.experiment_id, 0),
        member_variant(exp.experiment_id, 1),
    ];
    let err = winner_guard(&exp, &variants, Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, EngineError::DataIntegrity(_)));
}

#[test]
fn winner_declaration_conflicts_once_the_experiment_is_terminal() {
    let mut exp = content_experiment(ExperimentStatus::Cancelled);
    let a = member_variant(exp.experiment_id, 0);
    let b = member_variant(exp.experiment_id, 1);
    let err = winner_guard(&exp, &[a.clone(), b.clone()], a.variant_id).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    exp.status = ExperimentStatus::Draft;
    let err = winner_guard(&exp, &[a.clone(), b], a.variant_id).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}
