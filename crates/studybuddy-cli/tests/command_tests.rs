use clap::Parser;
use studybuddy_cli::commands::{
    render_decision, render_error, render_limits, render_status, Cli, Command, FeatureUsage,
    StatusReport,
};
use studybuddy_core::{
    Decision, Difficulty, Feature, Identity, LimitErrorKind, NoteLength, PlanPolicy, PlanTier,
    StudyError, SubscriptionStatus,
};

// ========================================================================
// Argument parsing
// ========================================================================

#[test]
fn test_status_and_limits_take_no_arguments() {
    let cli = Cli::try_parse_from(["studybuddy", "status"]).unwrap();
    assert_eq!(cli.command, Command::Status);
    assert!(!cli.json);

    let cli = Cli::try_parse_from(["studybuddy", "limits", "--json"]).unwrap();
    assert_eq!(cli.command, Command::Limits);
    assert!(cli.json);
}

#[test]
fn test_check_parses_sub_limit_parameters() {
    let cli = Cli::try_parse_from([
        "studybuddy",
        "check",
        "questions",
        "--count",
        "12",
        "--difficulty",
        "hard",
    ])
    .unwrap();

    let Command::Check(args) = cli.command else {
        panic!("expected check");
    };
    assert_eq!(args.feature, Feature::Questions);
    let request = args.to_request();
    assert_eq!(request.question_count, Some(12));
    assert_eq!(request.difficulty, Some(Difficulty::Hard));
    assert_eq!(request.note_length, None);
}

#[test]
fn test_use_accepts_singular_feature_and_note_length() {
    let cli = Cli::try_parse_from(["studybuddy", "use", "note", "-l", "exam"]).unwrap();
    let Command::Use(args) = cli.command else {
        panic!("expected use");
    };
    assert_eq!(args.feature, Feature::Notes);
    assert_eq!(args.length, Some(NoteLength::Exam));
}

#[test]
fn test_unknown_feature_is_rejected() {
    assert!(Cli::try_parse_from(["studybuddy", "check", "essays"]).is_err());
    assert!(Cli::try_parse_from(["studybuddy", "check", "questions", "-d", "extreme"]).is_err());
}

#[test]
fn test_subscribe_requires_name_and_email() {
    assert!(Cli::try_parse_from(["studybuddy", "subscribe", "--name", "Asha"]).is_err());

    let cli = Cli::try_parse_from([
        "studybuddy",
        "subscribe",
        "--name",
        "Asha",
        "--email",
        "asha@example.com",
    ])
    .unwrap();
    assert_eq!(
        cli.command,
        Command::Subscribe {
            name: "Asha".into(),
            email: "asha@example.com".into(),
            phone: None,
        }
    );
}

#[test]
fn test_login_and_cancel_arguments() {
    let cli = Cli::try_parse_from([
        "studybuddy",
        "login",
        "--token",
        "tok",
        "--user-id",
        "u_1",
    ])
    .unwrap();
    assert!(matches!(cli.command, Command::Login { ref user_id, .. } if user_id == "u_1"));

    let cli = Cli::try_parse_from(["studybuddy", "cancel", "--reason", "too pricey"]).unwrap();
    assert_eq!(
        cli.command,
        Command::Cancel {
            reason: Some("too pricey".into())
        }
    );
}

// ========================================================================
// Rendering
// ========================================================================

#[test]
fn test_allowed_decision_shows_remaining() {
    let decision = Decision {
        allowed: true,
        reason: None,
        violations: vec![],
        used: 2,
        limit: 5,
        tier: Some(PlanTier::Free),
    };
    let text = render_decision(Feature::Doubts, &decision);
    assert!(text.contains("allowed"));
    assert!(text.contains("3 of 5 left"));
}

#[test]
fn test_denied_decision_lists_every_violation_and_upsell() {
    let decision = Decision {
        allowed: false,
        reason: Some(LimitErrorKind::DailyLimitReached),
        violations: vec![
            LimitErrorKind::DailyLimitReached,
            LimitErrorKind::FeatureLocked,
        ],
        used: 3,
        limit: 3,
        tier: None,
    };
    let text = render_decision(Feature::Questions, &decision);
    assert!(text.contains("DAILY_LIMIT_REACHED"));
    assert!(text.contains("FEATURE_LOCKED"));
    assert!(text.contains("subscribe"));
}

#[test]
fn test_pro_denial_has_no_upsell() {
    let decision = Decision {
        allowed: false,
        reason: Some(LimitErrorKind::DailyLimitReached),
        violations: vec![LimitErrorKind::DailyLimitReached],
        used: 100,
        limit: 100,
        tier: Some(PlanTier::Pro),
    };
    assert!(!render_decision(Feature::Doubts, &decision).contains("subscribe"));
}

#[test]
fn test_limits_table_lists_every_feature() {
    let policy = PlanPolicy::standard();
    let text = render_limits("Free limits", policy.limits_for(PlanTier::Free));
    for feature in Feature::ALL {
        assert!(text.contains(feature.display_name()));
    }
    assert!(text.contains("Difficulty: easy, medium"));
}

#[test]
fn test_status_report_for_user() {
    let report = StatusReport {
        identity: Identity::user("u_9"),
        tier: Some(PlanTier::Pro),
        subscription_status: Some(SubscriptionStatus::Trial),
        usage: vec![FeatureUsage {
            feature: Feature::Notes,
            used: 4,
            limit: 30,
        }],
        stale_reason: Some("Server error: offline".into()),
    };
    let text = render_status(&report);
    assert!(text.contains("u_9"));
    assert!(text.contains("(trial)"));
    assert!(text.contains("cached"));
    assert!(text.contains("4 / 30"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["subscriptionStatus"], "trial");
    assert_eq!(json["identity"]["kind"], "user");
}

#[test]
fn test_captured_payment_error_points_to_support() {
    let err = StudyError::PaymentCapturedNotVerified {
        payment_id: "pay_1".into(),
        provider_subscription_id: "prov_1".into(),
        message: "timed out".into(),
    };
    let text = render_error(&err);
    assert!(text.starts_with("[PAYMENT_CAPTURED_NOT_VERIFIED]"));
    assert!(text.contains("Do not pay again"));
    assert!(text.contains("pay_1"));

    assert!(render_error(&StudyError::NotSignedIn).contains("login"));
    assert!(render_error(&StudyError::server("down")).starts_with("[SERVER_ERROR]"));
}
