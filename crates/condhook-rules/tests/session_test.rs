//! Device session behavior.
//!
//! Tests include:
//! - Link and config change atomicity
//! - Threshold evaluation and emission
//! - Payload and evaluation errors on the error channel
//! - Forwarding

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{config, session, RecordingControl, RecordingForwarder};
use condhook_rules::{MessageOutcome, RuleError, TOPIC_ERR, TOPIC_OUT};

#[tokio::test]
async fn test_link_subscribes_condition_variables() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);

    session
        .on_link(&config("a > b && c < 5", "a + d", ""))
        .await
        .unwrap();

    assert!(session.is_armed());
    let expected: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
    assert_eq!(control.subscriptions().into_iter().collect::<Vec<_>>(), expected);
    assert_eq!(
        session.subscribed_variables().into_iter().collect::<Vec<_>>(),
        expected
    );
    // Nothing is published at link time
    assert!(control.published().is_empty());
}

#[tokio::test]
async fn test_invalid_link_leaves_no_state() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);

    let err = session
        .on_link(&config("a > )", "a", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, RuleError::Compile { field: "condition", .. }));
    assert!(!err.to_string().is_empty());

    let err = session
        .on_link(&config("a > 1", "a * )", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, RuleError::Compile { field: "value", .. }));

    assert!(!session.is_armed());
    assert!(session.condition_source().is_none());
    assert!(session.latest_values().is_empty());
    assert!(control.subscriptions().is_empty());
}

#[tokio::test]
async fn test_missing_keys_rejected() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);

    let err = session.on_link(&HashMap::new()).await.unwrap_err();
    assert!(matches!(err, RuleError::Compile { .. }));
    assert!(!session.is_armed());
}

#[tokio::test]
async fn test_threshold_emits_then_stays_silent() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session.on_link(&config("a > 10", "a * 2", "")).await.unwrap();

    let outcome = session.on_message("a", b"15").await;
    match outcome {
        MessageOutcome::Emitted { value, forward } => {
            assert_eq!(value, "30");
            assert!(!forward);
        }
        other => panic!("expected emission, got {:?}", other),
    }
    assert_eq!(control.published_on(TOPIC_OUT), vec!["30".to_string()]);

    let outcome = session.on_message("a", b"3").await;
    assert!(matches!(outcome, MessageOutcome::ConditionNotMet));
    assert_eq!(control.published_on(TOPIC_OUT), vec!["30".to_string()]);
    assert!(control.published_on(TOPIC_ERR).is_empty());
}

#[tokio::test]
async fn test_integer_literals_compare_and_divide_as_numbers() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session
        .on_link(&config("a == 15", "a * (1 / 2)", ""))
        .await
        .unwrap();

    match session.on_message("a", b"15").await {
        MessageOutcome::Emitted { value, .. } => assert_eq!(value, "7.5"),
        other => panic!("expected emission, got {:?}", other),
    }
    assert!(matches!(
        session.on_message("a", b"14").await,
        MessageOutcome::ConditionNotMet
    ));
    assert_eq!(control.published_on(TOPIC_OUT), vec!["7.5".to_string()]);
}

#[tokio::test]
async fn test_invalid_payload_keeps_previous_value() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session.on_link(&config("a > b", "a - b", "")).await.unwrap();

    assert!(matches!(
        session.on_message("a", b"20").await,
        MessageOutcome::EvaluationFailed
    ));
    control.clear();

    let outcome = session.on_message("a", b"abc").await;
    assert!(matches!(outcome, MessageOutcome::InvalidPayload));
    assert_eq!(control.published_on(TOPIC_ERR).len(), 1);
    assert!(control.published_on(TOPIC_OUT).is_empty());
    assert_eq!(session.latest_values().get("a"), Some(&20.0));

    // The earlier good value of `a` is still used
    let outcome = session.on_message("b", b"5").await;
    match outcome {
        MessageOutcome::Emitted { value, .. } => assert_eq!(value, "15"),
        other => panic!("expected emission, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_variable_reports_evaluation_error() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session.on_link(&config("a > b", "a", "")).await.unwrap();

    let outcome = session.on_message("a", b"1").await;
    assert!(matches!(outcome, MessageOutcome::EvaluationFailed));

    let errors = control.published_on(TOPIC_ERR);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains('b'));
    assert!(session.is_armed());
    assert_eq!(session.latest_values().get("a"), Some(&1.0));
}

#[tokio::test]
async fn test_value_expression_variables_are_not_subscribed() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session.on_link(&config("a > 0", "a + z", "")).await.unwrap();

    assert!(!control.subscriptions().contains("z"));
    let outcome = session.on_message("a", b"1").await;
    assert!(matches!(outcome, MessageOutcome::EvaluationFailed));
    assert_eq!(control.published_on(TOPIC_ERR).len(), 1);
    assert!(control.published_on(TOPIC_OUT).is_empty());
}

#[tokio::test]
async fn test_non_boolean_condition_is_not_met() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session.on_link(&config("a + 1", "a", "")).await.unwrap();

    let outcome = session.on_message("a", b"1").await;
    assert!(matches!(outcome, MessageOutcome::ConditionNotMet));
    assert!(control.published().is_empty());
}

#[tokio::test]
async fn test_unknown_variable_ignored() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session.on_link(&config("a > 0", "a", "")).await.unwrap();

    let outcome = session.on_message("other", b"1").await;
    assert!(matches!(outcome, MessageOutcome::UnknownVariable));
    assert!(!session.latest_values().contains_key("other"));
}

#[tokio::test]
async fn test_repeated_value_is_idempotent() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session.on_link(&config("a >= 2", "a / 2", "")).await.unwrap();

    for _ in 0..3 {
        match session.on_message("a", b"7").await {
            MessageOutcome::Emitted { value, .. } => assert_eq!(value, "3.5"),
            other => panic!("expected emission, got {:?}", other),
        }
    }
    assert_eq!(control.published_on(TOPIC_OUT), vec!["3.5".to_string(); 3]);
}

#[tokio::test]
async fn test_bad_config_change_keeps_previous_rule() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    let original = config("a > 10", "a * 2", "");
    session.on_link(&original).await.unwrap();
    session.on_message("a", b"12").await;

    let changes = HashMap::from([("expr".to_string(), "x > )".to_string())]);
    let err = session
        .on_config_change(&changes, &original)
        .await
        .unwrap_err();
    assert!(matches!(err, RuleError::Compile { .. }));

    assert_eq!(session.condition_source(), Some("a > 10"));
    assert_eq!(session.value_source(), Some("a * 2"));
    assert_eq!(control.subscriptions().into_iter().collect::<Vec<_>>(), vec!["a".to_string()]);
    assert_eq!(session.latest_values().get("a"), Some(&12.0));

    // Still evaluating the old rule
    match session.on_message("a", b"20").await {
        MessageOutcome::Emitted { value, .. } => assert_eq!(value, "40"),
        other => panic!("expected emission, got {:?}", other),
    }
}

#[tokio::test]
async fn test_config_change_resubscribes_and_resets_values() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    let original = config("a > 10", "a", "");
    session.on_link(&original).await.unwrap();
    session.on_message("a", b"5").await;

    let changes = HashMap::from([("expr".to_string(), "b > 1".to_string())]);
    session.on_config_change(&changes, &original).await.unwrap();

    assert_eq!(session.condition_source(), Some("b > 1"));
    assert_eq!(control.subscriptions().into_iter().collect::<Vec<_>>(), vec!["b".to_string()]);
    assert!(session.latest_values().is_empty());
}

#[tokio::test]
async fn test_unlink_stops_evaluation() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session
        .on_link(&config("a > 0", "a", "http://localhost/hook"))
        .await
        .unwrap();

    session.on_unlink().await;
    assert!(session.is_unlinked());
    assert!(control.subscriptions().is_empty());

    let outcome = session.on_message("a", b"1").await;
    assert!(matches!(outcome, MessageOutcome::Inactive));
    assert!(control.published().is_empty());
    assert!(forwarder.sent().is_empty());

    assert!(matches!(
        session.on_link(&config("a > 0", "a", "")).await,
        Err(RuleError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_forwarding_posts_value() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::new();
    let mut session = session(&control, &forwarder);
    session
        .on_link(&config("t > 30", "t", "http://localhost:9000/alert"))
        .await
        .unwrap();

    match session.on_message("t", b"31.5").await {
        MessageOutcome::Emitted { value, forward } => {
            assert_eq!(value, "31.5");
            assert!(forward);
        }
        other => panic!("expected emission, got {:?}", other),
    }
    session.wait_forwards().await;

    assert_eq!(
        forwarder.sent(),
        vec![("http://localhost:9000/alert".to_string(), "31.5".to_string())]
    );
}

#[tokio::test]
async fn test_forwarding_failure_keeps_published_value() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::failing();
    let mut session = session(&control, &forwarder);
    session
        .on_link(&config("t > 30", "t", "http://localhost:9000/alert"))
        .await
        .unwrap();

    match session.on_message("t", b"40").await {
        MessageOutcome::Emitted { forward, .. } => assert!(forward),
        other => panic!("expected emission, got {:?}", other),
    }
    session.wait_forwards().await;

    assert_eq!(control.published_on(TOPIC_OUT), vec!["40".to_string()]);
    let errors = control.published_on(TOPIC_ERR);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("connection refused"));
}

#[tokio::test]
async fn test_unlink_cancels_pending_forward() {
    let control = RecordingControl::new("dev1");
    let forwarder = RecordingForwarder::failing_after(Duration::from_millis(100));
    let mut session = session(&control, &forwarder);
    session
        .on_link(&config("t > 30", "t", "http://localhost:9/x"))
        .await
        .unwrap();

    assert!(session.on_message("t", b"40").await.is_emitted());
    assert_eq!(session.pending_forwards(), 1);

    session.on_unlink().await;
    assert_eq!(session.pending_forwards(), 0);
    control.clear();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(control.published().is_empty());
    assert!(forwarder.sent().is_empty());
}
