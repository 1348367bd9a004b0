//! End-to-end onboarding scenario against the in-memory surface
//!
//! Walks a questionnaire, follows the stepper through a backend-driven
//! transition, waits for the review decision and the confirmation email.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::Write;
use std::time::Duration;
use surveyor::fake::{Effect, FakeInbox, FakeNode, FakeSurface, NodeId};
use surveyor::{
    first_link, AnswerValue, BodyFormat, EngineConfig, MailQuery, PollPolicy, QuestionDescriptor,
    QuestionKind, ReviewStatus, Role, Session, StageSet, StatusMarker, SurveyorError,
};

/// Questionnaire plus a four-stage stepper; the stepper advances to
/// Employees on the second reload and the decision appears on the third.
fn onboarding_page() -> (FakeSurface, Vec<NodeId>) {
    let mut fake = FakeSurface::new();
    let root = fake.root();
    let bar = fake.append(root, FakeNode::new(Role::Container, ""));
    let steps: Vec<NodeId> = ["Company Details", "Employees", "Payroll", "Review"]
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let class = if i == 0 { "Stepper__active" } else { "Stepper__future" };
            fake.append(bar, FakeNode::new(Role::Step, *label).attr("class", class))
        })
        .collect();

    fake.text_question("Legal business name");
    fake.button_question("Do you have employees?", &["Yes", "No"]);
    fake.dropdown_question("State of incorporation", &["California", "Delaware", "New York"]);
    fake.multi_select_question("Which benefits do you offer?", &["Health", "Dental", "401k"]);
    fake.file_question("Upload last quarter's payroll");

    fake.on_reload(2, Effect::set(steps[0], "class", "Stepper__past"));
    fake.on_reload(2, Effect::set(steps[1], "class", "Stepper__active"));
    let approved = fake.append(root, FakeNode::new(Role::Text, "Application approved").hidden());
    fake.on_reload(3, Effect::Show(approved));
    fake.set_lag(1);
    (fake, steps)
}

fn workflow() -> StageSet {
    StageSet::new("onboarding", ["Company Details", "Employees", "Payroll", "Review"]).unwrap()
}

// ============================================================================
// Questionnaire
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_questionnaire_answers_every_kind() {
    let (fake, _) = onboarding_page();
    let session = Session::with_defaults(fake);
    let questions = session.questions();

    let mut payroll = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(payroll, "employee,gross").unwrap();

    let answers = [
        (
            QuestionDescriptor::new("Legal business name", QuestionKind::FreeText),
            AnswerValue::from("Acme Widgets LLC"),
        ),
        (
            QuestionDescriptor::new("Do you have employees?", QuestionKind::ButtonChoice),
            AnswerValue::from("Yes"),
        ),
        (
            QuestionDescriptor::new("State of incorporation", QuestionKind::Dropdown),
            AnswerValue::from("Delaware"),
        ),
        (
            QuestionDescriptor::new("Which benefits do you offer?", QuestionKind::MultiSelect),
            AnswerValue::Choices(vec!["Health".into(), "401k".into()]),
        ),
        (
            QuestionDescriptor::new("Upload last quarter's payroll", QuestionKind::FileUpload),
            AnswerValue::Files(vec![payroll.path().to_path_buf()]),
        ),
    ];
    for (descriptor, value) in &answers {
        questions.answer(descriptor, value).await.unwrap();
    }

    // Reapplying the same multi-select set clicks nothing.
    let clicks = session.surface().count_calls("click:");
    questions.answer(&answers[3].0, &answers[3].1).await.unwrap();
    assert_eq!(session.surface().count_calls("click:"), clicks);
    assert_eq!(session.surface().count_calls("attach:"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shape_mismatch_touches_nothing() {
    let (fake, _) = onboarding_page();
    let session = Session::with_defaults(fake);
    let err = session
        .questions()
        .answer(
            &QuestionDescriptor::new("Which benefits do you offer?", QuestionKind::MultiSelect),
            &AnswerValue::from("Health"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SurveyorError::AnswerShapeMismatch { .. }));
    assert!(session.surface().history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_optional_question_absent_is_false() {
    let (fake, _) = onboarding_page();
    let session = Session::with_defaults(fake);
    let shown = session
        .questions()
        .is_present("Do you use a PEO?", PollPolicy::existence().with_max_attempts(2))
        .await
        .unwrap();
    assert!(!shown);
}

// ============================================================================
// Backend convergence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stepper_then_review_then_email() {
    let (fake, _) = onboarding_page();
    let config = EngineConfig::default().with_stepper(
        PollPolicy::stepper()
            .with_max_attempts(3)
            .with_interval(Duration::from_secs(2)),
    );
    let session = Session::new(fake, config).unwrap();

    let mut navigator = session.stepper(workflow());
    assert_eq!(navigator.current_active().await.unwrap(), "Company Details");
    let state = session.wait_for_stage(&navigator, "Employees").await.unwrap();
    assert!(state.completed.contains("Company Details"));
    navigator.assert_complete("Company Details").await.unwrap();
    assert_eq!(session.surface().reload_count(), 2);

    session
        .review(vec![
            StatusMarker::text(ReviewStatus::Success, "Application approved"),
            StatusMarker::text(ReviewStatus::Failed, "Application declined"),
        ])
        .expect(ReviewStatus::Success)
        .await
        .unwrap();

    let inbox = FakeInbox::new();
    inbox.deliver_after(
        4,
        "owner@acme.test",
        "Your application is approved",
        r#"<p>Welcome aboard. <a href="https://app.example.com/start?id=42&amp;src=mail">Get started</a></p>"#,
    );
    let waiter = session.inbox(&inbox);
    let query = MailQuery::subject("application is approved");
    let (_, body) = waiter
        .fetch_first_body("owner@acme.test", &query, BodyFormat::Html)
        .await
        .unwrap();
    assert_eq!(
        first_link(&body).as_deref(),
        Some("https://app.example.com/start?id=42&src=mail")
    );
    assert_eq!(inbox.search_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stage_not_reached_within_budget() {
    let (fake, _) = onboarding_page();
    let session = Session::with_defaults(fake);
    let navigator = session.stepper(workflow());
    let err = navigator
        .wait_for_active("Payroll", PollPolicy::stepper().with_max_attempts(3))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SurveyorError::StageNotReached { ref last_seen, attempts: 3, .. }
            if last_seen.as_deref() == Some("Employees")
    ));
}
