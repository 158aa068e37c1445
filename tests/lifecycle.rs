use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use flexage::access::Principal;
use flexage::catalog::Catalog;
use flexage::config::FlexageConfig;
use flexage::coordinator::Coordinator;
use flexage::error::FlexageError;
use flexage::evaluator::Evaluator;
use flexage::lifecycle::EntryStatus;
use flexage::model::{Entry, Role, Submission, User};
use flexage::runner::{BackgroundRunner, RecordingQueue, RetryConfig, RunOutcome};
use flexage::store::{MemoryStore, Store};

struct World {
    store: Arc<MemoryStore>,
    queue: Arc<RecordingQueue>,
    coordinator: Arc<Coordinator<Evaluator>>,
    runner: Arc<BackgroundRunner<Evaluator>>,
    entry: Entry,
    student: User,
}

fn world(config: &FlexageConfig) -> World {
    let store = Arc::new(MemoryStore::new());
    let admin = store.insert_user(User::new("admin", Role::Admin)).unwrap();
    let admin = Principal::from(&admin);
    let catalog = Catalog::new(store.clone());

    let student = catalog
        .register_user(&admin, User::new("maria", Role::Student))
        .unwrap();
    let comp = catalog.create_competency(&admin, "Chemistry", None).unwrap();
    let entry = catalog
        .create_entry(&admin, comp.id, "Balance the equation", None, json!({"correctness": 10}))
        .unwrap();
    catalog.enroll(&admin, student.id, comp.id).unwrap();

    let queue = Arc::new(RecordingQueue::default());
    let evaluator = Evaluator::from_config(config).unwrap();
    let coordinator = Arc::new(Coordinator::new(store.clone(), evaluator, queue.clone()));
    let runner = Arc::new(BackgroundRunner::new(coordinator.clone(), RetryConfig::default()));

    World {
        store,
        queue,
        coordinator,
        runner,
        entry,
        student,
    }
}

fn gemini_config(server: &MockServer) -> FlexageConfig {
    FlexageConfig {
        api_key: "test-key".into(),
        api_base_url: server.uri(),
        ..Default::default()
    }
}

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

fn status(w: &World) -> EntryStatus {
    w.store
        .get_state(w.entry.id, w.student.id)
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn submit_then_background_evaluation_with_gemini() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(
            r#"{"feedback_text": "Balanced correctly.", "score": 9.5, "llm_confidence": 88}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let w = world(&gemini_config(&server));
    assert_eq!(
        w.coordinator.entry_view(w.entry.id, w.student.id).unwrap().state.status,
        EntryStatus::NotSubmitted
    );

    let sub = w
        .coordinator
        .submit(w.entry.id, w.student.id, "Attempt", "2H2 + O2 -> 2H2O")
        .unwrap();
    assert_eq!(status(&w), EntryStatus::SubmittedProcessing);
    assert!(w.store.outcome_for_submission(sub.id).unwrap().is_none());

    let outcomes = w.runner.run_pending(&w.queue).await;
    assert!(matches!(outcomes[..], [RunOutcome::Completed(_)]));

    let joined = w.coordinator.submission_with_outcome(sub.id).unwrap();
    let outcome = joined.outcome.unwrap();
    assert_eq!(outcome.payload.feedback_text, "Balanced correctly.");
    assert_eq!(outcome.payload.score, 9.5);
    assert_eq!(outcome.payload.confidence, 88);
    assert!(outcome.is_machine_generated);
    assert_eq!(status(&w), EntryStatus::OutcomeAvailable);
}

#[tokio::test]
async fn evaluator_failure_still_produces_an_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let w = world(&gemini_config(&server));
    let sub = w
        .coordinator
        .submit(w.entry.id, w.student.id, "Attempt", "H2 + O2 -> H2O")
        .unwrap();
    w.runner.run_pending(&w.queue).await;

    let outcome = w.store.outcome_for_submission(sub.id).unwrap().unwrap();
    assert_eq!(outcome.payload.score, 0.0);
    assert_eq!(outcome.payload.confidence, 0);
    assert!(outcome.payload.feedback_text.starts_with("Error, something went wrong!"));
    assert!(outcome.payload.degraded);
    assert_eq!(status(&w), EntryStatus::OutcomeAvailable);
}

#[tokio::test]
async fn malformed_model_reply_degrades() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("not json at all")))
        .mount(&server)
        .await;

    let w = world(&gemini_config(&server));
    let sub = w
        .coordinator
        .submit(w.entry.id, w.student.id, "Attempt", "content")
        .unwrap();
    let outcome = w.coordinator.evaluate(sub.id, false).await.unwrap();
    assert_eq!(outcome.payload.score, 0.0);
    assert_eq!(outcome.payload.confidence, 0);
}

#[tokio::test]
async fn conflict_without_force_and_replacement_with_force() {
    let w = world(&FlexageConfig::default());
    let sub = w
        .coordinator
        .submit(w.entry.id, w.student.id, "Attempt", "content")
        .unwrap();
    w.runner.run_pending(&w.queue).await;
    let first = w.store.outcome_for_submission(sub.id).unwrap().unwrap();

    let err = w.coordinator.evaluate(sub.id, false).await.unwrap_err();
    assert!(matches!(err, FlexageError::Conflict(_)));
    assert_eq!(w.store.outcome_for_submission(sub.id).unwrap().unwrap().id, first.id);

    let second = w.coordinator.evaluate(sub.id, true).await.unwrap();
    assert_ne!(second.id, first.id);
    assert!(w.store.get_outcome(first.id).unwrap().is_none());
    assert_eq!(status(&w), EntryStatus::OutcomeAvailable);
}

#[tokio::test]
async fn prompt_history_lists_prior_attempts_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(
            r#"{"feedback_text": "ok", "score": 5, "llm_confidence": 50}"#,
        )))
        .mount(&server)
        .await;

    let w = world(&gemini_config(&server));
    let now = Utc::now();
    let mut ids = Vec::new();
    for (title, minutes_ago) in [("alpha-one", 30), ("beta-two", 20), ("gamma-three", 10)] {
        let mut sub = Submission::new(w.entry.id, w.student.id, title, title);
        sub.submitted_at = now - Duration::minutes(minutes_ago);
        ids.push(w.store.insert_submission(sub).unwrap().id);
    }

    w.coordinator.evaluate(ids[1], false).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).into_owned();
    let gamma = body.find("gamma-three").unwrap();
    let alpha = body.find("alpha-one").unwrap();
    assert!(gamma < alpha, "history should list the newest attempt first");
    assert_eq!(body.matches("beta-two").count(), 2, "title and content of the current submission only");
}

#[tokio::test]
async fn unenrolled_student_cannot_submit() {
    let w = world(&FlexageConfig::default());
    let outsider = w.store.insert_user(User::new("outsider", Role::Student)).unwrap();

    let err = w
        .coordinator
        .submit(w.entry.id, outsider.id, "Attempt", "content")
        .unwrap_err();
    assert!(matches!(err, FlexageError::Forbidden(_)));
    assert!(w.store.submissions_for_student(outsider.id).unwrap().is_empty());
    assert!(w.queue.is_empty());
}

#[tokio::test]
async fn resubmission_cycles_back_through_processing() {
    let w = world(&FlexageConfig::default());
    w.coordinator
        .submit(w.entry.id, w.student.id, "One", "first")
        .unwrap();
    w.runner.run_pending(&w.queue).await;
    assert_eq!(status(&w), EntryStatus::OutcomeAvailable);

    let second = w
        .coordinator
        .submit(w.entry.id, w.student.id, "Two", "second")
        .unwrap();
    assert_eq!(status(&w), EntryStatus::SubmittedProcessing);

    let view = w.coordinator.entry_view(w.entry.id, w.student.id).unwrap();
    assert_eq!(view.latest_submission.unwrap().id, second.id);

    w.runner.run_pending(&w.queue).await;
    assert_eq!(status(&w), EntryStatus::OutcomeAvailable);

    let all = w
        .coordinator
        .submissions_for_pair(w.entry.id, w.student.id)
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|s| s.outcome.is_some()));
    assert_eq!(w.store.states_for_entry(w.entry.id).unwrap().len(), 1);
}
