mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use cli::{Cli, Command, EvaluateArgs};
use flexage::access::Principal;
use flexage::catalog::Catalog;
use flexage::config::{DEFAULT_CONFIG_FILE, FlexageConfig};
use flexage::coordinator::Coordinator;
use flexage::evaluator::Evaluator;
use flexage::model::{CompetencyId, Entry, Role, SubmissionWithOutcome, User, UserId};
use flexage::runner::{BackgroundRunner, RecordingQueue, RetryConfig};
use flexage::store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());
    let mut config = FlexageConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    debug!(?config_path, model = %config.model, "configuration loaded");

    match cli.command {
        Command::Evaluate(args) => evaluate(&config, args).await,
        Command::Demo => demo(&config).await,
    }
}

/// In-memory workspace shared by both commands: a configurator, one
/// competency and one enrolled student.
struct Session {
    catalog: Catalog,
    coordinator: Arc<Coordinator<Evaluator>>,
    runner: Arc<BackgroundRunner<Evaluator>>,
    queue: Arc<RecordingQueue>,
    stale_after: Duration,
    staff: Principal,
    student: UserId,
}

impl Session {
    fn open(config: &FlexageConfig, competency: &str) -> Result<(Self, CompetencyId)> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let admin = store.insert_user(User::new("admin", Role::Admin))?;
        let admin = Principal::from(&admin);
        let catalog = Catalog::new(Arc::clone(&store));

        let configurator = catalog.register_user(&admin, User::new("configurator", Role::Configurator))?;
        let staff = Principal::from(&configurator);
        let student = catalog.register_user(&admin, User::new("student", Role::Student))?;
        let comp = catalog.create_competency(&staff, competency, None)?;
        catalog.enroll(&staff, student.id, comp.id)?;

        let evaluator = Evaluator::from_config(config)?;
        if evaluator.is_simulated() {
            ui::print_note("No API key configured: feedback is simulated.");
        }

        let queue = Arc::new(RecordingQueue::default());
        let coordinator = Arc::new(Coordinator::new(store, evaluator, queue.clone()));
        let runner = Arc::new(BackgroundRunner::new(
            Arc::clone(&coordinator),
            RetryConfig {
                max_retries: config.background_retries,
                base_delay_ms: config.retry_base_delay_ms,
            },
        ));

        Ok((
            Self {
                catalog,
                coordinator,
                runner,
                queue,
                stale_after: config.stale_after(),
                staff,
                student: student.id,
            },
            comp.id,
        ))
    }

    async fn submit_and_wait(&self, entry: &Entry, title: &str, content: &str) -> Result<SubmissionWithOutcome> {
        let submission = self
            .coordinator
            .submit(entry.id, self.student, title, content)?;
        let state = self.coordinator.entry_view(entry.id, self.student)?.state;
        ui::print_status("after submit", state.status);

        let progress = ui::EvaluationProgress::start(title);
        self.runner.sweep(&self.queue, self.stale_after).await;
        let joined = self.coordinator.submission_with_outcome(submission.id)?;
        progress.finish(&joined);

        let state = self.coordinator.entry_view(entry.id, self.student)?.state;
        ui::print_status("after evaluation", state.status);
        if let Some(outcome) = &joined.outcome {
            ui::print_outcome(outcome);
        }
        Ok(joined)
    }
}

async fn evaluate(config: &FlexageConfig, args: EvaluateArgs) -> Result<()> {
    let content = match (&args.content, &args.file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading submission from {}", path.display()))?,
        (None, None) => anyhow::bail!("either --content or --file is required"),
    };
    let rubric = match &args.rubric {
        Some(path) => read_rubric(path)?,
        None => serde_json::json!({}),
    };

    let (session, comp) = Session::open(config, "Ad hoc")?;
    let entry = session.catalog.create_entry(
        &session.staff,
        comp,
        &args.entry_title,
        args.instructions.clone(),
        rubric,
    )?;

    let joined = session.submit_and_wait(&entry, &args.title, &content).await?;
    if let Some(outcome) = joined.outcome {
        println!();
        println!("{}", serde_json::to_string_pretty(&outcome.payload)?);
    }
    Ok(())
}

fn read_rubric(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rubric {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing rubric {}", path.display()))
}

async fn demo(config: &FlexageConfig) -> Result<()> {
    let (session, comp) = Session::open(config, "Scientific Writing")?;
    let entry = session.catalog.create_entry(
        &session.staff,
        comp,
        "Explain photosynthesis",
        Some("Describe the inputs, outputs and where it happens.".into()),
        serde_json::json!({"accuracy": "0-5", "clarity": "0-5"}),
    )?;

    let view = session.coordinator.entry_view(entry.id, session.student)?;
    ui::print_status("initial", view.state.status);

    session
        .submit_and_wait(
            &entry,
            "First attempt",
            "Plants use sunlight to make food.",
        )
        .await?;

    let second = session
        .submit_and_wait(
            &entry,
            "Second attempt",
            "In the chloroplasts, light energy converts carbon dioxide and water into glucose, releasing oxygen.",
        )
        .await?;

    let submission_id = second.submission.id;
    if let Err(e) = session.coordinator.evaluate(submission_id, false).await {
        ui::print_note(&format!("re-evaluating without force: {e}"));
    }
    let progress = ui::EvaluationProgress::start("Second attempt (regenerate)");
    session.coordinator.evaluate(submission_id, true).await?;
    let regenerated = session.coordinator.submission_with_outcome(submission_id)?;
    progress.finish(&regenerated);
    if let Some(outcome) = &regenerated.outcome {
        ui::print_outcome(outcome);
    }

    let history = session
        .coordinator
        .submissions_for_pair(entry.id, session.student)?;
    ui::print_note(&format!("{} submissions on record", history.len()));
    Ok(())
}
