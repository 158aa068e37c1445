//! Terminal output: a spinner while an evaluation runs and coloured
//! lifecycle and outcome printing.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use flexage::lifecycle::EntryStatus;
use flexage::model::{Outcome, SubmissionWithOutcome};

pub struct EvaluationProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl EvaluationProgress {
    pub fn start(title: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("Evaluating \"{title}\""));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn finish(&self, joined: &SubmissionWithOutcome) {
        self.pb.finish_and_clear();
        match &joined.outcome {
            Some(outcome) if outcome.payload.degraded => {
                println!(
                    "  {} Evaluation degraded for \"{}\"",
                    self.red.apply_to("✗"),
                    joined.submission.title
                );
            }
            Some(_) => {
                println!(
                    "  {} Evaluated \"{}\"",
                    self.green.apply_to("✓"),
                    joined.submission.title
                );
            }
            None => {
                println!(
                    "  {} No outcome for \"{}\"",
                    self.red.apply_to("✗"),
                    joined.submission.title
                );
            }
        }
    }
}

pub fn print_status(label: &str, status: EntryStatus) {
    let style = match status {
        EntryStatus::NotSubmitted => Style::new().dim(),
        EntryStatus::SubmittedProcessing => Style::new().yellow(),
        EntryStatus::OutcomeAvailable => Style::new().green(),
    };
    println!("  {label}: {}", style.apply_to(status));
}

pub fn print_outcome(outcome: &Outcome) {
    let header = Style::new().cyan().bold();
    let author = if outcome.is_machine_generated {
        "machine"
    } else {
        "reviewer"
    };
    println!();
    println!("{}", header.apply_to("─── Outcome ───"));
    println!(
        "  score {:.1}  confidence {}%  ({author})",
        outcome.payload.score, outcome.payload.confidence
    );
    println!();
    for line in outcome.payload.feedback_text.lines() {
        println!("  {line}");
    }
}

pub fn print_note(text: &str) {
    println!("{}", Style::new().dim().apply_to(text));
}
