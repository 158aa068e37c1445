//! Command line interface built on clap.
//!
//! [`Cli`] carries the global flags (--config, --model, --verbose) and a
//! [`Command`]: `evaluate` scores one piece of work, `demo` walks a student
//! through the whole submission lifecycle.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// FlexAGE: submit work and get machine-generated feedback.
#[derive(Debug, Parser)]
#[command(name = "flexage", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file. Defaults to ./flexage.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Gemini model to use instead of the configured one.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Verbose logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Evaluate a single submission against an ad-hoc entry.
    Evaluate(EvaluateArgs),

    /// Run the built-in lifecycle walkthrough.
    Demo,
}

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Title of the entry (the question) being answered.
    #[arg(long)]
    pub entry_title: String,

    /// Instructions shown to the student.
    #[arg(long)]
    pub instructions: Option<String>,

    /// JSON file holding the grading rubric.
    #[arg(long)]
    pub rubric: Option<PathBuf>,

    /// Title of the submission.
    #[arg(long, default_value = "Submission")]
    pub title: String,

    /// Submission text.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub content: Option<String>,

    /// Read the submission text from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,
}
