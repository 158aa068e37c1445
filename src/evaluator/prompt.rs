//! Evaluation prompt assembly.
//!
//! The prompt is a fixed template with three placeholders, each replaced by a
//! JSON document: `{question_content}`, `{submission_content}` and
//! `{submission_history}`.

use std::path::Path;

use serde::Serialize;

use super::EvaluationContext;

/// System instruction sent with every evaluation request.
pub const SYSTEM_INSTRUCTION: &str = "You are an academic evaluation expert. Your output will be in the form of a JSON ONLY. You will also answer questions from an academic perspective to the best of your knowledge when asked.";

pub const NO_INSTRUCTIONS: &str = "<no instructions given>";

const DEFAULT_TEMPLATE: &str = include_str!("../../prompts/evaluation_prompt.txt");

#[derive(Debug, Serialize)]
struct QuestionContext<'a> {
    question_title: &'a str,
    question_rubric: serde_json::Value,
    question_description: &'a str,
}

#[derive(Debug, Serialize)]
struct SubmissionContext<'a> {
    submission_title: &'a str,
    submission_content: &'a str,
}

#[derive(Debug, Serialize)]
struct HistoryItem<'a> {
    attempt_number: usize,
    submission_title: &'a str,
    submission_content: &'a str,
    submitted_at: String,
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?))
    }

    /// Interpolate the context documents into the template.
    pub fn render(&self, ctx: &EvaluationContext) -> serde_json::Result<String> {
        let question = serde_json::to_string(&question_context(ctx))?;
        let submission = serde_json::to_string(&SubmissionContext {
            submission_title: &ctx.submission_title,
            submission_content: &ctx.submission_content,
        })?;
        let history = serde_json::to_string(&history_items(ctx))?;

        Ok(self
            .text
            .replace("{question_content}", &question)
            .replace("{submission_content}", &submission)
            .replace("{submission_history}", &history))
    }
}

fn question_context(ctx: &EvaluationContext) -> QuestionContext<'_> {
    let rubric = match &ctx.entry.rubric {
        serde_json::Value::Null => serde_json::Value::String(String::new()),
        serde_json::Value::Object(map) if map.is_empty() => serde_json::Value::String(String::new()),
        other => other.clone(),
    };
    QuestionContext {
        question_title: &ctx.entry.title,
        question_rubric: rubric,
        question_description: ctx
            .entry
            .instructions
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_INSTRUCTIONS),
    }
}

// Attempt numbers count from the most recent earlier attempt.
fn history_items(ctx: &EvaluationContext) -> Vec<HistoryItem<'_>> {
    ctx.history
        .iter()
        .enumerate()
        .map(|(i, prev)| HistoryItem {
            attempt_number: i + 1,
            submission_title: &prev.title,
            submission_content: &prev.content,
            submitted_at: prev.submitted_at.to_rfc3339(),
        })
        .collect()
}
