//! Interpretation of the model's reply.
//!
//! [`Evaluation`] keeps the ok/degraded distinction internal; callers only
//! ever see the fixed-shape [`FeedbackPayload`] produced by
//! [`Evaluation::into_payload`].

use serde_json::Value;

use crate::gemini::{GeminiError, GenerateContentResponse};
use crate::model::FeedbackPayload;

pub const EMPTY_RESPONSE_FEEDBACK: &str = "Error: No content in LLM response.";
pub const INVALID_JSON_FEEDBACK: &str = "Error: LLM returned invalid JSON.";
pub const MISSING_FEEDBACK: &str = "Error: Could not parse feedback.";

/// Why an evaluation could not produce a real score.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    /// The call itself failed; carries the error text.
    CallFailed(String),
    EmptyResponse,
    InvalidJson,
}

impl Degradation {
    pub fn feedback_text(&self) -> String {
        match self {
            Degradation::CallFailed(details) => {
                format!("Error, something went wrong! Contact the admin, error: {details}")
            }
            Degradation::EmptyResponse => EMPTY_RESPONSE_FEEDBACK.to_string(),
            Degradation::InvalidJson => INVALID_JSON_FEEDBACK.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Scored(FeedbackPayload),
    Degraded(Degradation),
}

impl Evaluation {
    pub fn from_response(result: Result<GenerateContentResponse, GeminiError>) -> Self {
        match result {
            Ok(response) => match response.first_text() {
                Some(text) => Self::parse(text),
                None => Evaluation::Degraded(Degradation::EmptyResponse),
            },
            Err(e) => Evaluation::Degraded(Degradation::CallFailed(e.to_string())),
        }
    }

    /// Parse the model's text. Missing or mistyped fields fall back to
    /// defaults instead of failing.
    pub fn parse(text: &str) -> Self {
        let body = strip_code_fence(text.trim());
        if body.is_empty() {
            return Evaluation::Degraded(Degradation::EmptyResponse);
        }
        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return Evaluation::Degraded(Degradation::InvalidJson),
        };

        let feedback_text = value
            .get("feedback_text")
            .and_then(Value::as_str)
            .unwrap_or(MISSING_FEEDBACK)
            .to_string();
        let score = value.get("score").and_then(number).unwrap_or(0.0);
        let confidence = value
            .get("llm_confidence")
            .or_else(|| value.get("confidence"))
            .and_then(number)
            .map(|c| c.clamp(0.0, 100.0) as u8)
            .unwrap_or(0);

        Evaluation::Scored(FeedbackPayload {
            feedback_text,
            score,
            confidence,
            raw_response: Some(value),
            degraded: false,
        })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Evaluation::Degraded(_))
    }

    pub fn into_payload(self) -> FeedbackPayload {
        match self {
            Evaluation::Scored(payload) => payload,
            Evaluation::Degraded(reason) => FeedbackPayload::degraded(reason.feedback_text()),
        }
    }
}

// Finite numbers, or numeric strings like "8.5". "NaN" and "inf" are rejected.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|f| f.is_finite())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
