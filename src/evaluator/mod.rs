//! Evaluation client: turns an entry, a submission and its history into a
//! scored [`FeedbackPayload`].
//!
//! Evaluation never fails from the caller's point of view. Transport errors,
//! empty replies and malformed JSON all come back as a zero-score,
//! zero-confidence payload with an explanatory feedback text.

mod llm;
pub mod prompt;
mod simulated;
pub mod verdict;

use std::future::Future;

use tracing::info;

pub use llm::{DEFAULT_MODEL, LlmEvaluator};
pub use prompt::PromptTemplate;
pub use simulated::SimulatedEvaluator;
pub use verdict::{Degradation, Evaluation};

use crate::config::FlexageConfig;
use crate::error::Result;
use crate::gemini::GeminiClient;
use crate::model::{Entry, FeedbackPayload, Submission};

/// Everything the evaluator looks at for one submission.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub entry: Entry,
    pub submission_title: String,
    pub submission_content: String,
    /// Earlier submissions for the same pair, most recent first, excluding
    /// the one under evaluation.
    pub history: Vec<Submission>,
}

/// Produces feedback for a submission. Implementations must not fail.
pub trait FeedbackGenerator: Send + Sync {
    fn generate_feedback(
        &self,
        ctx: &EvaluationContext,
    ) -> impl Future<Output = FeedbackPayload> + Send;
}

/// Evaluator picked at startup from configuration.
pub enum Evaluator {
    Gemini(LlmEvaluator<GeminiClient>),
    Simulated(SimulatedEvaluator),
}

impl Evaluator {
    /// Gemini when an API key is configured, the simulator otherwise.
    pub fn from_config(config: &FlexageConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            info!("no API key configured, using simulated evaluator");
            return Ok(Evaluator::Simulated(SimulatedEvaluator));
        }

        let template = match &config.prompt_template {
            Some(path) => PromptTemplate::load(path)?,
            None => PromptTemplate::default(),
        };
        let client = GeminiClient::with_timeouts(
            config.api_key.clone(),
            config.api_base_url.clone(),
            config.connect_timeout(),
            config.request_timeout(),
        )?;
        info!(model = %config.model, "using Gemini evaluator");
        Ok(Evaluator::Gemini(LlmEvaluator::new(client, config.model.clone(), template)))
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Evaluator::Simulated(_))
    }
}

impl FeedbackGenerator for Evaluator {
    async fn generate_feedback(&self, ctx: &EvaluationContext) -> FeedbackPayload {
        match self {
            Evaluator::Gemini(inner) => inner.generate_feedback(ctx).await,
            Evaluator::Simulated(inner) => inner.generate_feedback(ctx).await,
        }
    }
}
