use tracing::{debug, warn};

use super::prompt::{PromptTemplate, SYSTEM_INSTRUCTION};
use super::verdict::{Degradation, Evaluation};
use super::{EvaluationContext, FeedbackGenerator};
use crate::gemini::{ContentGenerator, GenerateContentRequest};
use crate::model::FeedbackPayload;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Evaluates submissions with a generative model behind [`ContentGenerator`].
pub struct LlmEvaluator<C> {
    client: C,
    model: String,
    template: PromptTemplate,
}

impl<C: ContentGenerator> LlmEvaluator<C> {
    pub fn new(client: C, model: impl Into<String>, template: PromptTemplate) -> Self {
        Self {
            client,
            model: model.into(),
            template,
        }
    }

    /// Run one evaluation, keeping the degraded/ok distinction.
    pub async fn evaluate(&self, ctx: &EvaluationContext) -> Evaluation {
        let prompt = match self.template.render(ctx) {
            Ok(prompt) => prompt,
            Err(e) => return Evaluation::Degraded(Degradation::CallFailed(e.to_string())),
        };
        debug!(model = %self.model, %prompt, "evaluation prompt");

        let req = GenerateContentRequest::json_prompt(SYSTEM_INSTRUCTION, prompt);
        let evaluation = Evaluation::from_response(self.client.generate_content(&self.model, &req).await);

        if let Evaluation::Degraded(reason) = &evaluation {
            warn!(entry_id = %ctx.entry.id, ?reason, "evaluation degraded");
        }
        evaluation
    }
}

impl<C: ContentGenerator> FeedbackGenerator for LlmEvaluator<C> {
    async fn generate_feedback(&self, ctx: &EvaluationContext) -> FeedbackPayload {
        self.evaluate(ctx).await.into_payload()
    }
}
