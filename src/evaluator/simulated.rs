//! Offline stand-in for the model: positive, deterministic feedback.

use super::{EvaluationContext, FeedbackGenerator};
use crate::model::FeedbackPayload;

const EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedEvaluator;

impl SimulatedEvaluator {
    pub fn feedback(&self, title: &str, content: &str) -> FeedbackPayload {
        let seed: u64 = content.bytes().map(u64::from).sum::<u64>() + title.len() as u64;
        let excerpt = excerpt(content);

        let feedback = match seed % 5 {
            0 => format!(
                "Your submission on \"{title}\" demonstrates clear thinking and strong reasoning. {excerpt} Your ideas are presented logically, and you've provided adequate support for your main points. To further improve, consider adding more specific examples to illustrate your concepts."
            ),
            1 => format!(
                "Excellent work on \"{title}\"! You've articulated your thoughts well and shown good understanding of the subject matter. {excerpt} For future submissions, you might consider exploring counter-arguments to strengthen your position."
            ),
            2 => format!(
                "I appreciate your thoughtful submission titled \"{title}\". {excerpt} You've successfully communicated your key ideas with good supporting details. To elevate your work further, consider deepening your analysis in specific areas."
            ),
            3 => format!(
                "Strong submission on \"{title}\". {excerpt} You've structured your response effectively and demonstrated solid understanding. To enhance future work, you might incorporate more diverse perspectives on the subject."
            ),
            _ => format!(
                "Your reflection on \"{title}\" shows critical thinking and engagement with the material. {excerpt} Consider adding more specific real-world applications to strengthen your analysis in the future."
            ),
        };

        // 7.0 ..= 10.0 in tenths, 85 ..= 98 confidence.
        let score = 7.0 + (seed % 31) as f64 / 10.0;
        let confidence = 85 + (seed % 14) as u8;
        FeedbackPayload::new(feedback, score, confidence)
    }
}

fn excerpt(content: &str) -> String {
    let cleaned = content.replace("<p>", "").replace("</p>", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return String::new();
    }
    let mut sample: String = cleaned.chars().take(EXCERPT_CHARS).collect();
    sample.push_str("...");
    sample
}

impl FeedbackGenerator for SimulatedEvaluator {
    async fn generate_feedback(&self, ctx: &EvaluationContext) -> FeedbackPayload {
        self.feedback(&ctx.submission_title, &ctx.submission_content)
    }
}
