//! Reply generation: one stateless completion call per user message.

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::ProviderError;
use crate::provider::LlmProvider;
use crate::types::{GenerationParams, Message};

/// Text returned to the user when the model call fails.
pub const GENERATION_ERROR_TEXT: &str = "Error in generating response";

/// Full-width ideographic full stop, stripped from model output.
const IDEOGRAPHIC_FULL_STOP: char = '。';

pub struct ReplyGenerator {
    provider: Arc<dyn LlmProvider>,
    params: GenerationParams,
}

impl ReplyGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, params: GenerationParams) -> Self {
        Self { provider, params }
    }

    /// Generate a reply for `text`. Never fails: any provider error is logged
    /// and replaced with [`GENERATION_ERROR_TEXT`].
    pub async fn generate(&self, text: &str) -> String {
        match self.try_generate(text).await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Model invocation failed ({}): {:?}", self.params.model, e);
                GENERATION_ERROR_TEXT.to_string()
            }
        }
    }

    async fn try_generate(&self, text: &str) -> Result<String, ProviderError> {
        let completion = self
            .provider
            .chat(&[Message::user(text)], &self.params)
            .await?;
        debug!(
            "Completion finished ({:?}), {} tokens",
            completion.finish_reason, completion.usage.total_tokens
        );

        let content = completion
            .content
            .ok_or_else(|| ProviderError::Parse("Completion has no content".to_string()))?;
        let answer = strip_full_stops(&content);
        if answer.trim().is_empty() {
            return Err(ProviderError::Parse(format!(
                "Completion is empty after stripping: {:?}",
                content
            )));
        }
        Ok(answer)
    }
}

/// Remove every ideographic full stop from `text`.
pub fn strip_full_stops(text: &str) -> String {
    text.replace(IDEOGRAPHIC_FULL_STOP, "")
}
