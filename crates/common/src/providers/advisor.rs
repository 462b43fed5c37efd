//! Claude advisor (via Bedrock)
//!
//! Two jobs: rewrite user prompts into stronger generation prompts,
//! and translate raw provider failures into wording a user can act on.
//! Error explanation is strictly best-effort; the advisor failing must
//! never mask the original error.

use crate::config::BedrockConfig;
use crate::errors::{AppError, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

pub struct ClaudeAdvisor {
    client: Client,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl ClaudeAdvisor {
    pub async fn new(config: &BedrockConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            client: Client::new(&aws_config),
            model_id: config.advisor_model_id.clone(),
        }
    }

    async fn complete(&self, prompt: String, max_tokens: u32) -> Result<String> {
        let body = json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let output = self
            .client
            .invoke_model()
            .model_id(&self.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(serde_json::to_vec(&body)?))
            .send()
            .await
            .map_err(|e| AppError::ProviderGeneration {
                provider: "claude-advisor".to_string(),
                message: e.to_string(),
                explanation: None,
            })?;

        let response: ClaudeResponse = serde_json::from_slice(output.body().as_ref())?;

        let text = response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(AppError::ProviderGeneration {
                provider: "claude-advisor".to_string(),
                message: "Empty completion".to_string(),
                explanation: None,
            });
        }

        Ok(text.trim().to_string())
    }

    /// Rewrite a prompt into a more detailed one for the target media
    /// kind ("image" or "video").
    pub async fn improve_prompt(&self, prompt: &str, kind: &str) -> Result<String> {
        let instruction = format!(
            "You improve prompts for AI {kind} generation. Rewrite the \
             following prompt to be more specific and visually detailed \
             while preserving the user's intent. Reply with the improved \
             prompt only, no preamble.\n\nPrompt: {prompt}"
        );
        self.complete(instruction, 1024).await
    }

    /// Turn a raw provider error into user-facing wording. Returns
    /// `None` on any failure so callers keep the original message.
    pub async fn explain_error(&self, provider: &str, error: &str) -> Option<String> {
        let instruction = format!(
            "An AI media generation request to {provider} failed with \
             this error:\n\n{error}\n\nExplain in one or two plain \
             sentences what went wrong and what the user could try \
             instead. Do not mention internal identifiers."
        );

        match self.complete(instruction, 256).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "Advisor failed to explain provider error");
                None
            }
        }
    }
}
