//! Prompt improvement handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::extract::AuthSession;
use crate::AppState;
use visualneurons_common::errors::{AppError, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct ImprovePromptRequest {
    #[validate(length(min = 1, max = 5000))]
    pub prompt: String,

    /// "image" or "video"
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "image".to_string()
}

#[derive(Debug, Serialize)]
pub struct ImprovePromptResponse {
    pub original_prompt: String,
    pub improved_prompt: String,
}

/// Rewrite a prompt using the Claude advisor
pub async fn improve_prompt(
    State(state): State<AppState>,
    _session: AuthSession,
    Json(request): Json<ImprovePromptRequest>,
) -> Result<Json<ImprovePromptResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    if !matches!(request.kind.as_str(), "image" | "video") {
        return Err(AppError::Validation {
            message: "kind must be \"image\" or \"video\"".to_string(),
            field: Some("kind".to_string()),
        });
    }

    let advisor = state.gateway.advisor().ok_or_else(|| AppError::ProviderAuth {
        provider: "claude-advisor".to_string(),
        message: "prompt improvement requires Bedrock to be enabled".to_string(),
    })?;

    let improved = advisor.improve_prompt(&request.prompt, &request.kind).await?;

    Ok(Json(ImprovePromptResponse {
        original_prompt: request.prompt,
        improved_prompt: improved,
    }))
}
