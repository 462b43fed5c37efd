//! AWS Bedrock backend (Amazon Nova Canvas)
//!
//! Nova Canvas runs behind `InvokeModel` with JSON request/response
//! bodies. Edits use the INPAINTING task: either a mask prompt pulled
//! out of the instruction, or an explicit mask image. Nova Canvas
//! treats black mask pixels as the editable region, the opposite of
//! the segmentation output, so callers invert masks before handing
//! them over.

use super::{GeneratedMedia, ImageBackend};
use crate::config::BedrockConfig;
use crate::errors::{AppError, Result};
use crate::masking::extract_mask_prompt;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct NovaCanvasBackend {
    client: Client,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct CanvasResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

impl NovaCanvasBackend {
    pub async fn new(config: &BedrockConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            client: Client::new(&aws_config),
            model_id: config.canvas_model_id.clone(),
        }
    }

    async fn invoke(&self, body: Value) -> Result<GeneratedMedia> {
        let payload = serde_json::to_vec(&body)?;

        let output = self
            .client
            .invoke_model()
            .model_id(&self.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(payload))
            .send()
            .await
            .map_err(|e| map_sdk_error(e.to_string()))?;

        let response: CanvasResponse = serde_json::from_slice(output.body().as_ref())?;

        if let Some(error) = response.error {
            if !error.is_empty() {
                return Err(AppError::ProviderGeneration {
                    provider: "amazon-nova-canvas".to_string(),
                    message: error,
                    explanation: None,
                });
            }
        }

        let encoded = response.images.into_iter().next().ok_or_else(|| {
            AppError::ProviderGeneration {
                provider: "amazon-nova-canvas".to_string(),
                message: "No images in response".to_string(),
                explanation: None,
            }
        })?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .map_err(|e| AppError::ProviderGeneration {
                provider: "amazon-nova-canvas".to_string(),
                message: format!("Invalid base64 image data: {}", e),
                explanation: None,
            })?;

        Ok(GeneratedMedia {
            bytes,
            mime_type: "image/png".to_string(),
        })
    }
}

fn generation_config() -> Value {
    json!({
        "numberOfImages": 1,
        "quality": "standard",
        "cfgScale": 8.0,
    })
}

fn map_sdk_error(message: String) -> AppError {
    let lowered = message.to_lowercase();
    if lowered.contains("credential")
        || lowered.contains("security token")
        || lowered.contains("accessdenied")
    {
        AppError::ProviderAuth {
            provider: "amazon-nova-canvas".to_string(),
            message,
        }
    } else {
        AppError::ProviderGeneration {
            provider: "amazon-nova-canvas".to_string(),
            message,
            explanation: None,
        }
    }
}

#[async_trait]
impl ImageBackend for NovaCanvasBackend {
    async fn generate(&self, prompt: &str) -> Result<GeneratedMedia> {
        let body = json!({
            "taskType": "TEXT_IMAGE",
            "textToImageParams": { "text": prompt },
            "imageGenerationConfig": generation_config(),
        });
        self.invoke(body).await
    }

    async fn edit(
        &self,
        image: &[u8],
        _mime_type: &str,
        instruction: &str,
    ) -> Result<GeneratedMedia> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let mask_prompt = extract_mask_prompt(instruction);

        let body = json!({
            "taskType": "INPAINTING",
            "inPaintingParams": {
                "image": encoded,
                "text": instruction,
                "maskPrompt": mask_prompt,
            },
            "imageGenerationConfig": generation_config(),
        });
        self.invoke(body).await
    }

    async fn edit_with_mask(
        &self,
        image: &[u8],
        _mime_type: &str,
        mask_png: &[u8],
        instruction: &str,
    ) -> Result<GeneratedMedia> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let mask = base64::engine::general_purpose::STANDARD.encode(mask_png);

        let body = json!({
            "taskType": "INPAINTING",
            "inPaintingParams": {
                "image": encoded,
                "text": instruction,
                "maskImage": mask,
            },
            "imageGenerationConfig": generation_config(),
        });
        self.invoke(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_error_mapping() {
        assert!(matches!(
            map_sdk_error("The security token included in the request is invalid".to_string()),
            AppError::ProviderAuth { .. }
        ));
        assert!(matches!(
            map_sdk_error("ValidationException: content filtered".to_string()),
            AppError::ProviderGeneration { .. }
        ));
    }
}
