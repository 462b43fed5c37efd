//! Provider webhook handlers
//!
//! Replicate delivers completion events at least once, in any order,
//! possibly concurrently with the reconciliation sweep. The handler
//! always routes through the compare-and-set finalize path and treats
//! "already final" as success, so redelivery is harmless. Events for
//! jobs we do not track are acknowledged, not rejected: a non-2xx
//! response only makes the provider redeliver the same unknown id.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::services::completion::{self, FinalizeOutcome};
use crate::AppState;
use visualneurons_common::{
    errors::{AppError, Result},
    metrics,
    providers::replicate::extract_output_url,
    Repository,
};

/// Payload Replicate posts on job completion
#[derive(Debug, Deserialize)]
pub struct ReplicateWebhookPayload {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Handle a Replicate completion webhook
pub async fn replicate_webhook(
    State(state): State<AppState>,
    Json(payload): Json<ReplicateWebhookPayload>,
) -> Result<StatusCode> {
    let repo = Repository::new(state.db.clone());
    let external_id = payload.id.as_str();

    tracing::info!(external_id, status = %payload.status, "Webhook received");

    let outcome = match payload.status.as_str() {
        "succeeded" => {
            let Some(url) = payload.output.as_ref().and_then(extract_output_url) else {
                // Terminal on the provider side but nothing to
                // download; mark it failed instead of leaving the row
                // processing until the sweep notices.
                mark_failed(&repo, external_id, "No video URL in webhook output").await?;
                return Ok(StatusCode::OK);
            };

            let video = state.gateway.video_backend()?;
            match completion::finalize_succeeded(&repo, &state.store, video, external_id, &url)
                .await
            {
                Ok(outcome) => outcome,
                Err(AppError::PredictionNotFound { .. }) => {
                    tracing::warn!(external_id, "Acknowledging webhook for unknown job");
                    metrics::record_webhook_delivery("unknown");
                    return Ok(StatusCode::OK);
                }
                Err(e) => return Err(e),
            }
        }
        "failed" | "canceled" => {
            let error = match payload.error {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => format!("Video generation {}", payload.status),
            };
            mark_failed(&repo, external_id, &error).await?;
            return Ok(StatusCode::OK);
        }
        other => {
            // Intermediate events are not subscribed to; ignore them
            tracing::debug!(external_id, status = other, "Ignoring non-terminal webhook");
            return Ok(StatusCode::OK);
        }
    };

    match outcome {
        FinalizeOutcome::Finalized(_) => metrics::record_webhook_delivery("finalized"),
        FinalizeOutcome::AlreadyFinal => metrics::record_webhook_delivery("duplicate"),
    }

    Ok(StatusCode::OK)
}

/// Flip a prediction to failed, swallowing unknown job ids
async fn mark_failed(repo: &Repository, external_id: &str, error: &str) -> Result<()> {
    match completion::finalize_failed(repo, external_id, error).await {
        Ok(_) => metrics::record_webhook_delivery("failed"),
        Err(AppError::PredictionNotFound { .. }) => {
            tracing::warn!(external_id, "Acknowledging webhook for unknown job");
            metrics::record_webhook_delivery("unknown");
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;
    use visualneurons_common::config::AppConfig;
    use visualneurons_common::db::models::Prediction;
    use visualneurons_common::db::DbPool;
    use visualneurons_common::providers::testing::MockVideoBackend;
    use visualneurons_common::providers::VideoBackend;
    use visualneurons_common::{Gateway, MediaStore};

    fn state_with(db: sea_orm::DatabaseConnection, dir: &TempDir) -> AppState {
        let video: Arc<dyn VideoBackend> = Arc::new(MockVideoBackend::with_polls(Vec::new()));
        AppState {
            config: Arc::new(AppConfig::default()),
            db: DbPool::from_connection(db),
            store: MediaStore::new(dir.path()),
            gateway: Arc::new(Gateway::from_parts(HashMap::new(), Some(video), None)),
            jwt: None,
        }
    }

    fn processing_prediction(external_id: &str) -> Prediction {
        Prediction {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            owner: Uuid::new_v4(),
            kind: "video".to_string(),
            status: "processing".to_string(),
            prompt: "a drone shot of a coastline".to_string(),
            asset_id: None,
            error: None,
            metadata: json!({}),
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_failed_webhook_for_unknown_job_is_acknowledged() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<Prediction>::new()])
            .into_connection();
        let dir = TempDir::new().unwrap();

        let payload = ReplicateWebhookPayload {
            id: "r8-ghost".to_string(),
            status: "failed".to_string(),
            output: None,
            error: Some(json!("model crashed")),
        };

        let status = replicate_webhook(State(state_with(db, &dir)), Json(payload))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_succeeded_webhook_for_unknown_job_is_acknowledged() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<Prediction>::new()])
            .into_connection();
        let dir = TempDir::new().unwrap();

        let payload = ReplicateWebhookPayload {
            id: "r8-ghost".to_string(),
            status: "succeeded".to_string(),
            output: Some(json!("https://replicate.delivery/x/v.mp4")),
            error: None,
        };

        let status = replicate_webhook(State(state_with(db, &dir)), Json(payload))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_succeeded_webhook_without_url_marks_prediction_failed() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // lookup, CAS flip to failed
            .append_query_results([vec![processing_prediction("r8-abc")]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let dir = TempDir::new().unwrap();

        let payload = ReplicateWebhookPayload {
            id: "r8-abc".to_string(),
            status: "succeeded".to_string(),
            output: Some(json!({})),
            error: None,
        };

        let status = replicate_webhook(State(state_with(db, &dir)), Json(payload))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
    }
}
