//! Video completion
//!
//! Finalizes predictions exactly once under at-least-once delivery.
//! The asset is persisted before the compare-and-set status flip; a
//! finalizer that loses the race removes the asset it just created so
//! duplicate deliveries leave no orphans. Any persistence failure
//! flips the prediction to failed so rows never stay processing
//! forever.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use visualneurons_common::{
    db::models::{ActionKind, AssetKind, MediaAsset},
    db::NewAsset,
    errors::{AppError, Result},
    providers::{Provider, VideoBackend},
    MediaStore, Repository,
};

/// What a finalize attempt did
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// This caller transitioned the prediction and owns the asset
    Finalized(MediaAsset),
    /// The prediction was already terminal; nothing changed
    AlreadyFinal,
}

/// Finalize a succeeded prediction: download the output, persist it,
/// and flip the row terminal.
pub async fn finalize_succeeded(
    repo: &Repository,
    store: &MediaStore,
    video: &Arc<dyn VideoBackend>,
    external_id: &str,
    output_url: &str,
) -> Result<FinalizeOutcome> {
    let prediction = repo
        .find_prediction_by_external_id(external_id)
        .await?
        .ok_or_else(|| AppError::PredictionNotFound {
            id: external_id.to_string(),
        })?;

    if prediction.is_terminal() {
        return Ok(FinalizeOutcome::AlreadyFinal);
    }

    let owner = prediction.owner;
    let prompt = prediction.prompt.clone();

    match persist_output(repo, store, video, owner, &prompt, external_id, output_url).await {
        Ok(asset) => {
            let won = repo
                .finalize_prediction_succeeded(external_id, asset.id)
                .await?;

            if !won {
                // Another delivery got there first; drop our copy
                tracing::debug!(
                    external_id,
                    asset_id = %asset.id,
                    "Lost finalize race, removing duplicate asset"
                );
                repo.delete_asset(asset.id).await?;
                if let Err(e) = store.delete(&asset.path).await {
                    tracing::warn!(error = %e, path = %asset.path, "Failed to remove duplicate file");
                }
                return Ok(FinalizeOutcome::AlreadyFinal);
            }

            repo.append_action(
                owner,
                ActionKind::CreateVideo,
                Some(asset.id),
                json!({ "prompt": prompt, "external_id": external_id }),
            )
            .await?;

            tracing::info!(external_id, asset_id = %asset.id, "Video finalized");
            Ok(FinalizeOutcome::Finalized(asset))
        }
        Err(e) => {
            // Persistence failed; record the failure so the row does
            // not sit in processing forever.
            let message = format!("Failed to persist video output: {}", e);
            repo.finalize_prediction_failed(external_id, &message).await?;
            Err(e)
        }
    }
}

/// Finalize a failed prediction with the provider-supplied error.
/// Returns true when this caller performed the transition.
pub async fn finalize_failed(repo: &Repository, external_id: &str, error: &str) -> Result<bool> {
    let prediction = repo
        .find_prediction_by_external_id(external_id)
        .await?
        .ok_or_else(|| AppError::PredictionNotFound {
            id: external_id.to_string(),
        })?;

    if prediction.is_terminal() {
        return Ok(false);
    }

    let won = repo.finalize_prediction_failed(external_id, error).await?;
    if won {
        tracing::info!(external_id, error, "Video prediction marked failed");
    }
    Ok(won)
}

async fn persist_output(
    repo: &Repository,
    store: &MediaStore,
    video: &Arc<dyn VideoBackend>,
    owner: Uuid,
    prompt: &str,
    external_id: &str,
    output_url: &str,
) -> Result<MediaAsset> {
    let media = video.download(output_url).await?;
    let path = store.save_video(owner, &media.bytes).await?;

    repo.create_asset(NewAsset {
        owner,
        kind: AssetKind::Video,
        provider: Provider::GoogleVeo31.as_str().to_string(),
        path,
        bytes: media.bytes.len() as i64,
        width: None,
        height: None,
        derived_from: None,
        metadata: json!({
            "prompt": prompt,
            "mime_type": media.mime_type,
            "external_id": external_id,
        }),
        saved: true,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use tempfile::TempDir;
    use visualneurons_common::db::models::{Action, Prediction};
    use visualneurons_common::db::DbPool;
    use visualneurons_common::providers::testing::MockVideoBackend;

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
            metadata: serde_json::json!({}),
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    fn terminal_prediction(external_id: &str) -> Prediction {
        Prediction {
            status: "succeeded".to_string(),
            ..processing_prediction(external_id)
        }
    }

    fn video_asset(owner: Uuid) -> MediaAsset {
        MediaAsset {
            id: Uuid::new_v4(),
            owner,
            kind: "video".to_string(),
            provider: "google-veo-3.1".to_string(),
            path: format!("{}/video_1.mp4", owner),
            bytes: 16,
            width: None,
            height: None,
            derived_from: None,
            metadata: serde_json::json!({}),
            saved: true,
            created_at: Utc::now().into(),
        }
    }

    fn video_backend() -> Arc<dyn VideoBackend> {
        Arc::new(MockVideoBackend::with_polls(Vec::new()))
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![terminal_prediction("r8-abc")]])
            .into_connection();

        let dir = TempDir::new().unwrap();
        let repo = Repository::new(DbPool::from_connection(db));
        let store = MediaStore::new(dir.path());

        let outcome = finalize_succeeded(&repo, &store, &video_backend(), "r8-abc", "https://x/v.mp4")
            .await
            .unwrap();
        assert!(matches!(outcome, FinalizeOutcome::AlreadyFinal));
    }

    #[tokio::test]
    async fn test_unknown_prediction_is_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<Prediction>::new()])
            .into_connection();

        let dir = TempDir::new().unwrap();
        let repo = Repository::new(DbPool::from_connection(db));
        let store = MediaStore::new(dir.path());

        let err = finalize_succeeded(&repo, &store, &video_backend(), "r8-ghost", "https://x/v.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PredictionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_webhook_success_persists_and_finalizes() {
        let prediction = processing_prediction("r8-abc");
        let owner = prediction.owner;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // lookup, asset insert, CAS update (1 row), action insert
            .append_query_results([vec![prediction]])
            .append_query_results([vec![video_asset(owner)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .append_query_results([vec![Action {
                id: Uuid::new_v4(),
                user_id: owner,
                action: "create_video".to_string(),
                asset_id: None,
                detail: serde_json::json!({}),
                created_at: Utc::now().into(),
            }]])
            .into_connection();

        let dir = TempDir::new().unwrap();
        let repo = Repository::new(DbPool::from_connection(db));
        let store = MediaStore::new(dir.path());

        let outcome = finalize_succeeded(&repo, &store, &video_backend(), "r8-abc", "https://x/v.mp4")
            .await
            .unwrap();

        match outcome {
            FinalizeOutcome::Finalized(asset) => {
                assert_eq!(asset.kind, "video");
                assert!(asset.saved);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Downloaded bytes were written under the owner's directory
        let session_dir = dir.path().join(owner.to_string());
        assert_eq!(std::fs::read_dir(session_dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_lost_race_removes_duplicate_asset() {
        let prediction = processing_prediction("r8-abc");
        let owner = prediction.owner;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // lookup, asset insert, CAS update (0 rows), asset delete
            .append_query_results([vec![prediction]])
            .append_query_results([vec![video_asset(owner)]])
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();

        let dir = TempDir::new().unwrap();
        let repo = Repository::new(DbPool::from_connection(db));
        let store = MediaStore::new(dir.path());

        let outcome = finalize_succeeded(&repo, &store, &video_backend(), "r8-abc", "https://x/v.mp4")
            .await
            .unwrap();
        assert!(matches!(outcome, FinalizeOutcome::AlreadyFinal));
    }

    #[tokio::test]
    async fn test_failed_delivery_marks_prediction() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![processing_prediction("r8-abc")]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let repo = Repository::new(DbPool::from_connection(db));
        let transitioned = finalize_failed(&repo, "r8-abc", "NSFW content detected")
            .await
            .unwrap();
        assert!(transitioned);
    }
}
