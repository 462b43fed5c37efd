//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling. Prediction finalization uses
//! compare-and-set updates so at-least-once webhook delivery
//! can never flip a terminal row twice.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

/// Parameters for inserting a new media asset
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub owner: Uuid,
    pub kind: AssetKind,
    pub provider: String,
    pub path: String,
    pub bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub derived_from: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub saved: bool,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    /// Find the session for an identity, creating it on first sight and
    /// bumping `last_seen_at` otherwise. Sessions are never deleted.
    pub async fn get_or_create_session(&self, identity: &str) -> Result<Session> {
        let now = Utc::now();

        let existing = SessionEntity::find()
            .filter(SessionColumn::Identity.eq(identity))
            .one(self.write_conn())
            .await?;

        if let Some(session) = existing {
            let mut active: SessionActiveModel = session.into();
            active.last_seen_at = Set(now.into());
            return active.update(self.write_conn()).await.map_err(Into::into);
        }

        let session = SessionActiveModel {
            id: Set(Uuid::new_v4()),
            identity: Set(identity.to_string()),
            created_at: Set(now.into()),
            last_seen_at: Set(now.into()),
        };

        // Two first requests for the same identity can both miss the
        // lookup; the loser hits the identity unique index. Take the
        // winner's row instead of surfacing the conflict.
        match session.insert(self.write_conn()).await {
            Ok(created) => Ok(created),
            Err(insert_err) => {
                let winner = SessionEntity::find()
                    .filter(SessionColumn::Identity.eq(identity))
                    .one(self.write_conn())
                    .await?;
                winner.ok_or_else(|| insert_err.into())
            }
        }
    }

    /// Find session by ID
    pub async fn find_session(&self, id: Uuid) -> Result<Option<Session>> {
        SessionEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Media Asset Operations
    // ========================================================================

    /// Insert a new media asset row. The storage path is written exactly
    /// once here and never mutated.
    pub async fn create_asset(&self, new: NewAsset) -> Result<MediaAsset> {
        let asset = MediaAssetActiveModel {
            id: Set(Uuid::new_v4()),
            owner: Set(new.owner),
            kind: Set(String::from(new.kind)),
            provider: Set(new.provider),
            path: Set(new.path),
            bytes: Set(new.bytes),
            width: Set(new.width),
            height: Set(new.height),
            derived_from: Set(new.derived_from),
            metadata: Set(new.metadata),
            saved: Set(new.saved),
            created_at: Set(Utc::now().into()),
        };

        asset.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find asset by ID
    pub async fn find_asset_by_id(&self, id: Uuid) -> Result<Option<MediaAsset>> {
        MediaAssetEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find an asset owned by the given session, or None
    pub async fn find_owned_asset(&self, id: Uuid, owner: Uuid) -> Result<Option<MediaAsset>> {
        MediaAssetEntity::find_by_id(id)
            .filter(MediaAssetColumn::Owner.eq(owner))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find an asset by its relative storage path, scoped to an owner
    pub async fn find_asset_by_path(&self, path: &str, owner: Uuid) -> Result<Option<MediaAsset>> {
        MediaAssetEntity::find()
            .filter(MediaAssetColumn::Path.eq(path))
            .filter(MediaAssetColumn::Owner.eq(owner))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List explicitly saved assets for a session, newest first
    pub async fn list_saved_assets(&self, owner: Uuid) -> Result<Vec<MediaAsset>> {
        MediaAssetEntity::find()
            .filter(MediaAssetColumn::Owner.eq(owner))
            .filter(MediaAssetColumn::Saved.eq(true))
            .order_by_desc(MediaAssetColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List all generated assets for a session, excluding the upload
    /// sentinel provider. Used by the usage aggregator.
    pub async fn list_generated_assets(&self, owner: Uuid) -> Result<Vec<MediaAsset>> {
        MediaAssetEntity::find()
            .filter(MediaAssetColumn::Owner.eq(owner))
            .filter(MediaAssetColumn::Provider.ne(crate::UPLOAD_PROVIDER))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Flip the saved flag to true. Idempotent: saving an already-saved
    /// asset leaves state unchanged and succeeds.
    pub async fn mark_asset_saved(&self, id: Uuid) -> Result<MediaAsset> {
        let asset = MediaAssetEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::AssetNotFound { id: id.to_string() })?;

        if asset.saved {
            return Ok(asset);
        }

        let mut active: MediaAssetActiveModel = asset.into();
        active.saved = Set(true);
        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Delete the asset row. Action rows keep their (now dangling)
    /// asset reference; the audit log is append-only.
    pub async fn delete_asset(&self, id: Uuid) -> Result<bool> {
        let result = MediaAssetEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Action Operations
    // ========================================================================

    /// Append an audit-log row. Rows are never mutated or deleted.
    pub async fn append_action(
        &self,
        user_id: Uuid,
        kind: ActionKind,
        asset_id: Option<Uuid>,
        detail: serde_json::Value,
    ) -> Result<Action> {
        let action = ActionActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            action: Set(String::from(kind)),
            asset_id: Set(asset_id),
            detail: Set(detail),
            created_at: Set(Utc::now().into()),
        };

        action.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// List audit rows of one kind for a session. Used by the usage
    /// aggregator for operations that produce no media asset.
    pub async fn list_actions_of_kind(&self, user_id: Uuid, kind: ActionKind) -> Result<Vec<Action>> {
        ActionEntity::find()
            .filter(ActionColumn::UserId.eq(user_id))
            .filter(ActionColumn::Action.eq(kind.as_str()))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Most recent action referencing an asset, if any
    pub async fn latest_action_for_asset(&self, asset_id: Uuid) -> Result<Option<Action>> {
        ActionEntity::find()
            .filter(ActionColumn::AssetId.eq(asset_id))
            .order_by_desc(ActionColumn::CreatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Prediction Operations
    // ========================================================================

    /// Create a prediction row in the processing state
    pub async fn create_prediction(
        &self,
        owner: Uuid,
        external_id: &str,
        prompt: &str,
        metadata: serde_json::Value,
    ) -> Result<Prediction> {
        let now = Utc::now();

        let prediction = PredictionActiveModel {
            id: Set(Uuid::new_v4()),
            external_id: Set(external_id.to_string()),
            owner: Set(owner),
            kind: Set("video".to_string()),
            status: Set(PredictionStatus::Processing.as_str().to_string()),
            prompt: Set(prompt.to_string()),
            asset_id: Set(None),
            error: Set(None),
            metadata: Set(metadata),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        prediction.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find prediction by our ID
    pub async fn find_prediction_by_id(&self, id: Uuid) -> Result<Option<Prediction>> {
        PredictionEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find prediction by the provider-side job ID
    pub async fn find_prediction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Prediction>> {
        PredictionEntity::find()
            .filter(PredictionColumn::ExternalId.eq(external_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Mark a prediction succeeded with its resulting asset.
    ///
    /// Compare-and-set: the update only applies while the row is still
    /// `processing`. Returns false when another finalizer won the race,
    /// in which case the caller must not keep any asset it created.
    pub async fn finalize_prediction_succeeded(
        &self,
        external_id: &str,
        asset_id: Uuid,
    ) -> Result<bool> {
        let result = PredictionEntity::update_many()
            .col_expr(
                PredictionColumn::Status,
                Expr::value(PredictionStatus::Succeeded.as_str()),
            )
            .col_expr(PredictionColumn::AssetId, Expr::value(asset_id))
            .col_expr(PredictionColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(PredictionColumn::ExternalId.eq(external_id))
            .filter(PredictionColumn::Status.eq(PredictionStatus::Processing.as_str()))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Mark a prediction failed with the provider-supplied error string.
    /// Same compare-and-set semantics as the success path.
    pub async fn finalize_prediction_failed(
        &self,
        external_id: &str,
        error: &str,
    ) -> Result<bool> {
        let result = PredictionEntity::update_many()
            .col_expr(
                PredictionColumn::Status,
                Expr::value(PredictionStatus::Failed.as_str()),
            )
            .col_expr(PredictionColumn::Error, Expr::value(error))
            .col_expr(PredictionColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(PredictionColumn::ExternalId.eq(external_id))
            .filter(PredictionColumn::Status.eq(PredictionStatus::Processing.as_str()))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// List processing predictions created before the cutoff.
    /// Feeds the reconciliation sweep.
    pub async fn list_stale_processing_predictions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Prediction>> {
        PredictionEntity::find()
            .filter(PredictionColumn::Status.eq(PredictionStatus::Processing.as_str()))
            .filter(PredictionColumn::CreatedAt.lt(cutoff))
            .order_by_asc(PredictionColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn pool_with(conn: sea_orm::DatabaseConnection) -> DbPool {
        DbPool::from_connection(conn)
    }

    #[tokio::test]
    async fn test_finalize_failed_cas_reports_lost_race() {
        // rows_affected = 0 simulates a row already in a terminal state
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let repo = Repository::new(pool_with(db));
        let won = repo
            .finalize_prediction_failed("r8-abc", "quota exceeded")
            .await
            .unwrap();
        assert!(!won);
    }

    #[tokio::test]
    async fn test_finalize_succeeded_cas_wins_once() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                },
            ])
            .into_connection();

        let repo = Repository::new(pool_with(db));
        let asset_id = Uuid::new_v4();

        let first = repo
            .finalize_prediction_succeeded("r8-abc", asset_id)
            .await
            .unwrap();
        let second = repo
            .finalize_prediction_succeeded("r8-abc", asset_id)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn test_session_insert_race_takes_the_winner_row() {
        let winner = Session {
            id: Uuid::new_v4(),
            identity: "anon_abc".to_string(),
            created_at: Utc::now().into(),
            last_seen_at: Utc::now().into(),
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // initial lookup misses, the insert hits the unique index,
            // the retry lookup finds the concurrent winner
            .append_query_results([Vec::<Session>::new()])
            .append_query_errors([sea_orm::DbErr::Custom(
                "duplicate key value violates unique constraint \"sessions_identity_idx\""
                    .to_string(),
            )])
            .append_query_results([vec![winner.clone()]])
            .into_connection();

        let repo = Repository::new(pool_with(db));
        let session = repo.get_or_create_session("anon_abc").await.unwrap();
        assert_eq!(session.id, winner.id);
    }

    #[tokio::test]
    async fn test_mark_saved_is_idempotent_when_already_saved() {
        let asset = MediaAsset {
            id: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            kind: "image".to_string(),
            provider: "gemini-nano-banana".to_string(),
            path: "s/123-img.png".to_string(),
            bytes: 10,
            width: None,
            height: None,
            derived_from: None,
            metadata: serde_json::json!({}),
            saved: true,
            created_at: Utc::now().into(),
        };

        // Only the lookup runs; no update statement is issued
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![asset.clone()]])
            .into_connection();

        let repo = Repository::new(pool_with(db));
        let result = repo.mark_asset_saved(asset.id).await.unwrap();
        assert!(result.saved);
    }
}
