//! Prediction entity - tracks an in-flight asynchronous generation job

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Prediction status enum
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Processing,
    Succeeded,
    Failed,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Processing => "processing",
            PredictionStatus::Succeeded => "succeeded",
            PredictionStatus::Failed => "failed",
        }
    }
}

impl From<String> for PredictionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "succeeded" => PredictionStatus::Succeeded,
            "failed" => PredictionStatus::Failed,
            _ => PredictionStatus::Processing,
        }
    }
}

impl From<PredictionStatus> for String {
    fn from(status: PredictionStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "predictions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Provider-side job id
    #[sea_orm(column_type = "Text", unique)]
    pub external_id: String,

    /// Owning session
    pub owner: Uuid,

    /// Job type; currently always "video"
    #[sea_orm(column_type = "Text")]
    pub kind: String,

    /// processing | succeeded | failed
    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text")]
    pub prompt: String,

    /// Resulting asset, set on success
    pub asset_id: Option<Uuid>,

    /// Provider-supplied error, set on failure
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,

    /// Original request parameters needed to reconstruct the final asset
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the prediction status as an enum
    pub fn prediction_status(&self) -> PredictionStatus {
        PredictionStatus::from(self.status.clone())
    }

    /// Check if the prediction is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.prediction_status(),
            PredictionStatus::Succeeded | PredictionStatus::Failed
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::session::Entity",
        from = "Column::Owner",
        to = "super::session::Column::Id"
    )]
    Session,

    #[sea_orm(
        belongs_to = "super::media_asset::Entity",
        from = "Column::AssetId",
        to = "super::media_asset::Column::Id"
    )]
    MediaAsset,
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::media_asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MediaAsset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            PredictionStatus::Processing,
            PredictionStatus::Succeeded,
            PredictionStatus::Failed,
        ] {
            let s = String::from(status.clone());
            assert_eq!(PredictionStatus::from(s), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        let mut model = Model {
            id: Uuid::new_v4(),
            external_id: "r8-abc".to_string(),
            owner: Uuid::new_v4(),
            kind: "video".to_string(),
            status: "processing".to_string(),
            prompt: "a red bicycle".to_string(),
            asset_id: None,
            error: None,
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now().into(),
            updated_at: chrono::Utc::now().into(),
        };
        assert!(!model.is_terminal());

        model.status = "succeeded".to_string();
        assert!(model.is_terminal());

        model.status = "failed".to_string();
        assert!(model.is_terminal());
    }
}
