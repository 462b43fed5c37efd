//! SeaORM entity models
//!
//! Database entities for the Visual Neurons backend

mod action;
mod media_asset;
mod prediction;
mod session;

pub use session::{
    Entity as SessionEntity,
    Model as Session,
    ActiveModel as SessionActiveModel,
    Column as SessionColumn,
};

pub use media_asset::{
    Entity as MediaAssetEntity,
    Model as MediaAsset,
    ActiveModel as MediaAssetActiveModel,
    Column as MediaAssetColumn,
    AssetKind,
};

pub use action::{
    Entity as ActionEntity,
    Model as Action,
    ActiveModel as ActionActiveModel,
    Column as ActionColumn,
    ActionKind,
};

pub use prediction::{
    Entity as PredictionEntity,
    Model as Prediction,
    ActiveModel as PredictionActiveModel,
    Column as PredictionColumn,
    PredictionStatus,
};
