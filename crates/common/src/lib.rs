//! Visual Neurons Common Library
//!
//! Shared code for the Visual Neurons backend including:
//! - Database models and repository pattern
//! - External generation provider gateway
//! - Session-scoped media storage
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Pricing table and metrics

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod masking;
pub mod metrics;
pub mod pricing;
pub mod providers;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Repository;
pub use errors::{AppError, Result};
pub use providers::{Gateway, Provider};
pub use storage::MediaStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Provider tag recorded on user-uploaded assets
pub const UPLOAD_PROVIDER: &str = "local-fs";
