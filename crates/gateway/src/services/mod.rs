//! Generation services
//!
//! The handler layer stays thin; these services own the flows that
//! touch providers, storage, and the database together.

pub mod completion;
pub mod orchestrator;
pub mod reconcile;
pub mod usage;
