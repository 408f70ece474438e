pub mod analyze;
pub mod events;
pub mod files;
pub mod ingest;
pub mod liveness;
pub mod readiness;
pub mod upload;
