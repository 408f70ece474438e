pub mod config;
pub mod gcp_auth;
pub mod ingest_limits;
pub mod retry;
