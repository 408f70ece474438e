pub mod db;
pub mod document_uri;
pub mod store;
pub mod types;
