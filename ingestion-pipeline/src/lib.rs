#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod event;
pub mod pipeline;

pub use event::{decode_event, DecodedEvent, StorageEvent};
pub use pipeline::{IngestionCoordinator, IngestionTuning, SubmitOutcome};
