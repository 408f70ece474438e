use std::time::Duration;

use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Error text SurrealDB reports when a `CREATE` hits an existing record id.
const RECORD_EXISTS_MARKER: &str = "already exists";
/// Error text SurrealDB reports when concurrent writers collide on a record.
const CONFLICT_MARKER: &str = "read or write conflict";

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum IndexingStatus {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Submitting")]
    Submitting,
    #[serde(rename = "Indexed")]
    Indexed,
    #[serde(rename = "Failed")]
    Failed,
}

impl IndexingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexingStatus::Pending => "Pending",
            IndexingStatus::Submitting => "Submitting",
            IndexingStatus::Indexed => "Indexed",
            IndexingStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StatusTransition {
    Submit,
    Acknowledge,
    Release,
    Reject,
}

impl StatusTransition {
    fn as_str(&self) -> &'static str {
        match self {
            StatusTransition::Submit => "submit",
            StatusTransition::Acknowledge => "acknowledge",
            StatusTransition::Release => "release",
            StatusTransition::Reject => "reject",
        }
    }
}

mod lifecycle {
    use super::{state_machine, AppError};

    state_machine! {
        name: IndexingLifecycleMachine,
        initial: Pending,
        states: [Pending, Submitting, Indexed, Failed],
        events {
            submit {
                transition: { from: Pending, to: Submitting }
                transition: { from: Failed, to: Submitting }
            }
            acknowledge {
                transition: { from: Submitting, to: Indexed }
            }
            release {
                transition: { from: Submitting, to: Pending }
            }
            reject {
                transition: { from: Submitting, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> IndexingLifecycleMachine<(), Pending> {
        IndexingLifecycleMachine::new(())
    }

    pub(super) fn submitting() -> Result<IndexingLifecycleMachine<(), Submitting>, AppError> {
        pending()
            .submit()
            .map_err(|_| unreachable_state("Submitting"))
    }

    pub(super) fn failed() -> Result<IndexingLifecycleMachine<(), Failed>, AppError> {
        submitting()?
            .reject()
            .map_err(|_| unreachable_state("Failed"))
    }

    fn unreachable_state(state: &str) -> AppError {
        AppError::InternalError(format!("indexing lifecycle cannot reach {state}"))
    }
}

fn invalid_transition(status: &IndexingStatus, event: StatusTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid indexing transition: {} -> {}",
        status.as_str(),
        event.as_str()
    ))
}

fn compute_next_status(
    status: &IndexingStatus,
    event: StatusTransition,
) -> Result<IndexingStatus, AppError> {
    use lifecycle::*;
    match (status, event) {
        (IndexingStatus::Pending, StatusTransition::Submit) => pending()
            .submit()
            .map(|_| IndexingStatus::Submitting)
            .map_err(|_| invalid_transition(status, event)),
        (IndexingStatus::Failed, StatusTransition::Submit) => failed()?
            .submit()
            .map(|_| IndexingStatus::Submitting)
            .map_err(|_| invalid_transition(status, event)),
        (IndexingStatus::Submitting, StatusTransition::Acknowledge) => submitting()?
            .acknowledge()
            .map(|_| IndexingStatus::Indexed)
            .map_err(|_| invalid_transition(status, event)),
        (IndexingStatus::Submitting, StatusTransition::Release) => submitting()?
            .release()
            .map(|_| IndexingStatus::Pending)
            .map_err(|_| invalid_transition(status, event)),
        (IndexingStatus::Submitting, StatusTransition::Reject) => submitting()?
            .reject()
            .map(|_| IndexingStatus::Failed)
            .map_err(|_| invalid_transition(status, event)),
        _ => Err(invalid_transition(status, event)),
    }
}

fn is_contention(err: &surrealdb::Error) -> bool {
    let message = err.to_string();
    message.contains(RECORD_EXISTS_MARKER) || message.contains(CONFLICT_MARKER)
}

/// Result of trying to take ownership of a document's submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionClaim {
    /// The caller owns the submission and must drive it to a terminal status.
    Claimed(DocumentReference),
    /// Another submission is in flight or already succeeded.
    Busy(DocumentReference),
}

stored_object!(DocumentReference, "document_reference", {
    source_uri: String,
    fingerprint: String,
    status: IndexingStatus,
    content_type: String,
    size_bytes: u64,
    attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    last_transition_at: chrono::DateTime<chrono::Utc>,
    claim_token: Option<String>,
    operation: Option<String>,
    error_message: Option<String>,
    /// Other storage locations holding the same content.
    #[serde(default)]
    aliases: Vec<String>
});

impl DocumentReference {
    /// Registry entry for content that has not been submitted yet. The record id is the fingerprint.
    pub fn new(source_uri: String, fingerprint: String, content_type: String, size_bytes: u64) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: fingerprint.clone(),
            source_uri,
            fingerprint,
            status: IndexingStatus::Pending,
            content_type,
            size_bytes,
            attempts: 0,
            last_transition_at: now,
            claim_token: None,
            operation: None,
            error_message: None,
            aliases: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Every storage location known to hold this content, primary location first.
    pub fn locations(&self) -> Vec<String> {
        let mut locations = vec![self.source_uri.clone()];
        for alias in &self.aliases {
            if !locations.contains(alias) {
                locations.push(alias.clone());
            }
        }
        locations
    }

    /// Identifier the search backend stores this document under.
    pub fn backend_document_id(&self) -> String {
        let prefix: String = self.fingerprint.chars().take(32).collect();
        format!("doc-{prefix}")
    }

    pub async fn find_by_fingerprint(
        db: &SurrealDbClient,
        fingerprint: &str,
    ) -> Result<Option<DocumentReference>, AppError> {
        Ok(db.get_item::<DocumentReference>(fingerprint).await?)
    }

    /// Most recently touched registry entry whose content lives at `location`, either as its
    /// primary location or as an alias.
    pub async fn find_latest_by_location(
        db: &SurrealDbClient,
        location: &str,
    ) -> Result<Option<DocumentReference>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE source_uri = $location OR aliases CONTAINS $location ORDER BY updated_at DESC LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("location", location.to_string()))
            .await?;

        let found: Vec<DocumentReference> = result.take(0)?;
        Ok(found.into_iter().next())
    }

    /// Remembers that `location` holds this entry's content. Leaves the status untouched.
    pub async fn record_alias(
        &self,
        db: &SurrealDbClient,
        location: &str,
    ) -> Result<DocumentReference, AppError> {
        if self.locations().iter().any(|known| known == location) {
            return Ok(self.clone());
        }

        const ALIAS_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET aliases = array::union(aliases ?? [], [$location]),
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(ALIAS_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("location", location.to_string()))
            .bind(("now", SurrealDatetime::from(chrono::Utc::now())))
            .await?;

        let updated: Option<DocumentReference> = result.take(0)?;
        updated.ok_or_else(|| {
            AppError::InternalError(format!("registry entry {} vanished", self.fingerprint))
        })
    }

    /// Take ownership of the submission for `candidate.fingerprint`.
    ///
    /// Creates the record when it does not exist. Existing records are claimable from
    /// `Pending`, `Failed`, or a `Submitting` claim whose lease has expired; anything else,
    /// including losing a write race, yields `Busy`.
    pub async fn claim_submission(
        db: &SurrealDbClient,
        candidate: DocumentReference,
        lease: Duration,
    ) -> Result<SubmissionClaim, AppError> {
        let next = compute_next_status(&IndexingStatus::Pending, StatusTransition::Submit)?;
        let now = chrono::Utc::now();
        let token = Uuid::new_v4().to_string();

        let fresh = DocumentReference {
            status: next,
            attempts: 1,
            last_transition_at: now,
            claim_token: Some(token.clone()),
            created_at: now,
            updated_at: now,
            ..candidate.clone()
        };

        match db.store_item(fresh).await {
            Ok(Some(stored)) => return Ok(SubmissionClaim::Claimed(stored)),
            Ok(None) => {
                return Err(AppError::InternalError(
                    "Registry create returned no record".to_string(),
                ))
            }
            Err(err) if is_contention(&err) => {}
            Err(err) => return Err(err.into()),
        }

        debug_assert!(compute_next_status(&IndexingStatus::Failed, StatusTransition::Submit).is_ok());

        const RECLAIM_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET aliases = array::complement(array::union(aliases ?? [], [source_uri]), [$source_uri]),
                status = $submitting,
                source_uri = $source_uri,
                content_type = $content_type,
                size_bytes = $size_bytes,
                attempts = attempts + 1,
                claim_token = $claim,
                operation = NONE,
                error_message = NONE,
                last_transition_at = $now,
                updated_at = $now
            WHERE status IN $claimable
               OR (
                    status = $submitting
                    AND time::unix($now) - time::unix(last_transition_at) >= $lease_secs
               )
            RETURN *;
        "#;

        let response = db
            .client
            .query(RECLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", candidate.id.clone()))
            .bind(("submitting", IndexingStatus::Submitting.as_str()))
            .bind((
                "claimable",
                vec![IndexingStatus::Pending.as_str(), IndexingStatus::Failed.as_str()],
            ))
            .bind(("source_uri", candidate.source_uri.clone()))
            .bind(("content_type", candidate.content_type.clone()))
            .bind(("size_bytes", candidate.size_bytes))
            .bind(("claim", token))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("lease_secs", i64::try_from(lease.as_secs()).unwrap_or(i64::MAX)))
            .await;

        let claimed: Option<DocumentReference> = match response {
            Ok(mut result) => match result.take(0) {
                Ok(updated) => updated,
                Err(err) if is_contention(&err) => None,
                Err(err) => return Err(err.into()),
            },
            Err(err) if is_contention(&err) => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(claimed) = claimed {
            return Ok(SubmissionClaim::Claimed(claimed));
        }

        let current = Self::find_by_fingerprint(db, &candidate.id)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(format!(
                    "Registry entry {} vanished during claim",
                    candidate.id
                ))
            })?;
        Ok(SubmissionClaim::Busy(current))
    }

    /// Submitting -> Indexed, recording the backend operation if one was reported.
    pub async fn mark_indexed(
        &self,
        db: &SurrealDbClient,
        operation: Option<String>,
    ) -> Result<DocumentReference, AppError> {
        let next = compute_next_status(&self.status, StatusTransition::Acknowledge)?;
        debug_assert_eq!(next, IndexingStatus::Indexed);

        const ACK_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $indexed,
                operation = $operation,
                claim_token = NONE,
                error_message = NONE,
                last_transition_at = $now,
                updated_at = $now
            WHERE status = $submitting AND claim_token = $claim
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(ACK_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("indexed", IndexingStatus::Indexed.as_str()))
            .bind(("submitting", IndexingStatus::Submitting.as_str()))
            .bind(("operation", operation))
            .bind(("claim", self.claim_token.clone().unwrap_or_default()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<DocumentReference> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.status, StatusTransition::Acknowledge))
    }

    /// Submitting -> Pending after a transient failure, so the next attempt can reclaim it.
    pub async fn release_to_pending(
        &self,
        db: &SurrealDbClient,
        error: &str,
    ) -> Result<DocumentReference, AppError> {
        let next = compute_next_status(&self.status, StatusTransition::Release)?;
        self.close_claim(db, next, StatusTransition::Release, error)
            .await
    }

    /// Submitting -> Failed after a permanent failure.
    pub async fn mark_failed(
        &self,
        db: &SurrealDbClient,
        error: &str,
    ) -> Result<DocumentReference, AppError> {
        let next = compute_next_status(&self.status, StatusTransition::Reject)?;
        self.close_claim(db, next, StatusTransition::Reject, error)
            .await
    }

    async fn close_claim(
        &self,
        db: &SurrealDbClient,
        next: IndexingStatus,
        event: StatusTransition,
        error: &str,
    ) -> Result<DocumentReference, AppError> {
        const CLOSE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $next,
                claim_token = NONE,
                error_message = $error,
                last_transition_at = $now,
                updated_at = $now
            WHERE status = $submitting AND claim_token = $claim
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(CLOSE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("next", next.as_str()))
            .bind(("submitting", IndexingStatus::Submitting.as_str()))
            .bind(("error", error.to_string()))
            .bind(("claim", self.claim_token.clone().unwrap_or_default()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<DocumentReference> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.status, event))
    }
}
