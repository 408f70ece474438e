use common::{
    error::{AppError, BackendError},
    storage::{
        document_uri::content_fingerprint,
        types::document_reference::{DocumentReference, SubmissionClaim},
    },
    utils::ingest_limits::is_indexable_mime_type,
};
use retrieval_pipeline::IndexRecord;
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use super::{
    context::SubmissionContext,
    state::{Claimed, Fetched, Ready, Resolved, SubmissionMachine, Written},
};

pub enum ClaimStage {
    Owned(SubmissionMachine<(), Claimed>),
    Duplicate(DocumentReference),
}

pub enum WriteStage {
    Indexed(SubmissionMachine<(), Written>, DocumentReference),
    /// Another submitter took over the claim while this one was waiting.
    Superseded(DocumentReference),
}

#[instrument(level = "trace", skip_all, fields(source_uri = %ctx.uri))]
pub async fn resolve(
    machine: SubmissionMachine<(), Ready>,
    ctx: &mut SubmissionContext<'_>,
) -> Result<SubmissionMachine<(), Resolved>, AppError> {
    let metadata = ctx
        .storage
        .resolve_document(ctx.uri, &ctx.tuning.storage_retry, ctx.tuning.storage_timeout)
        .await?;

    if metadata.size_bytes > ctx.tuning.max_document_bytes {
        return Err(AppError::Validation(format!(
            "{} is {} bytes, larger than the {} byte limit",
            ctx.uri, metadata.size_bytes, ctx.tuning.max_document_bytes
        )));
    }

    debug!(
        size_bytes = metadata.size_bytes,
        content_type = %metadata.content_type,
        "document resolved"
    );
    ctx.metadata = Some(metadata);

    machine
        .resolve()
        .map_err(|(_, guard)| map_guard_error("resolve", &guard))
}

#[instrument(level = "trace", skip_all, fields(source_uri = %ctx.uri))]
pub async fn fetch(
    machine: SubmissionMachine<(), Resolved>,
    ctx: &mut SubmissionContext<'_>,
) -> Result<SubmissionMachine<(), Fetched>, AppError> {
    let content = ctx
        .storage
        .fetch_document(ctx.uri, &ctx.tuning.storage_retry, ctx.tuning.storage_timeout)
        .await?;
    let fingerprint = content_fingerprint(&content);

    debug!(bytes = content.len(), %fingerprint, "document content fetched");
    ctx.fingerprint = Some(fingerprint);
    ctx.content = Some(content);

    machine
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))
}

#[instrument(level = "trace", skip_all, fields(source_uri = %ctx.uri))]
pub async fn claim(
    machine: SubmissionMachine<(), Fetched>,
    ctx: &mut SubmissionContext<'_>,
) -> Result<ClaimStage, AppError> {
    let candidate = ctx.candidate()?;

    match DocumentReference::claim_submission(ctx.db, candidate, ctx.tuning.submission_lease)
        .await?
    {
        SubmissionClaim::Claimed(reference) => {
            info!(
                fingerprint = %reference.fingerprint,
                attempt = reference.attempts,
                "submission claimed"
            );
            ctx.claimed = Some(reference);
            machine
                .claim()
                .map(ClaimStage::Owned)
                .map_err(|(_, guard)| map_guard_error("claim", &guard))
        }
        SubmissionClaim::Busy(reference) => {
            info!(
                fingerprint = %reference.fingerprint,
                status = reference.status.as_str(),
                "content already submitted"
            );
            let reference = reference.record_alias(ctx.db, &ctx.uri.to_string()).await?;
            Ok(ClaimStage::Duplicate(reference))
        }
    }
}

/// Writes the index record, retrying transient failures with a fresh claim per attempt.
#[instrument(level = "trace", skip_all, fields(source_uri = %ctx.uri))]
pub async fn write(
    machine: SubmissionMachine<(), Claimed>,
    ctx: &mut SubmissionContext<'_>,
) -> Result<WriteStage, AppError> {
    let mut current = ctx
        .claimed
        .take()
        .ok_or_else(|| AppError::InternalError("claimed reference expected".into()))?;

    if let Err(reason) = check_indexable(ctx) {
        match current.mark_failed(ctx.db, &reason).await {
            Ok(_) | Err(AppError::Validation(_)) => {}
            Err(err) => return Err(err),
        }
        return Err(AppError::PermanentIndexing(reason));
    }

    let record = IndexRecord {
        document_id: current.backend_document_id(),
        source_uri: current.source_uri.clone(),
        fingerprint: current.fingerprint.clone(),
        mime_type: current.content_type.clone(),
    };
    let timeout = ctx.tuning.index_timeout;
    let mut delays = ctx.tuning.index_retry.backoff();

    loop {
        let result = tokio::time::timeout(timeout, ctx.index.write_record(&record))
            .await
            .unwrap_or_else(|_| {
                Err(BackendError::Transient(format!(
                    "index write timed out after {}s",
                    timeout.as_secs()
                )))
            });

        match result {
            Ok(ack) => {
                return match current.mark_indexed(ctx.db, ack.operation).await {
                    Ok(indexed) => machine
                        .write()
                        .map(|machine| WriteStage::Indexed(machine, indexed))
                        .map_err(|(_, guard)| map_guard_error("write", &guard)),
                    Err(AppError::Validation(_)) => superseded(ctx, &current).await,
                    Err(err) => Err(err),
                };
            }
            Err(BackendError::Transient(message)) => {
                match current.release_to_pending(ctx.db, &message).await {
                    Ok(_) => {}
                    Err(AppError::Validation(_)) => return superseded(ctx, &current).await,
                    Err(err) => return Err(err),
                }

                let Some(delay) = delays.next() else {
                    warn!(
                        attempts = current.attempts,
                        error = %message,
                        "indexing attempts exhausted, document left pending"
                    );
                    return Err(AppError::TransientIndexing {
                        message,
                        retry_after: ctx.tuning.index_retry.retry_after,
                    });
                };

                warn!(
                    attempt = current.attempts,
                    error = %message,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient indexing failure"
                );
                tokio::time::sleep(delay).await;

                match DocumentReference::claim_submission(
                    ctx.db,
                    ctx.candidate()?,
                    ctx.tuning.submission_lease,
                )
                .await?
                {
                    SubmissionClaim::Claimed(reference) => current = reference,
                    SubmissionClaim::Busy(reference) => {
                        return Ok(WriteStage::Superseded(reference))
                    }
                }
            }
            Err(err) => {
                let message = err.message().to_string();
                match current.mark_failed(ctx.db, &message).await {
                    Ok(_) | Err(AppError::Validation(_)) => {}
                    Err(err) => return Err(err),
                }
                return Err(AppError::PermanentIndexing(message));
            }
        }
    }
}

fn check_indexable(ctx: &SubmissionContext<'_>) -> Result<(), String> {
    if ctx.content.as_ref().map_or(true, |content| content.is_empty()) {
        return Err(format!("{} is empty", ctx.uri));
    }

    let content_type = ctx
        .metadata
        .as_ref()
        .map_or("application/octet-stream", |meta| meta.content_type.as_str());
    if !is_indexable_mime_type(content_type) {
        return Err(format!("unsupported content type {content_type}"));
    }

    Ok(())
}

async fn superseded(
    ctx: &SubmissionContext<'_>,
    stale: &DocumentReference,
) -> Result<WriteStage, AppError> {
    warn!(fingerprint = %stale.fingerprint, "submission claim lost to another submitter");
    DocumentReference::find_by_fingerprint(ctx.db, &stale.fingerprint)
        .await?
        .map(WriteStage::Superseded)
        .ok_or_else(|| {
            AppError::InternalError(format!("registry entry {} vanished", stale.fingerprint))
        })
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid submission transition during {event}: {guard:?}"
    ))
}
