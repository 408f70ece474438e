use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::{AppError, BackendError},
    storage::{
        db::SurrealDbClient,
        document_uri::{content_fingerprint, DocumentUri},
        store::StorageManager,
        types::document_reference::{DocumentReference, IndexingStatus},
    },
    utils::retry::RetryPolicy,
};
use object_store::memory::InMemory;
use retrieval_pipeline::{IndexAck, IndexRecord, Passage, SearchIndex, SearchRequest};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{IngestionCoordinator, IngestionTuning, SubmitOutcome};

const BUCKET: &str = "test-bucket";
const PDF_BYTES: &[u8] = b"%PDF-1.4 Betriebswirtschaft Kapitel 1";

#[derive(Default)]
struct MockIndex {
    responses: Mutex<VecDeque<Result<IndexAck, BackendError>>>,
    written: Mutex<Vec<IndexRecord>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockIndex {
    fn scripted(responses: Vec<Result<IndexAck, BackendError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchIndex for MockIndex {
    async fn write_record(&self, record: &IndexRecord) -> Result<IndexAck, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.responses.lock().await.pop_front().unwrap_or_else(|| {
            Ok(IndexAck {
                operation: Some("operations/import-1".into()),
            })
        });
        if response.is_ok() {
            self.written.lock().await.push(record.clone());
        }
        response
    }

    async fn search(&self, _request: &SearchRequest) -> Result<Vec<Passage>, BackendError> {
        Ok(Vec::new())
    }
}

struct Harness {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    index: Arc<MockIndex>,
    coordinator: Arc<IngestionCoordinator>,
}

fn fast_tuning(index_attempts: usize) -> IngestionTuning {
    IngestionTuning {
        storage_timeout: Duration::from_secs(1),
        storage_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
        index_timeout: Duration::from_millis(200),
        index_retry: RetryPolicy::new(
            index_attempts,
            Duration::from_millis(1),
            Duration::from_millis(2),
        )
        .with_retry_after(Duration::from_secs(11)),
        submission_lease: Duration::from_secs(300),
        max_document_bytes: 1024,
    }
}

async fn harness(index: MockIndex, tuning: IngestionTuning) -> Harness {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("in-memory surrealdb");
    db.ensure_initialized().await.expect("registry schema");
    let db = Arc::new(db);

    let storage = StorageManager::with_backend(Arc::new(InMemory::new()), BUCKET);
    let index = Arc::new(index);
    let coordinator = Arc::new(IngestionCoordinator::new(
        Arc::clone(&db),
        storage.clone(),
        index.clone(),
        tuning,
    ));

    Harness {
        db,
        storage,
        index,
        coordinator,
    }
}

impl Harness {
    async fn put(&self, object: &str, bytes: &[u8]) -> DocumentUri {
        self.storage
            .put(object, Bytes::copy_from_slice(bytes))
            .await
            .expect("put object");
        DocumentUri::new(BUCKET, object)
    }

    async fn registry_entry(&self, bytes: &[u8]) -> DocumentReference {
        DocumentReference::find_by_fingerprint(&self.db, &content_fingerprint(bytes))
            .await
            .expect("registry lookup")
            .expect("registry entry")
    }
}

#[tokio::test]
async fn new_document_is_written_once_and_indexed() {
    let h = harness(MockIndex::default(), fast_tuning(3)).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;

    let outcome = h.coordinator.submit(&uri).await.expect("submit");

    let SubmitOutcome::Accepted(reference) = outcome else {
        panic!("expected accepted, got {outcome:?}");
    };
    assert_eq!(reference.status, IndexingStatus::Indexed);
    assert_eq!(reference.operation.as_deref(), Some("operations/import-1"));
    assert_eq!(reference.source_uri, "gs://test-bucket/BWS.pdf");
    assert_eq!(h.index.calls(), 1);

    let written = h.index.written.lock().await;
    assert_eq!(written[0].document_id, reference.backend_document_id());
    assert_eq!(written[0].mime_type, "application/pdf");
}

#[tokio::test]
async fn resubmitting_identical_content_is_duplicate() {
    let h = harness(MockIndex::default(), fast_tuning(3)).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;
    let copy = h.put("2026-10-19_BWS.pdf", PDF_BYTES).await;

    h.coordinator.submit(&uri).await.expect("first submit");
    let again = h.coordinator.submit(&uri).await.expect("second submit");
    let renamed = h.coordinator.submit(&copy).await.expect("copy submit");

    assert!(matches!(again, SubmitOutcome::Duplicate(_)));
    let SubmitOutcome::Duplicate(reference) = renamed else {
        panic!("expected duplicate, got {renamed:?}");
    };
    assert_eq!(reference.status, IndexingStatus::Indexed);
    assert_eq!(
        reference.locations(),
        vec![uri.to_string(), copy.to_string()]
    );
    assert_eq!(h.index.calls(), 1);

    let status = h
        .coordinator
        .status(&copy)
        .await
        .expect("status lookup")
        .expect("copy is known");
    assert_eq!(status.fingerprint, reference.fingerprint);
}

#[tokio::test]
async fn concurrent_submissions_write_exactly_once() {
    let index = MockIndex {
        delay: Some(Duration::from_millis(30)),
        ..MockIndex::default()
    };
    let h = harness(index, fast_tuning(3)).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;

    let (first, second) = tokio::join!(
        {
            let coordinator = Arc::clone(&h.coordinator);
            let uri = uri.clone();
            async move { coordinator.submit(&uri).await }
        },
        {
            let coordinator = Arc::clone(&h.coordinator);
            let uri = uri.clone();
            async move { coordinator.submit(&uri).await }
        }
    );

    let outcomes = [first.expect("first"), second.expect("second")];
    let accepted = outcomes
        .iter()
        .filter(|o| matches!(o, SubmitOutcome::Accepted(_)))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, SubmitOutcome::Duplicate(_)))
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(h.index.calls(), 1);
}

#[tokio::test]
async fn missing_document_is_rejected_without_write() {
    let h = harness(MockIndex::default(), fast_tuning(3)).await;
    let uri = DocumentUri::new(BUCKET, "missing.pdf");

    let outcome = h.coordinator.submit(&uri).await.expect("submit");

    match outcome {
        SubmitOutcome::Rejected { source_uri, .. } => {
            assert_eq!(source_uri, "gs://test-bucket/missing.pdf");
        }
        other => panic!("expected rejected, got {other:?}"),
    }
    assert_eq!(h.index.calls(), 0);
    assert!(h.coordinator.status(&uri).await.expect("status").is_none());
}

#[tokio::test]
async fn oversized_document_fails_validation() {
    let tuning = IngestionTuning {
        max_document_bytes: 8,
        ..fast_tuning(3)
    };
    let h = harness(MockIndex::default(), tuning).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;

    let err = h.coordinator.submit(&uri).await.expect_err("too large");

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.index.calls(), 0);
}

#[tokio::test]
async fn transient_write_failures_are_retried() {
    let index = MockIndex::scripted(vec![
        Err(BackendError::Transient("503 unavailable".into())),
        Err(BackendError::Transient("429 quota".into())),
    ]);
    let h = harness(index, fast_tuning(3)).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;

    let outcome = h.coordinator.submit(&uri).await.expect("submit");

    let SubmitOutcome::Accepted(reference) = outcome else {
        panic!("expected accepted, got {outcome:?}");
    };
    assert_eq!(reference.attempts, 3);
    assert_eq!(reference.status, IndexingStatus::Indexed);
    assert_eq!(h.index.calls(), 3);
}

#[tokio::test]
async fn exhausted_retries_leave_document_pending() {
    let index = MockIndex::scripted(vec![
        Err(BackendError::Transient("503".into())),
        Err(BackendError::Transient("503".into())),
    ]);
    let h = harness(index, fast_tuning(2)).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;

    let err = h.coordinator.submit(&uri).await.expect_err("exhausted");

    match err {
        AppError::TransientIndexing { retry_after, .. } => {
            assert_eq!(retry_after, Duration::from_secs(11));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.index.calls(), 2);

    let entry = h.registry_entry(PDF_BYTES).await;
    assert_eq!(entry.status, IndexingStatus::Pending);
    assert!(entry.claim_token.is_none());

    let retried = h.coordinator.submit(&uri).await.expect("later submit");
    assert!(matches!(retried, SubmitOutcome::Accepted(_)));
}

#[tokio::test]
async fn write_timeouts_count_as_transient() {
    let index = MockIndex {
        delay: Some(Duration::from_millis(500)),
        ..MockIndex::default()
    };
    let h = harness(index, fast_tuning(1)).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;

    let err = h.coordinator.submit(&uri).await.expect_err("timed out");

    assert!(matches!(err, AppError::TransientIndexing { .. }));
    assert_eq!(h.registry_entry(PDF_BYTES).await.status, IndexingStatus::Pending);
}

#[tokio::test]
async fn permanent_failure_marks_failed_and_allows_resubmission() {
    let index = MockIndex::scripted(vec![Err(BackendError::Permanent(
        "400 invalid document".into(),
    ))]);
    let h = harness(index, fast_tuning(3)).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;

    let err = h.coordinator.submit(&uri).await.expect_err("permanent");

    assert!(matches!(err, AppError::PermanentIndexing(_)));
    assert_eq!(h.index.calls(), 1);
    let entry = h.registry_entry(PDF_BYTES).await;
    assert_eq!(entry.status, IndexingStatus::Failed);
    assert_eq!(entry.error_message.as_deref(), Some("400 invalid document"));

    let retried = h.coordinator.submit(&uri).await.expect("resubmit");
    assert!(matches!(retried, SubmitOutcome::Accepted(_)));
    assert_eq!(h.index.calls(), 2);
}

#[tokio::test]
async fn empty_document_is_recorded_as_failed() {
    let h = harness(MockIndex::default(), fast_tuning(3)).await;
    let uri = h.put("empty.pdf", b"").await;

    let err = h.coordinator.submit(&uri).await.expect_err("empty");

    assert!(matches!(err, AppError::PermanentIndexing(_)));
    assert_eq!(h.index.calls(), 0);
    assert_eq!(h.registry_entry(b"").await.status, IndexingStatus::Failed);
}

#[tokio::test]
async fn unsupported_content_type_is_recorded_as_failed() {
    let h = harness(MockIndex::default(), fast_tuning(3)).await;
    let uri = h.put("lecture.bin", b"\x00\x01binary").await;

    let err = h.coordinator.submit(&uri).await.expect_err("unsupported");

    match err {
        AppError::PermanentIndexing(message) => assert!(message.contains("unsupported")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.index.calls(), 0);
}

#[tokio::test]
async fn status_reports_latest_registry_entry() {
    let h = harness(MockIndex::default(), fast_tuning(3)).await;
    let uri = h.put("BWS.pdf", PDF_BYTES).await;

    h.coordinator.submit(&uri).await.expect("submit");
    let status = h.coordinator.status(&uri).await.expect("status");

    assert_eq!(status.map(|r| r.status), Some(IndexingStatus::Indexed));
}
