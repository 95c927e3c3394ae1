//! Parallel bulk indexing of one batch

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use super::{DocumentFailure, IndexClient, IndexError, ItemFailure};
use crate::logging::Timer;
use crate::models::{DocumentId, IndexableDocument};

/// Statistics of a fully indexed batch, for logging only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkStats {
    /// Documents written
    pub flushed: usize,
    /// Request body bytes sent
    pub bytes: u64,
    /// Bulk requests issued
    pub requests: usize,
    pub duration: Duration,
}

/// Writes a batch of documents through a bounded pool of bulk requests
///
/// Documents carry their own identifiers and are independent upserts, so
/// chunks are written in any order. The call returns only once every chunk
/// finished or failed.
#[derive(Clone)]
pub struct BatchIndexer {
    client: Arc<dyn IndexClient>,
    workers: usize,
    flush_bytes: usize,
}

impl BatchIndexer {
    /// Create an indexer using at most `max_workers` concurrent requests
    pub fn new(client: Arc<dyn IndexClient>, max_workers: usize, flush_bytes: usize) -> Self {
        Self {
            client,
            workers: worker_count(max_workers),
            flush_bytes: flush_bytes.max(1),
        }
    }

    /// Size of the worker pool
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Upsert all documents
    ///
    /// Fails with `PartialFailure` if any document was not written, even if
    /// all others were. Fails with `Transport` if no request got through.
    pub async fn index_batch(
        &self,
        documents: Vec<IndexableDocument>,
    ) -> Result<BulkStats, IndexError> {
        if documents.is_empty() {
            return Ok(BulkStats::default());
        }

        let timer = Timer::start("bulk_index");
        let total = documents.len();
        let chunks = plan_chunks(documents, self.workers, self.flush_bytes);
        let requests = chunks.len();

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for chunk in chunks {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = client.bulk_upsert(&chunk).await;
                (chunk, outcome)
            });
        }

        let mut stats = BulkStats {
            requests,
            ..BulkStats::default()
        };
        let mut failed = Vec::new();
        let mut transport_failures = 0;
        let mut last_transport_error = String::new();

        while let Some(joined) = tasks.join_next().await {
            let (chunk, outcome) = joined
                .map_err(|e| IndexError::Transport(format!("bulk worker failed: {}", e)))?;

            match outcome {
                Ok(response) => {
                    stats.bytes += response.bytes;
                    stats.flushed += chunk.len().saturating_sub(response.failures.len());
                    failed.extend(
                        response
                            .failures
                            .into_iter()
                            .map(|item| resolve_failure(&chunk, item)),
                    );
                },
                Err(e) => {
                    warn!(documents = chunk.len(), error = %e, "Bulk request failed");
                    transport_failures += 1;
                    last_transport_error = e.to_string();
                    failed.extend(chunk.into_iter().map(|document| DocumentFailure {
                        id: document.id,
                        payload: document.payload,
                        reason: last_transport_error.clone(),
                    }));
                },
            }
        }

        stats.duration = timer.stop();

        if transport_failures == requests {
            return Err(IndexError::Transport(last_transport_error));
        }
        if !failed.is_empty() {
            return Err(IndexError::PartialFailure { failed, total });
        }
        Ok(stats)
    }
}

/// Match a rejected item to the document it names
///
/// The reported position is used when it agrees with the reported id,
/// otherwise the id is looked up in the chunk. An item that matches no
/// document still counts as a failure, under the id the index returned.
fn resolve_failure(chunk: &[IndexableDocument], item: ItemFailure) -> DocumentFailure {
    let document = chunk
        .get(item.position)
        .filter(|document| item.id.is_empty() || document.id.as_str() == item.id)
        .or_else(|| chunk.iter().find(|document| document.id.as_str() == item.id));

    match document {
        Some(document) => DocumentFailure {
            id: document.id.clone(),
            payload: document.payload.clone(),
            reason: item.reason,
        },
        None => {
            warn!(
                position = item.position,
                id = %item.id,
                "Rejected item matches no document of the request"
            );
            DocumentFailure {
                id: DocumentId::from_reported(item.id),
                payload: Vec::new(),
                reason: item.reason,
            }
        },
    }
}

/// min(available parallelism, cap), at least one
fn worker_count(max_workers: usize) -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(max_workers)
        .max(1)
}

/// Spread documents over the workers, splitting chunks that would exceed
/// `flush_bytes`; arrival order is kept within and across chunks
fn plan_chunks(
    documents: Vec<IndexableDocument>,
    workers: usize,
    flush_bytes: usize,
) -> Vec<Vec<IndexableDocument>> {
    let per_chunk = documents.len().div_ceil(workers.max(1));
    let mut chunks = Vec::new();
    let mut current: Vec<IndexableDocument> = Vec::new();
    let mut current_bytes = 0;

    for document in documents {
        let size = document.payload.len() + document.id.as_str().len();
        if !current.is_empty() && (current.len() >= per_chunk || current_bytes + size > flush_bytes)
        {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(document);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BulkResponse, IndexClientError};
    use crate::test_utils::{document_for_tick, MemoryIndexClient};
    use async_trait::async_trait;

    fn documents(n: u32) -> Vec<IndexableDocument> {
        (1..=n).map(document_for_tick).collect()
    }

    /// Answers every request with a fixed list of rejected items
    struct FixedFailuresClient {
        failures: Vec<ItemFailure>,
    }

    #[async_trait]
    impl IndexClient for FixedFailuresClient {
        async fn bulk_upsert(
            &self,
            _documents: &[IndexableDocument],
        ) -> Result<BulkResponse, IndexClientError> {
            Ok(BulkResponse {
                failures: self.failures.clone(),
                bytes: 0,
            })
        }
    }

    fn rejected(position: usize, id: &str) -> ItemFailure {
        ItemFailure {
            position,
            id: id.to_string(),
            reason: "version_conflict_engine_exception".to_string(),
        }
    }

    #[test]
    fn test_worker_count_is_capped() {
        assert_eq!(worker_count(1), 1);
        assert!(worker_count(8) <= 8);
        assert!(worker_count(8) >= 1);
        assert_eq!(worker_count(0), 1);
    }

    #[test]
    fn test_plan_chunks_spreads_over_workers() {
        let chunks = plan_chunks(documents(10), 4, usize::MAX);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_plan_chunks_respects_flush_bytes() {
        let docs = documents(4);
        let one = docs[0].payload.len() + docs[0].id.as_str().len();

        let chunks = plan_chunks(docs, 1, one * 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 2));
    }

    #[test]
    fn test_plan_chunks_keeps_order() {
        let docs = documents(7);
        let ids: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();

        let flattened: Vec<_> = plan_chunks(docs, 3, usize::MAX)
            .into_iter()
            .flatten()
            .map(|d| d.id)
            .collect();
        assert_eq!(flattened, ids);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let client = Arc::new(MemoryIndexClient::new());
        let indexer = BatchIndexer::new(client.clone(), 8, 1024);

        let stats = indexer.index_batch(Vec::new()).await.unwrap();
        assert_eq!(stats, BulkStats::default());
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_index_batch_writes_all_documents() {
        let client = Arc::new(MemoryIndexClient::new());
        let indexer = BatchIndexer::new(client.clone(), 4, 1024 * 1024);

        let stats = indexer.index_batch(documents(25)).await.unwrap();
        assert_eq!(stats.flushed, 25);
        assert_eq!(stats.requests, client.request_count());
        assert!(stats.requests <= 4);
        assert!(stats.bytes > 0);
        assert_eq!(client.document_count(), 25);
    }

    #[tokio::test]
    async fn test_reindexing_is_idempotent() {
        let client = Arc::new(MemoryIndexClient::new());
        let indexer = BatchIndexer::new(client.clone(), 4, 1024 * 1024);

        indexer.index_batch(documents(5)).await.unwrap();
        let once = client.snapshot();

        indexer.index_batch(documents(5)).await.unwrap();
        assert_eq!(client.snapshot(), once);
        assert_eq!(client.document_count(), 5);
    }

    #[tokio::test]
    async fn test_partial_failure_reports_each_document() {
        let client = Arc::new(MemoryIndexClient::new());
        let indexer = BatchIndexer::new(client.clone(), 4, 1024 * 1024);
        let docs = documents(10);
        client.reject_once([docs[2].id.clone(), docs[7].id.clone()]);

        let err = indexer.index_batch(docs.clone()).await.unwrap_err();
        match err {
            IndexError::PartialFailure { failed, total } => {
                assert_eq!(total, 10);
                assert_eq!(failed.len(), 2);
                let mut ids: Vec<_> = failed.iter().map(|f| f.id.clone()).collect();
                ids.sort();
                let mut expected = vec![docs[2].id.clone(), docs[7].id.clone()];
                expected.sort();
                assert_eq!(ids, expected);
                assert!(failed.iter().all(|f| !f.payload.is_empty()));
            },
            other => panic!("unexpected error: {:?}", other),
        }

        // The successful subset is still written
        assert_eq!(client.document_count(), 8);
    }

    #[tokio::test]
    async fn test_all_requests_failing_is_transport_failure() {
        let client = Arc::new(MemoryIndexClient::new());
        let indexer = BatchIndexer::new(client.clone(), 1, 1024 * 1024);
        client.fail_requests(1);

        let err = indexer.index_batch(documents(3)).await.unwrap_err();
        assert!(matches!(err, IndexError::Transport(_)));
        assert_eq!(client.document_count(), 0);
    }

    #[tokio::test]
    async fn test_one_failed_request_is_partial_failure() {
        let client = Arc::new(MemoryIndexClient::new());
        let indexer = BatchIndexer::new(client.clone(), 1, 1);
        client.fail_requests(1);

        // One document per request: one of three requests fails
        let err = indexer.index_batch(documents(3)).await.unwrap_err();
        match err {
            IndexError::PartialFailure { failed, total } => {
                assert_eq!(total, 3);
                assert_eq!(failed.len(), 1);
            },
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(client.document_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_items_resolved_by_id() {
        let docs = documents(3);
        let client = Arc::new(FixedFailuresClient {
            failures: vec![
                // Position past the end of the request
                rejected(7, docs[1].id.as_str()),
                // Position naming a different document
                rejected(0, docs[2].id.as_str()),
            ],
        });
        let indexer = BatchIndexer::new(client, 1, 1024 * 1024);

        let err = indexer.index_batch(docs.clone()).await.unwrap_err();
        match err {
            IndexError::PartialFailure { failed, total } => {
                assert_eq!(total, 3);
                assert_eq!(failed.len(), 2);
                assert_eq!(failed[0].id, docs[1].id);
                assert_eq!(failed[0].payload, docs[1].payload);
                assert_eq!(failed[1].id, docs[2].id);
                assert_eq!(failed[1].payload, docs[2].payload);
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unmatched_rejection_still_fails_batch() {
        let client = Arc::new(FixedFailuresClient {
            failures: vec![rejected(9, "unknown")],
        });
        let indexer = BatchIndexer::new(client, 1, 1024 * 1024);

        let err = indexer.index_batch(documents(3)).await.unwrap_err();
        match err {
            IndexError::PartialFailure { failed, total } => {
                assert_eq!(total, 3);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].id.as_str(), "unknown");
                assert!(failed[0].payload.is_empty());
                assert_eq!(failed[0].reason, "version_conflict_engine_exception");
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
