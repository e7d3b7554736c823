use crate::error::StoreError;
use crate::models::{Corpus, Document, DocumentChunk, SearchResult};
use async_trait::async_trait;
use std::cmp::Ordering;

/// Persistence and nearest-neighbour retrieval for tenant documents.
///
/// Implementations must restrict `query_top_k` to the given tenant and corpus
/// inside the query itself; results for other tenants are never fetched and
/// filtered afterwards.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError>;

    /// Persists a chunk of `document`. Fails with `TenantMismatch` when the
    /// chunk's tenant differs from the document's.
    async fn insert_chunk(&self, document: &Document, chunk: &DocumentChunk) -> Result<(), StoreError>;

    /// Up to `k` chunks with similarity `>= min_similarity`, ordered by
    /// similarity descending then chunk id ascending. `query_variant` is not
    /// used for matching; it is copied onto each returned result.
    async fn query_top_k(
        &self,
        tenant_id: &str,
        corpus: Corpus,
        embedding: &[f32],
        k: usize,
        min_similarity: f64,
        query_variant: &str,
    ) -> Result<Vec<SearchResult>, StoreError>;

    /// Removes a document and every chunk that references it.
    async fn delete_document(&self, tenant_id: &str, document_id: &str) -> Result<(), StoreError>;

    async fn document_count(&self, tenant_id: &str) -> Result<usize, StoreError>;

    async fn chunk_count(&self, tenant_id: &str) -> Result<usize, StoreError>;
}

/// Similarity descending, then chunk id ascending.
pub fn compare_results(left: &SearchResult, right: &SearchResult) -> Ordering {
    right
        .similarity
        .total_cmp(&left.similarity)
        .then_with(|| left.chunk_id.cmp(&right.chunk_id))
}

pub fn ensure_same_tenant(document: &Document, chunk: &DocumentChunk) -> Result<(), StoreError> {
    if chunk.document_id != document.id {
        return Err(StoreError::DocumentNotFound(chunk.document_id.clone()));
    }
    if chunk.tenant_id != document.tenant_id {
        return Err(StoreError::TenantMismatch {
            chunk_id: chunk.id.clone(),
            chunk_tenant: chunk.tenant_id.clone(),
            document_tenant: document.tenant_id.clone(),
        });
    }
    Ok(())
}

/// Clamps a raw cosine score into `[0, 1]`.
pub fn clamp_similarity(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}
