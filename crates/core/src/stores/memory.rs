use crate::error::StoreError;
use crate::models::{Corpus, Document, DocumentChunk, SearchResult};
use crate::traits::{clamp_similarity, compare_results, ensure_same_tenant, KnowledgeStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Brute-force cosine store, partitioned by tenant.
#[derive(Default)]
pub struct MemoryStore {
    tenants: RwLock<HashMap<String, TenantPartition>>,
}

#[derive(Default)]
struct TenantPartition {
    documents: HashMap<String, Document>,
    chunks: Vec<DocumentChunk>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document(&self, tenant_id: &str, document_id: &str) -> Option<Document> {
        let tenants = self.tenants.read().await;
        tenants
            .get(tenant_id)
            .and_then(|partition| partition.documents.get(document_id))
            .cloned()
    }

    pub async fn chunks_of(&self, tenant_id: &str, document_id: &str) -> Vec<DocumentChunk> {
        let tenants = self.tenants.read().await;
        tenants
            .get(tenant_id)
            .map(|partition| {
                partition
                    .chunks
                    .iter()
                    .filter(|chunk| chunk.document_id == document_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Result<f64, StoreError> {
    if left.len() != right.len() {
        return Err(StoreError::Dimension {
            expected: left.len(),
            actual: right.len(),
        });
    }

    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (left_norm.sqrt() * right_norm.sqrt()))
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().await;
        tenants
            .entry(document.tenant_id.clone())
            .or_default()
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn insert_chunk(&self, document: &Document, chunk: &DocumentChunk) -> Result<(), StoreError> {
        ensure_same_tenant(document, chunk)?;

        let mut tenants = self.tenants.write().await;
        let partition = tenants
            .get_mut(&chunk.tenant_id)
            .filter(|partition| partition.documents.contains_key(&chunk.document_id))
            .ok_or_else(|| StoreError::DocumentNotFound(chunk.document_id.clone()))?;
        partition.chunks.push(chunk.clone());
        Ok(())
    }

    async fn query_top_k(
        &self,
        tenant_id: &str,
        corpus: Corpus,
        embedding: &[f32],
        k: usize,
        min_similarity: f64,
        query_variant: &str,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let tenants = self.tenants.read().await;
        let Some(partition) = tenants.get(tenant_id) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for chunk in &partition.chunks {
            if chunk.embedding.is_empty() {
                continue;
            }
            let Some(document) = partition
                .documents
                .get(&chunk.document_id)
                .filter(|document| document.corpus == corpus)
            else {
                continue;
            };

            let similarity = clamp_similarity(cosine_similarity(embedding, &chunk.embedding)?);
            if similarity < min_similarity {
                continue;
            }

            results.push(SearchResult {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                chunk_text: chunk.chunk_text.clone(),
                title: document.title.clone(),
                similarity,
                query_variant: query_variant.to_string(),
            });
        }

        results.sort_by(compare_results);
        results.truncate(k);
        Ok(results)
    }

    async fn delete_document(&self, tenant_id: &str, document_id: &str) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().await;
        if let Some(partition) = tenants.get_mut(tenant_id) {
            partition.documents.remove(document_id);
            partition.chunks.retain(|chunk| chunk.document_id != document_id);
        }
        Ok(())
    }

    async fn document_count(&self, tenant_id: &str) -> Result<usize, StoreError> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant_id)
            .map(|partition| partition.documents.len())
            .unwrap_or_default())
    }

    async fn chunk_count(&self, tenant_id: &str) -> Result<usize, StoreError> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant_id)
            .map(|partition| partition.chunks.len())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(id: &str, tenant: &str, corpus: Corpus) -> Document {
        Document {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            corpus,
            title: format!("Title {id}"),
            source_uri: None,
            created_at: Utc::now(),
        }
    }

    fn chunk(id: &str, document: &Document, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            tenant_id: document.tenant_id.clone(),
            document_id: document.id.clone(),
            chunk_text: format!("text of {id}"),
            content_hash: String::new(),
            embedding,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cosine_handles_orthogonal_identical_and_zero_vectors() -> Result<(), StoreError> {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0])? - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])?.abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0])?, 0.0);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn query_is_scoped_to_tenant_and_corpus() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let mine = document("d1", "tenant-a", Corpus::Internal);
        let other_corpus = document("d2", "tenant-a", Corpus::ClientPublic);
        let foreign = document("d3", "tenant-b", Corpus::Internal);
        for doc in [&mine, &other_corpus, &foreign] {
            store.insert_document(doc).await?;
        }

        store.insert_chunk(&mine, &chunk("c1", &mine, vec![0.8, 0.6])).await?;
        store.insert_chunk(&other_corpus, &chunk("c2", &other_corpus, vec![1.0, 0.0])).await?;
        store.insert_chunk(&foreign, &chunk("c3", &foreign, vec![1.0, 0.0])).await?;

        let results = store
            .query_top_k("tenant-a", Corpus::Internal, &[1.0, 0.0], 10, 0.0, "q")
            .await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c1");
        assert_eq!(results[0].title, "Title d1");
        assert_eq!(results[0].query_variant, "q");
        assert!((results[0].similarity - 0.8).abs() < 1e-6);
        Ok(())
    }

    #[tokio::test]
    async fn threshold_limit_and_tie_order_are_applied() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let doc = document("d1", "t", Corpus::Internal);
        store.insert_document(&doc).await?;
        store.insert_chunk(&doc, &chunk("c-b", &doc, vec![1.0, 0.0])).await?;
        store.insert_chunk(&doc, &chunk("c-a", &doc, vec![2.0, 0.0])).await?;
        store.insert_chunk(&doc, &chunk("c-low", &doc, vec![0.0, 1.0])).await?;
        store.insert_chunk(&doc, &chunk("c-empty", &doc, Vec::new())).await?;

        let results = store
            .query_top_k("t", Corpus::Internal, &[1.0, 0.0], 5, 0.7, "q")
            .await?;
        let ids: Vec<_> = results.iter().map(|result| result.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c-a", "c-b"]);

        let limited = store
            .query_top_k("t", Corpus::Internal, &[1.0, 0.0], 1, 0.0, "q")
            .await?;
        assert_eq!(limited.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn chunk_of_another_tenant_is_rejected() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let doc = document("d1", "tenant-a", Corpus::Internal);
        store.insert_document(&doc).await?;

        let mut stray = chunk("c1", &doc, vec![1.0]);
        stray.tenant_id = "tenant-b".to_string();
        assert!(matches!(
            store.insert_chunk(&doc, &stray).await,
            Err(StoreError::TenantMismatch { .. })
        ));
        assert_eq!(store.chunk_count("tenant-b").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_document_drops_its_chunks() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let doc = document("d1", "t", Corpus::Internal);
        store.insert_document(&doc).await?;
        store.insert_chunk(&doc, &chunk("c1", &doc, vec![1.0])).await?;
        assert_eq!(store.chunk_count("t").await?, 1);

        store.delete_document("t", "d1").await?;
        assert_eq!(store.chunk_count("t").await?, 0);
        assert_eq!(store.document_count("t").await?, 0);
        assert!(store.document("t", "d1").await.is_none());
        Ok(())
    }
}
