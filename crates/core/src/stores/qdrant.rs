use crate::error::StoreError;
use crate::models::{Corpus, Document, DocumentChunk, SearchResult};
use crate::traits::{clamp_similarity, compare_results, ensure_same_tenant, KnowledgeStore};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

const BACKEND: &str = "qdrant";

/// Qdrant over its REST API. Chunks live in a cosine collection; documents in
/// a companion payload collection with a one-dimensional placeholder vector.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn documents_collection(&self) -> String {
        format!("{}_documents", self.collection)
    }

    fn collection_url(&self, collection: &str, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, collection, suffix)
    }

    pub async fn ensure_collections(&self) -> Result<(), StoreError> {
        let chunks = self.collection.clone();
        let documents = self.documents_collection();

        for (name, size) in [(chunks.as_str(), self.vector_size), (documents.as_str(), 1)] {
            let response = self.client.get(self.collection_url(name, "")).send().await?;
            if response.status() == StatusCode::OK {
                continue;
            }
            if response.status() != StatusCode::NOT_FOUND {
                return Err(backend_error(response.status()));
            }

            let response = self
                .client
                .put(self.collection_url(name, ""))
                .json(&json!({ "vectors": { "size": size, "distance": "Cosine" } }))
                .send()
                .await?;
            ensure_success(response).await?;

            for field in ["tenant_id", "corpus", "document_id"] {
                let response = self
                    .client
                    .put(self.collection_url(name, "/index?wait=true"))
                    .json(&json!({ "field_name": field, "field_schema": "keyword" }))
                    .send()
                    .await?;
                ensure_success(response).await?;
            }

            info!(collection = name, vector_size = size, "created qdrant collection");
        }

        Ok(())
    }

    async fn upsert(&self, collection: &str, point: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.collection_url(collection, "/points?wait=true"))
            .json(&json!({ "points": [point] }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn count(&self, collection: &str, tenant_id: &str) -> Result<usize, StoreError> {
        let response = self
            .client
            .post(self.collection_url(collection, "/points/count"))
            .json(&json!({ "filter": tenant_filter(tenant_id, &[]), "exact": true }))
            .send()
            .await?;
        let parsed: Value = ensure_success(response).await?.json().await?;

        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response without result.count".to_string(),
            })
    }

    async fn delete_by_filter(&self, collection: &str, filter: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.collection_url(collection, "/points/delete?wait=true"))
            .json(&json!({ "filter": filter }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    })
}

fn keyword_match(key: &str, value: &str) -> Value {
    json!({ "key": key, "match": { "value": value } })
}

/// Tenant predicate plus any further `must` conditions.
pub fn tenant_filter(tenant_id: &str, extra: &[(&str, &str)]) -> Value {
    let mut must = vec![keyword_match("tenant_id", tenant_id)];
    must.extend(extra.iter().map(|(key, value)| keyword_match(key, value)));
    json!({ "must": must })
}

pub fn search_body(
    tenant_id: &str,
    corpus: Corpus,
    embedding: &[f32],
    k: usize,
    min_similarity: f64,
) -> Value {
    json!({
        "vector": embedding,
        "limit": k,
        "with_payload": true,
        "score_threshold": min_similarity,
        "filter": tenant_filter(tenant_id, &[("corpus", corpus.as_str())]),
    })
}

pub fn parse_search_hits(body: &Value, min_similarity: f64, query_variant: &str) -> Vec<SearchResult> {
    let hits = body
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let text_at = |hit: &Value, pointer: &str| {
        hit.pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut results = Vec::new();
    for hit in hits {
        let chunk_id = match hit.pointer("/id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => continue,
        };
        let similarity = clamp_similarity(hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0));
        if similarity < min_similarity {
            continue;
        }

        results.push(SearchResult {
            chunk_id,
            document_id: text_at(&hit, "/payload/document_id"),
            chunk_text: text_at(&hit, "/payload/chunk_text"),
            title: text_at(&hit, "/payload/title"),
            similarity,
            query_variant: query_variant.to_string(),
        });
    }

    results.sort_by(compare_results);
    results
}

#[async_trait]
impl KnowledgeStore for QdrantStore {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let point = json!({
            "id": document.id,
            "vector": [1.0],
            "payload": {
                "tenant_id": document.tenant_id,
                "document_id": document.id,
                "corpus": document.corpus.as_str(),
                "title": document.title,
                "source_uri": document.source_uri,
                "created_at": document.created_at.to_rfc3339(),
            },
        });
        self.upsert(&self.documents_collection(), point).await
    }

    async fn insert_chunk(&self, document: &Document, chunk: &DocumentChunk) -> Result<(), StoreError> {
        ensure_same_tenant(document, chunk)?;
        if chunk.embedding.len() != self.vector_size {
            return Err(StoreError::Dimension {
                expected: self.vector_size,
                actual: chunk.embedding.len(),
            });
        }

        let point = json!({
            "id": chunk.id,
            "vector": chunk.embedding,
            "payload": {
                "tenant_id": chunk.tenant_id,
                "document_id": chunk.document_id,
                "corpus": document.corpus.as_str(),
                "title": document.title,
                "chunk_text": chunk.chunk_text,
                "content_hash": chunk.content_hash,
                "created_at": chunk.created_at.to_rfc3339(),
            },
        });
        self.upsert(&self.collection, point).await
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
        if embedding.len() != self.vector_size {
            return Err(StoreError::Dimension {
                expected: self.vector_size,
                actual: embedding.len(),
            });
        }

        let response = self
            .client
            .post(self.collection_url(&self.collection, "/points/search"))
            .json(&search_body(tenant_id, corpus, embedding, k, min_similarity))
            .send()
            .await?;
        let parsed: Value = ensure_success(response).await?.json().await?;

        let mut results = parse_search_hits(&parsed, min_similarity, query_variant);
        results.truncate(k);
        debug!(tenant_id, corpus = %corpus, hits = results.len(), "qdrant search");
        Ok(results)
    }

    async fn delete_document(&self, tenant_id: &str, document_id: &str) -> Result<(), StoreError> {
        let filter = tenant_filter(tenant_id, &[("document_id", document_id)]);
        self.delete_by_filter(&self.collection, filter.clone()).await?;
        self.delete_by_filter(&self.documents_collection(), filter).await
    }

    async fn document_count(&self, tenant_id: &str) -> Result<usize, StoreError> {
        self.count(&self.documents_collection(), tenant_id).await
    }

    async fn chunk_count(&self, tenant_id: &str) -> Result<usize, StoreError> {
        self.count(&self.collection, tenant_id).await
    }
}
