use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tenant-scoped partition of the knowledge base.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    Internal,
    ClientPublic,
    ClientPrivate,
}

impl Corpus {
    pub const ALL: [Corpus; 3] = [Corpus::Internal, Corpus::ClientPublic, Corpus::ClientPrivate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Corpus::Internal => "internal",
            Corpus::ClientPublic => "client_public",
            Corpus::ClientPrivate => "client_private",
        }
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Corpus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Corpus::ALL
            .into_iter()
            .find(|corpus| corpus.as_str() == value.trim())
            .ok_or_else(|| ValidationError::UnknownCorpus(value.to_string()))
    }
}

/// Ambient per-request scope supplied by the tenant resolver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            roles: Vec::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|owned| owned.eq_ignore_ascii_case(role))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub tenant_id: String,
    pub corpus: Corpus,
    pub title: String,
    pub source_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: String,
    pub tenant_id: String,
    pub document_id: String,
    pub chunk_text: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// One hit produced by executing a single query variant against the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_text: String,
    pub title: String,
    pub similarity: f64,
    pub query_variant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub document_id: String,
    pub title: String,
    pub chunk_id: String,
    pub snippet: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub queries_used: usize,
    pub similarity_threshold: f64,
    pub results_before_filter: usize,
    pub results_found: usize,
    pub average_similarity: Option<f64>,
    pub reranked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub citations: Vec<Citation>,
    pub answer_hints: String,
    pub search_metadata: SearchMetadata,
}

/// Per-request overrides of [`RetrievalConfig`]. `None` keeps the configured default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub similarity_threshold: Option<f64>,
    pub max_context_length: Option<usize>,
    pub enable_query_expansion: Option<bool>,
    pub rerank: Option<bool>,
}

/// Wire shape of the search operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub corpus: Corpus,
    pub top_k: Option<usize>,
    #[serde(flatten)]
    pub options: SearchOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub corpus: Corpus,
    pub title: String,
    pub content: String,
    pub source_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub document_id: String,
    pub title: String,
    pub chunks_created: usize,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub min_chunk_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 800,
            chunk_overlap_chars: 200,
            min_chunk_chars: 50,
        }
    }
}

/// Tuning values for the retrieval pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub similarity_threshold: f64,
    pub max_context_length: usize,
    pub enable_query_expansion: bool,
    pub rerank: bool,
    /// Upper bound on alternative phrasings requested from the expander.
    pub max_expansions: usize,
    /// Normalized queries at or below this length are never expanded.
    pub expansion_min_query_chars: usize,
    /// Candidates fetched per variant (and handed to the reranker) as a multiple of `top_k`.
    pub candidate_multiplier: usize,
    pub snippet_max_chars: usize,
    pub snippet_lead_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            similarity_threshold: 0.70,
            max_context_length: 8_000,
            enable_query_expansion: true,
            rerank: true,
            max_expansions: 2,
            expansion_min_query_chars: 10,
            candidate_multiplier: 2,
            snippet_max_chars: 400,
            snippet_lead_chars: 150,
        }
    }
}

impl RetrievalConfig {
    pub fn with_overrides(&self, options: &SearchOptions) -> Self {
        Self {
            similarity_threshold: options
                .similarity_threshold
                .unwrap_or(self.similarity_threshold),
            max_context_length: options.max_context_length.unwrap_or(self.max_context_length),
            enable_query_expansion: options
                .enable_query_expansion
                .unwrap_or(self.enable_query_expansion),
            rerank: options.rerank.unwrap_or(self.rerank),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corpus_round_trips_through_its_wire_name() {
        for corpus in Corpus::ALL {
            assert_eq!(corpus.as_str().parse::<Corpus>(), Ok(corpus));
        }
        assert_eq!(
            serde_json::to_string(&Corpus::ClientPrivate).unwrap(),
            "\"client_private\""
        );
        assert!("public".parse::<Corpus>().is_err());
    }

    #[test]
    fn overrides_only_replace_provided_fields() {
        let base = RetrievalConfig::default();
        let merged = base.with_overrides(&SearchOptions {
            similarity_threshold: Some(0.5),
            rerank: Some(false),
            ..Default::default()
        });

        assert_eq!(merged.similarity_threshold, 0.5);
        assert!(!merged.rerank);
        assert!(merged.enable_query_expansion);
        assert_eq!(merged.max_context_length, 8_000);
    }

    #[test]
    fn search_request_reads_camel_case_options() {
        let request: SearchRequest = serde_json::from_value(serde_json::json!({
            "query": "vacation policy",
            "corpus": "internal",
            "topK": 3,
            "similarityThreshold": 0.8,
            "enableQueryExpansion": false
        }))
        .unwrap();

        assert_eq!(request.top_k, Some(3));
        assert_eq!(request.options.similarity_threshold, Some(0.8));
        assert_eq!(request.options.enable_query_expansion, Some(false));
        assert_eq!(request.options.rerank, None);
    }

    #[test]
    fn tenant_roles_match_case_insensitively() {
        let ctx = TenantContext::new("t-1").with_roles(["admin"]);
        assert!(ctx.has_role("ADMIN"));
        assert!(!ctx.has_role("CLIENT"));
    }
}
