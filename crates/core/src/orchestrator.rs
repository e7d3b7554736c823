use crate::context::{assemble_context, format_answer_hints, format_no_results, to_citation};
use crate::embeddings::Embedder;
use crate::error::{SearchError, ValidationError};
use crate::expansion::QueryExpander;
use crate::models::{
    Corpus, RetrievalConfig, SearchMetadata, SearchOptions, SearchRequest, SearchResponse, SearchResult,
};
use crate::query::{normalize_query, validate_search_request};
use crate::rerank::{complete_permutation, Reranker};
use crate::traits::{compare_results, KnowledgeStore};
use futures::future::try_join_all;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Retrieval pipeline: normalize, expand, query every variant, merge, rerank,
/// then format citations and context for the chat model.
pub struct SearchCoordinator<S, E: ?Sized, Q, R> {
    store: Arc<S>,
    embedder: Arc<E>,
    expander: Q,
    reranker: R,
    config: RetrievalConfig,
}

impl<S, E, Q, R> SearchCoordinator<S, E, Q, R>
where
    S: KnowledgeStore,
    E: Embedder + ?Sized,
    Q: QueryExpander,
    R: Reranker,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, expander: Q, reranker: R) -> Self {
        Self {
            store,
            embedder,
            expander,
            reranker,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        corpus: Corpus,
        top_k: Option<usize>,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        let request = SearchRequest {
            query: query.to_string(),
            corpus,
            top_k,
            options: options.clone(),
        };
        self.search_request(tenant_id, &request).await
    }

    pub async fn search_request(
        &self,
        tenant_id: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, SearchError> {
        if tenant_id.trim().is_empty() {
            return Err(ValidationError::Missing { field: "tenantId" }.into());
        }
        validate_search_request(request)?;

        let config = self.config.with_overrides(&request.options);
        let top_k = request.top_k.unwrap_or(config.default_top_k);
        let candidate_k = top_k.saturating_mul(config.candidate_multiplier.max(1));

        let normalized = normalize_query(&request.query);
        if normalized.is_empty() {
            return Err(ValidationError::OutOfRange {
                field: "query",
                details: "no searchable characters".to_string(),
            }
            .into());
        }

        let variants = self.query_variants(&normalized, &config).await;
        debug!(tenant_id, corpus = %request.corpus, variants = variants.len(), "running search");

        let lookups = variants.iter().map(|variant| {
            self.lookup(tenant_id, request.corpus, variant, candidate_k, config.similarity_threshold)
        });
        let batches = try_join_all(lookups).await?;

        let merged = merge_variant_results(batches);
        let results_before_filter = merged.len();

        if merged.is_empty() {
            info!(tenant_id, corpus = %request.corpus, "no documents above threshold");
            return Ok(SearchResponse {
                citations: Vec::new(),
                answer_hints: format_no_results(&normalized, request.corpus, config.similarity_threshold),
                search_metadata: SearchMetadata {
                    queries_used: variants.len(),
                    similarity_threshold: config.similarity_threshold,
                    results_before_filter,
                    results_found: 0,
                    average_similarity: None,
                    reranked: false,
                },
            });
        }

        let (mut ranked, reranked) = if config.rerank && merged.len() > 1 {
            self.rerank(&normalized, merged, candidate_k).await
        } else {
            (merged, false)
        };
        ranked.truncate(top_k);

        let citations = ranked
            .iter()
            .map(|result| {
                to_citation(result, &normalized, config.snippet_max_chars, config.snippet_lead_chars)
            })
            .collect();
        let context = assemble_context(&ranked, config.max_context_length);
        let average_similarity =
            ranked.iter().map(|result| result.similarity).sum::<f64>() / ranked.len() as f64;

        info!(
            tenant_id,
            corpus = %request.corpus,
            results = ranked.len(),
            reranked,
            "search completed"
        );

        Ok(SearchResponse {
            citations,
            answer_hints: format_answer_hints(&normalized, &ranked, &context),
            search_metadata: SearchMetadata {
                queries_used: variants.len(),
                similarity_threshold: config.similarity_threshold,
                results_before_filter,
                results_found: ranked.len(),
                average_similarity: Some(average_similarity),
                reranked,
            },
        })
    }

    async fn query_variants(&self, normalized: &str, config: &RetrievalConfig) -> Vec<String> {
        let mut variants = vec![normalized.to_string()];
        if config.enable_query_expansion && normalized.chars().count() > config.expansion_min_query_chars {
            variants.extend(self.expander.expand(normalized, config.max_expansions).await);
        }
        variants
    }

    async fn lookup(
        &self,
        tenant_id: &str,
        corpus: Corpus,
        variant: &str,
        k: usize,
        min_similarity: f64,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let embedding = self.embedder.embed(variant).await?;
        let results = self
            .store
            .query_top_k(tenant_id, corpus, &embedding, k, min_similarity, variant)
            .await?;
        Ok(results)
    }

    /// Reorders the leading `limit` candidates. Any reranker failure keeps the
    /// similarity order.
    async fn rerank(
        &self,
        query: &str,
        mut merged: Vec<SearchResult>,
        limit: usize,
    ) -> (Vec<SearchResult>, bool) {
        merged.truncate(limit);

        let ranking = match self.reranker.rerank(query, &merged).await {
            Ok(ranking) if ranking.is_empty() => return (merged, false),
            Ok(ranking) => ranking,
            Err(error) => {
                warn!(error = %error, "rerank failed; keeping similarity order");
                return (merged, false);
            }
        };

        let order = complete_permutation(ranking, merged.len());
        if order.explicit == 0 {
            warn!("rerank returned no usable indices; keeping similarity order");
            return (merged, false);
        }

        let mut slots: Vec<Option<SearchResult>> = merged.into_iter().map(Some).collect();
        let reordered = order
            .indices
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();
        (reordered, true)
    }
}

/// Deduplicates by chunk id keeping the highest similarity, then sorts.
pub fn merge_variant_results(batches: Vec<Vec<SearchResult>>) -> Vec<SearchResult> {
    let mut best = HashMap::<String, SearchResult>::new();
    for result in batches.into_iter().flatten() {
        match best.entry(result.chunk_id.clone()) {
            Entry::Occupied(mut entry) => {
                if result.similarity > entry.get().similarity {
                    entry.insert(result);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(result);
            }
        }
    }

    let mut merged: Vec<_> = best.into_values().collect();
    merged.sort_by(compare_results);
    merged
}
