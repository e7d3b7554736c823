use crate::embeddings::truncate_chars;
use crate::error::LlmError;
use crate::llm::CompletionModel;
use crate::models::SearchResult;
use async_trait::async_trait;
use tracing::debug;

const CANDIDATE_PROMPT_CHARS: usize = 1_000;

const SYSTEM_PROMPT: &str =
    "You rank documents by relevance to a search query. Answer with indices only.";

/// Orders candidates by relevance. Returns a permutation of `0..candidates.len()`,
/// most relevant first. An empty ranking means the order was left alone.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, candidates: &[SearchResult]) -> Result<Vec<usize>, LlmError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRerank;

#[async_trait]
impl Reranker for NoRerank {
    async fn rerank(&self, _query: &str, _candidates: &[SearchResult]) -> Result<Vec<usize>, LlmError> {
        Ok(Vec::new())
    }
}

pub struct LlmReranker<M> {
    model: M,
}

impl<M> LlmReranker<M>
where
    M: CompletionModel,
{
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

fn rerank_prompt(query: &str, candidates: &[SearchResult]) -> String {
    let listing = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            format!(
                "[{index}] {}",
                truncate_chars(&candidate.chunk_text, CANDIDATE_PROMPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Query: {query}\n\n\
         Rank the documents below by how well they answer the query. \
         Respond with only the document indices, comma-separated, most relevant first \
         (for example: 2,0,1).\n\n{listing}"
    )
}

#[async_trait]
impl<M> Reranker for LlmReranker<M>
where
    M: CompletionModel,
{
    async fn rerank(&self, query: &str, candidates: &[SearchResult]) -> Result<Vec<usize>, LlmError> {
        let raw = self
            .model
            .complete(SYSTEM_PROMPT, &rerank_prompt(query, candidates))
            .await?;

        let order = parse_ranking(&raw, candidates.len()).ok_or_else(|| {
            LlmError::Malformed(format!("no usable indices in rerank response {raw:?}"))
        })?;
        debug!(candidates = candidates.len(), "reranked candidates");
        Ok(order)
    }
}

/// Parses a comma-separated index list. Non-numeric, out-of-range and repeated
/// entries are dropped; indices the response omitted are appended in their
/// original order. Returns `None` when no valid index was found.
pub fn parse_ranking(raw: &str, candidate_count: usize) -> Option<Vec<usize>> {
    let indices = raw
        .split(|ch: char| ch == ',' || ch == '\n')
        .map(|token| token.trim().trim_matches(|ch: char| "[](). ".contains(ch)))
        .filter_map(|token| token.parse::<usize>().ok());

    let order = complete_permutation(indices, candidate_count);
    if order.explicit == 0 {
        return None;
    }
    Some(order.indices)
}

pub struct Permutation {
    pub indices: Vec<usize>,
    /// How many leading entries came from the ranking rather than the backfill.
    pub explicit: usize,
}

/// Keeps the first occurrence of each in-range index and backfills the rest.
pub fn complete_permutation<I>(ranked: I, candidate_count: usize) -> Permutation
where
    I: IntoIterator<Item = usize>,
{
    let mut seen = vec![false; candidate_count];
    let mut indices = Vec::with_capacity(candidate_count);

    for index in ranked {
        if index < candidate_count && !seen[index] {
            seen[index] = true;
            indices.push(index);
        }
    }

    let explicit = indices.len();
    indices.extend((0..candidate_count).filter(|index| !seen[*index]));

    Permutation { indices, explicit }
}
