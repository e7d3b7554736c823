use crate::llm::CompletionModel;
use async_trait::async_trait;
use tracing::{debug, warn};

const MIN_EXPANSION_CHARS: usize = 5;
const MAX_EXPANSION_CHARS: usize = 200;

const SYSTEM_PROMPT: &str =
    "You rewrite search queries for a document retrieval system. Answer with plain lines only.";

/// Produces alternative phrasings of a query. Failures are never surfaced:
/// an expander that cannot help returns an empty list.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str, max_variants: usize) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpansion;

#[async_trait]
impl QueryExpander for NoExpansion {
    async fn expand(&self, _query: &str, _max_variants: usize) -> Vec<String> {
        Vec::new()
    }
}

pub struct LlmQueryExpander<M> {
    model: M,
}

impl<M> LlmQueryExpander<M>
where
    M: CompletionModel,
{
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

fn expansion_prompt(query: &str, max_variants: usize) -> String {
    format!(
        "Generate {max_variants} alternative phrasings of the search query below. \
         Keep the same intent but use different vocabulary. \
         Return one alternative per line with no numbering, bullets or commentary.\n\n\
         Query: {query}"
    )
}

#[async_trait]
impl<M> QueryExpander for LlmQueryExpander<M>
where
    M: CompletionModel,
{
    async fn expand(&self, query: &str, max_variants: usize) -> Vec<String> {
        if max_variants == 0 {
            return Vec::new();
        }

        match self
            .model
            .complete(SYSTEM_PROMPT, &expansion_prompt(query, max_variants))
            .await
        {
            Ok(raw) => {
                let variants = parse_expansions(&raw, query, max_variants);
                debug!(count = variants.len(), "query expanded");
                variants
            }
            Err(error) => {
                warn!(%error, "query expansion failed, continuing with the original query");
                Vec::new()
            }
        }
    }
}

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(stripped) = rest.strip_prefix(['.', ')']) {
            return stripped.trim_start();
        }
    }
    trimmed
}

/// Treats the completion as untrusted text: one candidate per line, list
/// markers removed, lengths bounded, duplicates of the original dropped.
pub fn parse_expansions(raw: &str, original: &str, max_variants: usize) -> Vec<String> {
    let original = original.trim().to_lowercase();
    let mut variants: Vec<String> = Vec::new();

    for line in raw.lines() {
        let candidate = strip_list_marker(line.trim()).trim();
        let length = candidate.chars().count();
        if !(MIN_EXPANSION_CHARS..=MAX_EXPANSION_CHARS).contains(&length) {
            continue;
        }

        let lowered = candidate.to_lowercase();
        if lowered == original || variants.iter().any(|seen| seen.to_lowercase() == lowered) {
            continue;
        }

        variants.push(candidate.to_string());
        if variants.len() == max_variants {
            break;
        }
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, LlmError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            self.reply
                .clone()
                .map_err(|_| LlmError::Malformed("scripted failure".to_string()))
        }
    }

    #[test]
    fn lines_are_trimmed_bounded_and_capped() {
        let raw = "  How can I recover my password?  \nok\n\nWays to change a forgotten password\nThird option that should be cut";
        let variants = parse_expansions(raw, "How do I reset my password?", 2);
        assert_eq!(
            variants,
            vec![
                "How can I recover my password?".to_string(),
                "Ways to change a forgotten password".to_string(),
            ]
        );
    }

    #[test]
    fn numbering_and_duplicates_are_removed() {
        let raw = "1. Reset my password\n2) reset MY password\n- How do I reset my password?\n* Password recovery steps";
        let variants = parse_expansions(raw, "how do i reset my password?", 5);
        assert_eq!(
            variants,
            vec!["Reset my password".to_string(), "Password recovery steps".to_string()]
        );
    }

    #[test]
    fn overly_long_lines_are_discarded() {
        let raw = format!("{}\nShort but valid", "x".repeat(201));
        assert_eq!(parse_expansions(&raw, "query", 2), vec!["Short but valid".to_string()]);
    }

    #[tokio::test]
    async fn llm_failure_yields_no_variants() {
        let expander = LlmQueryExpander::new(ScriptedModel::failing());
        assert!(expander.expand("What is the vacation policy?", 2).await.is_empty());
    }

    #[tokio::test]
    async fn prompt_carries_query_and_requested_count() {
        let model = ScriptedModel::replying("Company leave policy details");
        let expander = LlmQueryExpander::new(model);
        let variants = expander.expand("What is the vacation policy?", 2).await;
        assert_eq!(variants, vec!["Company leave policy details".to_string()]);

        let prompts = expander.model.prompts.lock().map(|p| p.clone()).unwrap_or_default();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Generate 2 alternative phrasings"));
        assert!(prompts[0].contains("What is the vacation policy?"));
    }
}
