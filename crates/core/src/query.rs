use crate::error::ValidationError;
use crate::models::{IngestRequest, SearchRequest};

pub const MIN_QUERY_CHARS: usize = 2;
pub const MAX_TOP_K: usize = 50;
pub const MAX_TITLE_CHARS: usize = 500;
pub const MIN_CONTENT_CHARS: usize = 10;

fn is_allowed(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch.is_whitespace() || "?!.,'-".contains(ch)
}

/// Strips characters outside `[word, whitespace, ?!.,'-]` and collapses
/// whitespace runs to single spaces.
pub fn normalize_query(query: &str) -> String {
    let stripped: String = query.trim().chars().filter(|ch| is_allowed(*ch)).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn validate_search_request(request: &SearchRequest) -> Result<(), ValidationError> {
    if request.query.trim().chars().count() < MIN_QUERY_CHARS {
        return Err(ValidationError::OutOfRange {
            field: "query",
            details: format!("must be at least {MIN_QUERY_CHARS} characters"),
        });
    }

    if let Some(top_k) = request.top_k {
        validate_top_k(top_k)?;
    }

    if let Some(threshold) = request.options.similarity_threshold {
        validate_threshold(threshold)?;
    }

    Ok(())
}

pub fn validate_top_k(top_k: usize) -> Result<(), ValidationError> {
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(ValidationError::OutOfRange {
            field: "topK",
            details: format!("{top_k} is not within 1..={MAX_TOP_K}"),
        });
    }
    Ok(())
}

pub fn validate_threshold(threshold: f64) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ValidationError::OutOfRange {
            field: "similarityThreshold",
            details: format!("{threshold} is not within 0..=1"),
        });
    }
    Ok(())
}

pub fn validate_ingest_request(request: &IngestRequest) -> Result<(), ValidationError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ValidationError::Missing { field: "title" });
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::OutOfRange {
            field: "title",
            details: format!("must be at most {MAX_TITLE_CHARS} characters"),
        });
    }

    if request.content.trim().chars().count() < MIN_CONTENT_CHARS {
        return Err(ValidationError::OutOfRange {
            field: "content",
            details: format!("must be at least {MIN_CONTENT_CHARS} characters"),
        });
    }

    if let Some(uri) = &request.source_uri {
        url::Url::parse(uri).map_err(|error| ValidationError::SourceUri(format!("{uri}: {error}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Corpus, SearchOptions};

    fn search_request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            corpus: Corpus::Internal,
            top_k: None,
            options: SearchOptions::default(),
        }
    }

    #[test]
    fn normalization_collapses_whitespace_and_strips_symbols() {
        assert_eq!(
            normalize_query("  How   do I\treset my <password>?  "),
            "How do I reset my password?"
        );
        assert_eq!(normalize_query("cost: $5 & tax"), "cost 5 tax");
        assert_eq!(normalize_query("o'neil's e-mail, please!"), "o'neil's e-mail, please!");
    }

    #[test]
    fn short_queries_are_rejected() {
        assert!(validate_search_request(&search_request(" a ")).is_err());
        assert!(validate_search_request(&search_request("ok")).is_ok());
    }

    #[test]
    fn top_k_and_threshold_bounds_are_enforced() {
        let mut request = search_request("vacation policy");
        request.top_k = Some(0);
        assert!(validate_search_request(&request).is_err());
        request.top_k = Some(51);
        assert!(validate_search_request(&request).is_err());
        request.top_k = Some(50);
        request.options.similarity_threshold = Some(1.2);
        assert!(validate_search_request(&request).is_err());
        request.options.similarity_threshold = Some(0.0);
        assert!(validate_search_request(&request).is_ok());
    }

    #[test]
    fn ingest_validation_checks_title_content_and_uri() {
        let mut request = IngestRequest {
            corpus: Corpus::ClientPublic,
            title: "Onboarding".to_string(),
            content: "Step one: get a laptop.".to_string(),
            source_uri: Some("https://example.com/onboarding".to_string()),
        };
        assert!(validate_ingest_request(&request).is_ok());

        request.source_uri = Some("not a uri".to_string());
        assert!(matches!(
            validate_ingest_request(&request),
            Err(ValidationError::SourceUri(_))
        ));

        request.source_uri = None;
        request.title = "x".repeat(501);
        assert!(validate_ingest_request(&request).is_err());

        request.title = "Short".to_string();
        request.content = "too short".to_string();
        assert!(validate_ingest_request(&request).is_err());
    }
}
