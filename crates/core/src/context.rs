//! Turns ranked search results into citations and the hint text handed to the
//! chat model.

use crate::models::{Citation, Corpus, SearchResult};

const ELLIPSIS: &str = "...";
const BLOCK_SEPARATOR: &str = "\n\n---\n\n";
/// Room left unused when a block has to be cut to fit the context budget.
const TRUNCATION_MARGIN: usize = 20;
const MIN_TERM_CHARS: usize = 4;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn query_terms(query: &str) -> Vec<Vec<char>> {
    query
        .split_whitespace()
        .map(|term| term.trim_matches(|ch: char| !ch.is_alphanumeric()))
        .filter(|term| term.chars().count() >= MIN_TERM_CHARS)
        .map(|term| lowercase_chars(term))
        .collect()
}

/// Lowercases char by char so positions line up with the original text.
fn lowercase_chars(text: &str) -> Vec<char> {
    text.chars()
        .map(|ch| ch.to_lowercase().next().unwrap_or(ch))
        .collect()
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// A window of `max_chars` around the earliest query term (longer than three
/// characters) with `lead_chars` of preceding context. Texts that already fit,
/// or contain none of the terms, yield their first `max_chars` characters.
pub fn extract_snippet(text: &str, query: &str, max_chars: usize, lead_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let lowered = lowercase_chars(text);
    let earliest = query_terms(query)
        .iter()
        .filter_map(|term| find_chars(&lowered, term))
        .min();

    let Some(position) = earliest else {
        return chars[..max_chars].iter().collect();
    };

    let start = position.saturating_sub(lead_chars);
    let end = (start + max_chars).min(chars.len());

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// Concatenates `[Source: title]` blocks until `max_chars` would be exceeded.
/// The block that overflows is cut with an ellipsis; the result never exceeds
/// the budget.
pub fn assemble_context(results: &[SearchResult], max_chars: usize) -> String {
    let mut context = String::new();
    let mut used = 0;

    for (index, result) in results.iter().enumerate() {
        let block = format!("[Source: {}]\n{}", result.title, result.chunk_text);
        let piece = if index == 0 {
            block
        } else {
            format!("{BLOCK_SEPARATOR}{block}")
        };
        let piece_len = piece.chars().count();

        if used + piece_len <= max_chars {
            context.push_str(&piece);
            used += piece_len;
            continue;
        }

        let room = max_chars
            .saturating_sub(used)
            .saturating_sub(ELLIPSIS.len() + TRUNCATION_MARGIN);
        if room > 0 {
            context.extend(piece.chars().take(room));
            context.push_str(ELLIPSIS);
        }
        break;
    }

    context
}

pub fn to_citation(result: &SearchResult, query: &str, max_chars: usize, lead_chars: usize) -> Citation {
    Citation {
        document_id: result.document_id.clone(),
        title: result.title.clone(),
        chunk_id: result.chunk_id.clone(),
        snippet: extract_snippet(&result.chunk_text, query, max_chars, lead_chars),
        similarity: round2(result.similarity),
    }
}

pub fn format_answer_hints(query: &str, results: &[SearchResult], context: &str) -> String {
    let sources = results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            format!(
                "{}. {} (similarity: {:.2})",
                index + 1,
                result.title,
                round2(result.similarity)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Search query: \"{query}\"\n\
         Found {count} relevant source(s):\n\
         {sources}\n\n\
         Context:\n\
         {context}\n\n\
         Instructions: answer using the context above and cite the sources by title. \
         If the context does not fully answer the question, say what is missing \
         instead of guessing.",
        count = results.len(),
    )
}

pub fn format_no_results(query: &str, corpus: Corpus, similarity_threshold: f64) -> String {
    format!(
        "No relevant documents found for \"{query}\" in the {corpus} knowledge base \
         (similarity threshold {similarity_threshold:.2}). \
         Tell the user the knowledge base does not cover this topic rather than guessing, \
         and suggest creating a request if they need a follow-up."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, text: &str, similarity: f64) -> SearchResult {
        SearchResult {
            chunk_id: format!("chunk-{title}"),
            document_id: format!("doc-{title}"),
            chunk_text: text.to_string(),
            title: title.to_string(),
            similarity,
            query_variant: "q".to_string(),
        }
    }

    #[test]
    fn short_text_is_returned_unchanged() {
        assert_eq!(extract_snippet("Reset via portal.", "reset password", 400, 150), "Reset via portal.");
    }

    #[test]
    fn snippet_is_centred_on_earliest_term_with_ellipses() {
        let text = format!("{}Password resets happen in the portal.{}", "a".repeat(500), "b".repeat(500));
        let snippet = extract_snippet(&text, "how to reset password?", 400, 150);

        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), 400 + 6);
        let body = snippet.trim_start_matches("...");
        assert_eq!(body.find("Password"), Some(150));
    }

    #[test]
    fn match_near_start_has_no_leading_ellipsis() {
        let text = format!("Intro. The password policy {}", "z".repeat(600));
        let snippet = extract_snippet(&text, "password", 400, 150);
        assert!(snippet.starts_with("Intro."));
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn no_matching_term_yields_leading_window() {
        let text = "q".repeat(1_000);
        let snippet = extract_snippet(&text, "zzqqxx_no_such_term_12345 vpn", 400, 150);
        assert_eq!(snippet, "q".repeat(400));
    }

    #[test]
    fn short_terms_are_ignored() {
        let text = format!("{}the vpn guide", "x".repeat(700));
        assert_eq!(extract_snippet(&text, "the vpn", 400, 150), "x".repeat(400));
    }

    #[test]
    fn context_never_exceeds_budget() {
        let results: Vec<_> = (0..10)
            .map(|index| result(&format!("Doc {index}"), &"lorem ipsum ".repeat(60), 0.9))
            .collect();

        for budget in [0, 10, 100, 750, 2_000, 8_000] {
            let context = assemble_context(&results, budget);
            assert!(context.chars().count() <= budget, "budget {budget} exceeded");
        }

        let context = assemble_context(&results, 2_000);
        assert!(context.starts_with("[Source: Doc 0]\n"));
        assert!(context.contains("\n\n---\n\n[Source: Doc 1]\n"));
        assert!(context.ends_with("..."));
    }

    #[test]
    fn tight_remainder_still_gets_a_cut_block() {
        let first = result("A", &"a".repeat(70), 0.9);
        let second = result("B", &"b".repeat(200), 0.8);
        let first_len = "[Source: A]\n".len() + 70;

        let context = assemble_context(&[first, second], first_len + 60);
        assert!(context.chars().count() <= first_len + 60);
        assert!(context.len() > first_len);
        assert!(context.ends_with("..."));
    }

    #[test]
    fn everything_fits_without_ellipsis() {
        let results = vec![result("A", "alpha text", 0.9), result("B", "beta text", 0.8)];
        assert_eq!(
            assemble_context(&results, 8_000),
            "[Source: A]\nalpha text\n\n---\n\n[Source: B]\nbeta text"
        );
    }

    #[test]
    fn citation_rounds_similarity() {
        let citation = to_citation(&result("A", "alpha", 0.91666), "alpha", 400, 150);
        assert_eq!(citation.similarity, 0.92);
        assert_eq!(citation.document_id, "doc-A");
        assert_eq!(citation.snippet, "alpha");
    }

    #[test]
    fn hints_list_sources_and_instructions() {
        let results = vec![result("Handbook", "text", 0.876), result("Policy", "text", 0.7)];
        let hints = format_answer_hints("leave policy", &results, "CTX");
        assert!(hints.contains("Search query: \"leave policy\""));
        assert!(hints.contains("Found 2 relevant source(s)"));
        assert!(hints.contains("1. Handbook (similarity: 0.88)"));
        assert!(hints.contains("2. Policy (similarity: 0.70)"));
        assert!(hints.contains("Context:\nCTX"));
        assert!(hints.contains("cite the sources"));
    }

    #[test]
    fn no_results_hint_is_explicit() {
        let hint = format_no_results("zzqqxx", Corpus::Internal, 0.7);
        assert!(hint.starts_with("No relevant documents found"));
        assert!(hint.contains("internal"));
        assert!(hint.contains("0.70"));
    }
}
