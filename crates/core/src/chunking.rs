use crate::error::IngestError;
use crate::models::IngestionOptions;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::ops::Range;

/// Stands in for periods that must not be read as sentence terminators.
const PROTECTED_PERIOD: char = '\u{E000}';

const ABBREVIATIONS: &str = r"\b(?:Dr|Mr|Mrs|Ms|Prof|Sr|Jr|St|Inc|Ltd|Co|Corp|vs|e\.g|i\.e)\.";
const LIST_MARKERS: &str = r"(?m)^(?:[ \t]*\d{1,3})\.";
const SENTENCE_BOUNDARY: &str = r"([.!?])\s+(\p{Lu})";

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl From<IngestionOptions> for ChunkingConfig {
    fn from(value: IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
            min_chars: value.min_chunk_chars,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(IngestionOptions::default())
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// SHA-256 of the whitespace-normalized text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits prose on `.`, `!` or `?` followed by whitespace and an uppercase
/// letter, leaving abbreviations and numbered list markers intact.
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    abbreviation_re: Regex,
    list_marker_re: Regex,
    boundary_re: Regex,
}

impl SentenceSplitter {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            abbreviation_re: Regex::new(ABBREVIATIONS)?,
            list_marker_re: Regex::new(LIST_MARKERS)?,
            boundary_re: Regex::new(SENTENCE_BOUNDARY)?,
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let protect = |caps: &regex::Captures<'_>| caps[0].replace('.', &PROTECTED_PERIOD.to_string());
        let protected = self.abbreviation_re.replace_all(text, protect);
        let protected = self.list_marker_re.replace_all(&protected, protect);

        let mut sentences = Vec::new();
        let mut start = 0;
        for caps in self.boundary_re.captures_iter(&protected) {
            let (Some(terminator), Some(next)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            push_sentence(&mut sentences, &protected[start..terminator.end()]);
            start = next.start();
        }
        push_sentence(&mut sentences, &protected[start..]);

        sentences
    }
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let sentence = raw.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.replace(PROTECTED_PERIOD, "."));
    }
}

/// Greedily packs sentences into windows of at most `max_chars` (a lone
/// oversized sentence still gets its own window). Each window after the first
/// starts with the trailing sentences of the previous one whose combined
/// length fits in `overlap_chars`. A short previous window is carried whole.
pub fn group_sentences(sentences: &[String], config: ChunkingConfig) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    let mut start = 0;
    let mut current_len = 0;

    for (index, sentence) in sentences.iter().enumerate() {
        let sentence_len = char_len(sentence);
        let is_empty = index == start;
        let projected = if is_empty {
            sentence_len
        } else {
            current_len + 1 + sentence_len
        };

        if projected > config.max_chars && !is_empty {
            windows.push(start..index);

            let mut overlap_start = index;
            let mut overlap_len = 0;
            while overlap_start > start {
                let candidate = char_len(&sentences[overlap_start - 1]);
                if overlap_len + candidate > config.overlap_chars {
                    break;
                }
                overlap_len += candidate;
                overlap_start -= 1;
            }

            start = overlap_start;
            current_len = joined_len(&sentences[start..index]);
            current_len = if current_len == 0 {
                sentence_len
            } else {
                current_len + 1 + sentence_len
            };
        } else {
            current_len = projected;
        }
    }

    if start < sentences.len() {
        windows.push(start..sentences.len());
    }

    windows
}

fn joined_len(sentences: &[String]) -> usize {
    if sentences.is_empty() {
        return 0;
    }
    sentences.iter().map(|sentence| char_len(sentence)).sum::<usize>() + sentences.len() - 1
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    splitter: SentenceSplitter,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            splitter: SentenceSplitter::new()?,
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if char_len(trimmed) < self.config.min_chars {
            return vec![trimmed.to_string()];
        }

        let sentences = self.splitter.split(trimmed);
        let mut chunks: Vec<String> = group_sentences(&sentences, self.config)
            .into_iter()
            .map(|window| sentences[window].join(" "))
            .filter(|chunk| char_len(chunk) >= self.config.min_chars)
            .collect();

        if chunks.is_empty() {
            chunks.push(trimmed.to_string());
        }

        chunks
    }
}
