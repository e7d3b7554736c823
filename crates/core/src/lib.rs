pub mod chunking;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod expansion;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod rerank;
pub mod stores;
pub mod tools;
pub mod traits;

pub use chunking::{content_hash, normalize_whitespace, Chunker, ChunkingConfig, SentenceSplitter};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingConfig, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IngestError, LlmError, SearchError, StoreError, ToolError, ValidationError};
pub use expansion::{LlmQueryExpander, NoExpansion, QueryExpander};
pub use ingest::{discover_text_files, DocumentIngestor, IngestionReport, SkippedFile};
pub use llm::{CompletionConfig, CompletionModel, OpenAiChatModel};
pub use models::{
    Citation, Corpus, Document, DocumentChunk, IngestReceipt, IngestRequest, IngestionOptions,
    RetrievalConfig, SearchMetadata, SearchOptions, SearchRequest, SearchResponse, SearchResult,
    TenantContext,
};
pub use orchestrator::SearchCoordinator;
pub use query::normalize_query;
pub use rerank::{LlmReranker, NoRerank, Reranker};
pub use stores::{MemoryStore, QdrantStore};
pub use tools::{
    tool_definitions, AuditEvent, AuditSink, KnowledgeTools, MemoryAuditSink, ToolCall, ToolPolicy,
    TracingAuditSink,
};
pub use traits::KnowledgeStore;
