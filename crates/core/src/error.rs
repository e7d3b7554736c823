use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("field `{field}` is required")]
    Missing { field: &'static str },

    #[error("field `{field}` is out of range: {details}")]
    OutOfRange { field: &'static str, details: String },

    #[error("unknown corpus `{0}` (expected internal, client_public or client_private)")]
    UnknownCorpus(String),

    #[error("invalid source uri: {0}")]
    SourceUri(String),

    #[error("invalid tool arguments for `{tool}`: {details}")]
    ToolArguments { tool: String, details: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("embedding response malformed: {0}")]
    Malformed(String),

    #[error("embedding dimension {actual} does not match expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding provider api key is missing")]
    ApiKeyMissing,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion response malformed: {0}")]
    Malformed(String),

    #[error("completion provider api key is missing")]
    ApiKeyMissing,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("store http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector dimension {actual} does not match collection size {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("chunk {chunk_id} belongs to tenant {chunk_tenant}, document is owned by {document_tenant}")]
    TenantMismatch {
        chunk_id: String,
        chunk_tenant: String,
        document_tenant: String,
    },

    #[error("document not found: {0}")]
    DocumentNotFound(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to embed query variant: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store query failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to embed chunk {index}: {source}")]
    Embedding {
        index: usize,
        #[source]
        source: EmbeddingError,
    },

    #[error("failed to persist document: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("tool `{tool}` is not permitted for this user")]
    Denied { tool: String },

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("failed to encode tool output: {0}")]
    Output(#[from] serde_json::Error),
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
