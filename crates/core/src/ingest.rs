use crate::chunking::{content_hash, Chunker, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::{IngestError, ValidationError};
use crate::models::{Corpus, Document, DocumentChunk, IngestReceipt, IngestRequest, IngestionOptions};
use crate::query::validate_ingest_request;
use crate::traits::KnowledgeStore;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// Chunks, embeds and persists documents for one tenant at a time.
///
/// Every chunk is embedded before anything is written, so a provider failure
/// leaves the store untouched. A failed write after the document record exists
/// triggers a best-effort delete of that document.
pub struct DocumentIngestor<S, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    chunker: Chunker,
}

impl<S, E> DocumentIngestor<S, E>
where
    S: KnowledgeStore,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, options: IngestionOptions) -> Result<Self, IngestError> {
        Ok(Self {
            store,
            embedder,
            chunker: Chunker::new(ChunkingConfig::from(options))?,
        })
    }

    pub async fn ingest(&self, tenant_id: &str, request: &IngestRequest) -> Result<IngestReceipt, IngestError> {
        if tenant_id.trim().is_empty() {
            return Err(ValidationError::Missing { field: "tenantId" }.into());
        }
        validate_ingest_request(request)?;

        let title = request.title.trim().to_string();
        let pieces = self.chunker.chunk(&request.content);

        let mut embeddings = Vec::with_capacity(pieces.len());
        for (index, piece) in pieces.iter().enumerate() {
            let embedding = self
                .embedder
                .embed(piece)
                .await
                .map_err(|source| IngestError::Embedding { index, source })?;
            embeddings.push(embedding);
        }

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            corpus: request.corpus,
            title: title.clone(),
            source_uri: request.source_uri.clone(),
            created_at: now,
        };
        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .map(|(chunk_text, embedding)| DocumentChunk {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                document_id: document.id.clone(),
                content_hash: content_hash(&chunk_text),
                chunk_text,
                embedding,
                created_at: now,
            })
            .collect();

        self.store.insert_document(&document).await?;
        if let Err(error) = self.persist_chunks(&document, &chunks).await {
            if let Err(cleanup) = self.store.delete_document(tenant_id, &document.id).await {
                warn!(
                    document_id = %document.id,
                    error = %cleanup,
                    "failed to remove partially ingested document"
                );
            }
            return Err(error);
        }

        info!(
            tenant_id,
            corpus = %request.corpus,
            document_id = %document.id,
            chunks = chunks.len(),
            "document ingested"
        );

        Ok(IngestReceipt {
            document_id: document.id,
            title,
            chunks_created: chunks.len(),
        })
    }

    async fn persist_chunks(&self, document: &Document, chunks: &[DocumentChunk]) -> Result<(), IngestError> {
        for chunk in chunks {
            self.store.insert_chunk(document, chunk).await?;
        }
        Ok(())
    }

    /// Ingests every text file under `folder`, using the file stem as title.
    /// Files that fail are reported instead of aborting the batch.
    pub async fn ingest_folder(
        &self,
        tenant_id: &str,
        corpus: Corpus,
        folder: &Path,
    ) -> Result<IngestionReport, IngestError> {
        let files = discover_text_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no text files found in {}",
                folder.display()
            )));
        }

        let mut report = IngestionReport::default();
        for path in files {
            match self.ingest_file(tenant_id, corpus, &path).await {
                Ok(receipt) => report.receipts.push(receipt),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipped file");
                    report.skipped_files.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn ingest_file(&self, tenant_id: &str, corpus: Corpus, path: &Path) -> Result<IngestReceipt, IngestError> {
        let content = tokio::fs::read_to_string(path).await?;
        let title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| IngestError::InvalidArgument(format!("unusable file name: {}", path.display())))?
            .to_string();

        let request = IngestRequest {
            corpus,
            title,
            content,
            source_uri: None,
        };
        self.ingest(tenant_id, &request).await
    }
}

#[derive(Debug, Default)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub receipts: Vec<IngestReceipt>,
    pub skipped_files: Vec<SkippedFile>,
}

impl IngestionReport {
    pub fn chunks_created(&self) -> usize {
        self.receipts.iter().map(|receipt| receipt.chunks_created).sum()
    }
}

pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)));

        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}
