use adwa_rag_core::{
    CharacterNgramEmbedder, CompletionConfig, Corpus, DocumentIngestor, Embedder, EmbeddingConfig,
    IngestRequest, IngestionOptions, KnowledgeTools, LlmQueryExpander, LlmReranker, OpenAiChatModel,
    OpenAiEmbedder, QdrantStore, RetrievalConfig, SearchCoordinator, SearchOptions, SearchResponse,
    TenantContext, TracingAuditSink,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Coordinator =
    SearchCoordinator<QdrantStore, dyn Embedder, LlmQueryExpander<OpenAiChatModel>, LlmReranker<OpenAiChatModel>>;

#[derive(Parser)]
#[command(name = "adwa-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Tenant every operation is scoped to
    #[arg(long, env = "TENANT_ID")]
    tenant_id: String,

    /// Calling user, recorded in tool audit events
    #[arg(long, env = "USER_ID")]
    user_id: Option<String>,

    /// Roles of the calling user (comma separated)
    #[arg(long, env = "USER_ROLES", value_delimiter = ',')]
    roles: Vec<String>,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection for chunks; documents go to `<name>_documents`
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "knowledge_chunks")]
    qdrant_collection: String,

    /// API key for the OpenAI-compatible provider. Without it a local
    /// trigram embedder is used and expansion and rerank are disabled.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// Chat model used for query expansion and reranking
    #[arg(long, env = "OPENAI_MODEL", default_value = adwa_rag_core::llm::DEFAULT_COMPLETION_MODEL)]
    openai_model: String,

    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = adwa_rag_core::embeddings::DEFAULT_EMBEDDING_MODEL)]
    openai_embedding_model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a single text document.
    Ingest {
        #[arg(long)]
        corpus: Corpus,
        #[arg(long)]
        title: String,
        /// File holding the document body.
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        source_uri: Option<String>,
    },
    /// Ingest every .txt and .md file under a folder, best effort.
    IngestFolder {
        #[arg(long)]
        corpus: Corpus,
        #[arg(long)]
        folder: PathBuf,
    },
    /// Run the retrieval pipeline and print citations with answer hints.
    Search {
        #[arg(long)]
        corpus: Corpus,
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Minimum cosine similarity in [0, 1].
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long, default_value_t = false)]
        no_expansion: bool,
        #[arg(long, default_value_t = false)]
        no_rerank: bool,
        /// Print the raw response as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Execute a tool call the way the chat loop would.
    Tool {
        #[arg(long)]
        name: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        tenant_id = %cli.tenant_id,
        "adwa-rag boot"
    );

    let api_key = cli.openai_api_key.clone().filter(|key| !key.trim().is_empty());
    let embedder: Arc<dyn Embedder> = match &api_key {
        Some(key) => Arc::new(OpenAiEmbedder::new(EmbeddingConfig {
            base_url: cli.openai_base_url.clone(),
            api_key: key.clone(),
            model: cli.openai_embedding_model.clone(),
            ..EmbeddingConfig::default()
        })),
        None => {
            warn!("OPENAI_API_KEY not set; using local trigram embeddings without expansion or rerank");
            Arc::new(CharacterNgramEmbedder::default())
        }
    };

    let store = Arc::new(QdrantStore::new(
        &cli.qdrant_url,
        &cli.qdrant_collection,
        embedder.dimensions(),
    ));
    store.ensure_collections().await?;

    let chat_model = || {
        OpenAiChatModel::new(CompletionConfig {
            base_url: cli.openai_base_url.clone(),
            api_key: api_key.clone().unwrap_or_default(),
            model: cli.openai_model.clone(),
            ..CompletionConfig::default()
        })
    };
    let retrieval = RetrievalConfig {
        enable_query_expansion: api_key.is_some(),
        rerank: api_key.is_some(),
        ..RetrievalConfig::default()
    };
    let coordinator: Arc<Coordinator> = Arc::new(
        SearchCoordinator::new(
            store.clone(),
            embedder.clone(),
            LlmQueryExpander::new(chat_model()),
            LlmReranker::new(chat_model()),
        )
        .with_config(retrieval),
    );
    let ingestor = Arc::new(DocumentIngestor::new(store, embedder, IngestionOptions::default())?);

    match cli.command {
        Command::Ingest {
            corpus,
            title,
            file,
            source_uri,
        } => {
            let content = tokio::fs::read_to_string(&file).await?;
            let receipt = ingestor
                .ingest(
                    &cli.tenant_id,
                    &IngestRequest {
                        corpus,
                        title,
                        content,
                        source_uri,
                    },
                )
                .await?;
            println!(
                "{} chunks ingested for document {} ({})",
                receipt.chunks_created, receipt.document_id, receipt.title
            );
        }
        Command::IngestFolder { corpus, folder } => {
            let report = ingestor.ingest_folder(&cli.tenant_id, corpus, &folder).await?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped_files.len(),
                    folder.display()
                );
            }
            for skipped in &report.skipped_files {
                println!("skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            println!(
                "{} documents, {} chunks ingested at {}",
                report.receipts.len(),
                report.chunks_created(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            corpus,
            query,
            top_k,
            threshold,
            no_expansion,
            no_rerank,
            json,
        } => {
            let options = SearchOptions {
                similarity_threshold: threshold,
                max_context_length: None,
                enable_query_expansion: no_expansion.then_some(false),
                rerank: no_rerank.then_some(false),
            };
            let response = coordinator
                .search(&cli.tenant_id, &query, corpus, top_k, &options)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Command::Tool { name, arguments } => {
            let arguments: serde_json::Value = serde_json::from_str(&arguments)?;
            let mut ctx = TenantContext::new(cli.tenant_id.clone()).with_roles(cli.roles.clone());
            if let Some(user_id) = &cli.user_id {
                ctx = ctx.with_user(user_id.clone());
            }

            let tools = KnowledgeTools::new(coordinator, ingestor, Arc::new(TracingAuditSink));
            let output = tools.execute(&ctx, &name, &arguments).await;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_response(response: &SearchResponse) {
    let metadata = &response.search_metadata;
    println!(
        "queries_used={} threshold={:.2} results={} reranked={}",
        metadata.queries_used, metadata.similarity_threshold, metadata.results_found, metadata.reranked
    );

    for (index, citation) in response.citations.iter().enumerate() {
        println!(
            "[{}] similarity={:.2} title={} document_id={} chunk={}",
            index + 1,
            citation.similarity,
            citation.title,
            citation.document_id,
            citation.chunk_id
        );
        println!("  {}", citation.snippet);
    }

    println!("\n{}", response.answer_hints);
}
