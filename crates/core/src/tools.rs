//! Tool-calling boundary for the chat orchestration loop.
//!
//! Tool calls arrive as a name plus JSON arguments produced by a model. They
//! are parsed into [`ToolCall`], checked against the [`ToolPolicy`], executed
//! against the tenant in [`TenantContext`] and audited. Execution always yields
//! a JSON value; failures become `{ "error", "tool" }` objects so the loop can
//! keep talking to the user.

use crate::embeddings::Embedder;
use crate::error::{ToolError, ValidationError};
use crate::expansion::QueryExpander;
use crate::ingest::DocumentIngestor;
use crate::models::{Corpus, IngestRequest, SearchOptions, SearchRequest, TenantContext};
use crate::orchestrator::SearchCoordinator;
use crate::rerank::Reranker;
use crate::traits::KnowledgeStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub const SEARCH_KNOWLEDGE: &str = "search_knowledge";
pub const INGEST_DOCUMENT: &str = "ingest_document";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchKnowledgeArgs {
    pub query: String,
    pub corpus: Corpus,
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f64>,
    pub enable_query_expansion: Option<bool>,
    pub rerank: Option<bool>,
}

impl From<SearchKnowledgeArgs> for SearchRequest {
    fn from(args: SearchKnowledgeArgs) -> Self {
        SearchRequest {
            query: args.query,
            corpus: args.corpus,
            top_k: args.top_k,
            options: SearchOptions {
                similarity_threshold: args.similarity_threshold,
                max_context_length: None,
                enable_query_expansion: args.enable_query_expansion,
                rerank: args.rerank,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestDocumentArgs {
    pub corpus: Corpus,
    pub title: String,
    pub content: String,
    pub source_uri: Option<String>,
}

impl From<IngestDocumentArgs> for IngestRequest {
    fn from(args: IngestDocumentArgs) -> Self {
        IngestRequest {
            corpus: args.corpus,
            title: args.title,
            content: args.content,
            source_uri: args.source_uri,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    SearchKnowledge(SearchKnowledgeArgs),
    IngestDocument(IngestDocumentArgs),
}

impl ToolCall {
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ValidationError> {
        if ![SEARCH_KNOWLEDGE, INGEST_DOCUMENT].contains(&name) {
            return Err(ValidationError::UnknownTool(name.to_string()));
        }

        serde_json::from_value(json!({ "name": name, "arguments": arguments })).map_err(|error| {
            ValidationError::ToolArguments {
                tool: name.to_string(),
                details: error.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SearchKnowledge(_) => SEARCH_KNOWLEDGE,
            ToolCall::IngestDocument(_) => INGEST_DOCUMENT,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, ToolCall::IngestDocument(_))
    }
}

/// JSON-schema function descriptions in the chat-completions `tools` shape.
pub fn tool_definitions() -> Vec<Value> {
    let corpus = json!({
        "type": "string",
        "enum": Corpus::ALL.iter().map(Corpus::as_str).collect::<Vec<_>>(),
        "description": "Knowledge base partition to use"
    });

    vec![
        json!({
            "type": "function",
            "function": {
                "name": SEARCH_KNOWLEDGE,
                "description": "Search the tenant knowledge base and return cited passages relevant to the query",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "minLength": 2, "description": "What to look for" },
                        "corpus": corpus,
                        "topK": { "type": "integer", "minimum": 1, "maximum": 50 },
                        "similarityThreshold": { "type": "number", "minimum": 0, "maximum": 1 },
                        "enableQueryExpansion": { "type": "boolean" },
                        "rerank": { "type": "boolean" }
                    },
                    "required": ["query", "corpus"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": INGEST_DOCUMENT,
                "description": "Add a document to the tenant knowledge base",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "corpus": corpus,
                        "title": { "type": "string", "minLength": 1, "maxLength": 500 },
                        "content": { "type": "string", "minLength": 10 },
                        "sourceUri": { "type": "string", "format": "uri" }
                    },
                    "required": ["corpus", "title", "content"]
                }
            }
        }),
    ]
}

/// Read tools are open to every tenant member; write tools need one of
/// `write_roles`.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    pub write_roles: Vec<String>,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            write_roles: ["ADMIN", "INTERNAL", "CLIENT"].map(String::from).to_vec(),
        }
    }
}

impl ToolPolicy {
    pub fn allows(&self, ctx: &TenantContext, call: &ToolCall) -> bool {
        !call.is_write() || self.write_roles.iter().any(|role| ctx.has_role(role))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    ToolExecuted,
    ToolDenied,
    ToolFailed,
}

/// One tool invocation as seen by the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: AuditAction,
    pub tenant_id: String,
    pub actor_id: Option<String>,
    pub tool: String,
    pub request: Value,
    pub response: Value,
    pub at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each event as a structured log line.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let error = event
            .response
            .get("error")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        info!(
            target: "audit",
            action = ?event.action,
            tenant_id = %event.tenant_id,
            actor_id = event.actor_id.as_deref().unwrap_or("-"),
            tool = %event.tool,
            error,
            "tool audit"
        );
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

pub struct KnowledgeTools<S, E: ?Sized, Q, R> {
    search: Arc<SearchCoordinator<S, E, Q, R>>,
    ingestor: Arc<DocumentIngestor<S, E>>,
    policy: ToolPolicy,
    audit: Arc<dyn AuditSink>,
}

impl<S, E, Q, R> KnowledgeTools<S, E, Q, R>
where
    S: KnowledgeStore,
    E: Embedder + ?Sized,
    Q: QueryExpander,
    R: Reranker,
{
    pub fn new(
        search: Arc<SearchCoordinator<S, E, Q, R>>,
        ingestor: Arc<DocumentIngestor<S, E>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            search,
            ingestor,
            policy: ToolPolicy::default(),
            audit,
        }
    }

    pub fn with_policy(mut self, policy: ToolPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Parses, authorizes, runs and audits one tool call.
    pub async fn execute(&self, ctx: &TenantContext, name: &str, arguments: &Value) -> Value {
        let (action, output) = match self.run(ctx, name, arguments).await {
            Ok(output) => (AuditAction::ToolExecuted, output),
            Err(error) => {
                let action = match error {
                    ToolError::Denied { .. } => AuditAction::ToolDenied,
                    _ => AuditAction::ToolFailed,
                };
                warn!(tool = name, error = %error, "tool call failed");
                (action, json!({ "error": error.to_string(), "tool": name }))
            }
        };

        self.audit.record(AuditEvent {
            action,
            tenant_id: ctx.tenant_id.clone(),
            actor_id: ctx.user_id.clone(),
            tool: name.to_string(),
            request: arguments.clone(),
            response: output.clone(),
            at: Utc::now(),
        });
        output
    }

    async fn run(&self, ctx: &TenantContext, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let call = ToolCall::parse(name, arguments)?;
        if !self.policy.allows(ctx, &call) {
            return Err(ToolError::Denied {
                tool: call.name().to_string(),
            });
        }

        match call {
            ToolCall::SearchKnowledge(args) => {
                let response = self
                    .search
                    .search_request(&ctx.tenant_id, &SearchRequest::from(args))
                    .await?;
                Ok(serde_json::to_value(response)?)
            }
            ToolCall::IngestDocument(args) => {
                let receipt = self
                    .ingestor
                    .ingest(&ctx.tenant_id, &IngestRequest::from(args))
                    .await?;
                Ok(serde_json::to_value(receipt)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::expansion::NoExpansion;
    use crate::models::IngestionOptions;
    use crate::rerank::NoRerank;
    use crate::stores::MemoryStore;

    type Tools = KnowledgeTools<MemoryStore, CharacterNgramEmbedder, NoExpansion, NoRerank>;

    fn tools(audit: Arc<MemoryAuditSink>) -> Result<(Tools, Arc<MemoryStore>), ToolError> {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let search = SearchCoordinator::new(store.clone(), embedder.clone(), NoExpansion, NoRerank);
        let ingestor = DocumentIngestor::new(store.clone(), embedder, IngestionOptions::default())?;
        Ok((KnowledgeTools::new(Arc::new(search), Arc::new(ingestor), audit), store))
    }

    fn ingest_args() -> Value {
        json!({
            "corpus": "client_public",
            "title": "Onboarding",
            "content": "New clients receive portal access within one business day of signing."
        })
    }

    #[test]
    fn parse_accepts_known_tools_and_rejects_bad_input() {
        let call = ToolCall::parse(SEARCH_KNOWLEDGE, &json!({ "query": "vpn", "corpus": "internal", "topK": 3 }));
        assert!(matches!(
            call,
            Ok(ToolCall::SearchKnowledge(SearchKnowledgeArgs { top_k: Some(3), .. }))
        ));

        assert!(matches!(
            ToolCall::parse("delete_everything", &json!({})),
            Err(ValidationError::UnknownTool(_))
        ));
        assert!(matches!(
            ToolCall::parse(SEARCH_KNOWLEDGE, &json!({ "query": "vpn", "corpus": "public" })),
            Err(ValidationError::ToolArguments { .. })
        ));
    }

    #[test]
    fn definitions_describe_every_tool() {
        let names: Vec<_> = tool_definitions()
            .iter()
            .filter_map(|tool| tool.pointer("/function/name").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(names, vec![SEARCH_KNOWLEDGE, INGEST_DOCUMENT]);

        let definitions = tool_definitions();
        let corpora = definitions[0].pointer("/function/parameters/properties/corpus/enum");
        assert_eq!(corpora, Some(&json!(["internal", "client_public", "client_private"])));
    }

    #[test]
    fn policy_gates_write_tools_by_role() {
        let policy = ToolPolicy::default();
        let ingest = ToolCall::IngestDocument(IngestDocumentArgs {
            corpus: Corpus::Internal,
            title: "t".to_string(),
            content: "c".to_string(),
            source_uri: None,
        });
        let search = ToolCall::parse(SEARCH_KNOWLEDGE, &json!({ "query": "vpn", "corpus": "internal" }));

        let viewer = TenantContext::new("t").with_roles(["VIEWER"]);
        assert!(!policy.allows(&viewer, &ingest));
        assert!(search.is_ok_and(|call| policy.allows(&viewer, &call)));
        assert!(policy.allows(&TenantContext::new("t").with_roles(["client"]), &ingest));
    }

    #[tokio::test]
    async fn denied_write_is_audited_and_returns_error_object() -> Result<(), ToolError> {
        let audit = Arc::new(MemoryAuditSink::default());
        let (tools, store) = tools(audit.clone())?;
        let ctx = TenantContext::new("tenant-a").with_user("u-1");

        let output = tools.execute(&ctx, INGEST_DOCUMENT, &ingest_args()).await;
        assert_eq!(output["tool"], json!(INGEST_DOCUMENT));
        assert!(output["error"].as_str().is_some_and(|message| message.contains("not permitted")));
        assert_eq!(store.chunk_count("tenant-a").await.map_err(crate::error::IngestError::from)?, 0);

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::ToolDenied);
        assert_eq!(events[0].actor_id.as_deref(), Some("u-1"));
        assert_eq!(events[0].request, ingest_args());
        assert_eq!(events[0].response, output);
        Ok(())
    }

    #[tokio::test]
    async fn ingest_then_search_through_tools() -> Result<(), ToolError> {
        let audit = Arc::new(MemoryAuditSink::default());
        let (tools, _store) = tools(audit.clone())?;
        let admin = TenantContext::new("tenant-a").with_roles(["ADMIN"]);

        let receipt = tools.execute(&admin, INGEST_DOCUMENT, &ingest_args()).await;
        assert_eq!(receipt["chunksCreated"], json!(1));

        let found = tools
            .execute(
                &admin,
                SEARCH_KNOWLEDGE,
                &json!({
                    "query": "New clients receive portal access within one business day of signing.",
                    "corpus": "client_public",
                    "similarityThreshold": 0.5
                }),
            )
            .await;
        assert_eq!(found["citations"][0]["title"], json!("Onboarding"));
        assert_eq!(found["searchMetadata"]["resultsFound"], json!(1));

        let other_tenant = tools
            .execute(
                &TenantContext::new("tenant-b"),
                SEARCH_KNOWLEDGE,
                &json!({ "query": "portal access", "corpus": "client_public", "similarityThreshold": 0.0 }),
            )
            .await;
        assert_eq!(other_tenant["citations"], json!([]));

        let actions: Vec<_> = audit.events().iter().map(|event| event.action).collect();
        assert_eq!(actions, vec![AuditAction::ToolExecuted; 3]);
        Ok(())
    }

    #[test]
    fn tracing_sink_records_failed_and_successful_calls() {
        let sink = TracingAuditSink;
        for response in [json!({ "error": "boom", "tool": SEARCH_KNOWLEDGE }), json!({ "citations": [] })] {
            sink.record(AuditEvent {
                action: AuditAction::ToolFailed,
                tenant_id: "tenant-a".to_string(),
                actor_id: None,
                tool: SEARCH_KNOWLEDGE.to_string(),
                request: json!({ "query": "vpn" }),
                response,
                at: Utc::now(),
            });
        }
    }

    #[tokio::test]
    async fn malformed_arguments_fail_softly()-> Result<(), ToolError> {
        let audit = Arc::new(MemoryAuditSink::default());
        let (tools, _store) = tools(audit.clone())?;

        let output = tools
            .execute(&TenantContext::new("t"), SEARCH_KNOWLEDGE, &json!({ "query": 42 }))
            .await;
        assert!(output["error"].is_string());
        assert_eq!(audit.events()[0].action, AuditAction::ToolFailed);
        Ok(())
    }
}
