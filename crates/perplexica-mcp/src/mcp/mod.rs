//! MCP stdio surface: tool routing over the Perplexica client.
//!
//! One tool per exposed focus mode, plus model listing, health, and the
//! config/status views. Every failure becomes a structured error payload;
//! tools never surface raw protocol errors to the MCP host.

use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use perplexica_client::{config_from_env, PerplexicaClient};
use perplexica_core::{
    ChatModel, EmbeddingModel, FocusMode, OptimizationMode, OutputFormat, PerplexicaConfig,
    SearchRequest,
};

mod envelope;
mod format;

use envelope::{add_envelope_fields, error_obj, error_payload, text_result, tool_result, ErrorCode};

const SCHEMA_VERSION: u64 = 1;

fn now_epoch_s() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn has_env(k: &str) -> bool {
    std::env::var(k).is_ok_and(|v| !v.trim().is_empty())
}

#[derive(Debug)]
struct UsageStats {
    started_at_epoch_s: u64,
    tool_calls: BTreeMap<String, u64>,
}

impl UsageStats {
    fn new(now_epoch_s: u64) -> Self {
        Self {
            started_at_epoch_s: now_epoch_s,
            tool_calls: BTreeMap::new(),
        }
    }
}

/// Shared argument shape for all search tools.
#[derive(Debug, Deserialize, JsonSchema, Default)]
struct SearchArgs {
    /// Search query (required).
    #[serde(default)]
    query: Option<String>,
    /// Chat model provider (e.g. "openai"); only used together with `chat_model`.
    #[serde(default)]
    chat_provider: Option<String>,
    /// Chat model identifier (e.g. "gpt-4o-mini"); only used together with `chat_provider`.
    #[serde(default)]
    chat_model: Option<String>,
    /// Embedding model provider; only used together with `embedding_model`.
    #[serde(default)]
    embedding_provider: Option<String>,
    /// Embedding model identifier; only used together with `embedding_provider`.
    #[serde(default)]
    embedding_model: Option<String>,
    /// Speed/quality tradeoff. Allowed: speed, balanced, quality (default: server config).
    #[serde(default)]
    optimization_mode: Option<String>,
    /// Result rendering. Allowed: json, formatted (default: server config).
    #[serde(default)]
    output_format: Option<String>,
}

#[derive(Clone)]
pub(crate) struct PerplexicaMcp {
    tool_router: RmcpToolRouter<Self>,
    config: Arc<PerplexicaConfig>,
    stats: Arc<Mutex<UsageStats>>,
}

#[tool_router]
impl PerplexicaMcp {
    pub(crate) fn new() -> Result<Self, McpError> {
        let config = config_from_env().map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(Self::with_config(Arc::new(config)))
    }

    fn with_config(config: Arc<PerplexicaConfig>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            config,
            stats: Arc::new(Mutex::new(UsageStats::new(now_epoch_s()))),
        }
    }

    fn stats_lock(&self) -> std::sync::MutexGuard<'_, UsageStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stats_inc_tool(&self, kind: &str) {
        let mut s = self.stats_lock();
        *s.tool_calls.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// A fresh client per call; the connection pool is dropped with it on
    /// every exit path, including cancellation.
    fn scoped_client(&self) -> perplexica_core::Result<PerplexicaClient> {
        PerplexicaClient::new(self.config.clone())
    }

    fn error_result(
        kind: &str,
        t0: Instant,
        code: ErrorCode,
        message: impl ToString,
        hint: impl ToString,
    ) -> CallToolResult {
        let mut payload = serde_json::json!({
            "ok": false,
            "error": error_obj(code, message, hint),
        });
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis() as u64);
        tool_result(payload)
    }

    async fn run_search(
        &self,
        kind: &'static str,
        focus: FocusMode,
        args: SearchArgs,
    ) -> CallToolResult {
        self.stats_inc_tool(kind);
        let t0 = Instant::now();

        let query = args.query.unwrap_or_default().trim().to_string();
        if query.is_empty() {
            return Self::error_result(
                kind,
                t0,
                ErrorCode::InvalidParams,
                "query must be non-empty",
                "Pass a non-empty query string.",
            );
        }

        let optimization = match args
            .optimization_mode
            .as_deref()
            .map(str::parse::<OptimizationMode>)
            .transpose()
        {
            Ok(v) => v,
            Err(e) => {
                return Self::error_result(
                    kind,
                    t0,
                    ErrorCode::InvalidParams,
                    e,
                    "Allowed optimization modes: speed, balanced, quality.",
                )
            }
        };
        let output_format = match args
            .output_format
            .as_deref()
            .map(str::parse::<OutputFormat>)
            .transpose()
        {
            Ok(v) => v.unwrap_or(self.config.default_output_format),
            Err(e) => {
                return Self::error_result(
                    kind,
                    t0,
                    ErrorCode::InvalidParams,
                    e,
                    "Allowed output formats: json, formatted.",
                )
            }
        };

        let mut request = SearchRequest::new(focus, query.clone());
        request.optimization_mode = optimization;
        // Provider and model must both be present to form an override;
        // otherwise the config default applies through the resolver.
        if let (Some(provider), Some(model)) = (args.chat_provider, args.chat_model) {
            request.chat_model = Some(ChatModel::new(provider, model));
        }
        if let (Some(provider), Some(model)) = (args.embedding_provider, args.embedding_model) {
            request.embedding_model = Some(EmbeddingModel::new(provider, model));
        }

        let outcome = match self.scoped_client() {
            Ok(client) => client.search(&request).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => {
                let sources = format::simplify_sources(&response.sources);
                match output_format {
                    OutputFormat::Formatted => {
                        text_result(format::render_text(focus, &response.message, &sources))
                    }
                    OutputFormat::Json => {
                        let mut payload = serde_json::json!({
                            "ok": true,
                            "focus_mode": focus.as_str(),
                            "message": response.message,
                            "sources": sources,
                            "request": {
                                "query": query,
                                "optimization_mode": optimization.map(OptimizationMode::as_str),
                            },
                        });
                        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis() as u64);
                        tool_result(payload)
                    }
                }
            }
            Err(e) => {
                let mut payload = serde_json::json!({
                    "ok": false,
                    "error": error_payload(&e),
                    "request": { "query": query },
                });
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis() as u64);
                tool_result(payload)
            }
        }
    }

    #[tool(description = "AI-powered web search via Perplexica (answer + cited sources)")]
    async fn search_web(
        &self,
        params: Parameters<Option<SearchArgs>>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self
            .run_search("search_web", FocusMode::Web, params.0.unwrap_or_default())
            .await)
    }

    #[tool(description = "Search academic sources (papers, journals) via Perplexica")]
    async fn search_academic(
        &self,
        params: Parameters<Option<SearchArgs>>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self
            .run_search(
                "search_academic",
                FocusMode::Academic,
                params.0.unwrap_or_default(),
            )
            .await)
    }

    #[tool(description = "Search YouTube videos via Perplexica")]
    async fn search_youtube(
        &self,
        params: Parameters<Option<SearchArgs>>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self
            .run_search(
                "search_youtube",
                FocusMode::Youtube,
                params.0.unwrap_or_default(),
            )
            .await)
    }

    #[tool(description = "Search Reddit discussions via Perplexica")]
    async fn search_reddit(
        &self,
        params: Parameters<Option<SearchArgs>>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self
            .run_search(
                "search_reddit",
                FocusMode::Reddit,
                params.0.unwrap_or_default(),
            )
            .await)
    }

    #[tool(description = "Writing help and research via Perplexica's writing-assistant mode")]
    async fn writing_assistant(
        &self,
        params: Parameters<Option<SearchArgs>>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self
            .run_search(
                "writing_assistant",
                FocusMode::Writing,
                params.0.unwrap_or_default(),
            )
            .await)
    }

    #[tool(description = "List chat/embedding providers and models available to the deployment")]
    async fn get_available_models(&self) -> Result<CallToolResult, McpError> {
        self.stats_inc_tool("get_available_models");
        let t0 = Instant::now();

        let outcome = match self.scoped_client() {
            Ok(client) => client.models().await,
            Err(e) => Err(e),
        };
        let mut payload = match outcome {
            Ok(models) => serde_json::json!({ "ok": true, "models": models }),
            Err(e) => serde_json::json!({ "ok": false, "error": error_payload(&e) }),
        };
        add_envelope_fields(&mut payload, "get_available_models", t0.elapsed().as_millis() as u64);
        Ok(tool_result(payload))
    }

    #[tool(description = "Check whether the Perplexica API is reachable and healthy")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        self.stats_inc_tool("health_check");
        let t0 = Instant::now();

        let healthy = match self.scoped_client() {
            Ok(client) => client.health_check().await,
            Err(_) => false,
        };
        let mut payload = serde_json::json!({
            "ok": true,
            "healthy": healthy,
            "message": if healthy {
                "Perplexica API is accessible"
            } else {
                "Perplexica API is not accessible"
            },
        });
        add_envelope_fields(&mut payload, "health_check", t0.elapsed().as_millis() as u64);
        Ok(tool_result(payload))
    }

    #[tool(description = "Report bridge configuration + version (no secrets)")]
    async fn perplexica_meta(&self) -> Result<CallToolResult, McpError> {
        self.stats_inc_tool("perplexica_meta");
        let t0 = Instant::now();

        // Model defaults are reported by provider/identifier only; endpoint
        // credentials never leave the process.
        let chat = self.config.default_chat_model.as_ref().map(|m| {
            serde_json::json!({ "provider": m.provider, "model": m.effective_model() })
        });
        let embedding = self.config.default_embedding_model.as_ref().map(|m| {
            serde_json::json!({ "provider": m.provider, "model": m.effective_model() })
        });

        let (started_at_epoch_s, tool_calls) = {
            let s = self.stats_lock();
            (s.started_at_epoch_s, s.tool_calls.clone())
        };

        let mut payload = serde_json::json!({
            "ok": true,
            "version": env!("CARGO_PKG_VERSION"),
            "base_url": self.config.base_url.as_str(),
            "timeout_s": self.config.timeout.as_secs(),
            "default_optimization_mode": self.config.default_optimization_mode.as_str(),
            "default_output_format": self.config.default_output_format.as_str(),
            "default_chat_model": chat,
            "default_embedding_model": embedding,
            "env": {
                "base_url_set": has_env("PERPLEXICA_BASE_URL"),
                "chat_default_set": has_env("PERPLEXICA_DEFAULT_CHAT_PROVIDER"),
                "embedding_default_set": has_env("PERPLEXICA_DEFAULT_EMBEDDING_PROVIDER"),
                "custom_openai_key_set": has_env("PERPLEXICA_CUSTOM_OPENAI_KEY"),
                "env_file_set": has_env("PERPLEXICA_ENV_FILE"),
            },
            "stats": {
                "started_at_epoch_s": started_at_epoch_s,
                "tool_calls": tool_calls,
            },
        });
        add_envelope_fields(&mut payload, "perplexica_meta", t0.elapsed().as_millis() as u64);
        Ok(tool_result(payload))
    }

    #[tool(description = "Probe the deployment: health plus available models")]
    async fn perplexica_status(&self) -> Result<CallToolResult, McpError> {
        self.stats_inc_tool("perplexica_status");
        let t0 = Instant::now();

        let mut payload = match self.scoped_client() {
            Ok(client) => {
                let healthy = client.health_check().await;
                let models = if healthy {
                    client.models().await.unwrap_or_default()
                } else {
                    serde_json::Map::new()
                };
                serde_json::json!({
                    "ok": true,
                    "status": if healthy { "healthy" } else { "unhealthy" },
                    "base_url": self.config.base_url.as_str(),
                    "available_models": models,
                })
            }
            Err(e) => serde_json::json!({ "ok": false, "error": error_payload(&e) }),
        };
        add_envelope_fields(&mut payload, "perplexica_status", t0.elapsed().as_millis() as u64);
        Ok(tool_result(payload))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for PerplexicaMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Bridge to a Perplexica AI-search deployment. Search tools return an answer plus cited sources; outputs are JSON and schema-versioned unless output_format=\"formatted\"."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub(crate) async fn serve_stdio() -> Result<(), McpError> {
    let svc = PerplexicaMcp::new()?;
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    // Keep the stdio server alive until the client closes.
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use url::Url;

    fn payload_from_call_tool_result(r: &CallToolResult) -> serde_json::Value {
        let s = r
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        serde_json::from_str(&s).expect("tool result should be a JSON string")
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn mcp_for(base: &str) -> PerplexicaMcp {
        let config = PerplexicaConfig {
            base_url: Url::parse(base).unwrap(),
            ..PerplexicaConfig::default()
        };
        PerplexicaMcp::with_config(Arc::new(config))
    }

    fn search_app() -> Router {
        Router::new().route(
            "/api/search",
            post(|| async {
                Json(serde_json::json!({
                    "message": "Paris",
                    "sources": [{
                        "pageContent": "Paris is the capital of France.",
                        "metadata": {"title": "France", "url": "https://example.org/fr"}
                    }]
                }))
            }),
        )
    }

    #[tokio::test]
    async fn search_tool_returns_enveloped_json_payload() {
        let base = serve(search_app()).await;
        let mcp = mcp_for(&base);

        let args = SearchArgs {
            query: Some("capital of France".into()),
            ..SearchArgs::default()
        };
        let result = mcp.run_search("search_web", FocusMode::Web, args).await;
        let payload = payload_from_call_tool_result(&result);
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["kind"], "search_web");
        assert_eq!(payload["schema_version"], SCHEMA_VERSION);
        assert_eq!(payload["message"], "Paris");
        assert_eq!(payload["sources"][0]["title"], "France");
        assert_eq!(payload["sources"][0]["url"], "https://example.org/fr");
        assert_eq!(payload["request"]["query"], "capital of France");
    }

    #[tokio::test]
    async fn search_tool_formatted_output_is_plain_text() {
        let base = serve(search_app()).await;
        let mcp = mcp_for(&base);

        let args = SearchArgs {
            query: Some("capital of France".into()),
            output_format: Some("formatted".into()),
            ..SearchArgs::default()
        };
        let result = mcp.run_search("search_web", FocusMode::Web, args).await;
        let text = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        assert!(text.starts_with("## Web search result"));
        assert!(text.contains("Paris"));
        assert!(text.contains("1. France"));
    }

    #[tokio::test]
    async fn empty_query_is_an_invalid_params_payload() {
        let mcp = mcp_for("http://127.0.0.1:9");
        let result = mcp
            .run_search("search_web", FocusMode::Web, SearchArgs::default())
            .await;
        let payload = payload_from_call_tool_result(&result);
        assert_eq!(payload["ok"], false);
        assert_eq!(payload["error"]["code"], "invalid_params");
        assert_eq!(payload["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn bad_optimization_mode_is_rejected_before_any_network_call() {
        let mcp = mcp_for("http://127.0.0.1:9");
        let args = SearchArgs {
            query: Some("q".into()),
            optimization_mode: Some("ludicrous".into()),
            ..SearchArgs::default()
        };
        let result = mcp.run_search("search_web", FocusMode::Web, args).await;
        let payload = payload_from_call_tool_result(&result);
        assert_eq!(payload["error"]["code"], "invalid_params");
    }

    #[tokio::test]
    async fn upstream_error_becomes_a_user_visible_payload() {
        let app = Router::new().route(
            "/api/search",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "internal error") }),
        );
        let base = serve(app).await;
        let mcp = mcp_for(&base);

        let args = SearchArgs {
            query: Some("q".into()),
            ..SearchArgs::default()
        };
        let result = mcp.run_search("search_web", FocusMode::Web, args).await;
        let payload = payload_from_call_tool_result(&result);
        assert_eq!(payload["ok"], false);
        assert_eq!(payload["error"]["code"], "upstream_status");
        assert_eq!(payload["error"]["status"], 500);
        assert_eq!(payload["error"]["body"], "internal error");
    }

    #[tokio::test]
    async fn meta_reports_config_without_secret_values() {
        let config = PerplexicaConfig {
            default_chat_model: Some(ChatModel {
                provider: "custom_openai".into(),
                model: None,
                name: Some("llama-3".into()),
                custom_openai_base_url: Some("http://localhost:8080/v1".into()),
                custom_openai_key: Some("sk-secret-value".into()),
            }),
            ..PerplexicaConfig::default()
        };
        let mcp = PerplexicaMcp::with_config(Arc::new(config));
        let result = mcp.perplexica_meta().await.unwrap();
        let payload = payload_from_call_tool_result(&result);
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["default_chat_model"]["provider"], "custom_openai");
        assert_eq!(payload["default_chat_model"]["model"], "llama-3");
        assert!(!payload.to_string().contains("sk-secret-value"));
    }

    #[tokio::test]
    async fn meta_counts_tool_calls() {
        let mcp = mcp_for("http://127.0.0.1:9");
        let _ = mcp
            .run_search("search_web", FocusMode::Web, SearchArgs::default())
            .await;
        let result = mcp.perplexica_meta().await.unwrap();
        let payload = payload_from_call_tool_result(&result);
        assert_eq!(payload["stats"]["tool_calls"]["search_web"], 1);
    }

    #[tokio::test]
    async fn health_tool_never_fails_even_when_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mcp = mcp_for(&dead);
        let result = mcp.health_check().await.unwrap();
        let payload = payload_from_call_tool_result(&result);
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["healthy"], false);
    }

    #[tokio::test]
    async fn status_includes_models_when_healthy() {
        let app = Router::new()
            .route(
                "/api/models",
                get(|| async { Json(serde_json::json!({"chatModelProviders": {}})) }),
            );
        let base = serve(app).await;
        let mcp = mcp_for(&base);
        let result = mcp.perplexica_status().await.unwrap();
        let payload = payload_from_call_tool_result(&result);
        assert_eq!(payload["status"], "healthy");
        assert!(payload["available_models"]
            .as_object()
            .unwrap()
            .contains_key("chatModelProviders"));
    }

    #[test]
    fn search_args_tolerate_missing_fields() {
        let args: SearchArgs = serde_json::from_str(r#"{"query": "q"}"#).unwrap();
        assert_eq!(args.query.as_deref(), Some("q"));
        assert!(args.chat_provider.is_none());
        assert!(args.output_format.is_none());
    }
}
