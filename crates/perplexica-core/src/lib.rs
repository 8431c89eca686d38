//! Wire types and request plumbing for a Perplexica deployment.
//!
//! Everything here is I/O-free: the parameter model, the default resolver
//! (config defaults never override caller-set fields), the wire normalizer
//! (Perplexica's field-aliasing quirks), and the error taxonomy shared by the
//! client and the MCP surface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    /// Connection could not be established or was lost before a response.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The service answered with a non-2xx status.
    #[error("upstream HTTP {status}: {body}")]
    Protocol { status: u16, body: String },
    /// A 2xx body that does not parse as the expected structure.
    #[error("decode failure: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Search domain/strategy the service should use.
///
/// Serialized with Perplexica's wire spellings (`webSearch`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusMode {
    #[serde(rename = "webSearch")]
    Web,
    #[serde(rename = "academicSearch")]
    Academic,
    #[serde(rename = "writingAssistant")]
    Writing,
    #[serde(rename = "wolframAlphaSearch")]
    WolframAlpha,
    #[serde(rename = "youtubeSearch")]
    Youtube,
    #[serde(rename = "redditSearch")]
    Reddit,
}

impl FocusMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "webSearch",
            Self::Academic => "academicSearch",
            Self::Writing => "writingAssistant",
            Self::WolframAlpha => "wolframAlphaSearch",
            Self::Youtube => "youtubeSearch",
            Self::Reddit => "redditSearch",
        }
    }
}

impl FromStr for FocusMode {
    type Err = Error;

    /// Accepts both wire spellings and short names (`web`, `academic`, ...).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "web" | "webSearch" => Ok(Self::Web),
            "academic" | "academicSearch" => Ok(Self::Academic),
            "writing" | "writingAssistant" => Ok(Self::Writing),
            "wolfram" | "math" | "wolframAlphaSearch" => Ok(Self::WolframAlpha),
            "youtube" | "video" | "youtubeSearch" => Ok(Self::Youtube),
            "reddit" | "redditSearch" => Ok(Self::Reddit),
            other => Err(Error::InvalidRequest(format!(
                "unknown focus mode: {other:?}"
            ))),
        }
    }
}

/// Speed/quality tradeoff hint sent with every search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    Speed,
    #[default]
    Balanced,
    Quality,
}

impl OptimizationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Balanced => "balanced",
            Self::Quality => "quality",
        }
    }
}

impl FromStr for OptimizationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "speed" => Ok(Self::Speed),
            "balanced" => Ok(Self::Balanced),
            "quality" => Ok(Self::Quality),
            other => Err(Error::InvalidRequest(format!(
                "unknown optimization mode: {other:?} (allowed: speed, balanced, quality)"
            ))),
        }
    }
}

/// How tool results are rendered back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Formatted,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Formatted => "formatted",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "json" => Ok(Self::Json),
            "formatted" => Ok(Self::Formatted),
            other => Err(Error::InvalidRequest(format!(
                "unknown output format: {other:?} (allowed: json, formatted)"
            ))),
        }
    }
}

/// Chat model selection.
///
/// Perplexica deployments disagree on whether the model identifier lives in
/// `model` or `name`; we keep both and reconcile at send time (see
/// [`ChatModel::normalized`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatModel {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Only meaningful when `provider == "custom_openai"`.
    #[serde(
        rename = "customOpenAIBaseURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_openai_base_url: Option<String>,
    #[serde(
        rename = "customOpenAIKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_openai_key: Option<String>,
}

impl ChatModel {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: None,
            name: Some(name.into()),
            custom_openai_base_url: None,
            custom_openai_key: None,
        }
    }

    /// `name` if present, else `model`, else empty.
    pub fn effective_model(&self) -> &str {
        self.name
            .as_deref()
            .or(self.model.as_deref())
            .unwrap_or("")
    }

    /// Copy `name` into `model` when `model` is unset. Idempotent; an
    /// explicit `model` is never touched.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        if out.model.is_none() {
            out.model = out.name.clone();
        }
        out
    }
}

/// Embedding model selection. Same `name`/`model` reconciliation as
/// [`ChatModel`], without the custom-endpoint fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EmbeddingModel {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: None,
            name: Some(name.into()),
        }
    }

    pub fn effective_model(&self) -> &str {
        self.name
            .as_deref()
            .or(self.model.as_deref())
            .unwrap_or("")
    }

    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        if out.model.is_none() {
            out.model = out.name.clone();
        }
        out
    }
}

/// One `/api/search` request. Absent optional fields are omitted from the
/// JSON body entirely (never sent as null).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub focus_mode: FocusMode,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<ChatModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<EmbeddingModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_mode: Option<OptimizationMode>,
    /// Ordered `(role, message)` pairs; serialized as two-element arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<(String, String)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl SearchRequest {
    pub fn new(focus_mode: FocusMode, query: impl Into<String>) -> Self {
        Self {
            focus_mode,
            query: query.into(),
            chat_model: None,
            embedding_model: None,
            optimization_mode: None,
            history: None,
            system_instructions: None,
            stream: None,
        }
    }

    /// Merge config defaults into absent fields. A field the caller set is
    /// never overwritten; `None` always means "use the default" (there is no
    /// way to express "explicitly no model" on this wire format).
    pub fn resolve_defaults(&self, config: &PerplexicaConfig) -> Self {
        let mut out = self.clone();
        if out.chat_model.is_none() {
            out.chat_model = config.default_chat_model.clone();
        }
        if out.embedding_model.is_none() {
            out.embedding_model = config.default_embedding_model.clone();
        }
        if out.optimization_mode.is_none() {
            out.optimization_mode = Some(config.default_optimization_mode);
        }
        out
    }

    /// Reshape into what the deployed API accepts: for each model selection
    /// with `name` set and `model` unset, the name is copied into `model`
    /// (deployed Perplexica reads `model`; the documented API reads `name`).
    /// Idempotent.
    pub fn wire_payload(&self) -> Self {
        let mut out = self.clone();
        out.chat_model = out.chat_model.map(|m| m.normalized());
        out.embedding_model = out.embedding_model.map(|m| m.normalized());
        out
    }
}

/// One cited source. `metadata` is an open mapping; "title" and "url" are
/// conventional keys, not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "pageContent", default)]
    pub page_content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Source {
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(|v| v.as_str())
    }

    pub fn url(&self) -> Option<&str> {
        self.metadata.get("url").and_then(|v| v.as_str())
    }
}

/// Buffered (non-streaming) search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub message: String,
    /// Missing on some deployments; decoded as empty rather than probed.
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMessageKind {
    Init,
    Sources,
    Response,
    Done,
    Error,
}

/// One line of a streaming response. The payload shape depends on the tag
/// and is passed through opaquely; in particular `done` and `error` are data,
/// not transport-level terminal signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: StreamMessageKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Process-wide service configuration. Built once at startup and shared
/// read-only (via `Arc`) by every client instance.
#[derive(Debug, Clone)]
pub struct PerplexicaConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub default_chat_model: Option<ChatModel>,
    pub default_embedding_model: Option<EmbeddingModel>,
    pub default_optimization_mode: OptimizationMode,
    pub default_output_format: OutputFormat,
}

impl Default for PerplexicaConfig {
    fn default() -> Self {
        Self {
            // Infallible: static literal.
            base_url: Url::parse("http://localhost:3000").unwrap(),
            timeout: Duration::from_secs(30),
            default_chat_model: None,
            default_embedding_model: None,
            default_optimization_mode: OptimizationMode::Balanced,
            default_output_format: OutputFormat::Json,
        }
    }
}
