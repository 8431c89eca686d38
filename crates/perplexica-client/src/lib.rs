//! Async client for a Perplexica deployment.
//!
//! One [`PerplexicaClient`] wraps one `reqwest` connection pool; the pool is
//! released when the client is dropped, on every exit path. Configuration is
//! shared read-only (`Arc<PerplexicaConfig>`) and is never mutated after
//! startup.

mod config;
mod stream;

pub use config::config_from_env;
pub use stream::MessageStream;

use perplexica_core::{Error, PerplexicaConfig, Result, SearchRequest, SearchResponse};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Fixed probe timeout for [`PerplexicaClient::health_check`], independent of
/// the configured request timeout.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PerplexicaClient {
    http: reqwest::Client,
    config: Arc<PerplexicaConfig>,
}

impl PerplexicaClient {
    pub fn new(config: Arc<PerplexicaConfig>) -> Result<Self> {
        // The configured timeout is applied per one-shot request, not as a
        // pool-wide total timeout: that would cut live streams short. The
        // read timeout bounds the gap between chunks instead, so a stalled
        // stream still ends after the configured timeout.
        let http = reqwest::Client::builder()
            .user_agent(concat!("perplexica-mcp/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &PerplexicaConfig {
        &self.config
    }

    /// Append `path` to the base URL's path, preserving any prefix a
    /// reverse-proxied deployment carries in `PERPLEXICA_BASE_URL`.
    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::NotConfigured(format!(
                    "base URL {} cannot take a path",
                    self.config.base_url
                ))
            })?
            .pop_if_empty()
            .extend(path.split('/'));
        Ok(url)
    }

    /// Validate, merge config defaults, and reshape for the wire.
    fn prepare(&self, request: &SearchRequest, stream: bool) -> Result<SearchRequest> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must be non-empty".to_string()));
        }
        let mut resolved = request.resolve_defaults(&self.config).wire_payload();
        if stream {
            resolved.stream = Some(true);
        }
        Ok(resolved)
    }

    /// Buffered search: one POST, full JSON body, decoded or failed as a unit.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let payload = self.prepare(request, false)?;
        let resp = self
            .http
            .post(self.endpoint("api/search")?)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Protocol {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Streaming search: the returned [`MessageStream`] yields messages in
    /// arrival order until the connection closes. A non-2xx status is raised
    /// here, before anything is yielded.
    pub async fn search_stream(&self, request: &SearchRequest) -> Result<MessageStream> {
        let payload = self.prepare(request, true)?;
        let resp = self
            .http
            .post(self.endpoint("api/search")?)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Protocol {
                status: status.as_u16(),
                body,
            });
        }
        Ok(MessageStream::new(resp.bytes_stream()))
    }

    /// Available providers/models, as the open mapping `/api/models` returns.
    pub async fn models(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let resp = self
            .http
            .get(self.endpoint("api/models")?)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Protocol {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// True only on a 2xx from `/api/models` with a JSON body, within
    /// [`HEALTH_TIMEOUT`]; every failure of any kind (timeout, refused
    /// connection, non-2xx, unparseable body) collapses to false. Never
    /// errors.
    pub async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint("api/models") else {
            return false;
        };
        match self.http.get(url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<serde_json::Value>().await.is_ok()
            }
            _ => false,
        }
    }
}
