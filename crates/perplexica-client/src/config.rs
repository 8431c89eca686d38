//! Environment-sourced service configuration.
//!
//! Loaded once at process start; callers share the resulting
//! [`PerplexicaConfig`] read-only for the life of the process.

use perplexica_core::{ChatModel, EmbeddingModel, Error, PerplexicaConfig, Result};
use std::time::Duration;
use url::Url;

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build a [`PerplexicaConfig`] from `PERPLEXICA_*` environment variables,
/// falling back to defaults (`http://localhost:3000`, 30 s, balanced, json).
///
/// Provider/model pairs must both be set to install a default model; the
/// model value goes into the `name` field (the documented API spelling) and
/// the wire normalizer mirrors it into `model` at send time.
pub fn config_from_env() -> Result<PerplexicaConfig> {
    let mut config = PerplexicaConfig::default();

    if let Some(raw) = env_trimmed("PERPLEXICA_BASE_URL") {
        config.base_url = Url::parse(&raw)
            .map_err(|e| Error::NotConfigured(format!("PERPLEXICA_BASE_URL {raw:?}: {e}")))?;
    }
    if let Some(raw) = env_trimmed("PERPLEXICA_TIMEOUT") {
        // Unparseable timeouts fall back to the default rather than aborting.
        if let Ok(secs) = raw.parse::<u64>() {
            config.timeout = Duration::from_secs(secs);
        }
    }
    if let Some(raw) = env_trimmed("PERPLEXICA_OPTIMIZATION_MODE") {
        config.default_optimization_mode = raw
            .parse()
            .map_err(|_| Error::NotConfigured(format!("PERPLEXICA_OPTIMIZATION_MODE {raw:?}")))?;
    }
    if let Some(raw) = env_trimmed("PERPLEXICA_DEFAULT_OUTPUT_FORMAT") {
        config.default_output_format = raw.parse().map_err(|_| {
            Error::NotConfigured(format!("PERPLEXICA_DEFAULT_OUTPUT_FORMAT {raw:?}"))
        })?;
    }

    if let (Some(provider), Some(model)) = (
        env_trimmed("PERPLEXICA_DEFAULT_CHAT_PROVIDER"),
        env_trimmed("PERPLEXICA_DEFAULT_CHAT_MODEL"),
    ) {
        let mut chat = ChatModel::new(provider.clone(), model);
        if provider == "custom_openai" {
            chat.custom_openai_base_url = env_trimmed("PERPLEXICA_CUSTOM_OPENAI_BASE_URL");
            chat.custom_openai_key = env_trimmed("PERPLEXICA_CUSTOM_OPENAI_KEY");
        }
        config.default_chat_model = Some(chat);
    }

    if let (Some(provider), Some(model)) = (
        env_trimmed("PERPLEXICA_DEFAULT_EMBEDDING_PROVIDER"),
        env_trimmed("PERPLEXICA_DEFAULT_EMBEDDING_MODEL"),
    ) {
        config.default_embedding_model = Some(EmbeddingModel::new(provider, model));
    }

    Ok(config)
}
