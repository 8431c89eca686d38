use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::sync::Arc;

use perplexica_client::{config_from_env, PerplexicaClient};
use perplexica_core::{ChatModel, EmbeddingModel, FocusMode, SearchRequest};

#[cfg(feature = "stdio")]
mod mcp;

#[derive(Parser, Debug)]
#[command(name = "perplexica-mcp")]
#[command(about = "MCP stdio bridge to a Perplexica AI-search deployment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server (for Cursor / MCP clients).
    #[cfg(feature = "stdio")]
    McpStdio,
    /// One-shot search against the configured deployment (JSON to stdout).
    Search(SearchCmd),
    /// Diagnose configuration/connectivity issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    /// Query text.
    #[arg(long)]
    query: String,
    /// Focus mode. Allowed: web, academic, writing, math, youtube, reddit
    #[arg(long, default_value = "web")]
    focus: String,
    /// Speed/quality tradeoff. Allowed: speed, balanced, quality
    #[arg(long)]
    optimization: Option<String>,
    /// Chat model provider override (requires --chat-model).
    #[arg(long)]
    chat_provider: Option<String>,
    /// Chat model identifier override (requires --chat-provider).
    #[arg(long)]
    chat_model: Option<String>,
    /// Embedding model provider override (requires --embedding-model).
    #[arg(long)]
    embedding_provider: Option<String>,
    /// Embedding model identifier override (requires --embedding-provider).
    #[arg(long)]
    embedding_model: Option<String>,
    /// Stream messages as NDJSON instead of one buffered result.
    #[arg(long)]
    stream: bool,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Skip the network probe (config checks only).
    #[arg(long)]
    offline: bool,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {}

/// Opt-in env-file loader.
///
/// MCP server environments often aren't interactive shells, so users want a
/// single place to keep settings without exporting them manually. Applied
/// only for keys not already present in the process environment; values are
/// never logged.
fn load_env_file() {
    let Ok(path) = std::env::var("PERPLEXICA_ENV_FILE") else {
        return;
    };
    let path = path.trim();
    if path.is_empty() {
        return;
    }
    let Ok(text) = std::fs::read_to_string(path) else {
        return;
    };
    for raw in text.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v.trim());
        }
    }
}

async fn run_search(args: SearchCmd) -> Result<()> {
    let config = Arc::new(config_from_env()?);
    let client = PerplexicaClient::new(config)?;

    let mut request = SearchRequest::new(args.focus.parse::<FocusMode>()?, args.query);
    if let Some(raw) = args.optimization {
        request.optimization_mode = Some(raw.parse()?);
    }
    if let (Some(provider), Some(model)) = (args.chat_provider, args.chat_model) {
        request.chat_model = Some(ChatModel::new(provider, model));
    }
    if let (Some(provider), Some(model)) = (args.embedding_provider, args.embedding_model) {
        request.embedding_model = Some(EmbeddingModel::new(provider, model));
    }

    if args.stream {
        let mut stream = client.search_stream(&request).await?;
        while let Some(msg) = stream.next().await {
            println!("{}", serde_json::to_string(&msg)?);
        }
    } else {
        let response = client.search(&request).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}

async fn run_doctor(args: DoctorCmd) -> Result<()> {
    let mut report = serde_json::json!({
        "name": "perplexica-mcp",
        "version": env!("CARGO_PKG_VERSION"),
    });

    match config_from_env() {
        Ok(config) => {
            report["config_ok"] = serde_json::json!(true);
            report["base_url"] = serde_json::json!(config.base_url.as_str());
            report["timeout_s"] = serde_json::json!(config.timeout.as_secs());
            report["default_chat_model_set"] =
                serde_json::json!(config.default_chat_model.is_some());
            report["default_embedding_model_set"] =
                serde_json::json!(config.default_embedding_model.is_some());
            if !args.offline {
                let client = PerplexicaClient::new(Arc::new(config))?;
                report["reachable"] = serde_json::json!(client.health_check().await);
            }
        }
        Err(e) => {
            report["config_ok"] = serde_json::json!(false);
            report["config_error"] = serde_json::json!(e.to_string());
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            mcp::serve_stdio()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Search(args) => run_search(args).await?,
        Commands::Doctor(args) => run_doctor(args).await?,
        Commands::Version(_) => {
            println!(
                "{}",
                serde_json::json!({
                    "name": "perplexica-mcp",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            );
        }
    }
    Ok(())
}
