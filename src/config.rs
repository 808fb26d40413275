//! Layered service configuration: defaults, then environment, then CLI.

use clap::Parser;
use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub graph: GraphConfig,
    pub genmodel: GenModelConfig,
    pub embedding: EmbeddingConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenModelConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub extract_min_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Ordered model names; empty means local-hash fallback straight away.
    pub model_priority: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_upload_bytes: usize,
    pub max_message_chars: usize,
    pub history_token_budget: i64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("database_url", "sqlite://./lexgraph.db")?
            .set_default("graph.uri", "http://localhost:7474")?
            .set_default("graph.user", "neo4j")?
            .set_default("graph.password", "password")?
            .set_default("graph.database", "neo4j")?
            .set_default("genmodel.api_key", "")?
            .set_default("genmodel.model", "gemini-1.5-flash")?
            .set_default(
                "genmodel.base_url",
                "https://generativelanguage.googleapis.com",
            )?
            .set_default("genmodel.extract_min_interval_ms", 4000i64)?
            .set_default(
                "embedding.model_priority",
                vec![
                    "multilingual-e5-small".to_string(),
                    "bge-small-en-v1.5".to_string(),
                ],
            )?
            .set_default("limits.max_upload_bytes", 20i64 * 1024 * 1024)?
            .set_default("limits.max_message_chars", 8000i64)?
            .set_default("limits.history_token_budget", 1000i64)?;

        // Environment overrides, one per published setting.
        if let Ok(val) = env::var("DATABASE_URL") {
            builder = builder.set_override("database_url", val)?;
        }
        if let Ok(val) = env::var("GRAPH_URI") {
            builder = builder.set_override("graph.uri", val)?;
        }
        if let Ok(val) = env::var("GRAPH_USER") {
            builder = builder.set_override("graph.user", val)?;
        }
        if let Ok(val) = env::var("GRAPH_PASSWORD") {
            builder = builder.set_override("graph.password", val)?;
        }
        if let Ok(val) = env::var("GRAPH_DATABASE") {
            builder = builder.set_override("graph.database", val)?;
        }
        if let Ok(val) = env::var("GEN_MODEL_KEY") {
            builder = builder.set_override("genmodel.api_key", val)?;
        }
        if let Ok(val) = env::var("GEN_MODEL_NAME") {
            builder = builder.set_override("genmodel.model", val)?;
        }
        if let Ok(val) = env::var("GEN_BASE_URL") {
            builder = builder.set_override("genmodel.base_url", val)?;
        }
        if let Ok(val) = env::var("GEN_EXTRACT_MIN_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<i64>() {
                builder = builder.set_override("genmodel.extract_min_interval_ms", ms)?;
            }
        }
        if let Ok(val) = env::var("EMBED_MODEL_PRIORITY") {
            let names: Vec<String> = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            builder = builder.set_override("embedding.model_priority", names)?;
        }
        if let Ok(val) = env::var("MAX_UPLOAD_BYTES") {
            if let Ok(bytes) = val.parse::<i64>() {
                builder = builder.set_override("limits.max_upload_bytes", bytes)?;
            }
        }
        if let Ok(val) = env::var("MAX_MESSAGE_CHARS") {
            if let Ok(chars) = val.parse::<i64>() {
                builder = builder.set_override("limits.max_message_chars", chars)?;
            }
        }
        if let Ok(val) = env::var("HISTORY_TOKEN_BUDGET") {
            if let Ok(tokens) = val.parse::<i64>() {
                builder = builder.set_override("limits.history_token_budget", tokens)?;
            }
        }

        // CLI flags win over everything.
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_are_complete() {
        let config = AppConfig::load_from_args(["lexgraph"]).expect("defaults load");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.genmodel.extract_min_interval_ms, 4000);
        assert!(!config.embedding.model_priority.is_empty());
        assert!(config.limits.max_upload_bytes > 0);
    }

    #[test]
    #[serial]
    fn embed_model_priority_is_parsed_as_list() {
        std::env::set_var("EMBED_MODEL_PRIORITY", "bge-small-en-v1.5, all-minilm-l6-v2");
        let config = AppConfig::load_from_args(["lexgraph"]).expect("config load");
        std::env::remove_var("EMBED_MODEL_PRIORITY");
        assert_eq!(
            config.embedding.model_priority,
            vec![
                "bge-small-en-v1.5".to_string(),
                "all-minilm-l6-v2".to_string()
            ]
        );
    }

    #[test]
    #[serial]
    fn cli_port_overrides_default() {
        let config =
            AppConfig::load_from_args(["lexgraph", "--port", "9001"]).expect("config load");
        assert_eq!(config.server.port, 9001);
    }
}
