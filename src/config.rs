use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the backend HTTP endpoint. Each provider has its own
    /// default.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            normalize: true,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_normalize() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Share of the fused score given to the two text signals, in [0, 1].
    /// The complement goes to the semantic signal.
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_fusion_constant")]
    pub fusion_constant: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            text_weight: default_text_weight(),
            default_limit: default_limit(),
            fusion_constant: default_fusion_constant(),
        }
    }
}

fn default_text_weight() -> f64 {
    crate::search::DEFAULT_TEXT_WEIGHT
}
fn default_limit() -> i64 {
    crate::search::DEFAULT_LIMIT
}
fn default_fusion_constant() -> f64 {
    60.0
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.db.url.is_empty() {
        anyhow::bail!("db.url must not be empty");
    }
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    if !(0.0..=1.0).contains(&config.retrieval.text_weight) {
        anyhow::bail!("retrieval.text_weight must be in [0.0, 1.0]");
    }
    if config.retrieval.default_limit < 1 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }
    if config.retrieval.fusion_constant <= 0.0 {
        anyhow::bail!("retrieval.fusion_constant must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() && config.embedding.provider != "static" {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "static" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or static.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_defaults() {
        let file = write_config(
            r#"
            [db]
            url = "postgres://localhost/search"
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.embedding.provider, "disabled");
        assert!(config.embedding.normalize);
        assert_eq!(
            config.retrieval.text_weight,
            crate::search::DEFAULT_TEXT_WEIGHT
        );
        assert_eq!(config.retrieval.default_limit, crate::search::DEFAULT_LIMIT);
        assert_eq!(config.retrieval.fusion_constant, 60.0);
    }

    #[test]
    fn test_text_weight_out_of_range_rejected() {
        let file = write_config(
            r#"
            [db]
            url = "postgres://localhost/search"

            [retrieval]
            text_weight = 1.5
            "#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_enabled_provider_requires_model() {
        let file = write_config(
            r#"
            [db]
            url = "postgres://localhost/search"

            [embedding]
            provider = "openai"
            "#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let file = write_config(
            r#"
            [db]
            url = "postgres://localhost/search"

            [embedding]
            provider = "quantum"
            model = "q1"
            "#,
        );
        assert!(load_config(file.path()).is_err());
    }
}
