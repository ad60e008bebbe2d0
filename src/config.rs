//! Configuration: a TOML file with environment-variable overrides for
//! secrets. A commented default file is written on first run so deployment
//! starts from a template instead of an empty directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where this config was loaded from. Not part of the file.
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Graph API base, without trailing slash. HTTPS only.
    pub api_base_url: String,
    pub phone_number_id: String,
    pub access_token: String,
    /// Token echoed back during the GET verification handshake.
    pub verify_token: String,
    /// App secret for X-Hub-Signature-256 verification. Empty disables it.
    pub app_secret: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://graph.facebook.com/v18.0".into(),
            phone_number_id: String::new(),
            access_token: String::new(),
            verify_token: String::new(),
            app_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            api_key: String::new(),
            model: "gemini-1.5-flash".into(),
            temperature: 0.7,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sliding deduplication window, seconds.
    pub dedup_window_secs: u64,
    /// Hard cap on tool-call iterations per reply.
    pub max_tool_iterations: usize,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Replies longer than this are truncated before sending.
    pub reply_max_chars: usize,
    /// Turns restored into the model context per conversation.
    pub history_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 20,
            max_tool_iterations: 5,
            workers: 4,
            queue_capacity: 64,
            reply_max_chars: 3500,
            history_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Empty means `<config dir>/courier.db`.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
        }
    }
}

impl Config {
    /// Load configuration, creating a default file if none exists.
    ///
    /// Secrets can be supplied or overridden through the environment:
    /// `WHATSAPP_ACCESS_TOKEN`, `WHATSAPP_APP_SECRET`, `WHATSAPP_VERIFY_TOKEN`,
    /// `GEMINI_API_KEY`.
    pub async fn load_or_init(explicit_path: Option<PathBuf>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => p,
            None => Self::default_config_path()?,
        };

        let mut config = if path.exists() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            toml::from_str::<Config>(&raw)
                .with_context(|| format!("invalid config at {}", path.display()))?
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create config directory {}", parent.display())
                })?;
            }
            let default = Config::default();
            let rendered = toml::to_string_pretty(&default)
                .context("failed to render default config")?;
            tokio::fs::write(&path, rendered)
                .await
                .with_context(|| format!("failed to write default config to {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote default config");
            default
        };

        config.config_path = path;
        config.apply_env_overrides();

        if config.storage.db_path.is_empty() {
            let dir = config
                .config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            config.storage.db_path = dir.join("courier.db").to_string_lossy().into_owned();
        }

        config.validate()?;
        Ok(config)
    }

    fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "courier")
            .context("could not resolve a home directory for config")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        for (var, slot) in [
            ("WHATSAPP_ACCESS_TOKEN", &mut self.whatsapp.access_token),
            ("WHATSAPP_APP_SECRET", &mut self.whatsapp.app_secret),
            ("WHATSAPP_VERIFY_TOKEN", &mut self.whatsapp.verify_token),
            ("GEMINI_API_KEY", &mut self.ai.api_key),
        ] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    *slot = value;
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.whatsapp.api_base_url.starts_with("https://") {
            anyhow::bail!(
                "whatsapp.api_base_url must use https, got {}",
                self.whatsapp.api_base_url
            );
        }
        if self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.workers must be at least 1");
        }
        if self.pipeline.queue_capacity == 0 {
            anyhow::bail!("pipeline.queue_capacity must be at least 1");
        }
        if self.pipeline.max_tool_iterations == 0 {
            anyhow::bail!("pipeline.max_tool_iterations must be at least 1");
        }
        Ok(())
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.pipeline.dedup_window_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            gateway: GatewayConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            ai: AiConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_default_file_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::load_or_init(Some(path.clone())).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.pipeline.dedup_window_secs, 20);
        assert_eq!(config.pipeline.max_tool_iterations, 5);
        assert!(config.storage.db_path.ends_with("courier.db"));
    }

    #[tokio::test]
    async fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[gateway]
port = 9090

[whatsapp]
phone_number_id = "1234567890"
"#,
        )
        .await
        .unwrap();

        let config = Config::load_or_init(Some(path)).await.unwrap();
        assert_eq!(config.gateway.port, 9090);
        assert_eq!(config.whatsapp.phone_number_id, "1234567890");
        assert_eq!(config.ai.model, "gemini-1.5-flash");
        assert_eq!(config.pipeline.history_limit, 20);
    }

    #[tokio::test]
    async fn rejects_plain_http_api_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[whatsapp]
api_base_url = "http://graph.example.com"
"#,
        )
        .await
        .unwrap();

        assert!(Config::load_or_init(Some(path)).await.is_err());
    }

    #[tokio::test]
    async fn rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[pipeline]\nworkers = 0\n").await.unwrap();
        assert!(Config::load_or_init(Some(path)).await.is_err());
    }

    #[test]
    fn dedup_window_converts_to_duration() {
        let config = Config::default();
        assert_eq!(config.dedup_window(), Duration::from_secs(20));
    }
}
