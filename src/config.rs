use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::Resource;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub odoo: OdooConfig,
    pub swapi: SwapiConfig,
    pub swimg: SwimgConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OdooConfig {
    pub url: String,
    pub db: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_external_key_field")]
    pub external_key_field: String,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_odoo_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_external_key_field() -> String {
    "x_external_key".to_string()
}
fn default_max_in_flight() -> usize {
    20
}
fn default_odoo_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SwapiConfig {
    pub url: String,
    #[serde(default = "default_swapi_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_swapi_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_swapi_timeout_secs() -> u64 {
    30
}
fn default_swapi_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SwimgConfig {
    pub url: String,
    #[serde(default = "default_swimg_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_swimg_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Fail the item instead of degrading when its image cannot be fetched.
    #[serde(default)]
    pub strict: bool,
}

fn default_swimg_timeout_secs() -> u64 {
    10
}
fn default_swimg_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Zero disables the run-level deadline.
    #[serde(default)]
    pub run_timeout_secs: u64,
    #[serde(default = "default_resources")]
    pub resources: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            run_timeout_secs: 0,
            resources: default_resources(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_resources() -> Vec<String> {
    Resource::ALL.iter().map(|r| r.path().to_string()).collect()
}

impl PipelineConfig {
    /// Configured resources in sync order, deduplicated.
    pub fn resources(&self) -> Vec<Resource> {
        Resource::ALL
            .into_iter()
            .filter(|r| self.resources.iter().any(|s| s == r.path()))
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    check_url("odoo.url", &config.odoo.url)?;
    check_url("swapi.url", &config.swapi.url)?;
    check_url("swimg.url", &config.swimg.url)?;

    if config.odoo.db.trim().is_empty() {
        bail!("odoo.db must not be empty");
    }
    if config.odoo.username.trim().is_empty() {
        bail!("odoo.username must not be empty");
    }
    if config.odoo.external_key_field.trim().is_empty() {
        bail!("odoo.external_key_field must not be empty");
    }
    if config.odoo.max_in_flight == 0 {
        bail!("odoo.max_in_flight must be >= 1");
    }

    if config.pipeline.concurrency == 0 {
        bail!("pipeline.concurrency must be >= 1");
    }
    if config.pipeline.resources.is_empty() {
        bail!("pipeline.resources must list at least one resource");
    }
    for name in &config.pipeline.resources {
        if Resource::parse(name).is_none() {
            bail!(
                "Unknown resource: '{}'. Must be one of: planets, people.",
                name
            );
        }
    }

    Ok(())
}

fn check_url(field: &str, url: &str) -> Result<()> {
    if url.trim().is_empty() {
        bail!("{} must not be empty", field);
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{} must be an http(s) URL, got '{}'", field, url);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[odoo]
url = "http://localhost:8069"
db = "odoo"
username = "admin"
password = "admin"

[swapi]
url = "https://swapi.dev/api/"

[swimg]
url = "https://starwars-visualguide.com/assets/img/characters/"
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config(MINIMAL);
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.odoo.external_key_field, "x_external_key");
        assert_eq!(cfg.odoo.max_in_flight, 20);
        assert_eq!(cfg.swapi.max_retries, 3);
        assert!(!cfg.swimg.strict);
        assert_eq!(cfg.pipeline.concurrency, 8);
        assert_eq!(
            cfg.pipeline.resources(),
            vec![Resource::Planets, Resource::People]
        );
    }

    #[test]
    fn resources_follow_sync_order() {
        let content = format!("{}\n[pipeline]\nresources = [\"people\", \"planets\"]\n", MINIMAL);
        let file = write_config(&content);
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(
            cfg.pipeline.resources(),
            vec![Resource::Planets, Resource::People]
        );
    }

    #[test]
    fn rejects_zero_concurrency() {
        let content = format!("{}\n[pipeline]\nconcurrency = 0\n", MINIMAL);
        let file = write_config(&content);
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("pipeline.concurrency"));
    }

    #[test]
    fn rejects_unknown_resource() {
        let content = format!("{}\n[pipeline]\nresources = [\"starships\"]\n", MINIMAL);
        let file = write_config(&content);
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("starships"));
    }

    #[test]
    fn rejects_non_http_url() {
        let content = MINIMAL.replace("http://localhost:8069", "localhost:8069");
        let file = write_config(&content);
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("odoo.url"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Path::new("/nonexistent/swsync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
