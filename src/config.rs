//! Configuration loading.
//!
//! Everything lives under one configuration directory (`--config-dir`,
//! `CONFIG_PATH`, default `./config`):
//!
//! ```text
//! config/
//! ├── config.yaml              # AppConfig
//! ├── profiles/<name>.yaml     # one Profile per file
//! └── sources/<profile>/*.yaml # `sources:` lists of Source descriptors
//! ```
//!
//! Sources and profiles are re-read on every call so edits take effect
//! without a restart. A file that cannot be read or parsed is skipped with a
//! warning; it never hides the rest of the directory.

use crate::error::{Error, Result};
use crate::models::{Profile, Source};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Contents of `config.yaml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub active_profile: String,
    pub server: ServerConfig,
    pub chrome: ChromeConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_profile: "tech".to_string(),
            server: ServerConfig::default(),
            chrome: ChromeConfig::default(),
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Listen address of the API server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// `host:port`, ready for a TCP bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Headless browser settings for `chrome` sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromeConfig {
    pub headless: bool,
    /// Per-request page timeout.
    pub timeout_secs: u64,
    /// Ceiling for one whole render (load, wait and extract).
    pub collection_timeout_secs: u64,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_secs: 30,
            collection_timeout_secs: 60,
        }
    }
}

/// OpenAI-compatible chat endpoint used by the agent service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    /// May reference the environment as `${VAR}` or `$VAR`.
    pub api_key: String,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "glm5".to_string(),
            model: "glm-5".to_string(),
            api_key: String::new(),
            base_url: "https://api.z.ai/v1".to_string(),
        }
    }
}

impl LlmConfig {
    /// The agent endpoints are only mounted when a key is present.
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Root of the partition tree; each profile gets `<base_path>/<profile>/trends`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data"),
        }
    }
}

/// Default filter directive; `RUST_LOG` takes precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("env reference pattern is valid")
});

/// Replace `${VAR}` and `$VAR` with the variable's value (empty if unset).
pub fn expand_env(raw: &str) -> String {
    ENV_REF
        .replace_all(raw, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

/// File layout rooted at one configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigDir {
    root: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<Source>,
}

impl ConfigDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load `config.yaml`. A missing file yields the defaults; a malformed
    /// one is an error.
    #[instrument(level = "info", skip_all, fields(root = %self.root.display()))]
    pub async fn load_app_config(&self) -> Result<AppConfig> {
        let path = self.root.join("config.yaml");
        let mut config = match fs::read_to_string(&path).await {
            Ok(raw) => serde_yaml::from_str::<AppConfig>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config.yaml; using defaults");
                AppConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.llm.api_key = expand_env(&config.llm.api_key);
        debug!(profile = %config.active_profile, "Loaded configuration");
        Ok(config)
    }

    /// Every source declared for `profile`, in file-name then declaration
    /// order. A profile with no sources directory has no sources.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a profile name that is not a plain file
    /// name (see [`profile_name`]). Unreadable descriptor files are skipped
    /// with a warning rather than failing the whole profile.
    pub async fn load_sources(&self, profile: &str) -> Result<Vec<Source>> {
        let dir = self.root.join("sources").join(profile_name(profile)?);
        let mut sources = Vec::new();
        for path in yaml_files(&dir).await? {
            match read_yaml::<SourcesFile>(&path).await {
                Ok(file) => sources.extend(file.sources),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable source file")
                }
            }
        }
        debug!(%profile, count = sources.len(), "Loaded sources");
        Ok(sources)
    }

    /// Load `profiles/<name>.yaml`; [`Error::NotFound`] when the file is absent.
    pub async fn load_profile(&self, name: &str) -> Result<Profile> {
        let file = format!("{}.yaml", profile_name(name)?);
        let path = self.root.join("profiles").join(file);
        match read_yaml::<Profile>(&path).await {
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("profile", name))
            }
            other => other,
        }
    }

    /// Every readable profile, sorted by file name.
    pub async fn load_profiles(&self) -> Result<Vec<Profile>> {
        let mut profiles = Vec::new();
        for path in yaml_files(&self.root.join("profiles")).await? {
            match read_yaml::<Profile>(&path).await {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable profile"),
            }
        }
        Ok(profiles)
    }
}

/// Profile names become path components, so only a single plain segment
/// is accepted.
pub fn profile_name(name: &str) -> Result<&str> {
    let bad = name.is_empty()
        || name.contains(['/', '\\'])
        || name.contains("..")
        || name.starts_with('.');
    if bad {
        return Err(Error::Validation(format!("bad profile name {name:?}")));
    }
    Ok(name)
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_yaml::from_str(&raw)?)
}

/// `*.yaml` files directly inside `dir`, sorted. Missing directory is empty.
async fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, body).await.unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: AppConfig = serde_yaml::from_str("server:\n  port: 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.active_profile, "tech");
        assert!(config.chrome.headless);
        assert!(!config.llm.is_configured());
    }

    #[test]
    fn test_expand_env() {
        // SAFETY: test-only variable with a unique name.
        unsafe { std::env::set_var("TRENDSCOPE_TEST_KEY", "sk-123") };
        assert_eq!(expand_env("${TRENDSCOPE_TEST_KEY}"), "sk-123");
        assert_eq!(expand_env("Bearer $TRENDSCOPE_TEST_KEY!"), "Bearer sk-123!");
        assert_eq!(expand_env("${TRENDSCOPE_TEST_UNSET_VAR}"), "");
        assert_eq!(expand_env("plain"), "plain");
    }

    #[tokio::test]
    async fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigDir::new(dir.path()).load_app_config().await.unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.yaml", "server: [unclosed").await;
        let err = ConfigDir::new(dir.path()).load_app_config().await.unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[tokio::test]
    async fn test_load_sources_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "sources/tech/a.yaml",
            "sources:\n  - id: hn\n    name: Hacker News\n    type: http\n\
             \x20 - id: gh\n    type: chrome\n    enabled: false\n",
        )
        .await;
        write(dir.path(), "sources/tech/b.yaml", "sources: {not: a list}").await;
        write(dir.path(), "sources/tech/c.yaml", "sources:\n  - id: twir\n    type: rss\n").await;
        write(dir.path(), "sources/tech/notes.txt", "ignored").await;

        let config = ConfigDir::new(dir.path());
        let sources = config.load_sources("tech").await.unwrap();
        let ids: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["hn", "gh", "twir"]);
        assert!(!sources[1].enabled);

        assert!(config.load_sources("finance").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_profiles() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "profiles/tech.yaml",
            "name: tech\ndisplay_name: Tech\n\
             prompts:\n  suggester: \"Ideas for {{topics}}\"\ndefault_sources: [hn]\n",
        )
        .await;
        write(dir.path(), "profiles/broken.yaml", "name: [").await;

        let config = ConfigDir::new(dir.path());
        let profiles = config.load_profiles().await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].prompts.suggester, "Ideas for {{topics}}");

        let tech = config.load_profile("tech").await.unwrap();
        assert_eq!(tech.default_sources, vec!["hn".to_string()]);
        assert!(config.load_profile("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_profile_names_cannot_leave_the_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "root/config.yaml", "name: secret\n").await;
        write(dir.path(), "root/sources/x.yaml", "sources:\n  - id: leak\n    type: http\n").await;
        let config = ConfigDir::new(dir.path().join("root"));

        for name in ["../config", "../../etc/passwd", "a/b", "a\\b", "..", ".hidden", ""] {
            let err = config.load_profile(name).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{name}: {err}");
            let err = config.load_sources(name).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{name}: {err}");
        }
        assert_eq!(profile_name("finance-eu_2").unwrap(), "finance-eu_2");
    }
}
