use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const ENV_FILE: &str = ".env";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Project URL of the managed backend, e.g. `https://xyz.example.co`.
    pub url: String,
    /// Where password-reset and OAuth flows send the user back to.
    #[serde(default)]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_auth_retry_delay_ms")]
    pub auth_retry_delay_ms: u64,
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,
}

fn default_heartbeat_secs() -> u64 { 25 }
fn default_reconnect_delay_ms() -> u64 { 2000 }
fn default_auth_retry_delay_ms() -> u64 { 5000 }
fn default_max_auth_failures() -> u32 { 3 }

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            auth_retry_delay_ms: default_auth_retry_delay_ms(),
            max_auth_failures: default_max_auth_failures(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_post_bucket")]
    pub post_images_bucket: String,
    #[serde(default = "default_profile_bucket")]
    pub profile_images_bucket: String,
    /// Uploads above this size are refused before hitting the network.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_cache_control_secs")]
    pub cache_control_secs: u64,
}

fn default_post_bucket() -> String { "blog-images".to_string() }
fn default_profile_bucket() -> String { "profile_images".to_string() }
fn default_max_upload_bytes() -> u64 { 5 * 1024 * 1024 }
fn default_cache_control_secs() -> u64 { 3600 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            post_images_bucket: default_post_bucket(),
            profile_images_bucket: default_profile_bucket(),
            max_upload_bytes: default_max_upload_bytes(),
            cache_control_secs: default_cache_control_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    /// One of `latest`, `oldest`, `views`, `likes`, `comments`.
    #[serde(default = "default_sort")]
    pub default_sort: String,
    /// Pending like/favorite writes older than this are rolled back.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
}

fn default_sort() -> String { "latest".to_string() }
fn default_pending_timeout_secs() -> u64 { 15 }

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_sort: default_sort(),
            pending_timeout_secs: default_pending_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_file")]
    pub file: PathBuf,
    /// Refresh the access token this many seconds before it expires.
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: i64,
}

fn default_session_file() -> PathBuf { PathBuf::from(".lumina-session.json") }
fn default_refresh_margin_secs() -> i64 { 60 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file: default_session_file(),
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_file() -> PathBuf { PathBuf::from("lumina.log") }
fn default_log_filter() -> String { "lumina=info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .with_context(|| "Failed to parse config TOML")?;
        if let Ok(url) = std::env::var("LUMINA_BACKEND_URL") {
            let url = sanitize_key(&url);
            if !url.is_empty() {
                config.backend.url = url;
            }
        }
        config.backend.url = config.backend.url.trim_end_matches('/').to_string();
        Ok(config)
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        // Strip BOM if present (common on Windows-created files)
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        for line in content.lines() {
            let line = line.trim().trim_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }

    /// The backend's public API key comes from the environment, or is
    /// prompted at startup and saved to .env for future runs.
    pub fn anon_key() -> Result<String> {
        match std::env::var("LUMINA_ANON_KEY") {
            Ok(key) if !key.is_empty() => Ok(sanitize_key(&key)),
            _ => {
                let key = prompt("Backend anon key")?;
                save_env_var("LUMINA_ANON_KEY", &key);
                Ok(key)
            }
        }
    }
}

pub fn prompt(label: &str) -> Result<String> {
    print!("  {} > ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let value = input.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("{} cannot be empty", label);
    }
    Ok(value)
}

/// Strip carriage returns, BOM, and other invisible chars from a key/path value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}

/// Append a KEY=VALUE line to .env and set it in the current process.
fn save_env_var(key: &str, value: &str) {
    std::env::set_var(key, value);
    let path = Path::new(ENV_FILE);
    let mut contents = std::fs::read_to_string(path).unwrap_or_default();
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&format!("{}={}\n", key, value));
    let _ = std::fs::write(path, contents);
}
