//! Dispatch configuration loading.
//!
//! Loads from `./switchboard.toml` (or `$SWITCHBOARD_CONFIG_PATH`).
//! Precedence: env vars > config file > defaults. A missing file yields defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::channels::graph::{GraphEndpoint, DEFAULT_GRAPH_API_VERSION, DEFAULT_GRAPH_BASE_URL};
use crate::channels::templates::StaticTemplateCatalog;
use crate::channels::whatsapp::DEFAULT_TEMPLATE_LANGUAGE;
use crate::credentials::{AesGcmCipher, CachingTenantStore, CipherError, TenantConfigStore};
use crate::http::backoff::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_JITTER_PERCENT, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
    DEFAULT_MAX_RETRY_AFTER_SECS,
};
use crate::http::{
    HttpTimeouts, RetryPolicy, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "SWITCHBOARD_CONFIG_PATH";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "switchboard.toml";

/// Default env var holding the credential encryption passphrase.
pub const DEFAULT_ENCRYPTION_KEY_ENV: &str = "SWITCHBOARD_ENCRYPTION_KEY";

// ── Top-level config ────────────────────────────────────────────

/// Top-level dispatch configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Graph API host, version and timeouts (`[graph]`).
    pub graph: GraphConfig,
    /// Upstream retry policy (`[retry]`).
    pub retry: RetryConfig,
    /// Credential decryption and caching (`[credentials]`).
    pub credentials: CredentialsConfig,
    /// WhatsApp specific settings (`[whatsapp]`).
    pub whatsapp: WhatsAppConfig,
    /// Log output (`[logging]`).
    pub logging: LoggingConfig,
    /// Canonical template text by name (`[templates]`).
    pub templates: HashMap<String, String>,
}

impl DispatchConfig {
    /// Load configuration with precedence env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the merged configuration fails [`DispatchConfig::validate`].
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = Self::config_path_with(env);
        let mut config = Self::load_from_path(&path)?;
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                toml::from_str(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid TOML or mismatched types.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env(CONFIG_PATH_ENV)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests avoid `set_var`.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Graph.
        if let Some(v) = env("SWITCHBOARD_GRAPH_BASE_URL") {
            self.graph.base_url = v;
        }
        if let Some(v) = env("SWITCHBOARD_GRAPH_API_VERSION") {
            self.graph.api_version = v;
        }
        override_parsed(&env, "SWITCHBOARD_HTTP_TIMEOUT_SECS", &mut self.graph.request_timeout_secs);

        // Retry.
        override_parsed(&env, "SWITCHBOARD_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_parsed(&env, "SWITCHBOARD_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms);
        override_parsed(&env, "SWITCHBOARD_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms);

        // WhatsApp.
        if let Some(v) = env("SWITCHBOARD_WHATSAPP_TEMPLATE_LANGUAGE") {
            self.whatsapp.default_language = v;
        }

        // Logging.
        if let Some(v) = env("SWITCHBOARD_LOGS_DIR") {
            self.logging.logs_dir = Some(PathBuf::from(v));
        }
    }

    /// Reject values that would make dispatch misbehave.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.graph.base_url)
            .with_context(|| format!("invalid graph.base_url '{}'", self.graph.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("graph.base_url must be http or https, got '{}'", base.scheme());
        }
        if self.graph.api_version.trim().is_empty() {
            anyhow::bail!("graph.api_version must not be empty");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }
        if self.retry.jitter_percent > 100 {
            anyhow::bail!("retry.jitter_percent must be between 0 and 100");
        }
        Ok(())
    }

    /// Template catalogue built from the `[templates]` table.
    pub fn template_catalog(&self) -> StaticTemplateCatalog {
        StaticTemplateCatalog::from(self.templates.clone())
    }
}

fn override_parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, var: &str, target: &mut T) {
    if let Some(v) = env(var) {
        match v.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var, value = %v, "ignoring invalid env override"),
        }
    }
}

// ── Graph ───────────────────────────────────────────────────────

/// Graph API connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// API host, e.g. `https://graph.facebook.com`.
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    /// Version path segment, e.g. `v21.0`.
    #[serde(default = "default_graph_api_version")]
    pub api_version: String,
    /// TCP/TLS connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-attempt request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            api_version: default_graph_api_version(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GraphConfig {
    /// Endpoint builder for the configured host and version.
    pub fn endpoint(&self) -> GraphEndpoint {
        GraphEndpoint::new(self.base_url.clone(), self.api_version.clone())
    }

    /// HTTP timeouts for adapter clients.
    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

// ── Retry ───────────────────────────────────────────────────────

/// Retry and backoff settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on a computed delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter span as a percentage of the exponential delay.
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u64,
    /// Cap on an upstream `Retry-After`, in seconds.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_percent: default_jitter_percent(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

impl RetryConfig {
    /// Policy for [`crate::http::RetryingHttpClient`].
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_percent: self.jitter_percent,
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
        }
    }
}

// ── Credentials ─────────────────────────────────────────────────

/// Credential decryption settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Env var holding the deployment encryption passphrase.
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
    /// Opt-in TTL for caching encrypted records; unset disables caching.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            encryption_key_env: default_encryption_key_env(),
            cache_ttl_secs: None,
        }
    }
}

impl CredentialsConfig {
    /// Build the deployment cipher from the configured env var.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError`] when the variable is unset or blank.
    pub fn cipher_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<AesGcmCipher, CipherError> {
        AesGcmCipher::from_env(&self.encryption_key_env, env)
    }

    /// Cache TTL, when caching is enabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Wrap `inner` in a TTL cache when caching is enabled.
    ///
    /// The caller owns the returned cache and must invalidate it from the
    /// tenant-configuration-update path.
    pub fn caching_store<S: TenantConfigStore>(&self, inner: S) -> Option<CachingTenantStore<S>> {
        self.cache_ttl().map(|ttl| CachingTenantStore::new(inner, ttl))
    }
}

// ── WhatsApp / logging ──────────────────────────────────────────

/// WhatsApp adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    /// Template language used when a request names none.
    #[serde(default = "default_template_language")]
    pub default_language: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            default_language: default_template_language(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rotated JSON logs; unset means console only.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
}

fn default_graph_base_url() -> String {
    DEFAULT_GRAPH_BASE_URL.to_owned()
}
fn default_graph_api_version() -> String {
    DEFAULT_GRAPH_API_VERSION.to_owned()
}
fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_percent() -> u64 {
    DEFAULT_JITTER_PERCENT
}
fn default_max_retry_after_secs() -> u64 {
    DEFAULT_MAX_RETRY_AFTER_SECS
}
fn default_encryption_key_env() -> String {
    DEFAULT_ENCRYPTION_KEY_ENV.to_owned()
}
fn default_template_language() -> String {
    DEFAULT_TEMPLATE_LANGUAGE.to_owned()
}
