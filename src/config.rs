// Copyright 2025 Duckgate Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Duckgate server configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP API listen address (e.g., "127.0.0.1:8787")
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Static bearer token required on /v1/* routes. Auth is disabled
    /// when no token is configured.
    pub bearer_token: Option<String>,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting on /v1/* routes
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Maximum requests per window, shared by all clients
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,

    /// Time window in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_rate_limit_max_requests(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream chat backend
    #[serde(default = "default_upstream_url")]
    pub base_url: String,

    /// User agent presented to the upstream
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_url(),
            user_agent: default_user_agent(),
        }
    }
}

// Default values
fn default_http_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_enable_cors() -> bool {
    true
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rate_limit_max_requests() -> u32 {
    2
}

fn default_rate_limit_window_secs() -> u64 {
    1
}

fn default_upstream_url() -> String {
    "https://duckduckgo.com".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
        .to_string()
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            enable_cors: default_enable_cors(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - DUCKGATE_HTTP_ADDR: HTTP listen address (default: 127.0.0.1:8787)
    /// - DUCKGATE_ENABLE_CORS: Enable CORS (default: true)
    /// - DUCKGATE_TOKEN: Bearer token required on /v1/* routes
    /// - DUCKGATE_LIMIT: Max requests per rate-limit window (default: 2)
    /// - DUCKGATE_LIMIT_WINDOW_SECS: Rate-limit window in seconds (default: 1)
    /// - DUCKGATE_UPSTREAM_URL: Upstream base URL
    /// - DUCKGATE_USER_AGENT: User agent presented to the upstream
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DUCKGATE_HTTP_ADDR") {
            config.server.listen_addr = addr;
        }

        if let Ok(cors) = std::env::var("DUCKGATE_ENABLE_CORS") {
            config.server.enable_cors = cors.parse().unwrap_or(true);
        }

        if let Ok(token) = std::env::var("DUCKGATE_TOKEN") {
            config.auth.bearer_token = Some(token);
        }

        if let Ok(limit) = std::env::var("DUCKGATE_LIMIT") {
            if let Ok(val) = limit.parse() {
                config.auth.rate_limit.max_requests = val;
            }
        }

        if let Ok(window) = std::env::var("DUCKGATE_LIMIT_WINDOW_SECS") {
            if let Ok(val) = window.parse() {
                config.auth.rate_limit.window_secs = val;
            }
        }

        if let Ok(url) = std::env::var("DUCKGATE_UPSTREAM_URL") {
            config.upstream.base_url = url;
        }

        if let Ok(agent) = std::env::var("DUCKGATE_USER_AGENT") {
            config.upstream.user_agent = agent;
        }

        config
    }

    /// Load configuration with priority: file > env > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        // Override with environment variables
        config = Self::merge_with_env(config);

        Ok(config)
    }

    /// Merge config with environment variables (env takes priority)
    fn merge_with_env(mut config: Self) -> Self {
        let env_config = Self::from_env();

        // Only override if the env var was explicitly set
        if std::env::var("DUCKGATE_HTTP_ADDR").is_ok() {
            config.server.listen_addr = env_config.server.listen_addr;
        }
        if std::env::var("DUCKGATE_ENABLE_CORS").is_ok() {
            config.server.enable_cors = env_config.server.enable_cors;
        }
        if std::env::var("DUCKGATE_TOKEN").is_ok() {
            config.auth.bearer_token = env_config.auth.bearer_token;
        }
        if std::env::var("DUCKGATE_LIMIT").is_ok() {
            config.auth.rate_limit.max_requests = env_config.auth.rate_limit.max_requests;
        }
        if std::env::var("DUCKGATE_LIMIT_WINDOW_SECS").is_ok() {
            config.auth.rate_limit.window_secs = env_config.auth.rate_limit.window_secs;
        }
        if std::env::var("DUCKGATE_UPSTREAM_URL").is_ok() {
            config.upstream.base_url = env_config.upstream.base_url;
        }
        if std::env::var("DUCKGATE_USER_AGENT").is_ok() {
            config.upstream.user_agent = env_config.upstream.user_agent;
        }

        config
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.auth.rate_limit.enabled && self.auth.rate_limit.max_requests == 0 {
            anyhow::bail!("Rate limiting enabled with max_requests = 0 would reject everything");
        }

        if self.auth.rate_limit.enabled && self.auth.rate_limit.window_secs == 0 {
            anyhow::bail!("Rate limit window must be at least one second");
        }

        Ok(())
    }
}
