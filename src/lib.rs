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

//! Duckgate: an OpenAI-compatible gateway in front of duck.ai.
//!
//! The upstream is stateful (a rotating continuation token per session)
//! while the OpenAI chat API is stateless (the full message list arrives
//! on every call). The gateway bridges the two by fingerprinting incoming
//! conversations and correlating them with cached upstream sessions, so
//! a multi-turn chat keeps riding one session instead of replaying from
//! scratch on every request.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod replay;
pub mod upstream;

use anyhow::Result;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{chat_completions, health_check, list_models, AppState};
use auth::{rate_limit_middleware, require_bearer, BearerAuth, RateLimiter};
use cache::SessionCache;
use config::ServerConfig;
use upstream::DuckChat;

/// Build the application router: /health is open, everything under /v1
/// sits behind the rate limiter and (when a token is configured) bearer
/// auth.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let auth = BearerAuth::new(config.auth.bearer_token.clone());
    let limiter = Arc::new(RateLimiter::new(&config.auth.rate_limit));

    let v1 = Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/models", get(list_models))
        .layer(axum_middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(auth, require_bearer));

    Router::new()
        .route("/health", get(health_check))
        .nest("/v1", v1)
        .with_state(state)
        .layer(if config.server.enable_cors {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            CorsLayer::new()
        })
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duckgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Duckgate");

    config.validate()?;

    if config.auth.bearer_token.is_some() {
        tracing::info!("Bearer authentication enabled on /v1 routes");
    } else {
        tracing::warn!("No bearer token configured, /v1 routes are open");
    }

    let backend = DuckChat::new(&config.upstream)?;
    let state = AppState {
        cache: Arc::new(SessionCache::new()),
        backend: Arc::new(backend),
    };

    let app = build_router(state, &config);

    let addr = config.socket_addr()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
    }
}
