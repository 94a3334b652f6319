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

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub mod rate_limit;
pub use rate_limit::{rate_limit_middleware, RateLimiter};

/// Authentication error
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Invalid authentication credentials")]
    InvalidCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Static bearer-token authenticator. When no token is configured every
/// request passes; this mirrors running the gateway privately.
#[derive(Clone)]
pub struct BearerAuth {
    token: Option<Arc<String>>,
}

impl BearerAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.map(Arc::new),
        }
    }

    pub fn enabled(&self) -> bool {
        self.token.is_some()
    }

    fn verify(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let Some(expected) = &self.token else {
            return Ok(());
        };

        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingCredentials)?;

        if presented != expected.as_str() {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(())
    }
}

/// Bearer-auth middleware for the /v1 routes.
pub async fn require_bearer(
    State(auth): State<BearerAuth>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(error) = auth.verify(request.headers()) {
        return error.into_response();
    }

    next.run(request).await
}
