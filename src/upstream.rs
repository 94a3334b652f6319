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

//! Upstream conversational backend.
//!
//! duck.ai has no notion of a conversation id. A session is opened against
//! `GET /duckchat/v1/status`, which issues an opaque continuation token in
//! the `x-vqd-4` response header. Every chat call posts the full turn
//! history together with the current token and receives a rotated token
//! back in the same header; the answer arrives as a server-sent event
//! stream of incremental `message` fragments.

use crate::config::UpstreamConfig;
use anyhow::{anyhow, Result};
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Response header carrying the rotating continuation token.
pub const CONTINUATION_HEADER: &str = "x-vqd-4";

/// Models the upstream currently serves.
pub const SUPPORTED_MODELS: &[&str] = &[
    "gpt-4o-mini",
    "o3-mini",
    "claude-3-haiku-20240307",
    "meta-llama/Llama-3.3-70B-Instruct-Turbo",
    "mistralai/Mistral-Small-24B-Instruct-2501",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub content: String,
    pub role: Role,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::User,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::Assistant,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::System,
        }
    }
}

/// Stateful handle to one upstream conversation.
///
/// The token pair is a 2-deep history required by the upstream protocol:
/// after every call the pair shifts, `previous ← current`, `current ← the
/// rotated token from the response`. The history is append-only and grows
/// by one user and one synthesized assistant turn per replayed exchange.
#[derive(Debug, Clone)]
pub struct Session {
    pub model: String,
    pub history: Vec<Turn>,
    pub previous_token: Option<String>,
    pub current_token: Option<String>,
}

impl Session {
    pub fn new(model: impl Into<String>, token: Option<String>) -> Self {
        Self {
            model: model.into(),
            history: Vec::new(),
            previous_token: None,
            current_token: token,
        }
    }
}

/// A session as shared mutable state. Snapshots deep-clone the inner value
/// into a fresh `Arc`; two cache keys never alias the same live session.
pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// One decoded event from the upstream answer stream.
///
/// An event without a `message` field is terminal for the current turn.
/// The `[DONE]` sentinel decodes as an empty (terminal) event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEvent {
    pub id: Option<String>,
    pub created: Option<i64>,
    pub model: Option<String>,
    pub message: Option<String>,
}

/// Handle to one in-flight turn: the rotated continuation token from the
/// response metadata plus the lazily consumed event stream.
pub struct TurnStream {
    pub continuation: Option<String>,
    pub events: BoxStream<'static, Result<StreamEvent>>,
}

/// Capability surface of the upstream backend.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a fresh session bound to `model`, with an initial continuation
    /// token and an empty history.
    async fn open(&self, model: &str) -> Result<Session>;

    /// Submit one user message: append it to the session history and post
    /// the whole history upstream. One outstanding submission per session
    /// at a time; the next submission depends on the rotated token.
    async fn submit(&self, session: &mut Session, content: &str) -> Result<TurnStream>;
}

/// Concrete duck.ai backend.
pub struct DuckChat {
    http: reqwest::Client,
    base_url: String,
}

impl DuckChat {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ChatBackend for DuckChat {
    async fn open(&self, model: &str) -> Result<Session> {
        let response = self
            .http
            .get(format!("{}/duckchat/v1/status", self.base_url))
            .header("x-vqd-accept", "1")
            .send()
            .await?
            .error_for_status()?;

        let token = header_value(response.headers(), CONTINUATION_HEADER)
            .ok_or_else(|| anyhow!("upstream status endpoint did not issue a continuation token"))?;

        debug!(model, "opened upstream session");
        Ok(Session::new(model, Some(token)))
    }

    async fn submit(&self, session: &mut Session, content: &str) -> Result<TurnStream> {
        session.history.push(Turn::user(content));

        let mut request = self
            .http
            .post(format!("{}/duckchat/v1/chat", self.base_url))
            .header(header::ACCEPT, "text/event-stream")
            .json(&json!({
                "model": session.model,
                "messages": session.history,
            }));

        if let Some(token) = &session.current_token {
            request = request.header(CONTINUATION_HEADER, token);
        }

        let response = request.send().await?.error_for_status()?;
        let continuation = header_value(response.headers(), CONTINUATION_HEADER);

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|event| -> Result<StreamEvent> {
                let event = event?;
                if event.data == "[DONE]" {
                    return Ok(StreamEvent::default());
                }
                serde_json::from_str(&event.data).map_err(Into::into)
            })
            .boxed();

        Ok(TurnStream {
            continuation,
            events,
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
