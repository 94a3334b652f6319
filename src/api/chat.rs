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

//! POST /v1/chat/completions
//!
//! The handler correlates the incoming turn list with a cached upstream
//! session, replays only the turns the session has not seen, and wraps
//! the assembled answer in an OpenAI-style envelope.

use crate::api::{ApiError, AppState};
use crate::replay::replay;
use crate::upstream::{Role, Turn};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A session still in its opening exchange has no redo target worth
/// snapshotting; from this many recorded turns on, a pre-advance copy is
/// kept for forking.
const BRANCH_MIN_HISTORY: usize = 3;

/// A finished exchange is re-cached under its new fingerprint only once
/// the conversation is deep enough to be resumed or redone.
const CACHE_MIN_HISTORY: usize = 4;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatChoiceMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ChatChoiceMessage {
    pub role: Role,
    pub content: String,
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>, ApiError> {
    let turns = normalize_turns(request.messages)?;

    let shared = match state.cache.lookup(&turns) {
        Some(session) => session,
        None => {
            let session = state
                .backend
                .open(&request.model)
                .await
                .map_err(|e| ApiError::Upstream(format!("failed to open upstream session: {e:#}")))?;
            Arc::new(Mutex::new(session))
        }
    };

    let mut session = shared.lock().await;

    // Branch before mutate: keep a pristine deep copy of the pre-advance
    // state under its current fingerprint so a redo against this exact
    // prefix forks from here instead of the advanced live session.
    if session.history.len() >= BRANCH_MIN_HISTORY {
        let snapshot = Arc::new(Mutex::new(session.clone()));
        state.cache.insert(&session.history, snapshot);
    }

    let start = unseen_start(session.history.len(), turns.len());
    debug!(
        total = turns.len(),
        start,
        history = session.history.len(),
        "replaying turns"
    );

    let outcome = replay(state.backend.as_ref(), &mut session, &turns[start..])
        .await
        .map_err(|e| ApiError::Upstream(format!("{e:#}")))?;

    if session.history.len() >= CACHE_MIN_HISTORY {
        state.cache.insert(&session.history, Arc::clone(&shared));
    }
    drop(session);

    Ok(Json(ChatCompletionResponse {
        id: outcome.id,
        object: "chat.completion",
        created: outcome.created,
        model: outcome.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatChoiceMessage {
                role: Role::Assistant,
                content: outcome.text,
            },
            finish_reason: "stop",
        }],
    }))
}

/// Fold a leading system turn into the first user turn (its content is
/// prepended) so the conversation starts at a user turn.
fn normalize_turns(mut messages: Vec<Turn>) -> Result<Vec<Turn>, ApiError> {
    if messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".into()));
    }

    if messages[0].role == Role::System {
        if messages.len() < 2 {
            return Err(ApiError::BadRequest(
                "a system message must be followed by a user message".into(),
            ));
        }
        let system = messages.remove(0);
        messages[0].content = format!("{}{}", system.content, messages[0].content);
    }

    Ok(messages)
}

/// Index of the first turn the session has not recorded yet.
///
/// On an exact fingerprint hit the history already covers the whole
/// list; the final user turn is re-driven so the reply can be rebuilt
/// from a live stream on the session's reused token chain.
fn unseen_start(history_len: usize, total: usize) -> usize {
    if history_len < total {
        history_len
    } else if total % 2 == 0 {
        total.saturating_sub(2)
    } else {
        total.saturating_sub(1)
    }
}
