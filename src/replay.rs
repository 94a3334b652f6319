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

//! Streaming replay driver.
//!
//! Drives a session forward one user turn at a time, consuming each
//! turn's event stream and accumulating the assistant's text. The driver
//! is sequential by construction: each submission depends on the token
//! rotation left behind by the previous one, so turns never overlap.

use crate::upstream::{ChatBackend, Session, Turn};
use anyhow::{anyhow, Result};
use futures::StreamExt;
use tracing::debug;

/// Identifying metadata and the assembled text of the final replayed turn.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub text: String,
}

/// Replay `turns` through `session`, one user turn at a time.
///
/// Only even indices are submitted; odd indices are assumed to be
/// already-known assistant turns (the list is pre-normalized to alternate
/// user/assistant starting at user). Per turn: consume the event stream
/// strictly in arrival order, concatenating `message` fragments until an
/// event without a `message` or the end of the stream, whichever comes
/// first; shift the session's token pair; append the synthesized
/// assistant turn to the session history.
///
/// Errors are fatal to the in-flight request and are not retried here:
/// transport failures propagate as-is, and a final turn whose stream
/// never carried response metadata leaves nothing to answer with.
pub async fn replay(
    backend: &dyn ChatBackend,
    session: &mut Session,
    turns: &[Turn],
) -> Result<ReplayOutcome> {
    let mut text = String::new();
    let mut meta: Option<(String, i64, String)> = None;

    for turn in turns.iter().step_by(2) {
        text.clear();
        meta = None;

        let mut reply = backend.submit(session, &turn.content).await?;

        while let Some(event) = reply.events.next().await {
            let event = event?;
            if let (Some(id), Some(created), Some(model)) =
                (&event.id, event.created, &event.model)
            {
                meta = Some((id.clone(), created, model.clone()));
            }
            match event.message {
                Some(fragment) => text.push_str(&fragment),
                None => break,
            }
        }

        session.previous_token = session.current_token.take();
        session.current_token = reply.continuation;
        session.history.push(Turn::assistant(text.clone()));
        debug!(
            history = session.history.len(),
            chars = text.len(),
            "turn complete"
        );
    }

    let (id, created, model) =
        meta.ok_or_else(|| anyhow!("upstream stream ended without response metadata"))?;

    Ok(ReplayOutcome {
        id,
        created,
        model,
        text,
    })
}
