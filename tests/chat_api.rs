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

//! End-to-end tests against the in-process router with a scripted
//! backend in place of the live upstream.

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use duckgate::api::AppState;
use duckgate::cache::SessionCache;
use duckgate::config::ServerConfig;
use duckgate::upstream::{ChatBackend, Session, StreamEvent, Turn, TurnStream};
use duckgate::build_router;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Answers every question with `ok: <question>` so replies are
/// reproducible across replays of the same conversation.
struct EchoBackend {
    submissions: Mutex<Vec<String>>,
    calls: AtomicU32,
}

impl EchoBackend {
    fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatBackend for EchoBackend {
    async fn open(&self, model: &str) -> Result<Session> {
        Ok(Session::new(model, Some("vqd-0".into())))
    }

    async fn submit(&self, session: &mut Session, content: &str) -> Result<TurnStream> {
        self.submissions.lock().unwrap().push(content.to_string());
        session.history.push(Turn::user(content));

        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let answer = format!("ok: {content}");
        let (head, tail) = answer.split_at(answer.len() / 2);

        let model = session.model.clone();
        let events = vec![
            StreamEvent {
                id: Some("chatcmpl-test".into()),
                created: Some(1_700_000_000),
                model: Some(model.clone()),
                message: Some(head.to_string()),
            },
            StreamEvent {
                id: Some("chatcmpl-test".into()),
                created: Some(1_700_000_000),
                model: Some(model),
                message: Some(tail.to_string()),
            },
            StreamEvent::default(),
        ];

        Ok(TurnStream {
            continuation: Some(format!("vqd-{call}")),
            events: stream::iter(events.into_iter().map(Ok)).boxed(),
        })
    }
}

struct TestApp {
    router: Router,
    cache: Arc<SessionCache>,
    backend: Arc<EchoBackend>,
}

fn test_app(configure: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let mut config = ServerConfig::default();
    config.auth.rate_limit.enabled = false;
    configure(&mut config);

    let cache = Arc::new(SessionCache::new());
    let backend = Arc::new(EchoBackend::new());
    let state = AppState {
        cache: cache.clone(),
        backend: backend.clone(),
    };

    TestApp {
        router: build_router(state, &config),
        cache,
        backend,
    }
}

async fn post_chat(router: &Router, contents: &[&str]) -> (StatusCode, Value) {
    let messages: Vec<Value> = contents
        .iter()
        .enumerate()
        .map(|(i, content)| {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            json!({"role": role, "content": content})
        })
        .collect();

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"model": "gpt-4o-mini", "messages": messages}).to_string(),
        ))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn content_of(body: &Value) -> &str {
    body["choices"][0]["message"]["content"].as_str().unwrap()
}

#[tokio::test]
async fn test_single_turn_completion() {
    let app = test_app(|_| {});

    let (status, body) = post_chat(&app.router, &["Hi"]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(content_of(&body), "ok: Hi");

    // An opening exchange is too shallow to be worth caching.
    assert!(app.cache.is_empty());
    assert_eq!(app.backend.submissions(), vec!["Hi"]);
}

#[tokio::test]
async fn test_multi_turn_conversation_reuses_cached_session() {
    let app = test_app(|_| {});

    let (_, first) = post_chat(&app.router, &["Hi"]).await;
    let a1 = content_of(&first).to_string();

    // Second request replays from scratch: the first exchange was never
    // cached, so both turns go upstream again.
    let (_, second) = post_chat(&app.router, &["Hi", &a1, "Second"]).await;
    let a2 = content_of(&second).to_string();
    assert_eq!(a2, "ok: Second");
    assert_eq!(app.backend.submissions(), vec!["Hi", "Hi", "Second"]);
    assert_eq!(app.cache.len(), 1);

    // Third request continues the cached session: only the new turn is
    // driven upstream.
    let (_, third) = post_chat(&app.router, &["Hi", &a1, "Second", &a2, "Third"]).await;
    assert_eq!(content_of(&third), "ok: Third");
    assert_eq!(
        app.backend.submissions(),
        vec!["Hi", "Hi", "Second", "Third"]
    );

    // The pre-advance snapshot stays behind for a redo of "Third", and
    // the advanced session is stored under its new fingerprint.
    assert_eq!(app.cache.len(), 2);
}

#[tokio::test]
async fn test_redo_forks_from_snapshot_instead_of_advanced_session() {
    let app = test_app(|_| {});

    let (_, first) = post_chat(&app.router, &["Hi"]).await;
    let a1 = content_of(&first).to_string();
    let (_, second) = post_chat(&app.router, &["Hi", &a1, "Second"]).await;
    let a2 = content_of(&second).to_string();
    let (_, _third) = post_chat(&app.router, &["Hi", &a1, "Second", &a2, "Third"]).await;

    // The client regenerates with a different final question. The turn
    // list matches the snapshot taken before "Third" advanced the
    // session, so only the replacement goes upstream.
    let (status, redo) = post_chat(&app.router, &["Hi", &a1, "Second", &a2, "Different"]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_of(&redo), "ok: Different");
    assert_eq!(
        app.backend.submissions(),
        vec!["Hi", "Hi", "Second", "Third", "Different"]
    );
}

#[tokio::test]
async fn test_empty_messages_are_a_bad_request() {
    let app = test_app(|_| {});

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"model": "gpt-4o-mini", "messages": []}).to_string(),
        ))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_is_reachable_without_auth() {
    let app = test_app(|config| {
        config.auth.bearer_token = Some("secret".into());
    });

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_v1_requires_bearer_token_when_configured() {
    let app = test_app(|config| {
        config.auth.bearer_token = Some("secret".into());
    });

    let bare = Request::builder()
        .uri("/v1/models")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(bare).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let authed = Request::builder()
        .uri("/v1/models")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(authed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_models_endpoint_lists_upstream_models() {
    let app = test_app(|_| {});

    let request = Request::builder()
        .uri("/v1/models")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"gpt-4o-mini"));
}

#[tokio::test]
async fn test_rate_limit_rejects_over_budget_requests() {
    let app = test_app(|config| {
        config.auth.rate_limit.enabled = true;
        config.auth.rate_limit.max_requests = 2;
        config.auth.rate_limit.window_secs = 60;
    });

    for _ in 0..2 {
        let request = Request::builder()
            .uri("/v1/models")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let request = Request::builder()
        .uri("/v1/models")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("Retry-After"));
}
