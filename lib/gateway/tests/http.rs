// SPDX-FileCopyrightText: Copyright (c) 2025 Gantry Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Integration tests driving the real router with a scripted generation
//! client, no sockets involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use gantry_gateway::config::ServerArgs;
use gantry_gateway::conversation::ChatTemplate;
use gantry_gateway::engine::{async_trait, Controller, GenerationClient, ResponseStream};
use gantry_gateway::http::service::HttpService;
use gantry_gateway::protocols::generate::{
    GenerateOutput, GenerateRequest, GenerateResult, MetaInfo, StopSequences, TokenLogprob,
};
use gantry_gateway::protocols::TokenIdType;

/// Generation client with a scripted cumulative-output sequence.
struct MockClient {
    outputs: Vec<GenerateOutput>,
    vocab: HashMap<TokenIdType, String>,
    generate_calls: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockClient {
    fn new(outputs: Vec<GenerateOutput>) -> Self {
        Self {
            outputs,
            vocab: HashMap::from([(1, "a".to_string()), (2, "b".to_string())]),
            generate_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn last_request(&self) -> GenerateRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<ResponseStream> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let streaming = request.stream;
        self.requests.lock().unwrap().push(request);

        let items: Vec<anyhow::Result<GenerateResult>> = if streaming {
            self.outputs
                .iter()
                .cloned()
                .map(|output| Ok(GenerateResult::Single(output)))
                .collect()
        } else {
            vec![Ok(GenerateResult::Single(
                self.outputs.last().cloned().unwrap_or_default(),
            ))]
        };

        let ctx = Arc::new(Controller::new("mock-gen".to_string()));
        Ok(ResponseStream::new(
            Box::pin(futures::stream::iter(items)),
            ctx,
        ))
    }

    async fn detokenize(&self, token_ids: Vec<TokenIdType>) -> anyhow::Result<Vec<String>> {
        Ok(token_ids
            .iter()
            .map(|id| self.vocab.get(id).cloned().unwrap_or_default())
            .collect())
    }

    async fn apply_template(&self, messages: &[gantry_gateway::protocols::openai::chat_completions::ChatMessage]) -> anyhow::Result<String> {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str(&message.role);
            prompt.push_str(": ");
            prompt.push_str(message.content.as_text().unwrap_or_default());
            prompt.push('\n');
        }
        prompt.push_str("assistant:");
        Ok(prompt)
    }

    async fn flush_cache(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn server_args(api_key: Option<&str>) -> ServerArgs {
    ServerArgs {
        model_path: "/models/test-model".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        coordinator_port: 0,
        scheduler_port: 0,
        detokenizer_port: 0,
        chat_template: None,
        api_key: api_key.map(str::to_string),
        log_level: "error".to_string(),
        scheduler_cmd: "true".to_string(),
        detokenizer_cmd: "true".to_string(),
    }
}

fn output(text: &str, completion_tokens: u32) -> GenerateOutput {
    GenerateOutput {
        text: text.to_string(),
        meta_info: MetaInfo {
            id: "gen-test".to_string(),
            prompt_tokens: 3,
            completion_tokens,
            ..MetaInfo::default()
        },
    }
}

fn scripted_outputs() -> Vec<GenerateOutput> {
    vec![
        output(" a", 1),
        output(" a b", 2),
        output(" a b c", 3),
    ]
}

fn app(
    outputs: Vec<GenerateOutput>,
    api_key: Option<&str>,
    chat_template: Option<ChatTemplate>,
) -> (Router, Arc<MockClient>) {
    let client = Arc::new(MockClient::new(outputs));
    let mut builder = HttpService::builder()
        .client(client.clone() as Arc<dyn GenerationClient>)
        .server_args(server_args(api_key));
    if let Some(template) = chat_template {
        builder = builder.chat_template(Some(template));
    }
    let service = builder.build().unwrap();
    (service.router(), client)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Extract the `data:` payloads of an SSE body, in order.
fn sse_data(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|payload| payload.to_string())
        .collect()
}

#[tokio::test]
async fn health_always_succeeds() {
    let (app, _client) = app(vec![], None, None);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.is_empty());
}

#[tokio::test]
async fn get_model_info_reports_the_model_path() {
    let (app, _client) = app(vec![], None, None);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/get_model_info")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["model_path"], "/models/test-model");
}

#[tokio::test]
async fn missing_api_key_is_rejected_before_any_dispatch() {
    let (app, client) = app(scripted_outputs(), Some("secret"), None);

    let response = app
        .clone()
        .oneshot(post_json(
            "/generate",
            serde_json::json!({"text": "hi", "stream": false}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_string(response).await,
        r#"{"detail":"Invalid API Key"}"#
    );
    assert_eq!(client.generate_calls.load(Ordering::SeqCst), 0);

    // a wrong key is as bad as none
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/generate")
                .header(header::CONTENT_TYPE, "application/json")
                .header("X-API-Key", "not-the-secret")
                .body(Body::from(
                    serde_json::json!({"text": "hi"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(client.generate_calls.load(Ordering::SeqCst), 0);

    // the exact key passes through to the handler
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/generate")
                .header(header::CONTENT_TYPE, "application/json")
                .header("X-API-Key", "secret")
                .body(Body::from(
                    serde_json::json!({"text": "hi", "stream": false}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(client.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generate_returns_the_terminal_result() {
    let (app, _client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/generate",
            serde_json::json!({"text": "hi", "stream": false}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["text"], " a b c");
    assert_eq!(body["meta_info"]["id"], "gen-test");
}

#[tokio::test]
async fn generate_streams_events_with_done_terminator() {
    let (app, _client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/generate",
            serde_json::json!({"text": "hi", "stream": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let events = sse_data(&body);
    assert_eq!(events.len(), 4);
    assert_eq!(events.last().unwrap(), "[DONE]");

    let first: serde_json::Value = serde_json::from_str(&events[0]).unwrap();
    assert_eq!(first["text"], " a");
}

#[tokio::test]
async fn completions_usage_arithmetic_holds() {
    let (app, _client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/v1/completions",
            serde_json::json!({
                "model": "test-model",
                "prompt": "Once",
                "stream": false,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["choices"][0]["text"], " a b c");
    let usage = &body["usage"];
    assert_eq!(
        usage["total_tokens"].as_u64().unwrap(),
        usage["prompt_tokens"].as_u64().unwrap() + usage["completion_tokens"].as_u64().unwrap()
    );
}

#[tokio::test]
async fn completions_stream_deltas_reassemble_the_final_text() {
    let (app, _client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/v1/completions",
            serde_json::json!({
                "model": "test-model",
                "prompt": "Once",
                "stream": true,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let events = sse_data(&body);
    assert_eq!(events.last().unwrap(), "[DONE]");

    let mut assembled = String::new();
    for payload in &events[..events.len() - 1] {
        let chunk: serde_json::Value = serde_json::from_str(payload).unwrap();
        assembled.push_str(chunk["choices"][0]["text"].as_str().unwrap());
    }
    assert_eq!(assembled, " a b c");
}

#[tokio::test]
async fn completions_stream_resolves_logprob_text() {
    let mut outputs = scripted_outputs();
    outputs[0].meta_info.decode_token_logprobs = Some(vec![TokenLogprob(-0.1, 1, None)]);
    outputs[1].meta_info.decode_token_logprobs = Some(vec![
        TokenLogprob(-0.1, 1, None),
        TokenLogprob(-0.2, 2, None),
    ]);
    outputs[2].meta_info.decode_token_logprobs = Some(vec![
        TokenLogprob(-0.1, 1, None),
        TokenLogprob(-0.2, 2, None),
    ]);
    let (app, _client) = app(outputs, None, None);

    let response = app
        .oneshot(post_json(
            "/v1/completions",
            serde_json::json!({
                "model": "test-model",
                "prompt": "Once",
                "stream": true,
                "logprobs": 1,
            }),
        ))
        .await
        .unwrap();

    let body = body_string(response).await;
    let events = sse_data(&body);

    let first: serde_json::Value = serde_json::from_str(&events[0]).unwrap();
    assert_eq!(first["choices"][0]["logprobs"]["tokens"][0], "a");
    let second: serde_json::Value = serde_json::from_str(&events[1]).unwrap();
    // only the newly appended record rides on the second chunk
    assert_eq!(second["choices"][0]["logprobs"]["tokens"][0], "b");
    assert_eq!(
        second["choices"][0]["logprobs"]["tokens"]
            .as_array()
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn completions_reject_multiple_choices_before_dispatch() {
    let (app, client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/v1/completions",
            serde_json::json!({
                "model": "test-model",
                "prompt": "Once",
                "n": 2,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("n=2"));
    assert_eq!(client.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chat_rejects_multiple_choices_before_dispatch() {
    let (app, client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "hi"}],
                "n": 2,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(client.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chat_structured_content_without_template_is_rejected() {
    let (app, client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({
                "model": "test-model",
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "what is this?"},
                        {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}}
                    ]
                }],
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(body_string(response).await.contains("chat template"));
    assert_eq!(client.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chat_stream_announces_the_role_first() {
    let (app, _client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let events = sse_data(&body);
    assert_eq!(events.last().unwrap(), "[DONE]");

    // chunk zero: role announcement with no text payload
    let first: serde_json::Value = serde_json::from_str(&events[0]).unwrap();
    assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
    assert!(first["choices"][0]["delta"]
        .as_object()
        .unwrap()
        .get("content")
        .is_none());

    let mut assembled = String::new();
    for payload in &events[1..events.len() - 1] {
        let chunk: serde_json::Value = serde_json::from_str(payload).unwrap();
        assembled.push_str(chunk["choices"][0]["delta"]["content"].as_str().unwrap());
    }
    assert_eq!(assembled, " a b c");
}

#[tokio::test]
async fn chat_template_stops_are_seeded_before_caller_stops() {
    let template = ChatTemplate::builtin("chatml").unwrap();
    let (app, client) = app(scripted_outputs(), None, Some(template));

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "hi"}],
                "stop": "CALLER_STOP",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let dispatched = client.last_request();
    let Some(StopSequences::Many(stops)) = dispatched.sampling_params.stop else {
        panic!("expected merged stop list");
    };
    assert_eq!(stops, vec!["<|im_end|>".to_string(), "CALLER_STOP".to_string()]);

    // the rendered prompt, not the raw messages, was dispatched
    let gantry_gateway::protocols::generate::InputText::Single(prompt) = dispatched.text else {
        panic!("expected a single rendered prompt");
    };
    assert!(prompt.contains("<|im_start|>user\nhi"));
    assert!(prompt.ends_with("<|im_start|>assistant\n"));
}

#[tokio::test]
async fn chat_prerendered_prompt_string_bypasses_templates() {
    let (app, client) = app(scripted_outputs(), None, None);

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({
                "model": "test-model",
                "messages": "already rendered prompt",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let dispatched = client.last_request();
    assert_eq!(
        dispatched.text,
        gantry_gateway::protocols::generate::InputText::Single(
            "already rendered prompt".to_string()
        )
    );
}

#[tokio::test]
async fn flush_cache_returns_the_advisory_body() {
    let (app, _client) = app(vec![], None, None);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/flush_cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.starts_with("Cache flushed."));
}
