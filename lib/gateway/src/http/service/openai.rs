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

//! Route handlers: the raw `/generate` endpoint and the OpenAI-compatible
//! completions and chat completions endpoints.
//!
//! For streaming requests every upstream partial result becomes one SSE
//! event (`data: <json>`), terminated by the literal `data: [DONE]`. A
//! dropped client is observed through the forwarding channel and stops the
//! upstream generation instead of draining it.

use std::pin::Pin;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use crate::bridge;
use crate::engine::EngineContext;
use crate::protocols::generate::{
    GenerateOutput, GenerateRequest, InputText, SamplingParams, StopSequences,
};
use crate::protocols::openai::chat_completions::{
    ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    MessagesInput,
};
use crate::protocols::openai::completions::{
    created_now, CompletionChoice, CompletionRequest, CompletionResponse,
};
use crate::protocols::openai::{make_openai_style_logprobs, UsageInfo};
use crate::protocols::ProtocolError;

use super::ServiceState;

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

const FLUSH_CACHE_ADVISORY: &str = "Cache flushed.\nPlease check backend logs for more details. \
     (When there are running or waiting requests, the operation will not be performed.)\n";

#[derive(Serialize, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    /// Internal service error. Log the detail, return it to the caller.
    pub fn internal_server_error(msg: &str) -> (StatusCode, Json<ErrorResponse>) {
        tracing::error!("Internal server error: {msg}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: msg.to_string(),
            }),
        )
    }

    /// A transport or upstream failure scoped to one request.
    pub fn from_anyhow(err: anyhow::Error, alt_msg: &str) -> (StatusCode, Json<ErrorResponse>) {
        Self::internal_server_error(&format!("{alt_msg}: {err}"))
    }

    /// A request the caller got wrong; never fatal to the process.
    pub fn from_protocol(err: ProtocolError) -> (StatusCode, Json<ErrorResponse>) {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
    }
}

/// Health check. Succeeds whenever the gateway process is up; does not
/// consult worker state.
pub(crate) async fn health() -> StatusCode {
    StatusCode::OK
}

pub(crate) async fn get_model_info(State(state): State<Arc<ServiceState>>) -> Response {
    Json(serde_json::json!({
        "model_path": state.server_args.model_path,
    }))
    .into_response()
}

pub(crate) async fn get_server_args(State(state): State<Arc<ServiceState>>) -> Response {
    Json(state.server_args.clone()).into_response()
}

pub(crate) async fn flush_cache(
    State(state): State<Arc<ServiceState>>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    state
        .client
        .flush_cache()
        .await
        .map_err(|e| ErrorResponse::from_anyhow(e, "Failed to flush cache"))?;
    Ok((StatusCode::OK, FLUSH_CACHE_ADVISORY).into_response())
}

#[derive(Serialize)]
struct ListModelsResponse {
    object: &'static str,
    data: Vec<ModelListing>,
}

#[derive(Serialize)]
struct ModelListing {
    id: String,
    object: &'static str,
    created: u64,
    owned_by: String,
}

pub(crate) async fn list_models(State(state): State<Arc<ServiceState>>) -> Response {
    let listing = ListModelsResponse {
        object: "list",
        data: vec![ModelListing {
            id: state.server_args.model_path.clone(),
            object: "model",
            created: created_now(),
            owned_by: "gantry".to_string(),
        }],
    };
    Json(listing).into_response()
}

/// Raw generation endpoint: the wire body is the internal request format.
pub(crate) async fn generate(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let request = request.normalize().map_err(ErrorResponse::from_protocol)?;

    let upstream = state
        .client
        .generate(request.clone())
        .await
        .map_err(|e| ErrorResponse::from_anyhow(e, "Failed to dispatch generation"))?;
    let ctx = upstream.context();

    if request.stream {
        let client = state.client.clone();
        let events: EventStream = Box::pin(async_stream::stream! {
            let mut upstream = upstream;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(mut result) => {
                        if let Err(err) =
                            bridge::resolve_result(client.as_ref(), &request, &mut result).await
                        {
                            yield Err(axum::Error::new(err));
                            break;
                        }
                        yield Event::default().json_data(&result);
                    }
                    Err(err) => {
                        yield Err(axum::Error::new(err));
                        break;
                    }
                }
            }
        });
        return Ok(sse_response(events, ctx).await);
    }

    // Non-streaming: the upstream yields exactly one terminal result.
    let mut upstream = upstream;
    let mut result = upstream
        .next()
        .await
        .ok_or_else(|| ErrorResponse::internal_server_error("generation produced no result"))?
        .map_err(|e| ErrorResponse::from_anyhow(e, "Generation failed"))?;

    bridge::resolve_result(state.client.as_ref(), &request, &mut result)
        .await
        .map_err(|e| ErrorResponse::from_anyhow(e, "Failed to resolve logprobs"))?;

    Ok(Json(result).into_response())
}

/// OpenAI completions endpoint.
pub(crate) async fn completions(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<CompletionRequest>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    request.validate().map_err(ErrorResponse::from_protocol)?;

    let adapted = request
        .to_generate_request()
        .normalize()
        .map_err(ErrorResponse::from_protocol)?;

    let upstream = state
        .client
        .generate(adapted)
        .await
        .map_err(|e| ErrorResponse::from_anyhow(e, "Failed to dispatch generation"))?;
    let ctx = upstream.context();

    if request.stream {
        let client = state.client.clone();
        let logprobs = request.logprobs_requested();
        let mut generator = request.response_generator();
        let events: EventStream = Box::pin(async_stream::stream! {
            let mut upstream = upstream;
            while let Some(item) = upstream.next().await {
                let mut output = match next_output(item) {
                    Ok(output) => output,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                };
                if logprobs {
                    if let Err(err) = bridge::resolve_meta_info(
                        client.as_ref(),
                        &mut output.meta_info,
                        true,
                    )
                    .await
                    {
                        yield Err(axum::Error::new(err));
                        break;
                    }
                }
                let chunk = generator.next_chunk(&output);
                yield Event::default().json_data(&chunk);
            }
        });
        return Ok(sse_response(events, ctx).await);
    }

    // Non-streaming response.
    let mut upstream = upstream;
    let result = upstream
        .next()
        .await
        .ok_or_else(|| ErrorResponse::internal_server_error("generation produced no result"))?
        .map_err(|e| ErrorResponse::from_anyhow(e, "Generation failed"))?;
    let mut output = result
        .into_first()
        .ok_or_else(|| ErrorResponse::internal_server_error("generation produced an empty batch"))?;

    if request.logprobs_requested() {
        bridge::resolve_meta_info(state.client.as_ref(), &mut output.meta_info, true)
            .await
            .map_err(|e| ErrorResponse::from_anyhow(e, "Failed to resolve logprobs"))?;
    }

    let meta = &output.meta_info;

    let mut text = output.text.clone();
    if request.echo {
        text = format!("{}{}", request.prompt, text);
    }

    let logprobs = if request.logprobs_requested() {
        // Prefill-side records are reported only when the caller asked for
        // the prompt back.
        let (prefill_tokens, prefill_top) = if request.echo {
            (
                meta.prefill_token_logprobs.as_deref(),
                meta.prefill_top_logprobs.as_deref(),
            )
        } else {
            (None, None)
        };
        Some(make_openai_style_logprobs(
            prefill_tokens,
            meta.decode_token_logprobs.as_deref(),
            prefill_top,
            meta.decode_top_logprobs.as_deref(),
        ))
    } else {
        None
    };

    let response = CompletionResponse {
        id: meta.id.clone(),
        object: "text_completion".to_string(),
        created: created_now(),
        model: request.model.clone(),
        choices: vec![CompletionChoice {
            index: 0,
            text,
            logprobs,
            finish_reason: None,
        }],
        usage: UsageInfo::new(meta.prompt_tokens, meta.completion_tokens),
    };

    Ok(Json(response).into_response())
}

/// OpenAI chat completions endpoint.
pub(crate) async fn chat_completions(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    request.validate().map_err(ErrorResponse::from_protocol)?;

    let caller_stop = || {
        request
            .stop
            .clone()
            .map(StopSequences::into_vec)
            .unwrap_or_default()
    };

    // Derive the prompt, the stop strings, and any image attachments.
    let (prompt, stop, image_data) = match &request.messages {
        // a plain string is a pre-rendered prompt; no template involved
        MessagesInput::Prompt(prompt) => (prompt.clone(), caller_stop(), None),
        MessagesInput::Chat(messages) => match &state.chat_template {
            Some(template) => {
                let rendered = template
                    .render(messages)
                    .map_err(ErrorResponse::from_protocol)?;
                // template stops are seeded first, caller stops appended
                let mut stop = rendered.stop;
                stop.extend(caller_stop());
                (rendered.prompt, stop, rendered.image_data)
            }
            None => {
                // Template-free mode can only render plain text. Fail fast
                // before touching the tokenizer.
                if messages
                    .iter()
                    .any(|message| message.content.as_text().is_none())
                {
                    return Err(ErrorResponse::from_protocol(
                        ProtocolError::StructuredContentWithoutTemplate,
                    ));
                }
                let prompt = state
                    .client
                    .apply_template(messages)
                    .await
                    .map_err(|e| ErrorResponse::from_anyhow(e, "Failed to render chat prompt"))?;
                (prompt, caller_stop(), None)
            }
        },
    };

    let adapted = GenerateRequest {
        text: InputText::Single(prompt),
        image_data,
        sampling_params: SamplingParams {
            temperature: request.temperature,
            max_new_tokens: Some(request.max_tokens),
            stop: if stop.is_empty() {
                None
            } else {
                Some(StopSequences::Many(stop))
            },
            top_p: request.top_p,
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
            regex: request.regex.clone(),
        },
        stream: request.stream,
        return_logprob: Default::default(),
        top_logprobs_num: Default::default(),
        return_text_in_logprobs: false,
    }
    .normalize()
    .map_err(ErrorResponse::from_protocol)?;

    let upstream = state
        .client
        .generate(adapted)
        .await
        .map_err(|e| ErrorResponse::from_anyhow(e, "Failed to dispatch generation"))?;
    let ctx = upstream.context();

    if request.stream {
        let mut generator = request.response_generator();
        let events: EventStream = Box::pin(async_stream::stream! {
            let mut upstream = upstream;
            while let Some(item) = upstream.next().await {
                let output = match next_output(item) {
                    Ok(output) => output,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                };
                // chunk zero announces the role, once per stream
                if let Some(role_chunk) = generator.role_chunk(&output.meta_info) {
                    yield Event::default().json_data(&role_chunk);
                }
                let chunk = generator.content_chunk(&output);
                yield Event::default().json_data(&chunk);
            }
        });
        return Ok(sse_response(events, ctx).await);
    }

    // Non-streaming response.
    let mut upstream = upstream;
    let result = upstream
        .next()
        .await
        .ok_or_else(|| ErrorResponse::internal_server_error("generation produced no result"))?
        .map_err(|e| ErrorResponse::from_anyhow(e, "Generation failed"))?;
    let output = result
        .into_first()
        .ok_or_else(|| ErrorResponse::internal_server_error("generation produced an empty batch"))?;

    let meta = &output.meta_info;
    let response = ChatCompletionResponse {
        id: meta.id.clone(),
        object: "chat.completion".to_string(),
        created: created_now(),
        model: request.model.clone(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatMessage::assistant(output.text.clone()),
            finish_reason: None,
        }],
        usage: UsageInfo::new(meta.prompt_tokens, meta.completion_tokens),
    };

    Ok(Json(response).into_response())
}

/// Unwrap one upstream item for a single-choice stream.
fn next_output(
    item: anyhow::Result<crate::protocols::generate::GenerateResult>,
) -> Result<GenerateOutput, axum::Error> {
    match item {
        Ok(result) => result
            .into_first()
            .ok_or_else(|| axum::Error::new("upstream produced an empty batch")),
        Err(err) => Err(axum::Error::new(err)),
    }
}

/// Forward SSE events through a channel so a dropped receiver is
/// observable. On disconnect the upstream context is told to stop
/// generating rather than being drained to completion.
async fn monitor_for_disconnects(
    stream: EventStream,
    context: Arc<dyn EngineContext>,
) -> ReceiverStream<Result<Event, axum::Error>> {
    let (tx, rx) = tokio::sync::mpsc::channel(8);

    tokio::spawn(async move {
        let mut stream = stream;
        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => Ok(event),
                Err(err) => Ok(Event::default().event("error").comment(err.to_string())),
            };

            if (tx.send(event).await).is_err() {
                tracing::trace!("SSE receiver dropped; stopping generation");
                context.stop_generating();
                break;
            }
        }

        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    ReceiverStream::new(rx)
}

async fn sse_response(events: EventStream, ctx: Arc<dyn EngineContext>) -> Response {
    let stream = monitor_for_disconnects(events, ctx).await;
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
