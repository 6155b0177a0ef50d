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

//! The interface the gateway consumes to reach the tokenizer coordinator.
//!
//! Generation is a pull interface: the coordinator produces a finite,
//! non-restartable sequence of partial results which the gateway's event
//! loop consumes. Cancellation flows the other way: the consumer stops
//! iterating and signals [`EngineContext::stop_generating`], which the
//! producer must observe to release its resources.

use std::fmt::Debug;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

pub use async_trait::async_trait;
use futures::Stream;

use crate::protocols::generate::{GenerateRequest, GenerateResult};
use crate::protocols::openai::chat_completions::ChatMessage;
use crate::protocols::TokenIdType;

pub type DataStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Control handle for one in-flight generation stream.
pub trait EngineContext: Send + Sync + Debug {
    /// Unique ID for the stream.
    fn id(&self) -> &str;

    /// True once `stop_generating()` has been called.
    fn is_stopped(&self) -> bool;

    /// Ask the producer to stop yielding results for this stream.
    /// Idempotent; results already in flight may still be delivered.
    fn stop_generating(&self);
}

/// A stream of partial results paired with its control context.
pub struct ResponseStream {
    stream: DataStream<anyhow::Result<GenerateResult>>,
    ctx: Arc<dyn EngineContext>,
}

impl ResponseStream {
    pub fn new(stream: DataStream<anyhow::Result<GenerateResult>>, ctx: Arc<dyn EngineContext>) -> Self {
        Self { stream, ctx }
    }

    pub fn context(&self) -> Arc<dyn EngineContext> {
        self.ctx.clone()
    }
}

impl Stream for ResponseStream {
    type Item = anyhow::Result<GenerateResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

/// The generation client: the gateway's handle to the tokenizer
/// coordinator. Implementations live out of process; every method is an
/// asynchronous boundary call and must not block the event loop.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Submit a normalized [`GenerateRequest`]. Streaming requests yield a
    /// sequence of partial results in production order; non-streaming
    /// requests yield exactly one terminal result.
    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<ResponseStream>;

    /// Convert token ids to text, one string per id, order preserved.
    async fn detokenize(&self, token_ids: Vec<TokenIdType>) -> anyhow::Result<Vec<String>>;

    /// Render chat messages through the tokenizer's own chat template.
    /// Used when the gateway has no template of its own configured.
    async fn apply_template(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;

    /// Advisory cache flush; a no-op while requests are in flight.
    async fn flush_cache(&self) -> anyhow::Result<()>;
}

/// Plain [`EngineContext`] backed by an atomic stop flag. Producers poll
/// [`Controller::is_stopped`] between yields.
#[derive(Debug)]
pub struct Controller {
    id: String,
    stopped: AtomicBool,
}

impl Controller {
    pub fn new(id: String) -> Self {
        Self {
            id,
            stopped: AtomicBool::new(false),
        }
    }
}

impl EngineContext for Controller {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn stop_generating(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
