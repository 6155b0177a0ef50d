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

//! TCP client for the tokenizer coordinator.
//!
//! The wire format is newline-delimited JSON: one request line, then one
//! response line per event. A generation stream ends when the coordinator
//! closes the connection after the terminal result. Dropping the stream
//! closes our end, which is how cancellation reaches the workers.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::engine::{async_trait, Controller, EngineContext, GenerationClient, ResponseStream};
use crate::protocols::generate::{GenerateRequest, GenerateResult};
use crate::protocols::openai::chat_completions::ChatMessage;
use crate::protocols::TokenIdType;

/// Requests the gateway can put to the coordinator.
#[derive(Serialize, Debug)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
enum CoordinatorRequest<'a> {
    Generate(&'a GenerateRequest),
    Detokenize { token_ids: Vec<TokenIdType> },
    ApplyTemplate { messages: &'a [ChatMessage] },
    FlushCache,
}

#[derive(Deserialize)]
struct DetokenizeResponse {
    texts: Vec<String>,
}

#[derive(Deserialize)]
struct ApplyTemplateResponse {
    prompt: String,
}

/// The gateway's singleton handle to the tokenizer coordinator. Cheap to
/// clone; every call dials a fresh connection.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    addr: String,
}

impl CoordinatorClient {
    pub fn new(addr: String) -> Self {
        Self { addr }
    }

    async fn connect(&self) -> anyhow::Result<Framed<TcpStream, LinesCodec>> {
        let stream = TcpStream::connect(&self.addr).await?;
        Ok(Framed::new(stream, LinesCodec::new()))
    }

    async fn request_one(&self, request: CoordinatorRequest<'_>) -> anyhow::Result<String> {
        let mut framed = self.connect().await?;
        framed.send(serde_json::to_string(&request)?).await?;
        let line = framed
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("coordinator closed the connection without a response"))??;
        Ok(line)
    }
}

#[async_trait]
impl GenerationClient for CoordinatorClient {
    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<ResponseStream> {
        let mut framed = self.connect().await?;
        framed
            .send(serde_json::to_string(&CoordinatorRequest::Generate(&request))?)
            .await?;

        let ctx = Arc::new(Controller::new(format!("gen-{}", uuid::Uuid::new_v4())));
        let stream_ctx = ctx.clone();
        let stream = async_stream::stream! {
            let mut framed = framed;
            while let Some(line) = framed.next().await {
                if stream_ctx.is_stopped() {
                    // dropping `framed` closes the socket; the coordinator
                    // treats the EOF as an abort for this request
                    break;
                }
                match line {
                    Ok(line) => match serde_json::from_str::<GenerateResult>(&line) {
                        Ok(result) => yield Ok(result),
                        Err(err) => {
                            yield Err(anyhow::Error::from(err));
                            break;
                        }
                    },
                    Err(err) => {
                        yield Err(anyhow::Error::from(err));
                        break;
                    }
                }
            }
        };

        Ok(ResponseStream::new(Box::pin(stream), ctx))
    }

    async fn detokenize(&self, token_ids: Vec<TokenIdType>) -> anyhow::Result<Vec<String>> {
        let expected = token_ids.len();
        let line = self
            .request_one(CoordinatorRequest::Detokenize { token_ids })
            .await?;
        let response: DetokenizeResponse = serde_json::from_str(&line)?;
        anyhow::ensure!(
            response.texts.len() == expected,
            "detokenize returned {} texts for {} token ids",
            response.texts.len(),
            expected
        );
        Ok(response.texts)
    }

    async fn apply_template(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let line = self
            .request_one(CoordinatorRequest::ApplyTemplate { messages })
            .await?;
        let response: ApplyTemplateResponse = serde_json::from_str(&line)?;
        Ok(response.prompt)
    }

    async fn flush_cache(&self) -> anyhow::Result<()> {
        self.request_one(CoordinatorRequest::FlushCache).await?;
        Ok(())
    }
}
