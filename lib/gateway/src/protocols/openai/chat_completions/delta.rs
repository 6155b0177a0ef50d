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

use crate::protocols::generate::{GenerateOutput, MetaInfo};
use crate::protocols::openai::completions::created_now;

use super::{
    ChatCompletionRequest, ChatCompletionStreamChoice, ChatCompletionStreamResponse, DeltaMessage,
};

impl ChatCompletionRequest {
    /// One generator per streamed request; it owns the stream state.
    pub fn response_generator(&self) -> DeltaGenerator {
        DeltaGenerator::new(self.model.clone())
    }
}

/// Turns cumulative upstream results into chat stream chunks. Chunk zero
/// of every stream is a role announcement with no text payload; content
/// deltas follow.
#[derive(Debug, Clone)]
pub struct DeltaGenerator {
    model: String,
    created: u64,
    msg_counter: u64,

    /// Cumulative upstream text already emitted.
    stream_buffer: String,
}

impl DeltaGenerator {
    pub fn new(model: String) -> Self {
        Self {
            model,
            created: created_now(),
            msg_counter: 0,
            stream_buffer: String::new(),
        }
    }

    fn chunk(&self, meta: &MetaInfo, delta: DeltaMessage) -> ChatCompletionStreamResponse {
        ChatCompletionStreamResponse {
            id: meta.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
        }
    }

    /// The leading role-announcement chunk, emitted once per stream.
    pub fn role_chunk(&mut self, meta: &MetaInfo) -> Option<ChatCompletionStreamResponse> {
        if self.msg_counter > 0 {
            return None;
        }
        self.msg_counter += 1;
        Some(self.chunk(
            meta,
            DeltaMessage {
                role: Some("assistant".to_string()),
                content: None,
            },
        ))
    }

    /// A content delta chunk: the suffix past what was already emitted.
    pub fn content_chunk(&mut self, output: &GenerateOutput) -> ChatCompletionStreamResponse {
        let delta = output.text[self.stream_buffer.len()..].to_string();
        self.stream_buffer = output.text.clone();
        self.msg_counter += 1;
        self.chunk(
            &output.meta_info,
            DeltaMessage {
                role: None,
                content: Some(delta),
            },
        )
    }
}
