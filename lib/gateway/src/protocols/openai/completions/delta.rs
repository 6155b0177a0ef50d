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

use crate::protocols::generate::GenerateOutput;
use crate::protocols::openai::make_openai_style_logprobs;

use super::{created_now, CompletionChoice, CompletionRequest, CompletionStreamResponse, UsageInfo};

impl CompletionRequest {
    /// One generator per streamed request; it owns the stream state.
    pub fn response_generator(&self) -> DeltaGenerator {
        DeltaGenerator::new(
            self.model.clone(),
            self.prompt.clone(),
            self.echo,
            self.logprobs_requested(),
        )
    }
}

/// Turns cumulative upstream results into OpenAI stream chunks.
///
/// Upstream results carry the full text generated so far; the chunk text is
/// the suffix past what was already emitted. Logprob records accumulate the
/// same way, so each chunk reports only the records appended since the
/// previous one.
#[derive(Debug, Clone)]
pub struct DeltaGenerator {
    model: String,
    prompt: String,
    echo: bool,
    logprobs: bool,
    created: u64,

    /// Cumulative upstream text already emitted.
    stream_buffer: String,
    /// Decode-side logprob records already emitted.
    n_prev_token: usize,
}

impl DeltaGenerator {
    pub fn new(model: String, prompt: String, echo: bool, logprobs: bool) -> Self {
        Self {
            model,
            prompt,
            echo,
            logprobs,
            created: created_now(),
            stream_buffer: String::new(),
            n_prev_token: 0,
        }
    }

    /// Build the next stream chunk from an upstream partial result.
    pub fn next_chunk(&mut self, output: &GenerateOutput) -> CompletionStreamResponse {
        let meta = &output.meta_info;
        let first_chunk = self.stream_buffer.is_empty();

        // Prompt echo lands once, ahead of the first generated characters.
        let mut text = output.text.clone();
        if first_chunk && self.echo {
            text = format!("{}{}", self.prompt, text);
        }

        let logprobs = if self.logprobs {
            // Prefill-side records ride along on the first chunk only, and
            // only when the caller asked for the prompt back.
            let (prefill_tokens, prefill_top) = if first_chunk && self.echo {
                (
                    meta.prefill_token_logprobs.as_deref(),
                    meta.prefill_top_logprobs.as_deref(),
                )
            } else {
                (None, None)
            };

            let decode_tokens = meta
                .decode_token_logprobs
                .as_deref()
                .map(|records| &records[self.n_prev_token.min(records.len())..]);
            let decode_top = meta
                .decode_top_logprobs
                .as_deref()
                .map(|slots| &slots[self.n_prev_token.min(slots.len())..]);

            let report = make_openai_style_logprobs(
                prefill_tokens,
                decode_tokens,
                prefill_top,
                decode_top,
            );

            self.n_prev_token = meta
                .decode_token_logprobs
                .as_ref()
                .map_or(self.n_prev_token, |records| records.len());

            Some(report)
        } else {
            None
        };

        let delta = text[self.stream_buffer.len()..].to_string();
        self.stream_buffer = output.text.clone();

        CompletionStreamResponse {
            id: meta.id.clone(),
            object: "text_completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![CompletionChoice {
                index: 0,
                text: delta,
                logprobs,
                finish_reason: None,
            }],
            usage: UsageInfo::new(meta.prompt_tokens, meta.completion_tokens),
        }
    }
}
