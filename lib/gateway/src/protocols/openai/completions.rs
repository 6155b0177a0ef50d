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

//! Legacy OpenAI `/v1/completions` request and response shapes.

use serde::{Deserialize, Serialize};

use crate::protocols::generate::{
    GenerateRequest, InputText, PerPrompt, SamplingParams, StopSequences,
};
use crate::protocols::ProtocolError;

use super::{LogProbs, UsageInfo};

mod delta;
pub use delta::DeltaGenerator;

fn default_max_tokens() -> u32 {
    16
}

fn default_n() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default = "default_n")]
    pub n: u32,

    #[serde(default)]
    pub stream: bool,

    /// Number of top alternatives to report per position. `Some(0)` means
    /// no logprob report, matching the OpenAI contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<u32>,

    #[serde(default)]
    pub echo: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Constrained-decoding extension: restrict output to this regex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl CompletionRequest {
    /// Reject request shapes the runtime does not serve. Multiple choices
    /// per request are a client error, not a crash.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.n != 1 {
            return Err(ProtocolError::UnsupportedN(self.n));
        }
        Ok(())
    }

    pub fn logprobs_requested(&self) -> bool {
        self.logprobs.is_some_and(|n| n > 0)
    }

    /// Adapt this wire request into the internal generation format.
    pub fn to_generate_request(&self) -> GenerateRequest {
        GenerateRequest {
            text: InputText::Single(self.prompt.clone()),
            image_data: None,
            sampling_params: SamplingParams {
                temperature: self.temperature,
                max_new_tokens: Some(self.max_tokens),
                stop: self.stop.clone(),
                top_p: self.top_p,
                presence_penalty: self.presence_penalty,
                frequency_penalty: self.frequency_penalty,
                regex: self.regex.clone(),
            },
            stream: self.stream,
            return_logprob: PerPrompt::Scalar(self.logprobs_requested()),
            top_logprobs_num: PerPrompt::Scalar(self.logprobs.unwrap_or(0)),
            // token text is required to build the OpenAI-style report
            return_text_in_logprobs: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompletionChoice {
    pub index: u32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<LogProbs>,
    pub finish_reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: UsageInfo,
}

/// The streamed chunk shares the choice shape with the final response,
/// unlike the chat endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompletionStreamResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: UsageInfo,
}

pub fn created_now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}
