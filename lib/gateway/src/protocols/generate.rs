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

//! The internal generation-request format and the partial-result shapes the
//! tokenizer coordinator streams back.

use serde::{Deserialize, Serialize};

use super::{ProtocolError, TokenIdType};

/// One prompt or a batch of prompts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum InputText {
    Single(String),
    Batch(Vec<String>),
}

impl InputText {
    pub fn is_batch(&self) -> bool {
        matches!(self, InputText::Batch(_))
    }

    /// Number of prompts carried by the request.
    pub fn num_prompts(&self) -> usize {
        match self {
            InputText::Single(_) => 1,
            InputText::Batch(texts) => texts.len(),
        }
    }
}

/// A per-request field that is either one value broadcast across every
/// prompt, or one value per prompt. [`GenerateRequest::normalize`] resolves
/// every field of this shape before dispatch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PerPrompt<T> {
    Scalar(T),
    Each(Vec<T>),
}

impl<T: Copy> PerPrompt<T> {
    /// Value for the prompt at `index`. Only meaningful after
    /// normalization, which guarantees `Each` lists match the batch size.
    pub fn get(&self, index: usize) -> T {
        match self {
            PerPrompt::Scalar(value) => *value,
            PerPrompt::Each(values) => values[index],
        }
    }
}

impl<T: Default> Default for PerPrompt<T> {
    fn default() -> Self {
        PerPrompt::Scalar(T::default())
    }
}

impl<T: Copy> PerPrompt<T> {
    fn broadcast(
        &mut self,
        field: &'static str,
        num_prompts: usize,
    ) -> Result<(), ProtocolError> {
        match self {
            PerPrompt::Scalar(value) => {
                let value = *value;
                *self = PerPrompt::Each(vec![value; num_prompts]);
                Ok(())
            }
            PerPrompt::Each(values) if values.len() == num_prompts => Ok(()),
            PerPrompt::Each(values) => Err(ProtocolError::LengthMismatch {
                field,
                expected: num_prompts,
                got: values.len(),
            }),
        }
    }

    fn require_scalar(&self, field: &'static str) -> Result<(), ProtocolError> {
        match self {
            PerPrompt::Scalar(_) => Ok(()),
            PerPrompt::Each(_) => Err(ProtocolError::ScalarExpected { field }),
        }
    }
}

/// One stop sequence or several.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(stop) => vec![stop],
            StopSequences::Many(stops) => stops,
        }
    }
}

/// Sampling knobs forwarded to the scheduler. Absent fields take the
/// worker-side defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// A generation request in the internal format. Built once per inbound wire
/// call, normalized, then owned by the translation layer for the duration
/// of that call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub text: InputText,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<Vec<String>>,

    #[serde(default)]
    pub sampling_params: SamplingParams,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub return_logprob: PerPrompt<bool>,

    #[serde(default)]
    pub top_logprobs_num: PerPrompt<u32>,

    #[serde(default)]
    pub return_text_in_logprobs: bool,
}

impl GenerateRequest {
    /// Post-init normalization. For a batch request every per-prompt field
    /// is broadcast to one entry per prompt; a list on a single-prompt
    /// request, or a list of the wrong length, is a client error. Must be
    /// called before the request is dispatched.
    pub fn normalize(mut self) -> Result<Self, ProtocolError> {
        match &self.text {
            InputText::Single(_) => {
                self.return_logprob.require_scalar("return_logprob")?;
                self.top_logprobs_num.require_scalar("top_logprobs_num")?;
            }
            InputText::Batch(texts) => {
                if texts.is_empty() {
                    return Err(ProtocolError::EmptyBatch);
                }
                let n = texts.len();
                self.return_logprob.broadcast("return_logprob", n)?;
                self.top_logprobs_num.broadcast("top_logprobs_num", n)?;
            }
        }
        Ok(self)
    }

    /// Whether logprob records were requested for the prompt at `index`.
    pub fn return_logprob_at(&self, index: usize) -> bool {
        self.return_logprob.get(index)
    }
}

/// One token-level log-probability record: `(logprob, token_id, token_text)`.
/// Serializes as the 3-element array the wire protocol uses. `token_text`
/// stays absent until the detokenization bridge fills it in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TokenLogprob(pub f64, pub TokenIdType, pub Option<String>);

impl TokenLogprob {
    pub fn logprob(&self) -> f64 {
        self.0
    }

    pub fn token_id(&self) -> TokenIdType {
        self.1
    }

    pub fn token_text(&self) -> Option<&str> {
        self.2.as_deref()
    }
}

/// Per-position top-k records. A `None` slot means the scheduler reported
/// no candidates at that position.
pub type TopLogprobs = Vec<Option<Vec<TokenLogprob>>>;

/// Metadata attached to every partial and final result.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MetaInfo {
    pub id: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefill_token_logprobs: Option<Vec<TokenLogprob>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_token_logprobs: Option<Vec<TokenLogprob>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefill_top_logprobs: Option<TopLogprobs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_top_logprobs: Option<TopLogprobs>,
}

/// One incremental generation event. `text` is cumulative: each event's
/// text is a prefix-extension of the previous event's text for the same
/// request, never a rewrite.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GenerateOutput {
    pub text: String,
    pub meta_info: MetaInfo,
}

/// The terminal payload of a non-streaming call: a single result, or one
/// result per prompt for batch requests.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum GenerateResult {
    Single(GenerateOutput),
    Batch(Vec<GenerateOutput>),
}

impl GenerateResult {
    /// The first (or only) output. Batch responses to single-choice wire
    /// endpoints collapse to their first entry.
    pub fn into_first(self) -> Option<GenerateOutput> {
        match self {
            GenerateResult::Single(output) => Some(output),
            GenerateResult::Batch(outputs) => outputs.into_iter().next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_request(texts: &[&str]) -> GenerateRequest {
        GenerateRequest {
            text: InputText::Batch(texts.iter().map(|t| t.to_string()).collect()),
            image_data: None,
            sampling_params: SamplingParams::default(),
            stream: false,
            return_logprob: PerPrompt::default(),
            top_logprobs_num: PerPrompt::default(),
            return_text_in_logprobs: false,
        }
    }

    #[test]
    fn normalize_broadcasts_scalars_over_batch() {
        let mut request = batch_request(&["a", "b", "c"]);
        request.return_logprob = PerPrompt::Scalar(true);

        let normalized = request.normalize().unwrap();
        assert_eq!(
            normalized.return_logprob,
            PerPrompt::Each(vec![true, true, true])
        );
        assert!(normalized.return_logprob_at(2));
    }

    #[test]
    fn normalize_rejects_length_mismatch() {
        let mut request = batch_request(&["a", "b"]);
        request.return_logprob = PerPrompt::Each(vec![true, false, true]);

        let err = request.normalize().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::LengthMismatch {
                field: "return_logprob",
                expected: 2,
                got: 3,
            }
        ));
    }

    #[test]
    fn normalize_rejects_list_on_single_prompt() {
        let mut request = GenerateRequest {
            text: InputText::Single("hello".to_string()),
            image_data: None,
            sampling_params: SamplingParams::default(),
            stream: false,
            return_logprob: PerPrompt::Each(vec![true]),
            top_logprobs_num: PerPrompt::default(),
            return_text_in_logprobs: false,
        };
        assert!(matches!(
            request.clone().normalize().unwrap_err(),
            ProtocolError::ScalarExpected {
                field: "return_logprob"
            }
        ));

        request.return_logprob = PerPrompt::Scalar(true);
        assert!(request.normalize().is_ok());
    }

    #[test]
    fn normalize_rejects_empty_batch() {
        let request = batch_request(&[]);
        assert!(matches!(
            request.normalize().unwrap_err(),
            ProtocolError::EmptyBatch
        ));
    }

    #[test]
    fn token_logprob_serializes_as_tuple() {
        let record = TokenLogprob(-0.25, 42, None);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, "[-0.25,42,null]");

        let parsed: TokenLogprob = serde_json::from_str("[-1.5, 7, \"x\"]").unwrap();
        assert_eq!(parsed, TokenLogprob(-1.5, 7, Some("x".to_string())));
    }

    #[test]
    fn generate_request_accepts_scalar_or_list_fields() {
        let request: GenerateRequest = serde_json::from_str(
            r#"{
                "text": ["a", "b"],
                "sampling_params": {"temperature": 0.0, "max_new_tokens": 8},
                "return_logprob": [true, false]
            }"#,
        )
        .unwrap();
        assert!(request.text.is_batch());
        assert_eq!(request.text.num_prompts(), 2);

        let normalized = request.normalize().unwrap();
        assert!(normalized.return_logprob_at(0));
        assert!(!normalized.return_logprob_at(1));
        // scalar default broadcast across the batch
        assert_eq!(normalized.top_logprobs_num.get(1), 0);
    }
}
