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

//! OpenAI-compatible wire shapes shared by the completions and chat
//! completions endpoints.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::generate::TokenLogprob;

pub mod chat_completions;
pub mod completions;

/// `text_offset` is not computed by this runtime; every entry carries this
/// placeholder and callers must not rely on it.
pub const TEXT_OFFSET_UNSUPPORTED: i32 = -1;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl UsageInfo {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// OpenAI-style logprob report attached to a completion choice.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LogProbs {
    pub text_offset: Vec<i32>,
    pub token_logprobs: Vec<f64>,
    pub tokens: Vec<Option<String>>,
    pub top_logprobs: Vec<Option<HashMap<String, f64>>>,
}

/// Assemble an OpenAI-style logprob struct from up to four record lists,
/// appended in this fixed order: prefill tokens, decode tokens, prefill
/// top-k, decode top-k.
pub fn make_openai_style_logprobs(
    prefill_token_logprobs: Option<&[TokenLogprob]>,
    decode_token_logprobs: Option<&[TokenLogprob]>,
    prefill_top_logprobs: Option<&[Option<Vec<TokenLogprob>>]>,
    decode_top_logprobs: Option<&[Option<Vec<TokenLogprob>>]>,
) -> LogProbs {
    let mut ret_logprobs = LogProbs::default();

    let mut append_token_logprobs = |token_logprobs: &[TokenLogprob]| {
        for record in token_logprobs {
            ret_logprobs.tokens.push(record.2.clone());
            ret_logprobs.token_logprobs.push(record.0);
            ret_logprobs.text_offset.push(TEXT_OFFSET_UNSUPPORTED);
        }
    };

    if let Some(records) = prefill_token_logprobs {
        append_token_logprobs(records);
    }
    if let Some(records) = decode_token_logprobs {
        append_token_logprobs(records);
    }

    let mut append_top_logprobs = |top_logprobs: &[Option<Vec<TokenLogprob>>]| {
        for slot in top_logprobs {
            match slot {
                Some(records) => {
                    let by_text = records
                        .iter()
                        .map(|r| (r.2.clone().unwrap_or_default(), r.0))
                        .collect();
                    ret_logprobs.top_logprobs.push(Some(by_text));
                }
                None => ret_logprobs.top_logprobs.push(None),
            }
        }
    };

    if let Some(slots) = prefill_top_logprobs {
        append_top_logprobs(slots);
    }
    if let Some(slots) = decode_top_logprobs {
        append_top_logprobs(slots);
    }

    ret_logprobs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lp: f64, id: u32, text: &str) -> TokenLogprob {
        TokenLogprob(lp, id, Some(text.to_string()))
    }

    #[test]
    fn appends_token_lists_in_fixed_order() {
        let prefill = vec![record(-0.1, 1, "a")];
        let decode = vec![record(-0.2, 2, "b"), record(-0.3, 3, "c")];

        let logprobs =
            make_openai_style_logprobs(Some(&prefill), Some(&decode), None, None);

        assert_eq!(
            logprobs.tokens,
            vec![
                Some("a".to_string()),
                Some("b".to_string()),
                Some("c".to_string())
            ]
        );
        assert_eq!(logprobs.token_logprobs, vec![-0.1, -0.2, -0.3]);
        assert_eq!(
            logprobs.text_offset,
            vec![TEXT_OFFSET_UNSUPPORTED; 3],
            "text offsets are placeholders, never computed"
        );
        assert!(logprobs.top_logprobs.is_empty());
    }

    #[test]
    fn absent_top_slots_pass_through() {
        let top = vec![
            Some(vec![record(-0.5, 9, "x"), record(-1.5, 10, "y")]),
            None,
        ];

        let logprobs = make_openai_style_logprobs(None, None, None, Some(&top));

        assert_eq!(logprobs.top_logprobs.len(), 2);
        let first = logprobs.top_logprobs[0].as_ref().unwrap();
        assert_eq!(first.get("x"), Some(&-0.5));
        assert_eq!(first.get("y"), Some(&-1.5));
        assert!(logprobs.top_logprobs[1].is_none());
    }
}
