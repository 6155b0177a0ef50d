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

//! The logprob/detokenization bridge.
//!
//! Generation yields log-probability records keyed by token id. Callers
//! that asked for text-form logprobs need those ids resolved to token text,
//! which lives behind a cross-process detokenize call. The bridge batches
//! every id of a record list into one call and zips the results back
//! positionally; when text was not requested it never leaves the process.

use crate::engine::GenerationClient;
use crate::protocols::generate::{
    GenerateRequest, GenerateResult, InputText, MetaInfo, TokenLogprob, TopLogprobs,
};

/// Resolve one record list. Order is preserved exactly; this is a pure
/// per-record transform.
pub async fn resolve(
    client: &dyn GenerationClient,
    records: Vec<TokenLogprob>,
    want_text: bool,
) -> anyhow::Result<Vec<TokenLogprob>> {
    if !want_text {
        return Ok(records
            .into_iter()
            .map(|TokenLogprob(logprob, token_id, _)| TokenLogprob(logprob, token_id, None))
            .collect());
    }

    let token_ids = records.iter().map(TokenLogprob::token_id).collect();
    let token_texts = client.detokenize(token_ids).await?;

    Ok(records
        .into_iter()
        .zip(token_texts)
        .map(|(TokenLogprob(logprob, token_id, _), text)| {
            TokenLogprob(logprob, token_id, Some(text))
        })
        .collect())
}

/// Resolve nested per-position top-k record lists. Absent slots pass
/// through as absent.
pub async fn resolve_top(
    client: &dyn GenerationClient,
    top_logprobs: TopLogprobs,
    want_text: bool,
) -> anyhow::Result<TopLogprobs> {
    let mut resolved = Vec::with_capacity(top_logprobs.len());
    for slot in top_logprobs {
        match slot {
            Some(records) => resolved.push(Some(resolve(client, records, want_text).await?)),
            None => resolved.push(None),
        }
    }
    Ok(resolved)
}

/// Resolve every logprob field of one result's metadata in place.
pub async fn resolve_meta_info(
    client: &dyn GenerationClient,
    meta: &mut MetaInfo,
    want_text: bool,
) -> anyhow::Result<()> {
    if let Some(records) = meta.prefill_token_logprobs.take() {
        meta.prefill_token_logprobs = Some(resolve(client, records, want_text).await?);
    }
    if let Some(records) = meta.decode_token_logprobs.take() {
        meta.decode_token_logprobs = Some(resolve(client, records, want_text).await?);
    }
    if let Some(slots) = meta.prefill_top_logprobs.take() {
        meta.prefill_top_logprobs = Some(resolve_top(client, slots, want_text).await?);
    }
    if let Some(slots) = meta.decode_top_logprobs.take() {
        meta.decode_top_logprobs = Some(resolve_top(client, slots, want_text).await?);
    }
    Ok(())
}

/// Resolve a terminal result against the request that produced it. Batch
/// results resolve per prompt index, honouring the broadcast-normalized
/// `return_logprob` flags.
pub async fn resolve_result(
    client: &dyn GenerationClient,
    request: &GenerateRequest,
    result: &mut GenerateResult,
) -> anyhow::Result<()> {
    let want_text = request.return_text_in_logprobs;
    match (&request.text, result) {
        (InputText::Single(_), GenerateResult::Single(output)) => {
            if request.return_logprob_at(0) {
                resolve_meta_info(client, &mut output.meta_info, want_text).await?;
            }
        }
        (_, GenerateResult::Batch(outputs)) => {
            for (index, output) in outputs.iter_mut().enumerate() {
                if request.return_logprob_at(index) {
                    resolve_meta_info(client, &mut output.meta_info, want_text).await?;
                }
            }
        }
        (InputText::Batch(_), GenerateResult::Single(output)) => {
            // a batch request collapsed to one result upstream
            if request.return_logprob_at(0) {
                resolve_meta_info(client, &mut output.meta_info, want_text).await?;
            }
        }
    }
    Ok(())
}
