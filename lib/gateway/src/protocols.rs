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

//! Message formats exchanged publicly over the HTTP API and internally
//! between the gateway and its workers.

pub mod generate;
pub mod openai;

/// The token ID type used across the runtime.
pub type TokenIdType = u32;

/// Request shapes the caller got wrong. These never take down the process;
/// they surface as an HTTP error to the one offending request.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("only n=1 is supported, got n={0}")]
    UnsupportedN(u32),

    #[error("`text` must contain at least one prompt")]
    EmptyBatch,

    #[error("expected a single `{field}` value for a single-prompt request")]
    ScalarExpected { field: &'static str },

    #[error("`{field}` has {got} entries but the request carries {expected} prompts")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(
        "structured content requests are not supported without a configured \
         chat template; pass plain-text message content or start the server \
         with a chat template"
    )]
    StructuredContentWithoutTemplate,

    #[error("unknown separator style `{0}` in chat template file")]
    UnknownSeparatorStyle(String),
}

impl ProtocolError {
    /// HTTP status this error maps to. Everything here is the caller's
    /// fault; the structured-content case keeps the 503 the original wire
    /// contract used.
    pub fn status_code(&self) -> u16 {
        match self {
            ProtocolError::StructuredContentWithoutTemplate => 503,
            _ => 400,
        }
    }
}
