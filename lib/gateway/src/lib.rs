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

//! # Gantry Gateway
//!
//! The front-end of an LLM inference-serving runtime. This crate owns the
//! request-lifecycle orchestration: multi-process worker bootstrap with a
//! readiness handshake, the translation layer between the OpenAI-compatible
//! wire protocol and the internal generation-request format, incremental
//! (SSE) result streaming, and the logprob/detokenization bridge.
//!
//! The workers that run tokenization, scheduling and detokenization are
//! separate OS processes; this crate talks to them only through the message
//! contracts in [`client`] and the one-shot readiness pipes in [`supervisor`].

pub mod bridge;
pub mod client;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod http;
pub mod logging;
pub mod protocols;
pub mod supervisor;
pub mod warmup;
