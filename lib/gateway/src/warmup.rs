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

//! Warmup/health monitor.
//!
//! Runs on its own OS thread, concurrently with the accept loop. It polls
//! the introspection endpoint until the gateway answers, then pushes one
//! synthetic generation through the full pipeline to prove end-to-end
//! liveness. The outcome goes to the parent's readiness pipe when one was
//! handed down, otherwise to the log. Neither phase is retried past its
//! budget.

use std::io::Write;
use std::os::fd::{FromRawFd, RawFd};
use std::time::Duration;

use crate::http::service::API_KEY_HEADER;
use crate::supervisor::READY_MESSAGE;

/// Deterministic prompt for the synthetic request.
pub const WARMUP_PROMPT: &str = "Say this is a warmup request.";

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_ATTEMPTS: u32 = 120;

/// Per-probe timeout while waiting for first reachability.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for the synthetic generation; terminal once exceeded.
const WARMUP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct WarmupConfig {
    /// Base URL of the gateway itself, e.g. `http://127.0.0.1:30000`.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Write end of the readiness pipe back to whatever launched this
    /// server process, if that parent exists.
    pub ready_fd: Option<RawFd>,
}

/// Spawn the monitor thread.
pub fn spawn(config: WarmupConfig) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let outcome = wait_and_warmup(&config);
        report(&config, outcome);
    })
}

fn wait_and_warmup(config: &WarmupConfig) -> Result<(), String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;

    // Phase 1: wait for the listener. Any HTTP answer counts; only
    // transport errors keep us polling.
    let probe_url = format!("{}/get_model_info", config.base_url);
    let mut last_error = String::from("introspection endpoint never became reachable");
    let mut reachable = false;
    for _ in 0..POLL_ATTEMPTS {
        std::thread::sleep(POLL_INTERVAL);
        match with_key(client.get(&probe_url), config).send() {
            Ok(_) => {
                reachable = true;
                break;
            }
            Err(err) => last_error = err.to_string(),
        }
    }
    if !reachable {
        return Err(last_error);
    }

    // Phase 2: one synthetic generation through the full pipeline. Bounded
    // token count, deterministic sampling, never retried.
    let body = serde_json::json!({
        "text": WARMUP_PROMPT,
        "sampling_params": {
            "temperature": 0,
            "max_new_tokens": 16,
        },
    });
    with_key(
        client.post(format!("{}/generate", config.base_url)),
        config,
    )
    .timeout(WARMUP_TIMEOUT)
    .json(&body)
    .send()
    .map_err(|e| e.to_string())?;

    Ok(())
}

fn with_key(
    builder: reqwest::blocking::RequestBuilder,
    config: &WarmupConfig,
) -> reqwest::blocking::RequestBuilder {
    match &config.api_key {
        Some(key) => builder.header(API_KEY_HEADER, key),
        None => builder,
    }
}

fn report(config: &WarmupConfig, outcome: Result<(), String>) {
    let message = match &outcome {
        Ok(()) => READY_MESSAGE.to_string(),
        Err(err) => err.clone(),
    };

    match config.ready_fd {
        Some(fd) => {
            // one-shot: write the message and let the drop close the pipe
            let mut pipe = unsafe { std::fs::File::from_raw_fd(fd) };
            if let Err(err) = pipe.write_all(message.as_bytes()) {
                tracing::error!("failed to report warmup outcome to parent: {err}");
            }
        }
        None => match outcome {
            Ok(()) => tracing::info!("warmup complete: {READY_MESSAGE}"),
            Err(err) => tracing::error!("warmup failed: {err}"),
        },
    }
}
