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

use std::os::fd::RawFd;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use gantry_gateway::client::CoordinatorClient;
use gantry_gateway::conversation::ChatTemplate;
use gantry_gateway::http::service::HttpService;
use gantry_gateway::logging;
use gantry_gateway::supervisor::{self, LaunchStage, WorkerSpec};
use gantry_gateway::warmup::{self, WarmupConfig};

mod flags;
use flags::Flags;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    let server_args = flags.server_args();

    logging::init(&server_args.log_level);

    // Resolve the chat template before anything is spawned; a bad template
    // argument should fail the launch, not the first chat request.
    let chat_template = match &server_args.chat_template {
        Some(spec) => {
            let template = ChatTemplate::resolve(spec)?;
            tracing::info!("using chat template: {}", template.name);
            Some(template)
        }
        None => None,
    };

    let worker_specs = vec![
        WorkerSpec {
            stage: LaunchStage::Scheduler,
            command: server_args.scheduler_cmd.clone().into(),
            args: vec![
                format!("--model-path={}", server_args.model_path),
                format!("--port={}", server_args.scheduler_port),
                format!("--coordinator-port={}", server_args.coordinator_port),
            ],
        },
        WorkerSpec {
            stage: LaunchStage::Detokenizer,
            command: server_args.detokenizer_cmd.clone().into(),
            args: vec![
                format!("--model-path={}", server_args.model_path),
                format!("--port={}", server_args.detokenizer_port),
            ],
        },
    ];

    // Hold the gate until every worker reports readiness; a failed
    // handshake already printed both states and left nothing running.
    let mut workers = match supervisor::launch(worker_specs).await {
        Ok(workers) => workers,
        Err(err) => {
            tracing::error!("worker launch failed: {err}");
            std::process::exit(1);
        }
    };

    let client = Arc::new(CoordinatorClient::new(server_args.coordinator_addr()));
    let service = HttpService::builder()
        .client(client)
        .server_args(server_args.clone())
        .chat_template(chat_template)
        .build()?;

    let cancel_token = CancellationToken::new();
    let server = service.spawn(cancel_token.clone()).await?;

    // The listener is bound; prove end-to-end liveness concurrently with
    // the accept loop.
    warmup::spawn(WarmupConfig {
        base_url: server_args.url(),
        api_key: server_args.api_key().map(str::to_string),
        ready_fd: flags.ready_fd.map(|fd| fd as RawFd),
    });

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
        result = server => {
            result.map_err(anyhow::Error::from).and_then(|served| served)
        }
    };

    // whatever ended the server, no worker outlives the gateway
    cancel_token.cancel();
    workers.teardown().await;

    outcome
}
