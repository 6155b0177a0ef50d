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

use gantry_gateway::config::ServerArgs;

/// gantry-run boots the worker processes, then serves the
/// OpenAI-compatible HTTP gateway in front of them.
#[derive(clap::Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Flags {
    /// Path of the model the workers load.
    #[arg(long)]
    pub model_path: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port of the gateway itself.
    #[arg(long, default_value = "30000")]
    pub port: u16,

    /// Port the tokenizer coordinator listens on; the gateway dials it for
    /// every generation and detokenize call.
    #[arg(long, default_value = "30001")]
    pub coordinator_port: u16,

    #[arg(long, default_value = "30002")]
    pub scheduler_port: u16,

    #[arg(long, default_value = "30003")]
    pub detokenizer_port: u16,

    /// Builtin chat template name, or path to a chat template file.
    #[arg(long)]
    pub chat_template: Option<String>,

    /// When set, every request must carry this key in the `X-API-Key`
    /// header.
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Command used to spawn the scheduler worker.
    #[arg(long, default_value = "gantry-scheduler")]
    pub scheduler_cmd: String,

    /// Command used to spawn the detokenizer worker.
    #[arg(long, default_value = "gantry-detokenizer")]
    pub detokenizer_cmd: String,

    /// Internal use only.
    // Write end of a readiness pipe owned by a supervising parent process;
    // the warmup outcome is reported through it.
    #[arg(long, hide = true)]
    pub ready_fd: Option<i32>,
}

impl Flags {
    pub fn server_args(&self) -> ServerArgs {
        ServerArgs {
            model_path: self.model_path.clone(),
            host: self.host.clone(),
            port: self.port,
            coordinator_port: self.coordinator_port,
            scheduler_port: self.scheduler_port,
            detokenizer_port: self.detokenizer_port,
            chat_template: self.chat_template.clone(),
            api_key: self.api_key.clone(),
            log_level: self.log_level.clone(),
            scheduler_cmd: self.scheduler_cmd.clone(),
            detokenizer_cmd: self.detokenizer_cmd.clone(),
        }
    }
}
