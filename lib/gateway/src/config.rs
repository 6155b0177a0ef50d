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

//! Server configuration.
//!
//! `ServerArgs` is built once at startup from the launcher's flags and
//! passed by reference into every request handler; nothing mutates it
//! afterwards. `GET /get_server_args` serves it verbatim.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ServerArgs {
    pub model_path: String,
    pub host: String,
    pub port: u16,

    /// Port the tokenizer coordinator listens on; the gateway dials it for
    /// every generation and detokenize call.
    pub coordinator_port: u16,
    pub scheduler_port: u16,
    pub detokenizer_port: u16,

    pub chat_template: Option<String>,
    pub api_key: Option<String>,
    pub log_level: String,

    /// Worker commands the supervisor spawns.
    pub scheduler_cmd: String,
    pub detokenizer_cmd: String,
}

impl ServerArgs {
    /// Public base URL of the gateway itself.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Dial address of the tokenizer coordinator.
    pub fn coordinator_addr(&self) -> String {
        format!("{}:{}", self.host, self.coordinator_port)
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServerArgs {
        ServerArgs {
            model_path: "/models/test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 30000,
            coordinator_port: 30001,
            scheduler_port: 30002,
            detokenizer_port: 30003,
            chat_template: None,
            api_key: Some(String::new()),
            log_level: "info".to_string(),
            scheduler_cmd: "gantry-scheduler".to_string(),
            detokenizer_cmd: "gantry-detokenizer".to_string(),
        }
    }

    #[test]
    fn empty_api_key_means_no_auth() {
        assert_eq!(args().api_key(), None);

        let mut with_key = args();
        with_key.api_key = Some("secret".to_string());
        assert_eq!(with_key.api_key(), Some("secret"));
    }

    #[test]
    fn serializes_as_flat_object() {
        let value = serde_json::to_value(args()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object["model_path"], "/models/test");
        assert_eq!(object["port"], 30000);
        assert!(object.values().all(|v| !v.is_object()));
    }
}
