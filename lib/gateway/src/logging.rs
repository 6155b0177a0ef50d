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

//! Tracing bootstrap.
//!
//! The default level comes from the server configuration; the `GANTRY_LOG`
//! environment variable takes priority and accepts full `EnvFilter`
//! directives (e.g. `GANTRY_LOG=gantry_gateway=debug,hyper=warn`).

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// ENV used to override the log filter
const FILTER_ENV: &str = "GANTRY_LOG";

static INIT: Once = Once::new();

/// Initialize the global subscriber. Safe to call more than once; only the
/// first call takes effect.
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let directive = default_level
            .parse()
            .unwrap_or_else(|_| tracing::level_filters::LevelFilter::INFO.into());

        let filter = EnvFilter::builder()
            .with_default_directive(directive)
            .with_env_var(FILTER_ENV)
            .from_env_lossy();

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
}
