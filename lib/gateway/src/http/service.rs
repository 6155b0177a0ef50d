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

//! The gateway's HTTP surface.
//!
//! A single immutable [`ServiceState`] is built at startup and shared by
//! every handler; nothing in the request path mutates it. Access control
//! short-circuits in a middleware layer before any route handler runs.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use derive_builder::Builder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerArgs;
use crate::conversation::ChatTemplate;
use crate::engine::GenerationClient;

pub mod openai;

/// Fixed header name carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Read-only state shared by every request handler. Written once at
/// startup, never mutated afterwards.
pub struct ServiceState {
    pub client: Arc<dyn GenerationClient>,
    pub chat_template: Option<ChatTemplate>,
    pub server_args: ServerArgs,
}

#[derive(Clone, Builder)]
#[builder(pattern = "owned", build_fn(private, name = "build_internal"))]
pub struct HttpServiceConfig {
    client: Arc<dyn GenerationClient>,

    server_args: ServerArgs,

    #[builder(default)]
    chat_template: Option<ChatTemplate>,
}

#[derive(Clone)]
pub struct HttpService {
    state: Arc<ServiceState>,
    router: Router,
    host: String,
    port: u16,
}

impl HttpService {
    pub fn builder() -> HttpServiceConfigBuilder {
        HttpServiceConfigBuilder::default()
    }

    pub fn state(&self) -> Arc<ServiceState> {
        self.state.clone()
    }

    /// The assembled router, including the access-control layer. Exposed
    /// so tests can drive the service without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind the listener, then serve on a background task. Binding happens
    /// before this method returns so callers may rely on the port being
    /// reachable once they get the handle back.
    pub async fn spawn(&self, cancel_token: CancellationToken) -> Result<JoinHandle<Result<()>>> {
        let address = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(address.as_str()).await?;
        tracing::info!(address, "HTTP service listening");

        let router = self.router.clone();
        let observer = cancel_token.child_token();

        Ok(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(observer.cancelled_owned())
                .await
                .inspect_err(|_| cancel_token.cancel())?;
            Ok(())
        }))
    }

    /// Serve until cancelled.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        let handle = self.spawn(cancel_token).await?;
        handle.await?
    }
}

impl HttpServiceConfigBuilder {
    pub fn build(self) -> Result<HttpService> {
        let config = self.build_internal()?;

        let host = config.server_args.host.clone();
        let port = config.server_args.port;
        let api_key = config.server_args.api_key().map(str::to_string);

        let state = Arc::new(ServiceState {
            client: config.client,
            chat_template: config.chat_template,
            server_args: config.server_args,
        });

        let mut router = Router::new()
            .route("/health", get(openai::health))
            .route("/get_model_info", get(openai::get_model_info))
            .route("/get_server_args", get(openai::get_server_args))
            .route("/flush_cache", get(openai::flush_cache))
            .route("/generate", post(openai::generate))
            .route("/v1/completions", post(openai::completions))
            .route("/v1/chat/completions", post(openai::chat_completions))
            .route("/v1/models", get(openai::list_models))
            .with_state(state.clone());

        if let Some(api_key) = api_key {
            router = router.layer(middleware::from_fn_with_state(
                Arc::new(api_key),
                validate_api_key,
            ));
        }

        Ok(HttpService {
            state,
            router,
            host,
            port,
        })
    }
}

/// Access control. A configured key must match exactly; anything else is
/// turned away before business logic with the fixed error body.
async fn validate_api_key(
    State(api_key): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if provided != Some(api_key.as_str()) {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"detail": "Invalid API Key"})),
        )
            .into_response();
    }

    next.run(request).await
}
