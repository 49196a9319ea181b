// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod config;
mod deadline;
mod platform;
mod roles;
mod store;
mod workflow;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::ServiceConfig,
    deadline::JsonFileWindowStore,
    platform::{CommandInvocation, HttpChatPlatform, Interaction, InteractionResponse},
    store::JsonFileRegistrationStore,
    workflow::{AdminCommand, SystemClock, Workflow, WorkflowEvent},
};

#[derive(Clone)]
struct AppState {
    workflow: Arc<Workflow>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "signup_service=debug,tower_http=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        registration_file = %config.registration_file.display(),
        window_file = %config.window_file.display(),
        platform_base_url = %config.platform_base_url,
        "signup-service configured"
    );

    let state = AppState {
        workflow: Workflow::new(
            Arc::new(HttpChatPlatform::new(config.platform_base_url.clone())),
            Arc::new(JsonFileRegistrationStore::new(&config.registration_file)),
            Arc::new(JsonFileWindowStore::new(&config.window_file)),
            config.cycle.clone(),
            Arc::new(SystemClock),
        ),
    };

    let app = build_router(state);

    info!(bind_addr = %config.bind_addr, "signup-service listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/commands", post(command_handler))
        .route("/interactions", post(interaction_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "signup-service"}))
}

async fn command_handler(
    State(state): State<AppState>,
    Json(invocation): Json<CommandInvocation>,
) -> Result<Json<InteractionResponse>, ApiError> {
    let command = AdminCommand::parse(&invocation.name)
        .ok_or_else(|| ApiError::bad_request(format!("unknown command {}", invocation.name)))?;

    let response = state
        .workflow
        .handle_command(command, &invocation)
        .await
        .map_err(|error| {
            ApiError::internal(format!("command {} failed: {error:#}", invocation.name))
        })?;
    Ok(Json(response))
}

async fn interaction_handler(
    State(state): State<AppState>,
    Json(interaction): Json<Interaction>,
) -> Result<Json<InteractionResponse>, ApiError> {
    let event = WorkflowEvent::parse(&interaction.custom_id).ok_or_else(|| {
        ApiError::bad_request(format!("unknown component {}", interaction.custom_id))
    })?;

    let response = state
        .workflow
        .handle_interaction(event, &interaction)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "interaction {} failed: {error:#}",
                interaction.custom_id
            ))
        })?;
    Ok(Json(response))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
