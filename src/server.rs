// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Local job ingress
//!
//! The production job-dispatch runtime is an external collaborator; this
//! module exposes the same minimal surface it uses so the worker can be
//! driven locally and in tests: `POST /run` invokes the handler with one
//! job body, `GET /health` reports process and resource state.

use crate::handler::{handle_job, Job, JobOutcome};
use crate::resource::{ModelManager, ResourceStatus};
use anyhow::Result;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn run_handler(State(state): State<AppState>, Json(mut job): Json<Job>) -> Json<JobOutcome> {
    // Jobs without a caller-provided id still get a correlation id in logs.
    if job.id.is_none() {
        job.id = Some(Uuid::new_v4().to_string());
    }
    Json(handle_job(&state.manager, job).await)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.manager.status();
    let detail = match &status {
        ResourceStatus::Failed(msg) => Some(msg.clone()),
        _ => None,
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.manager.config().model_name.clone(),
        resource: status.as_str().to_string(),
        detail,
    })
}

/// Serves the job endpoint until the process is stopped
pub async fn serve(manager: Arc<ModelManager>, port: u16) -> Result<()> {
    let app = create_app(AppState { manager });
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Job endpoint listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
