//! HTTP boundary for driving simulations remotely.
//!
//! Only available with the `server` feature. Routes:
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `GET`  | `/` | liveness |
//! | `GET`  | `/health` | liveness plus which provider keys are configured |
//! | `GET`  | `/api/models` | known model ids per configured provider |
//! | `POST` | `/api/simulations` | create a run from a [`RunConfig`] |
//! | `GET`  | `/api/simulations` | every run |
//! | `GET`  | `/api/simulations/{id}` | one run |
//! | `POST` | `/api/simulations/{id}/run` | execute, streaming events as Server-Sent Events |
//! | `PUT`  | `/api/simulations/{id}/messages/{turn}` | edit a stored turn |
//! | `POST` | `/api/simulations/{id}/rerun/{from_turn}` | truncate so the run can be executed again |
//! | `POST` | `/api/simulations/{id}/turns` | preview (and optionally keep) one turn |
//!
//! Each event of a run is written as one `data: <json>` Server-Sent Event, with keep-alive
//! comments while a backend call is pending. Errors come back as
//! `{"error": "..."}` with 404 for unknown runs or turns, 409 for state conflicts, 422 for
//! invalid configuration and 502 for backend failures.

use crate::agentsim::config::AgentSimConfig;
use crate::agentsim::error::SimulationError;
use crate::agentsim::orchestrator::Orchestrator;
use crate::agentsim::simulation::{RunConfig, Speaker};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    config: Arc<AgentSimConfig>,
    catalogue: Arc<BTreeMap<String, Vec<String>>>,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        config: AgentSimConfig,
        catalogue: BTreeMap<String, Vec<String>>,
    ) -> Self {
        AppState {
            orchestrator,
            config: Arc::new(config),
            catalogue: Arc::new(catalogue),
        }
    }
}

/// Wraps [`SimulationError`] for the HTTP status mapping.
struct ApiError(SimulationError);

impl From<SimulationError> for ApiError {
    fn from(err: SimulationError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            err if err.is_not_found() => StatusCode::NOT_FOUND,
            err if err.is_invalid_state() => StatusCode::CONFLICT,
            SimulationError::InvalidConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct UpdateTurnBody {
    content: String,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreviewTurnBody {
    speaker: Speaker,
    #[serde(default)]
    content: Option<String>,
    /// Append the produced turn to the transcript.
    #[serde(default)]
    commit: bool,
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/models", get(list_models))
        .route(
            "/api/simulations",
            post(create_simulation).get(list_simulations),
        )
        .route("/api/simulations/{id}", get(get_simulation))
        .route("/api/simulations/{id}/run", post(run_simulation))
        .route("/api/simulations/{id}/messages/{turn}", put(update_message))
        .route("/api/simulations/{id}/rerun/{from_turn}", post(rerun_from_turn))
        .route("/api/simulations/{id}/turns", post(preview_turn))
        .with_state(state)
}

/// Bind `config.bind_address()` and serve until the process exits.
pub async fn serve(state: AppState) -> Result<(), Box<dyn Error + Send + Sync>> {
    let address = state.config.bind_address();
    let listener = TcpListener::bind(address.as_str()).await?;
    log::info!("agentsim server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "agentsim",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let presence = |set: bool| if set { "set" } else { "missing" };
    Json(json!({
        "status": "healthy",
        "anthropic_api_key": presence(state.config.has_anthropic()),
        "openai_api_key": presence(state.config.has_openai()),
    }))
}

async fn list_models(State(state): State<AppState>) -> Json<BTreeMap<String, Vec<String>>> {
    Json(state.catalogue.as_ref().clone())
}

async fn create_simulation(
    State(state): State<AppState>,
    Json(config): Json<RunConfig>,
) -> Result<Response, ApiError> {
    let simulation_id = state.orchestrator.create(config)?;
    Ok(Json(json!({"simulation_id": simulation_id, "status": "created"})).into_response())
}

async fn list_simulations(State(state): State<AppState>) -> Response {
    Json(state.orchestrator.list()).into_response()
}

async fn get_simulation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let run = state
        .orchestrator
        .get(&id)
        .ok_or(SimulationError::NotFound(id))?;
    Ok(Json(run).into_response())
}

async fn run_simulation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.orchestrator.run(&id)?;
    let frames = events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|err| {
            json!({"type": "error", "message": err.to_string()}).to_string()
        });
        Ok::<_, Infallible>(Event::default().data(data))
    });
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

async fn update_message(
    State(state): State<AppState>,
    Path((id, turn)): Path<(String, usize)>,
    Json(body): Json<UpdateTurnBody>,
) -> Result<Response, ApiError> {
    state
        .orchestrator
        .update_turn(&id, turn, body.content, body.reasoning)?;
    Ok(Json(json!({"status": "updated"})).into_response())
}

async fn rerun_from_turn(
    State(state): State<AppState>,
    Path((id, from_turn)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    state.orchestrator.truncate_from(&id, from_turn)?;
    Ok(Json(json!({"status": "ready_for_rerun", "from_turn": from_turn})).into_response())
}

async fn preview_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PreviewTurnBody>,
) -> Result<Response, ApiError> {
    let turn = state
        .orchestrator
        .run_single_turn(&id, body.speaker, body.content.as_deref())
        .await?;
    if body.commit {
        state.orchestrator.commit_turn(&id, turn.clone())?;
    }
    Ok(Json(turn).into_response())
}
