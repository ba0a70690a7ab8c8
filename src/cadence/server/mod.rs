// SPDX-License-Identifier: MIT

//! Administrative HTTP surface
//!
//! A thin JSON layer over `Engine`: register definitions, start and query
//! runs, resume or cancel them, publish events and follow the bus over SSE.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cadence::workflow::engine::{Engine, RunQuery};
use crate::cadence::workflow::loader::WorkflowLoader;
use crate::cadence::workflow::state::Signal;
use crate::kit::bus::Event;
use crate::kit::error::CadenceError;

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/workflows", get(list_workflows).post(register_workflow))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/runs", post(start_run))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/history", get(get_history))
        .route("/api/runs/{id}/resume", post(resume_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/events", post(publish_event))
        .route("/api/events/stream", get(stream_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

pub async fn serve(engine: Engine, port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(engine);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Engine errors rendered as `{"error": ...}` with a matching status
pub struct ApiError(CadenceError);

impl From<CadenceError> for ApiError {
    fn from(err: CadenceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CadenceError::WorkflowNotFound(_)
            | CadenceError::VersionNotFound { .. }
            | CadenceError::RunNotFound(_) => StatusCode::NOT_FOUND,
            CadenceError::InvalidDefinition { .. }
            | CadenceError::InvalidInput(_)
            | CadenceError::ManualTriggerNotBound(_)
            | CadenceError::Expression(_)
            | CadenceError::Rule(_)
            | CadenceError::Json(_)
            | CadenceError::Yaml(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_workflows(State(engine): State<Engine>) -> Json<Value> {
    let workflows: Vec<Value> = engine
        .definitions()
        .await
        .iter()
        .map(|def| {
            json!({
                "id": def.id,
                "version": def.version,
                "name": def.name,
                "description": def.description,
                "steps": def.steps.len(),
                "triggers": def.triggers,
            })
        })
        .collect();
    Json(json!(workflows))
}

/// Body is a definition in YAML or JSON
async fn register_workflow(
    State(engine): State<Engine>,
    body: String,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let def = WorkflowLoader::parse_yaml(&body)?;
    let id = def.id.clone();
    let version = engine.register(def).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "version": version })),
    ))
}

#[derive(Deserialize)]
struct VersionQuery {
    version: Option<u32>,
}

async fn get_workflow(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<Json<Value>> {
    let def = engine.definition(&id, query.version).await?;
    Ok(Json(json!(*def)))
}

#[derive(Deserialize)]
struct StartRequestBody {
    #[serde(default)]
    input: Value,
}

async fn start_run(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(body): Json<StartRequestBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let run_id = engine.start(&id, body.input).await?;
    let run = engine.run(&run_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "run_id": run_id, "status": run.status })),
    ))
}

async fn list_runs(
    State(engine): State<Engine>,
    Query(query): Query<RunQuery>,
) -> ApiResult<Json<Value>> {
    let runs = engine.runs(&query).await?;
    Ok(Json(json!(runs)))
}

async fn get_run(State(engine): State<Engine>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let run = engine.run(&id).await?;
    Ok(Json(json!(run)))
}

async fn get_history(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let history = engine.history(&id).await?;
    Ok(Json(json!(history)))
}

/// Ignored signals still answer 200; the outcome says why
async fn resume_run(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(signal): Json<Signal>,
) -> ApiResult<Json<Value>> {
    let outcome = engine.resume(&id, signal).await?;
    Ok(Json(json!(outcome)))
}

async fn cancel_run(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let cancelled = engine.cancel(&id).await?;
    Ok(Json(json!({ "run_id": id, "cancelled": cancelled })))
}

async fn publish_event(
    State(engine): State<Engine>,
    Json(event): Json<Event>,
) -> (StatusCode, Json<Value>) {
    let id = event.id.clone();
    let subscribers = engine.publish(event);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "subscribers": subscribers })),
    )
}

async fn stream_events(
    State(engine): State<Engine>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = mpsc::channel(100);
    let mut events = engine.bus().subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Event stream client lagged, {} event(s) skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        log::debug!("Event stream closed");
    });

    let stream = ReceiverStream::new(rx).map(|event: Event| {
        let name = event.name.clone();
        Ok(SseEvent::default()
            .event(name)
            .json_data(&event)
            .unwrap_or_else(|e| SseEvent::default().event("error").data(e.to_string())))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const QUICK: &str = "id: quick\nsteps:\n  - id: mark\n    kind: action\n    action: set\n    with:\n      seen: true\n    next: end\n  - id: end\n    kind: terminal\n";

    async fn engine() -> Engine {
        Engine::builder().build().await.unwrap()
    }

    #[tokio::test]
    async fn test_register_and_start_over_handlers() {
        let engine = engine().await;
        let (status, Json(body)) = register_workflow(State(engine.clone()), QUICK.to_string())
            .await
            .unwrap_or_else(|_| panic!("register failed"));
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "id": "quick", "version": 1 }));

        let (status, Json(body)) = start_run(
            State(engine.clone()),
            Path("quick".to_string()),
            Json(StartRequestBody { input: Value::Null }),
        )
        .await
        .unwrap_or_else(|_| panic!("start failed"));
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], json!("completed"));

        let run_id = body["run_id"].as_str().unwrap().to_string();
        let Ok(Json(history)) = get_history(State(engine), Path(run_id)).await else {
            panic!("history failed");
        };
        assert_eq!(history.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_run_is_not_found() {
        let engine = engine().await;
        let Err(err) = get_run(State(engine), Path("nope".to_string())).await else {
            panic!("expected an error");
        };
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_definition_is_bad_request() {
        let engine = engine().await;
        let Err(err) = register_workflow(State(engine), "id: x\nsteps: []\n".to_string()).await
        else {
            panic!("expected an error");
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
