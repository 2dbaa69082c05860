//! Axum route handlers for following and steering a running campaign.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    Json,
};
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::runs::{EventStatus, ProgressEvent, RunControl, RunRegistry};
use crate::state::AppState;

/// Silence longer than this gets a "Processing..." event.
pub const KEEPALIVE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct RunAck {
    pub run_id: Uuid,
    pub status: &'static str,
}

fn to_sse(event: &ProgressEvent) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data(event.message.clone()))
}

fn require_control(state: &AppState, run_id: Uuid) -> Result<RunControl, AppError> {
    state
        .runs
        .control(run_id)
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))
}

/// One SSE connection's hold on a run's events. Dropping it, after the last
/// event or on a client disconnect, hands the run back to the registry.
struct Subscription {
    registry: RunRegistry,
    run_id: Uuid,
    rx: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.rx.is_some() {
            debug!("Stream of run {} closed early; events stay claimable", self.run_id);
        }
        self.registry.release(self.run_id, self.rx.take());
    }
}

/// GET /api/v1/runs/:id/events
///
/// Server-sent progress for one run. The stream ends after the terminal event
/// and the run is forgotten. One subscriber at a time; a client that drops
/// off can reconnect and pick up where it left.
pub async fn handle_run_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let rx = state.runs.take_receiver(run_id).ok_or_else(|| {
        AppError::NotFound(format!("Run {run_id} not found or already being streamed"))
    })?;
    let mut subscription = Subscription {
        registry: state.runs.clone(),
        run_id,
        rx: Some(rx),
    };

    let stream = async_stream::stream! {
        while let Some(rx) = subscription.rx.as_mut() {
            match tokio::time::timeout(KEEPALIVE_AFTER, rx.recv()).await {
                Ok(Some(event)) => {
                    if event.complete {
                        debug!("Run {run_id} finished; closing stream");
                        subscription.rx = None;
                    }
                    yield Ok::<Event, Infallible>(to_sse(&event));
                }
                Ok(None) => {
                    warn!("Run {run_id} ended without a terminal event");
                    subscription.rx = None;
                    let mut event = ProgressEvent::new(EventStatus::Error, "Run ended unexpectedly");
                    event.complete = true;
                    yield Ok::<Event, Infallible>(to_sse(&event));
                }
                Err(_) => yield Ok::<Event, Infallible>(to_sse(&ProgressEvent::keepalive())),
            }
        }
    };

    Ok(Sse::new(stream))
}

/// POST /api/v1/runs/:id/cancel
///
/// The run stops at its next checkpoint and ends with an `info` event.
pub async fn handle_cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunAck>, AppError> {
    require_control(&state, run_id)?.cancel();
    Ok(Json(RunAck {
        run_id,
        status: "cancelling",
    }))
}

/// POST /api/v1/runs/:id/confirm-login
pub async fn handle_confirm_login(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunAck>, AppError> {
    require_control(&state, run_id)?.confirm_login();
    Ok(Json(RunAck {
        run_id,
        status: "login-confirmed",
    }))
}
