/**
 * API REST RUCHE - Surface de contrôle HTTP du kernel
 *
 * RÔLE :
 * Exposer l'état de la flotte et les commandes : sync forcée, override
 * manuel d'un thing, start/stop du poller. Couche volontairement mince :
 * toute la logique vit dans l'orchestrateur et le state store.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec AppState partagé (state + moteur + poller)
 * - Routes : /health, /status, /things, /sync, /poller
 * - Erreurs d'override mappées en 404 / 422 / 502 avec corps { ok, msg }
 */

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};

use crate::models::{StateSnapshot, ThingView};
use crate::state::SharedHiveState;
use crate::sync::{OverrideError, SharedEngine, SharedPoller};

#[derive(Clone)]
pub struct AppState {
    pub state: SharedHiveState,
    pub engine: SharedEngine,
    pub poller: SharedPoller,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(get_status))
        .route("/things", get(get_things))
        .route("/things/{id}", get(get_thing))
        .route("/things/{id}/override", post(post_override))
        .route("/sync", post(post_sync))
        .route("/poller/start", post(post_poller_start))
        .route("/poller/stop", post(post_poller_stop))
        .with_state(app_state)
}

// GET /status (état complet : things + résumé + dernier sync)
async fn get_status(State(app): State<AppState>) -> Json<StateSnapshot> {
    Json(app.state.snapshot())
}

// GET /things (liste)
async fn get_things(State(app): State<AppState>) -> Json<Vec<ThingView>> {
    Json(app.state.thing_views())
}

// GET /things/{id} (détail)
async fn get_thing(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThingView>, StatusCode> {
    match app.state.thing_view(&id) {
        Some(view) => Ok(Json(view)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// POST /sync (cycle forcé, attend la fin du cycle en vol le cas échéant)
async fn post_sync(State(app): State<AppState>) -> Json<StateSnapshot> {
    Json(app.engine.sync_once().await)
}

// POST /things/{id}/override (corps JSON : { champ: valeur, ... })
async fn post_override(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(fields): Json<Map<String, Value>>,
) -> (StatusCode, Json<Value>) {
    match app.engine.apply_override(&id, &fields).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "thing_id": outcome.thing_id, "applied": outcome.applied })),
        ),
        Err(e) => {
            let code = match &e {
                OverrideError::UnknownThing(_) => StatusCode::NOT_FOUND,
                OverrideError::ReadOnly(_) | OverrideError::Invalid { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                OverrideError::Gateway(_) => StatusCode::BAD_GATEWAY,
            };
            (code, Json(json!({ "ok": false, "msg": e.to_string() })))
        }
    }
}

// POST /poller/start
async fn post_poller_start(State(app): State<AppState>) -> Json<Value> {
    app.poller.start();
    Json(json!({ "ok": true, "running": app.poller.is_running() }))
}

// POST /poller/stop
async fn post_poller_stop(State(app): State<AppState>) -> Json<Value> {
    app.poller.stop();
    Json(json!({ "ok": true, "running": app.poller.is_running() }))
}
