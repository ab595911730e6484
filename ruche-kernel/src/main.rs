/**
 * RUCHE KERNEL - Point d'entrée du superviseur de flotte
 *
 * RÔLE : Bootstrap complet : config env, state store, gateway cloud ou mock,
 * moteur de sync, poller périodique et API REST de contrôle.
 *
 * ARCHITECTURE : Cycle poll -> agrégation -> décision -> écriture, isolé par
 * thing, piloté par un poller à intervalle fixe et déclenchable via HTTP.
 */

mod aggregate;
mod config;
mod gateway;
mod http;
mod models;
mod policy;
mod state;
mod sync;
mod token;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::KernelConfig;
use crate::gateway::select_gateway;
use crate::http::AppState;
use crate::state::HiveState;
use crate::sync::{Poller, SyncEngine};
use crate::token::TokenProvider;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cfg = KernelConfig::from_env();
    if cfg.things.is_empty() {
        warn!("RUCHE_THINGS est vide : aucun thing à superviser");
    }

    // État process-wide : un record par thing configuré, muté par le moteur
    let state = Arc::new(HiveState::new(&cfg.things));
    let tokens = Arc::new(TokenProvider::new(&cfg));
    let gateway = select_gateway(&cfg, tokens).context("init gateway cloud")?;
    info!(
        "ruche kernel: {} thing(s), poll {:?}, gateway {}",
        cfg.things.len(),
        cfg.poll_interval,
        gateway.mode()
    );

    let engine = Arc::new(SyncEngine::new(state.clone(), gateway));
    let poller = Poller::spawn(engine.clone(), cfg.poll_interval);

    // HTTP
    let app = http::build_router(AppState { state, engine, poller });
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.context("bind HTTP listener")?;
    axum::serve(listener, app).await.context("HTTP server")?;
    Ok(())
}
