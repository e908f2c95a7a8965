//! Server entry-point: wires the registry, push hub, and REST/SSE endpoints.

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use clap::Parser;
use mockable::DefaultClock;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use proyeccion::config::ServerConfig;
use proyeccion::inbound::http::api_scope;
use proyeccion::inbound::http::state::HttpState;
use proyeccion::push::PushHub;
use proyeccion::registry::Registry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let config = ServerConfig::parse();
    let registry = Arc::new(Registry::new(
        Arc::new(DefaultClock),
        config.pairing_ttl(),
    ));
    let hub = Arc::new(PushHub::new());
    let state = web::Data::new(HttpState::new(registry, hub));

    info!(addr = %config.bind_addr, "starting projection server");
    HttpServer::new(move || App::new().app_data(state.clone()).service(api_scope()))
        .bind(config.bind_addr)?
        .run()
        .await
}
