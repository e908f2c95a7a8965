//! Server configuration.

use std::net::SocketAddr;

use chrono::TimeDelta;
use clap::Parser;

/// Command-line and environment configuration for the projection server.
#[derive(Debug, Clone, Parser)]
#[command(name = "proyeccion", about = "Pairing and projection-state server")]
pub struct ServerConfig {
    /// Socket address to bind.
    #[arg(long, env = "PROYECCION_BIND", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Pairing code lifetime in seconds.
    #[arg(long, env = "PROYECCION_PAIRING_TTL", default_value_t = 300)]
    pub pairing_ttl_secs: u32,
}

impl ServerConfig {
    pub fn pairing_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.pairing_ttl_secs))
    }
}
