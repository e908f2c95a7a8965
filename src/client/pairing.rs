//! Device pairing state machine.
//!
//! `Loading` checks the token sidecar and requests a code when empty;
//! `Pairing` shows the code and polls until an operator claims it;
//! `Projection` hands the token to the session controller. Expired codes
//! self-heal by requesting a fresh one. A session generation counter guards
//! stale in-flight responses after a restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::client::api::{ClientError, DeviceTransport};
use crate::client::session::SessionRole;
use crate::client::token_store::{TokenStore, token_key};
use crate::domain::{DeviceToken, MesaId, PairingStatus, PairingStatusResponse};

#[cfg(not(test))]
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
#[cfg(test)]
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

const MAX_UNAUTHORIZED_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum PairingPhase {
    Loading,
    Pairing {
        code: String,
        expires_at: DateTime<Utc>,
    },
    Projection {
        token: DeviceToken,
    },
    Failed {
        message: String,
    },
}

pub struct PairingMachine {
    store: Arc<dyn TokenStore>,
    mesa: Option<MesaId>,
    role: SessionRole,
    phase: PairingPhase,
    generation: u64,
    unauthorized_retries: u32,
}

impl PairingMachine {
    pub fn new(store: Arc<dyn TokenStore>, mesa: Option<MesaId>, role: SessionRole) -> Self {
        Self {
            store,
            mesa,
            role,
            phase: PairingPhase::Loading,
            generation: 0,
            unauthorized_retries: 0,
        }
    }

    pub fn phase(&self) -> &PairingPhase {
        &self.phase
    }

    /// Advance the machine one step: resume or request a code when loading,
    /// poll the code while pairing. Terminal phases are left alone.
    pub async fn tick(&mut self, transport: &dyn DeviceTransport) {
        match &self.phase {
            PairingPhase::Loading => self.start(transport).await,
            PairingPhase::Pairing { code, .. } => {
                let code = code.clone();
                self.poll(transport, &code).await;
            }
            PairingPhase::Projection { .. } | PairingPhase::Failed { .. } => {}
        }
    }

    /// Drive ticks until the machine reaches a terminal phase.
    ///
    /// # Errors
    ///
    /// The `Failed` phase's message, as an error.
    pub async fn run(&mut self, transport: &dyn DeviceTransport) -> Result<DeviceToken, ClientError> {
        loop {
            match &self.phase {
                PairingPhase::Projection { token } => return Ok(token.clone()),
                PairingPhase::Failed { message } => {
                    return Err(ClientError::Unauthorized(message.clone()));
                }
                _ => {}
            }
            self.tick(transport).await;
            if matches!(self.phase, PairingPhase::Pairing { .. } | PairingPhase::Loading) {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// The session hit a 401: drop the credential and re-pair. Device
    /// sessions retry a bounded number of times; for the supervising
    /// dashboard an expired login is terminal.
    pub fn handle_unauthorized(&mut self) -> bool {
        self.store.remove(&token_key(self.mesa));
        self.generation += 1;
        match self.role {
            SessionRole::Supervisor => {
                self.phase = PairingPhase::Failed {
                    message: "session expired".to_owned(),
                };
                false
            }
            SessionRole::Device => {
                self.unauthorized_retries += 1;
                if self.unauthorized_retries > MAX_UNAUTHORIZED_RETRIES {
                    self.phase = PairingPhase::Failed {
                        message: "device repeatedly rejected".to_owned(),
                    };
                    false
                } else {
                    self.phase = PairingPhase::Loading;
                    true
                }
            }
        }
    }

    async fn start(&mut self, transport: &dyn DeviceTransport) {
        if let Some(stored) = self.store.get(&token_key(self.mesa)) {
            self.phase = PairingPhase::Projection {
                token: DeviceToken::new(stored),
            };
            return;
        }
        self.request_code(transport).await;
    }

    async fn request_code(&mut self, transport: &dyn DeviceTransport) {
        let generation = self.generation;
        let result = transport.init_pairing(self.mesa).await;
        if generation != self.generation {
            return;
        }
        match result {
            Ok(init) => {
                info!(code = %init.pairing_code, "pairing code issued");
                self.phase = PairingPhase::Pairing {
                    code: init.pairing_code,
                    expires_at: init.expires_at,
                };
            }
            Err(error) if error.is_transient() => {
                warn!(error = %error, "pairing init failed; retrying");
            }
            Err(error) => {
                self.phase = PairingPhase::Failed {
                    message: error.to_string(),
                };
            }
        }
    }

    async fn poll(&mut self, transport: &dyn DeviceTransport, code: &str) {
        let generation = self.generation;
        let result = transport.pairing_status(code).await;
        self.apply_status(generation, result);
    }

    /// Apply a poll result, discarding it when the session has since been
    /// restarted.
    fn apply_status(
        &mut self,
        generation: u64,
        result: Result<PairingStatusResponse, ClientError>,
    ) {
        if generation != self.generation {
            return;
        }
        match result {
            Ok(status) => match status.status {
                PairingStatus::Waiting => {}
                PairingStatus::Paired => {
                    let Some(token) = status.device_token else {
                        warn!("paired response without a token; re-pairing");
                        self.phase = PairingPhase::Loading;
                        return;
                    };
                    self.store.set(&token_key(self.mesa), &token);
                    self.unauthorized_retries = 0;
                    self.phase = PairingPhase::Projection {
                        token: DeviceToken::new(token),
                    };
                }
                PairingStatus::Expired => {
                    info!("pairing code expired; requesting a new one");
                    self.phase = PairingPhase::Loading;
                }
            },
            Err(error) if error.is_transient() => {
                warn!(error = %error, "pairing poll failed; retrying");
            }
            Err(ClientError::NotFound(_)) => {
                // Server forgot the code (restart); start over.
                self.phase = PairingPhase::Loading;
            }
            Err(error) => {
                self.phase = PairingPhase::Failed {
                    message: error.to_string(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::token_store::MemoryTokenStore;
    use crate::test_support::ScriptedTransport;
    use chrono::TimeDelta;

    fn init_response(code: &str) -> crate::domain::PairingInitResponse {
        crate::domain::PairingInitResponse {
            pairing_code: code.to_owned(),
            expires_at: Utc::now() + TimeDelta::seconds(300),
        }
    }

    fn status(status: PairingStatus, token: Option<&str>) -> PairingStatusResponse {
        PairingStatusResponse {
            status,
            device_token: token.map(str::to_owned),
            mesa_id: token.map(|_| MesaId(42)),
        }
    }

    fn machine(store: Arc<MemoryTokenStore>) -> PairingMachine {
        PairingMachine::new(store, None, SessionRole::Device)
    }

    #[tokio::test]
    async fn cold_start_pairs_and_stores_the_token() {
        let transport = ScriptedTransport::new();
        transport.push_init(Ok(init_response("AB3X9Q")));
        transport.push_status(Ok(status(PairingStatus::Waiting, None)));
        transport.push_status(Ok(status(PairingStatus::Waiting, None)));
        transport.push_status(Ok(status(PairingStatus::Paired, Some("tok-123"))));

        let store = Arc::new(MemoryTokenStore::new());
        let mut machine = machine(store.clone());
        let token = machine.run(&transport).await.expect("pairing completes");

        assert_eq!(token.as_str(), "tok-123");
        assert_eq!(store.get("device_token").as_deref(), Some("tok-123"));
        assert!(matches!(machine.phase(), PairingPhase::Projection { .. }));
    }

    #[tokio::test]
    async fn pinned_machines_store_the_token_under_the_mesa_key() {
        let transport = ScriptedTransport::new();
        transport.push_init(Ok(init_response("AB3X9Q")));
        transport.push_status(Ok(status(PairingStatus::Paired, Some("tok-123"))));

        let store = Arc::new(MemoryTokenStore::new());
        let mut machine = PairingMachine::new(store.clone(), Some(MesaId(42)), SessionRole::Device);
        let token = machine.run(&transport).await.expect("pairing completes");

        assert_eq!(token.as_str(), "tok-123");
        assert_eq!(store.get("device_token_42").as_deref(), Some("tok-123"));
        assert_eq!(store.get("device_token"), None);
        assert!(
            transport
                .calls()
                .contains(&"init_pairing Some(MesaId(42))".to_owned())
        );
    }

    #[tokio::test]
    async fn stored_token_skips_pairing() {
        let transport = ScriptedTransport::new();
        let store = Arc::new(MemoryTokenStore::new());
        store.set("device_token", "tok-old");

        let mut machine = machine(store);
        let token = machine.run(&transport).await.expect("token resumes");
        assert_eq!(token.as_str(), "tok-old");
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn expired_code_requests_a_fresh_one() {
        let transport = ScriptedTransport::new();
        transport.push_init(Ok(init_response("AAAAAA")));
        transport.push_status(Ok(status(PairingStatus::Expired, None)));
        transport.push_init(Ok(init_response("BBBBBB")));
        transport.push_status(Ok(status(PairingStatus::Paired, Some("tok-2"))));

        let store = Arc::new(MemoryTokenStore::new());
        let mut machine = machine(store);
        let token = machine.run(&transport).await.expect("second code pairs");
        assert_eq!(token.as_str(), "tok-2");
    }

    #[tokio::test]
    async fn transient_failures_keep_the_current_code() {
        let transport = ScriptedTransport::new();
        transport.push_init(Ok(init_response("AB3X9Q")));
        transport.push_status(Err(ClientError::Timeout("poll timed out".into())));
        transport.push_status(Ok(status(PairingStatus::Paired, Some("tok-123"))));

        let store = Arc::new(MemoryTokenStore::new());
        let mut machine = machine(store);
        let token = machine.run(&transport).await.expect("retry succeeds");
        assert_eq!(token.as_str(), "tok-123");
    }

    #[tokio::test]
    async fn stale_generation_results_are_discarded() {
        let transport = ScriptedTransport::new();
        transport.push_init(Ok(init_response("AB3X9Q")));
        let store = Arc::new(MemoryTokenStore::new());
        let mut machine = machine(store.clone());
        machine.tick(&transport).await;
        let stale_generation = machine.generation;

        assert!(machine.handle_unauthorized());
        machine.apply_status(
            stale_generation,
            Ok(status(PairingStatus::Paired, Some("tok-stale"))),
        );

        assert!(matches!(machine.phase(), PairingPhase::Loading));
        assert_eq!(store.get("device_token"), None);
    }

    #[test]
    fn unauthorized_clears_the_token_and_restarts() {
        let store = Arc::new(MemoryTokenStore::new());
        store.set("device_token", "tok-revoked");
        let mut machine = machine(store.clone());
        assert!(machine.handle_unauthorized());
        assert_eq!(store.get("device_token"), None);
        assert!(matches!(machine.phase(), PairingPhase::Loading));
    }

    #[test]
    fn device_retries_are_bounded() {
        let store = Arc::new(MemoryTokenStore::new());
        let mut machine = machine(store);
        for _ in 0..MAX_UNAUTHORIZED_RETRIES {
            assert!(machine.handle_unauthorized());
        }
        assert!(!machine.handle_unauthorized());
        assert!(matches!(machine.phase(), PairingPhase::Failed { .. }));
    }

    #[test]
    fn supervisor_unauthorized_is_terminal() {
        let store = Arc::new(MemoryTokenStore::new());
        let mut machine = PairingMachine::new(store, Some(MesaId(42)), SessionRole::Supervisor);
        assert!(!machine.handle_unauthorized());
        assert!(matches!(machine.phase(), PairingPhase::Failed { .. }));
    }
}
