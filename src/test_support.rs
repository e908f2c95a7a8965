//! Shared test doubles.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

use crate::client::api::{ClientError, DeviceTransport};
use crate::domain::{
    CalibrationRecord, CurrentItem, DeviceToken, ItemId, MesaId, MesaState, PairingInitResponse,
    PairingStatusResponse,
};

/// Manually advanced clock for expiry and throttle-window tests.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => {
                panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}")
            }
        };
        *self.lock_clock() += delta;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    pub fn advance_millis(&self, millis: i64) {
        *self.lock_clock() += TimeDelta::milliseconds(millis);
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// [`DeviceTransport`] double driven by queued responses.
///
/// Response-bearing calls pop their queue and fail loudly when it runs dry;
/// fire-and-forget calls succeed unless a failure is queued. Every call is
/// appended to a log so tests can assert on traffic.
#[derive(Default)]
pub struct ScriptedTransport {
    init: Mutex<VecDeque<Result<PairingInitResponse, ClientError>>>,
    status: Mutex<VecDeque<Result<PairingStatusResponse, ClientError>>>,
    state: Mutex<VecDeque<Result<MesaState, ClientError>>>,
    current: Mutex<VecDeque<Result<CurrentItem, ClientError>>>,
    unit_failures: Mutex<VecDeque<(String, ClientError)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_init(&self, response: Result<PairingInitResponse, ClientError>) {
        self.lock(&self.init).push_back(response);
    }

    pub fn push_status(&self, response: Result<PairingStatusResponse, ClientError>) {
        self.lock(&self.status).push_back(response);
    }

    pub fn push_state(&self, response: Result<MesaState, ClientError>) {
        self.lock(&self.state).push_back(response);
    }

    pub fn push_current_item(&self, response: Result<CurrentItem, ClientError>) {
        self.lock(&self.current).push_back(response);
    }

    /// Queue a failure for the next named fire-and-forget call.
    pub fn fail_next(&self, method: &str, error: ClientError) {
        self.lock(&self.unit_failures)
            .push_back((method.to_owned(), error));
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock(&self.calls).clone()
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: impl Into<String>) {
        self.lock(&self.calls).push(call.into());
    }

    fn pop<T>(
        &self,
        queue: &Mutex<VecDeque<Result<T, ClientError>>>,
        method: &str,
    ) -> Result<T, ClientError> {
        self.lock(queue)
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Transport(format!("script exhausted: {method}"))))
    }

    fn unit(&self, method: &str) -> Result<(), ClientError> {
        let mut failures = self.lock(&self.unit_failures);
        if let Some(index) = failures.iter().position(|(name, _)| name == method) {
            let (_, error) = failures.remove(index).unwrap_or_else(|| unreachable!());
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    async fn init_pairing(
        &self,
        mesa: Option<MesaId>,
    ) -> Result<PairingInitResponse, ClientError> {
        self.record(format!("init_pairing {mesa:?}"));
        self.pop(&self.init, "init_pairing")
    }

    async fn pairing_status(&self, code: &str) -> Result<PairingStatusResponse, ClientError> {
        self.record(format!("pairing_status {code}"));
        self.pop(&self.status, "pairing_status")
    }

    async fn device_state(&self, _token: &DeviceToken) -> Result<MesaState, ClientError> {
        self.record("device_state");
        self.pop(&self.state, "device_state")
    }

    async fn heartbeat(&self, _token: &DeviceToken) -> Result<(), ClientError> {
        self.record("heartbeat");
        self.unit("heartbeat")
    }

    async fn set_index(&self, _token: &DeviceToken, index: i32) -> Result<(), ClientError> {
        self.record(format!("set_index {index}"));
        self.unit("set_index")
    }

    async fn mark_done(&self, _token: &DeviceToken) -> Result<(), ClientError> {
        self.record("mark_done");
        self.unit("mark_done")
    }

    async fn current_item(&self, mesa: MesaId) -> Result<CurrentItem, ClientError> {
        self.record(format!("current_item {mesa}"));
        self.pop(&self.current, "current_item")
    }

    async fn marcar_hecho(&self, item: ItemId) -> Result<(), ClientError> {
        self.record(format!("marcar_hecho {item}"));
        self.unit("marcar_hecho")
    }

    async fn set_blackout(&self, mesa: MesaId, blackout: bool) -> Result<(), ClientError> {
        self.record(format!("set_blackout {mesa} {blackout}"));
        self.unit("set_blackout")
    }

    async fn save_calibration(
        &self,
        mesa: MesaId,
        _record: &CalibrationRecord,
    ) -> Result<(), ClientError> {
        self.record(format!("save_calibration {mesa}"));
        self.unit("save_calibration")
    }
}
