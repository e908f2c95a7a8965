//! Projection session controller.
//!
//! Owns what the projector is showing: the active queue item, its image
//! sequence, and the current index. Negative indices are reserved for test
//! patterns and never touch the image list. The `run` driver multiplexes
//! polling, heartbeats, push events, and debounced calibration saves.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::client::api::{ClientError, DeviceTransport};
use crate::client::calibration::{CalibrationController, SaveRequest};
use crate::client::token_store::{TokenStore, save_corners};
use crate::domain::{CalibrationRecord, CurrentItem, DeviceToken, ImageRef, MesaId, MesaState};
use crate::push::{CalibrationPush, PushEvent};

/// Plain alignment grid.
pub const INDEX_GRID: i32 = -1;
/// Alignment grid with a centre crosshair.
pub const INDEX_CROSSHAIR: i32 = -2;

#[cfg(not(test))]
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);
#[cfg(test)]
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(5);

#[cfg(not(test))]
const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
#[cfg(test)]
const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);

// Settled calibration saves drain on their own short cadence so the
// debounce window keeps its meaning against the slower state poll.
#[cfg(not(test))]
const SAVE_TICK: std::time::Duration = std::time::Duration::from_millis(50);
#[cfg(test)]
const SAVE_TICK: std::time::Duration = std::time::Duration::from_millis(2);

/// Who is driving this session. Devices report their index and heartbeat;
/// the supervising dashboard only observes and finishes items by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Device,
    Supervisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    Grid,
    Crosshair,
}

impl TestPattern {
    fn index(self) -> i32 {
        match self {
            TestPattern::Grid => INDEX_GRID,
            TestPattern::Crosshair => INDEX_CROSSHAIR,
        }
    }
}

pub struct ProjectionSession {
    role: SessionRole,
    token: DeviceToken,
    store: Arc<dyn TokenStore>,
    mesa: Option<MesaId>,
    state: Option<MesaState>,
    active_item: Option<CurrentItem>,
    images: Vec<ImageRef>,
    current_index: i32,
    saved_index: Option<i32>,
    restored_index: Option<i32>,
}

impl ProjectionSession {
    pub fn new(role: SessionRole, token: DeviceToken, store: Arc<dyn TokenStore>) -> Self {
        Self {
            role,
            token,
            store,
            mesa: None,
            state: None,
            active_item: None,
            images: Vec::new(),
            current_index: 0,
            saved_index: None,
            restored_index: None,
        }
    }

    pub fn current_index(&self) -> i32 {
        self.current_index
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn active_item(&self) -> Option<&CurrentItem> {
        self.active_item.as_ref()
    }

    pub fn locked(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.locked)
    }

    pub fn blackout(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.blackout)
    }

    pub fn test_pattern_active(&self) -> bool {
        self.current_index < 0
    }

    /// Image currently on the projector, if a real index points at one.
    pub fn current_image(&self) -> Option<&ImageRef> {
        if self.current_index < 0 {
            return None;
        }
        self.images.get(self.current_index as usize)
    }

    /// Corners to seed the calibration controller with: the server's
    /// record, or the locally cached corners when the server has none yet.
    pub fn initial_corners(&self) -> Option<crate::domain::CornerSet> {
        if let Some(record) = self.state.as_ref().and_then(|s| s.calibration_json.as_ref()) {
            return Some(record.corners);
        }
        crate::client::token_store::load_corners(self.store.as_ref())
    }

    /// Fetch the mesa snapshot and the active item.
    ///
    /// # Errors
    ///
    /// Propagates [`ClientError::Unauthorized`] so the caller can fall back
    /// to pairing; transient failures are swallowed and retried next tick.
    pub async fn refresh(&mut self, transport: &dyn DeviceTransport) -> Result<(), ClientError> {
        match transport.device_state(&self.token).await {
            Ok(state) => {
                if let Some(record) = &state.calibration_json {
                    save_corners(self.store.as_ref(), &record.corners);
                }
                let first_sync = self.mesa.is_none();
                self.mesa = Some(state.id);
                if first_sync {
                    // The server remembers where the projector was; adopting
                    // the first item after a reconnect is a resume, not a
                    // change.
                    self.current_index = state.current_image_index;
                    self.restored_index = Some(state.current_image_index);
                }
                self.state = Some(state);
            }
            Err(error) if error.is_transient() => {
                warn!(error = %error, "state poll failed; retrying");
                return Ok(());
            }
            Err(error) => return Err(error),
        }
        self.poll_active(transport).await
    }

    /// Re-fetch the active item; an identity change resets the index and
    /// reloads the image sequence.
    pub async fn poll_active(&mut self, transport: &dyn DeviceTransport) -> Result<(), ClientError> {
        let Some(mesa) = self.mesa else {
            return Ok(());
        };
        match transport.current_item(mesa).await {
            Ok(mut current) => {
                current.imagenes.sort_by_key(|image| image.orden);
                let changed = self
                    .active_item
                    .as_ref()
                    .map(|active| active.item.id != current.item.id)
                    .unwrap_or(true);
                if changed {
                    info!(item = %current.item.id, "active item changed");
                    self.images = current.imagenes.clone();
                    self.saved_index = None;
                    self.active_item = Some(current);
                    let resumed = self
                        .restored_index
                        .take()
                        .filter(|&index| index < 0 || (index as usize) < self.images.len());
                    match resumed {
                        Some(index) => self.current_index = index,
                        None => {
                            self.current_index = 0;
                            self.push_index(transport).await?;
                        }
                    }
                } else {
                    self.images = current.imagenes.clone();
                    self.active_item = Some(current);
                }
            }
            Err(ClientError::NotFound(_)) => {
                self.active_item = None;
                self.images.clear();
                self.restored_index = None;
                if !self.test_pattern_active() {
                    self.current_index = 0;
                }
            }
            Err(error) if error.is_transient() => {
                warn!(error = %error, "active item poll failed; retrying");
            }
            Err(error) => return Err(error),
        }
        Ok(())
    }

    /// Advance one image. At the end of the sequence the item is finished;
    /// the sequence never wraps.
    pub async fn next_image(&mut self, transport: &dyn DeviceTransport) -> Result<(), ClientError> {
        if self.locked() || self.test_pattern_active() || self.active_item.is_none() {
            return Ok(());
        }
        if ((self.current_index + 1) as usize) < self.images.len() {
            self.current_index += 1;
            self.push_index(transport).await?;
        } else {
            self.finish_active_item(transport).await?;
        }
        Ok(())
    }

    /// Step back one image, floored at the first.
    pub async fn prev_image(&mut self, transport: &dyn DeviceTransport) -> Result<(), ClientError> {
        if self.locked() || self.test_pattern_active() || self.active_item.is_none() {
            return Ok(());
        }
        if self.current_index > 0 {
            self.current_index -= 1;
            self.push_index(transport).await?;
        }
        Ok(())
    }

    /// Toggle a test pattern. Re-toggling the active pattern restores the
    /// image index it replaced.
    pub async fn toggle_test_pattern(
        &mut self,
        pattern: TestPattern,
        transport: &dyn DeviceTransport,
    ) -> Result<(), ClientError> {
        if self.locked() {
            return Ok(());
        }
        let sentinel = pattern.index();
        if self.current_index == sentinel {
            self.current_index = self.saved_index.take().unwrap_or(0);
        } else {
            if !self.test_pattern_active() {
                self.saved_index = Some(self.current_index);
            }
            self.current_index = sentinel;
        }
        self.push_index(transport).await
    }

    /// Toggle the blackout curtain. Other viewers of the mesa pick the flag
    /// up on their next state poll.
    pub async fn toggle_blackout(
        &mut self,
        transport: &dyn DeviceTransport,
    ) -> Result<(), ClientError> {
        let Some(mesa) = self.mesa else {
            return Ok(());
        };
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let blackout = !state.blackout;
        match transport.set_blackout(mesa, blackout).await {
            Ok(()) => {
                state.blackout = blackout;
                Ok(())
            }
            Err(error) if error.is_transient() => {
                warn!(error = %error, "blackout toggle failed");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Finish the displayed item, clear local state, and immediately look
    /// for the next one.
    pub async fn finish_active_item(
        &mut self,
        transport: &dyn DeviceTransport,
    ) -> Result<(), ClientError> {
        let Some(active) = self.active_item.take() else {
            return Ok(());
        };
        let result = match self.role {
            SessionRole::Device => transport.mark_done(&self.token).await,
            SessionRole::Supervisor => transport.marcar_hecho(active.item.id).await,
        };
        match result {
            Ok(()) => {}
            Err(error) if error.is_transient() => {
                warn!(error = %error, "finish failed; item restored");
                self.active_item = Some(active);
                return Ok(());
            }
            Err(error) => return Err(error),
        }
        self.images.clear();
        self.current_index = 0;
        self.saved_index = None;
        self.poll_active(transport).await
    }

    /// Apply a pushed partial state update. Returns a calibration record
    /// when the push carried corners, for the calibration controller.
    pub fn apply_push(&mut self, push: &CalibrationPush) -> Option<CalibrationRecord> {
        if let Some(state) = self.state.as_mut() {
            if let Some(mapper_enabled) = push.mapper_enabled {
                state.mapper_enabled = mapper_enabled;
            }
            if let Some(record) = &push.corners {
                state.calibration_json = Some(record.clone());
            }
        }
        if let Some(index) = push.current_image_index {
            self.current_index = index;
        }
        push.corners.clone()
    }

    /// Report the device's index to the server. Supervisor sessions observe
    /// only and never write it.
    async fn push_index(&self, transport: &dyn DeviceTransport) -> Result<(), ClientError> {
        if self.role != SessionRole::Device {
            return Ok(());
        }
        match transport.set_index(&self.token, self.current_index).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_transient() => {
                warn!(error = %error, "index push failed");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn push_save(
        &self,
        transport: &dyn DeviceTransport,
        save: &SaveRequest,
    ) -> Result<(), ClientError> {
        let Some(mesa) = self.mesa else {
            return Ok(());
        };
        match transport.save_calibration(mesa, &save.record).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_transient() => {
                // Local corners are kept; the next save retries.
                warn!(error = %error, "calibration save failed");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Drive the session until shutdown: state polling, device heartbeats,
    /// push events, and settled calibration saves.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Unauthorized`] when the credential is revoked;
    /// the caller hands control back to the pairing machine.
    pub async fn run(
        &mut self,
        transport: &dyn DeviceTransport,
        controller: &mut CalibrationController,
        mut pushes: mpsc::Receiver<PushEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut save = tokio::time::interval(SAVE_TICK);
        let mut pushes_open = true;
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.refresh(transport).await?;
                }
                _ = save.tick(), if self.mesa.is_some() => {
                    if let Some(save) = controller.due_save() {
                        self.push_save(transport, &save).await?;
                    }
                }
                _ = heartbeat.tick(), if self.role == SessionRole::Device => {
                    if let Err(error) = transport.heartbeat(&self.token).await {
                        if !error.is_transient() {
                            return Err(error);
                        }
                        warn!(error = %error, "heartbeat failed");
                    }
                }
                event = pushes.recv(), if pushes_open => {
                    match event {
                        Some(PushEvent::Calibration { data }) => {
                            if let Some(record) = self.apply_push(&data) {
                                controller.apply_external(&record);
                            }
                        }
                        None => pushes_open = false,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
