//! In-memory mesa registry: pairing sessions, device credentials, queues
//! and calibration records.
//!
//! All state lives behind one `RwLock`; operations are short and never
//! await while holding it. Time comes from an injected [`Clock`] so expiry
//! behaviour is testable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::coordinator::MesaQueue;
use crate::domain::{
    CalibrationRecord, CurrentItem, DeviceToken, Error, Fase, ImageRef, ItemId, MesaId, MesaState,
    ModuloId, PairingInitResponse, PairingSession, PairingStatus, PairingStatusResponse, QueueItem,
    QueueStatus, Subfase,
};

/// Pairing-code alphabet with the ambiguous characters (0/O, 1/I) removed.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

/// One projection table and everything the server tracks about it.
#[derive(Debug, Clone)]
struct MesaEntry {
    id: MesaId,
    nombre: String,
    queue: MesaQueue,
    calibration: Option<CalibrationRecord>,
    current_image_index: i32,
    mapper_enabled: bool,
    blackout: bool,
    locked: bool,
    last_seen: Option<DateTime<Utc>>,
    device_token_hash: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    mesas: HashMap<MesaId, MesaEntry>,
    pairings: HashMap<String, PairingSession>,
    images: HashMap<Subfase, Vec<ImageRef>>,
    next_mesa: i64,
    next_item: i64,
}

/// Mutable flag update applied to a mesa; `None` fields are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct MesaFlags {
    pub mapper_enabled: Option<bool>,
    pub blackout: Option<bool>,
    pub locked: Option<bool>,
}

/// Shared server state.
pub struct Registry {
    clock: Arc<dyn Clock>,
    pairing_ttl: TimeDelta,
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new(clock: Arc<dyn Clock>, pairing_ttl: TimeDelta) -> Self {
        Self {
            clock,
            pairing_ttl,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn create_mesa(&self, nombre: impl Into<String>) -> MesaId {
        let mut inner = self.lock_write();
        inner.next_mesa += 1;
        let id = MesaId(inner.next_mesa);
        inner.mesas.insert(
            id,
            MesaEntry {
                id,
                nombre: nombre.into(),
                queue: MesaQueue::new(),
                calibration: None,
                current_image_index: 0,
                mapper_enabled: true,
                blackout: false,
                locked: false,
                last_seen: None,
                device_token_hash: None,
            },
        );
        id
    }

    pub fn mesa_exists(&self, mesa: MesaId) -> bool {
        self.lock_read().mesas.contains_key(&mesa)
    }

    // ---- pairing -------------------------------------------------------

    /// Open a pairing session and hand back the code the device shows on
    /// screen.
    pub fn init_pairing(&self, mesa: Option<MesaId>) -> Result<PairingInitResponse, Error> {
        let now = self.clock.utc();
        let mut inner = self.lock_write();
        if let Some(mesa) = mesa {
            if !inner.mesas.contains_key(&mesa) {
                return Err(Error::not_found("mesa not found"));
            }
        }

        // Abandoned codes are only otherwise removed when their own code is
        // polled; sweep them here so they cannot pile up.
        inner
            .pairings
            .retain(|_, session| session.issued_token.is_some() || session.expires_at > now);

        let mut rng = SmallRng::from_entropy();
        let mut code = generate_code(&mut rng);
        while inner.pairings.contains_key(&code) {
            code = generate_code(&mut rng);
        }

        let session = PairingSession {
            pairing_code: code.clone(),
            expires_at: now + self.pairing_ttl,
            mesa,
            issued_token: None,
            created_at: now,
        };
        inner.pairings.insert(code.clone(), session);
        info!(code = %code, ?mesa, "pairing session opened");
        Ok(PairingInitResponse {
            pairing_code: code,
            expires_at: now + self.pairing_ttl,
        })
    }

    /// Device-side status poll. A parked token is delivered exactly once;
    /// the session is consumed on delivery. Expired sessions report
    /// `EXPIRED` once and are discarded.
    pub fn pairing_status(&self, code: &str) -> Result<PairingStatusResponse, Error> {
        let now = self.clock.utc();
        let mut inner = self.lock_write();
        let session = inner
            .pairings
            .get(code)
            .ok_or_else(|| Error::not_found("unknown pairing code"))?;

        if session.issued_token.is_none() && session.expires_at <= now {
            inner.pairings.remove(code);
            return Ok(PairingStatusResponse {
                status: PairingStatus::Expired,
                device_token: None,
                mesa_id: None,
            });
        }

        if session.issued_token.is_some() {
            let session = inner
                .pairings
                .remove(code)
                .ok_or_else(|| Error::internal("pairing session vanished"))?;
            return Ok(PairingStatusResponse {
                status: PairingStatus::Paired,
                device_token: session.issued_token,
                mesa_id: session.mesa,
            });
        }

        Ok(PairingStatusResponse {
            status: PairingStatus::Waiting,
            device_token: None,
            mesa_id: None,
        })
    }

    /// Operator submits the code shown on a device, binding that device to
    /// the mesa. The clear token is parked on the session for the device's
    /// next status poll; the mesa only keeps the hash.
    pub fn pair(&self, mesa: MesaId, code: &str) -> Result<(), Error> {
        let now = self.clock.utc();
        let mut inner = self.lock_write();
        let session = inner
            .pairings
            .get(code)
            .ok_or_else(|| Error::invalid_request("unknown or expired pairing code"))?;
        if session.expires_at <= now {
            inner.pairings.remove(code);
            return Err(Error::invalid_request("unknown or expired pairing code"));
        }
        if session.issued_token.is_some() {
            return Err(Error::conflict("pairing code already used"));
        }
        if let Some(pinned) = session.mesa {
            if pinned != mesa {
                return Err(Error::conflict("pairing code is pinned to another mesa"));
            }
        }
        if !inner.mesas.contains_key(&mesa) {
            return Err(Error::not_found("mesa not found"));
        }

        let token = Uuid::new_v4().simple().to_string();
        let hash = token_hash(&token);
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        entry.device_token_hash = Some(hash);
        entry.last_seen = Some(now);

        let session = inner
            .pairings
            .get_mut(code)
            .ok_or_else(|| Error::internal("pairing session vanished"))?;
        session.issued_token = Some(token);
        session.mesa = Some(mesa);
        info!(%mesa, code = %code, "device paired");
        Ok(())
    }

    /// Drop the mesa's device credential. The device's next authenticated
    /// call fails and it falls back to pairing.
    pub fn unbind(&self, mesa: MesaId) -> Result<(), Error> {
        let mut inner = self.lock_write();
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        entry.device_token_hash = None;
        info!(%mesa, "device unbound");
        Ok(())
    }

    /// Resolve a bearer token to its mesa.
    pub fn authenticate(&self, token: &DeviceToken) -> Result<MesaId, Error> {
        let hash = token_hash(token.as_str());
        let inner = self.lock_read();
        inner
            .mesas
            .values()
            .find(|entry| entry.device_token_hash.as_deref() == Some(hash.as_str()))
            .map(|entry| entry.id)
            .ok_or_else(|| Error::unauthorized("unknown device token"))
    }

    pub fn heartbeat(&self, token: &DeviceToken) -> Result<MesaId, Error> {
        let mesa = self.authenticate(token)?;
        let now = self.clock.utc();
        let mut inner = self.lock_write();
        if let Some(entry) = inner.mesas.get_mut(&mesa) {
            entry.last_seen = Some(now);
        }
        Ok(mesa)
    }

    // ---- mesa state ------------------------------------------------------

    pub fn device_state(&self, token: &DeviceToken) -> Result<MesaState, Error> {
        let mesa = self.authenticate(token)?;
        let inner = self.lock_read();
        let entry = inner
            .mesas
            .get(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        Ok(MesaState {
            id: entry.id,
            nombre: entry.nombre.clone(),
            image_url: current_image_url(&inner, entry),
            mapper_enabled: entry.mapper_enabled,
            calibration_json: entry.calibration.clone(),
            current_image_index: entry.current_image_index,
            blackout: entry.blackout,
            locked: entry.locked,
        })
    }

    pub fn set_index(&self, token: &DeviceToken, index: i32) -> Result<MesaId, Error> {
        let mesa = self.authenticate(token)?;
        let mut inner = self.lock_write();
        if let Some(entry) = inner.mesas.get_mut(&mesa) {
            entry.current_image_index = index;
        }
        Ok(mesa)
    }

    pub fn set_calibration(&self, mesa: MesaId, record: CalibrationRecord) -> Result<(), Error> {
        let mut inner = self.lock_write();
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        entry.calibration = Some(record);
        Ok(())
    }

    pub fn calibration(&self, mesa: MesaId) -> Result<Option<CalibrationRecord>, Error> {
        let inner = self.lock_read();
        inner
            .mesas
            .get(&mesa)
            .map(|entry| entry.calibration.clone())
            .ok_or_else(|| Error::not_found("mesa not found"))
    }

    pub fn update_flags(&self, mesa: MesaId, flags: MesaFlags) -> Result<MesaFlags, Error> {
        let mut inner = self.lock_write();
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        if let Some(mapper_enabled) = flags.mapper_enabled {
            entry.mapper_enabled = mapper_enabled;
        }
        if let Some(blackout) = flags.blackout {
            entry.blackout = blackout;
        }
        if let Some(locked) = flags.locked {
            entry.locked = locked;
        }
        Ok(MesaFlags {
            mapper_enabled: Some(entry.mapper_enabled),
            blackout: Some(entry.blackout),
            locked: Some(entry.locked),
        })
    }

    // ---- queue -----------------------------------------------------------

    /// Assign a subfase to a mesa's queue. The reference images travel with
    /// the assignment and are kept for `current_item` lookups.
    pub fn enqueue_item(
        &self,
        mesa: MesaId,
        modulo: ModuloId,
        fase: Fase,
        imagenes: Vec<ImageRef>,
        assigned_by: Option<String>,
    ) -> Result<QueueItem, Error> {
        let now = self.clock.utc();
        let subfase = Subfase { modulo, fase };
        let mut inner = self.lock_write();
        if !inner.mesas.contains_key(&mesa) {
            return Err(Error::not_found("mesa not found"));
        }
        if let Some(holder) = active_holder(&inner, subfase) {
            return Err(Error::conflict(format!(
                "subfase {modulo}/{fase} is already queued on mesa {holder}"
            )));
        }

        inner.next_item += 1;
        let id = ItemId(inner.next_item);
        let mut ordered = imagenes;
        ordered.sort_by_key(|image| image.orden);
        let item = QueueItem {
            id,
            mesa,
            modulo,
            fase,
            imagen: ordered.first().cloned(),
            position: 0,
            status: QueueStatus::EnCola,
            assigned_at: now,
            assigned_by,
            done_at: None,
            done_by: None,
        };
        inner.images.insert(subfase, ordered);
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        entry.queue.enqueue(item.clone());
        entry
            .queue
            .get(id)
            .cloned()
            .ok_or_else(|| Error::internal("enqueued item vanished"))
    }

    pub fn delete_item(&self, id: ItemId) -> Result<(), Error> {
        let mut inner = self.lock_write();
        let mesa = holder_of(&inner, id)?;
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        entry.queue.remove(id)?;
        Ok(())
    }

    pub fn mark_item_done(&self, id: ItemId, by: Option<String>) -> Result<(), Error> {
        let now = self.clock.utc();
        let mut inner = self.lock_write();
        let mesa = holder_of(&inner, id)?;
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        entry.queue.mark_done(id, now, by)
    }

    /// Device-initiated completion of whatever the mesa is displaying.
    pub fn mark_done_by_token(&self, token: &DeviceToken) -> Result<ItemId, Error> {
        let mesa = self.authenticate(token)?;
        let now = self.clock.utc();
        let mut inner = self.lock_write();
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        let id = entry
            .queue
            .current()
            .map(|item| item.id)
            .ok_or_else(|| Error::not_found("nothing is displaying"))?;
        entry.queue.mark_done(id, now, None)?;
        Ok(id)
    }

    pub fn show_item(&self, id: ItemId) -> Result<(), Error> {
        let mut inner = self.lock_write();
        let mesa = holder_of(&inner, id)?;
        let entry = inner
            .mesas
            .get_mut(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        entry.queue.show(id)
    }

    /// Bulk reorder from the dashboard: `(id, position)` pairs applied in
    /// ascending position order.
    pub fn reorder_items(&self, updates: &[(ItemId, u32)]) -> Result<(), Error> {
        let mut sorted = updates.to_vec();
        sorted.sort_by_key(|&(_, position)| position);
        let mut inner = self.lock_write();
        for (id, position) in sorted {
            let mesa = holder_of(&inner, id)?;
            let entry = inner
                .mesas
                .get_mut(&mesa)
                .ok_or_else(|| Error::not_found("mesa not found"))?;
            entry.queue.reorder(id, position as usize)?;
        }
        Ok(())
    }

    pub fn queue_items(&self, mesa: MesaId) -> Result<Vec<QueueItem>, Error> {
        let inner = self.lock_read();
        let entry = inner
            .mesas
            .get(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        Ok(entry.queue.ordered().into_iter().cloned().collect())
    }

    pub fn current_item(&self, mesa: MesaId) -> Result<CurrentItem, Error> {
        let inner = self.lock_read();
        let entry = inner
            .mesas
            .get(&mesa)
            .ok_or_else(|| Error::not_found("mesa not found"))?;
        let item = entry
            .queue
            .current()
            .cloned()
            .ok_or_else(|| Error::not_found("nothing is displaying"))?;
        let imagenes = inner.images.get(&item.subfase()).cloned().unwrap_or_default();
        Ok(CurrentItem { item, imagenes })
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn generate_code(rng: &mut SmallRng) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn active_holder(inner: &Inner, subfase: Subfase) -> Option<MesaId> {
    inner.mesas.values().find_map(|entry| {
        entry
            .queue
            .all()
            .iter()
            .any(|item| item.subfase() == subfase && item.status != QueueStatus::Hecho)
            .then_some(entry.id)
    })
}

fn holder_of(inner: &Inner, id: ItemId) -> Result<MesaId, Error> {
    inner
        .mesas
        .values()
        .find(|entry| entry.queue.contains(id))
        .map(|entry| entry.id)
        .ok_or_else(|| Error::not_found("queue item not found"))
}

/// URL the device should display: the image at `current_image_index` of the
/// active item's sequence, or nothing for empty queues and test patterns.
fn current_image_url(inner: &Inner, entry: &MesaEntry) -> Option<String> {
    if entry.current_image_index < 0 {
        return None;
    }
    let item = entry.queue.current()?;
    let images = inner.images.get(&item.subfase())?;
    images
        .get(entry.current_image_index as usize)
        .map(|image| image.url.clone())
}
