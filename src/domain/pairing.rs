//! Pairing session model and the wire payloads of the pairing handshake.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MesaId;

/// Lifecycle of a pairing session. `Paired` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PairingStatus {
    Waiting,
    Paired,
    Expired,
}

/// Server-side pairing session: created when a device requests a code,
/// converted into a device session when an operator submits the code.
#[derive(Debug, Clone)]
pub struct PairingSession {
    pub pairing_code: String,
    pub expires_at: DateTime<Utc>,
    /// Pinned mesa for the supervisor/calibration flow; `None` for the
    /// generic flow, where the operator picks the mesa when pairing.
    pub mesa: Option<MesaId>,
    /// Clear token parked here between `pair` and the device's next status
    /// poll, which claims it. The mesa itself only stores the hash.
    pub issued_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Response to `POST /api/device/init/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingInitResponse {
    pub pairing_code: String,
    pub expires_at: DateTime<Utc>,
}

/// Response to `GET /api/device/status/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingStatusResponse {
    pub status: PairingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesa_id: Option<MesaId>,
}
