//! Queue item model and the mesa state snapshot served to devices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::calibration::CalibrationRecord;
use super::ids::{ItemId, MesaId, ModuloId};

/// The two independently queueable halves of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fase {
    #[serde(rename = "INFERIOR")]
    Inferior,
    #[serde(rename = "SUPERIOR")]
    Superior,
}

impl std::fmt::Display for Fase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fase::Inferior => write!(f, "INFERIOR"),
            Fase::Superior => write!(f, "SUPERIOR"),
        }
    }
}

/// Lifecycle of a queue item. Advances monotonically; never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueStatus {
    #[serde(rename = "EN_COLA")]
    EnCola,
    #[serde(rename = "MOSTRANDO")]
    Mostrando,
    #[serde(rename = "HECHO")]
    Hecho,
}

/// The logical assignment unit: one phase of one module.
///
/// A subfase may be actively queued on at most one mesa at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subfase {
    pub modulo: ModuloId,
    pub fase: Fase,
}

/// Reference image in a subfase's ordered sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: i64,
    pub url: String,
    pub orden: u32,
}

/// One scheduled display job on a mesa's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub mesa: MesaId,
    pub modulo: ModuloId,
    pub fase: Fase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imagen: Option<ImageRef>,
    pub position: u32,
    pub status: QueueStatus,
    pub assigned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_by: Option<String>,
}

impl QueueItem {
    pub fn subfase(&self) -> Subfase {
        Subfase {
            modulo: self.modulo,
            fase: self.fase,
        }
    }
}

/// Active queue item with the subfase's reference images embedded, as served
/// by `GET /api/mesas/{id}/current_item/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentItem {
    #[serde(flatten)]
    pub item: QueueItem,
    #[serde(default)]
    pub imagenes: Vec<ImageRef>,
}

/// Snapshot of a mesa as seen by its paired device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MesaState {
    pub id: MesaId,
    pub nombre: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub mapper_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_json: Option<CalibrationRecord>,
    pub current_image_index: i32,
    pub blackout: bool,
    pub locked: bool,
}
