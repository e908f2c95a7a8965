//! Transport-agnostic domain model shared by the server and the device
//! client, so statuses and identifiers stay typed end-to-end.

pub mod calibration;
pub mod error;
pub mod ids;
pub mod pairing;
pub mod queue;

pub use calibration::{CalibrationRecord, Corner, CornerSet, Point};
pub use error::{Error, ErrorCode};
pub use ids::{DeviceToken, ItemId, MesaId, ModuloId};
pub use pairing::{PairingInitResponse, PairingSession, PairingStatus, PairingStatusResponse};
pub use queue::{CurrentItem, Fase, ImageRef, MesaState, QueueItem, QueueStatus, Subfase};
