//! Client half of the protocol: what a paired display device (or the
//! supervising dashboard) runs against the server.

pub mod api;
pub mod calibration;
pub mod pairing;
pub mod session;
pub mod stream;
pub mod token_store;

pub use api::{ClientError, DeviceApi, DeviceTransport};
pub use calibration::{CalibrationController, ExternalOutcome, SaveRequest};
pub use pairing::{PairingMachine, PairingPhase};
pub use session::{INDEX_CROSSHAIR, INDEX_GRID, ProjectionSession, SessionRole, TestPattern};
pub use token_store::{MemoryTokenStore, TokenStore};
