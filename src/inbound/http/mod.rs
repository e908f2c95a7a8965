//! HTTP inbound adapter exposing the device and dashboard REST/SSE endpoints.

pub mod device;
pub mod error;
pub mod mesas;
pub mod queue_items;
pub mod state;

pub use error::ApiResult;

use actix_web::{Scope, web};

/// Everything under `/api`, in one scope so tests can mount it verbatim.
pub fn api_scope() -> Scope {
    web::scope("/api")
        .service(device::init_pairing)
        .service(device::pairing_status)
        .service(device::pair)
        .service(device::unbind)
        .service(device::device_state)
        .service(device::heartbeat)
        .service(device::set_index)
        .service(device::mark_done)
        .service(device::stream)
        .service(mesas::create_mesa)
        .service(mesas::queue_items)
        .service(mesas::current_item)
        .service(mesas::set_calibration)
        .service(mesas::update_flags)
        .service(queue_items::assign)
        .service(queue_items::reorder)
        .service(queue_items::marcar_hecho)
        .service(queue_items::mostrar)
        .service(queue_items::delete)
}
