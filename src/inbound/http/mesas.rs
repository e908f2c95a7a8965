//! Mesa (projection table) HTTP handlers.
//!
//! ```text
//! POST  /api/mesas/                      create a mesa
//! GET   /api/mesas/{id}/queue_items/     live queue in display order
//! GET   /api/mesas/{id}/current_item/    displayed item with its images
//! POST  /api/mesas/{id}/calibration/     store corners, push to the device
//! PATCH /api/mesas/{id}/                 partial flag update
//! ```

use actix_web::{HttpResponse, get, patch, post, web};
use serde::{Deserialize, Serialize};

use crate::domain::{CalibrationRecord, CurrentItem, MesaId, QueueItem};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;
use crate::push::{CalibrationPush, PushEvent};
use crate::registry::MesaFlags;

#[derive(Debug, Deserialize)]
pub struct CreateMesaRequest {
    pub nombre: String,
}

#[derive(Debug, Serialize)]
pub struct CreateMesaResponse {
    pub id: MesaId,
    pub nombre: String,
}

#[post("/mesas/")]
pub async fn create_mesa(
    state: web::Data<HttpState>,
    body: web::Json<CreateMesaRequest>,
) -> ApiResult<web::Json<CreateMesaResponse>> {
    let id = state.registry.create_mesa(body.nombre.clone());
    Ok(web::Json(CreateMesaResponse {
        id,
        nombre: body.nombre.clone(),
    }))
}

#[get("/mesas/{id}/queue_items/")]
pub async fn queue_items(
    state: web::Data<HttpState>,
    path: web::Path<MesaId>,
) -> ApiResult<web::Json<Vec<QueueItem>>> {
    let items = state.registry.queue_items(*path)?;
    Ok(web::Json(items))
}

#[get("/mesas/{id}/current_item/")]
pub async fn current_item(
    state: web::Data<HttpState>,
    path: web::Path<MesaId>,
) -> ApiResult<web::Json<CurrentItem>> {
    let current = state.registry.current_item(*path)?;
    Ok(web::Json(current))
}

#[derive(Debug, Deserialize)]
pub struct CalibrationRequest {
    pub calibration_json: CalibrationRecord,
}

#[post("/mesas/{id}/calibration/")]
pub async fn set_calibration(
    state: web::Data<HttpState>,
    path: web::Path<MesaId>,
    body: web::Json<CalibrationRequest>,
) -> ApiResult<HttpResponse> {
    let mesa = *path;
    let record = body.into_inner().calibration_json;
    state.registry.set_calibration(mesa, record.clone())?;
    state.hub.publish(
        mesa,
        PushEvent::Calibration {
            data: CalibrationPush {
                corners: Some(record),
                ..CalibrationPush::default()
            },
        },
    );
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
pub struct FlagsRequest {
    #[serde(default)]
    pub mapper_enabled: Option<bool>,
    #[serde(default)]
    pub blackout: Option<bool>,
    #[serde(default)]
    pub locked: Option<bool>,
}

#[patch("/mesas/{id}/")]
pub async fn update_flags(
    state: web::Data<HttpState>,
    path: web::Path<MesaId>,
    body: web::Json<FlagsRequest>,
) -> ApiResult<HttpResponse> {
    let mesa = *path;
    let applied = state.registry.update_flags(
        mesa,
        MesaFlags {
            mapper_enabled: body.mapper_enabled,
            blackout: body.blackout,
            locked: body.locked,
        },
    )?;
    if body.mapper_enabled.is_some() {
        state.hub.publish(
            mesa,
            PushEvent::Calibration {
                data: CalibrationPush {
                    mapper_enabled: applied.mapper_enabled,
                    ..CalibrationPush::default()
                },
            },
        );
    }
    Ok(HttpResponse::NoContent().finish())
}
