//! Queue item HTTP handlers (dashboard side).
//!
//! ```text
//! POST   /api/mesa-queue-items/                   assign a subfase to a mesa
//! POST   /api/mesa-queue-items/reorder/           bulk position update
//! POST   /api/mesa-queue-items/{id}/marcar_hecho/ complete an item
//! POST   /api/mesa-queue-items/{id}/mostrar/      force an item on screen
//! DELETE /api/mesa-queue-items/{id}/              remove an item
//! ```

use actix_web::{HttpResponse, delete, post, web};
use serde::Deserialize;

use crate::domain::{Fase, ImageRef, ItemId, MesaId, ModuloId, QueueItem};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub mesa: MesaId,
    pub modulo: ModuloId,
    pub fase: Fase,
    #[serde(default)]
    pub imagenes: Vec<ImageRef>,
    #[serde(default)]
    pub assigned_by: Option<String>,
}

#[post("/mesa-queue-items/")]
pub async fn assign(
    state: web::Data<HttpState>,
    body: web::Json<AssignRequest>,
) -> ApiResult<web::Json<QueueItem>> {
    let body = body.into_inner();
    let item = state.registry.enqueue_item(
        body.mesa,
        body.modulo,
        body.fase,
        body.imagenes,
        body.assigned_by,
    )?;
    Ok(web::Json(item))
}

#[derive(Debug, Deserialize)]
pub struct ReorderEntry {
    pub id: ItemId,
    pub position: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub items: Vec<ReorderEntry>,
}

#[post("/mesa-queue-items/reorder/")]
pub async fn reorder(
    state: web::Data<HttpState>,
    body: web::Json<ReorderRequest>,
) -> ApiResult<HttpResponse> {
    let updates: Vec<(ItemId, u32)> = body
        .items
        .iter()
        .map(|entry| (entry.id, entry.position))
        .collect();
    state.registry.reorder_items(&updates)?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize, Default)]
pub struct MarcarHechoRequest {
    #[serde(default)]
    pub done_by: Option<String>,
}

#[post("/mesa-queue-items/{id}/marcar_hecho/")]
pub async fn marcar_hecho(
    state: web::Data<HttpState>,
    path: web::Path<ItemId>,
    body: Option<web::Json<MarcarHechoRequest>>,
) -> ApiResult<HttpResponse> {
    let done_by = body.and_then(|b| b.into_inner().done_by);
    state.registry.mark_item_done(*path, done_by)?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/mesa-queue-items/{id}/mostrar/")]
pub async fn mostrar(state: web::Data<HttpState>, path: web::Path<ItemId>) -> ApiResult<HttpResponse> {
    state.registry.show_item(*path)?;
    Ok(HttpResponse::NoContent().finish())
}

#[delete("/mesa-queue-items/{id}/")]
pub async fn delete(state: web::Data<HttpState>, path: web::Path<ItemId>) -> ApiResult<HttpResponse> {
    state.registry.delete_item(*path)?;
    Ok(HttpResponse::NoContent().finish())
}
