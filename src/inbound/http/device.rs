//! Device-facing HTTP handlers.
//!
//! ```text
//! POST /api/device/init/       open a pairing session, returns the code
//! GET  /api/device/status/     device polls the code until paired
//! POST /api/device/pair/       operator submits the code for a mesa
//! POST /api/device/unbind/     revoke a mesa's device credential
//! GET  /api/device/state/      bearer: mesa snapshot for the device
//! POST /api/device/heartbeat/  bearer: liveness ping
//! POST /api/device/set_index/  bearer: device reports its image index
//! POST /api/device/mark_done/  bearer: finish the displayed item
//! GET  /api/device/stream/     SSE push channel (token or mesa_id)
//! ```

use actix_web::{HttpRequest, HttpResponse, get, post, web};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::{DeviceToken, Error, MesaId, PairingInitResponse, PairingStatusResponse};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;
use crate::push::{CalibrationPush, PushEvent};

/// Pull the bearer credential out of the `Authorization` header.
fn bearer_token(req: &HttpRequest) -> Result<DeviceToken, Error> {
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .ok_or_else(|| Error::unauthorized("missing Authorization header"))?;
    let value = header
        .to_str()
        .map_err(|_| Error::unauthorized("malformed Authorization header"))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::unauthorized("expected a bearer token"))?;
    if token.is_empty() {
        return Err(Error::unauthorized("empty bearer token"));
    }
    Ok(DeviceToken::new(token))
}

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub mesa_id: Option<MesaId>,
}

#[post("/device/init/")]
pub async fn init_pairing(
    state: web::Data<HttpState>,
    body: web::Json<InitRequest>,
) -> ApiResult<web::Json<PairingInitResponse>> {
    let response = state.registry.init_pairing(body.mesa_id)?;
    Ok(web::Json(response))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub code: String,
}

#[get("/device/status/")]
pub async fn pairing_status(
    state: web::Data<HttpState>,
    query: web::Query<StatusQuery>,
) -> ApiResult<web::Json<PairingStatusResponse>> {
    let response = state.registry.pairing_status(&query.code)?;
    Ok(web::Json(response))
}

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub mesa_id: MesaId,
    pub pairing_code: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[post("/device/pair/")]
pub async fn pair(
    state: web::Data<HttpState>,
    body: web::Json<PairRequest>,
) -> ApiResult<web::Json<OkResponse>> {
    state.registry.pair(body.mesa_id, &body.pairing_code)?;
    Ok(web::Json(OkResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
pub struct UnbindRequest {
    pub mesa_id: MesaId,
}

#[post("/device/unbind/")]
pub async fn unbind(
    state: web::Data<HttpState>,
    body: web::Json<UnbindRequest>,
) -> ApiResult<web::Json<OkResponse>> {
    state.registry.unbind(body.mesa_id)?;
    Ok(web::Json(OkResponse { ok: true }))
}

#[get("/device/state/")]
pub async fn device_state(
    state: web::Data<HttpState>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let snapshot = state.registry.device_state(&token)?;
    Ok(HttpResponse::Ok().json(snapshot))
}

#[post("/device/heartbeat/")]
pub async fn heartbeat(state: web::Data<HttpState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    state.registry.heartbeat(&token)?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
pub struct SetIndexRequest {
    pub index: i32,
}

#[post("/device/set_index/")]
pub async fn set_index(
    state: web::Data<HttpState>,
    req: HttpRequest,
    body: web::Json<SetIndexRequest>,
) -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let mesa = state.registry.set_index(&token, body.index)?;
    state.hub.publish(
        mesa,
        PushEvent::Calibration {
            data: CalibrationPush {
                current_image_index: Some(body.index),
                ..CalibrationPush::default()
            },
        },
    );
    Ok(HttpResponse::NoContent().finish())
}

#[post("/device/mark_done/")]
pub async fn mark_done(state: web::Data<HttpState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let item = state.registry.mark_done_by_token(&token)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "item_id": item })))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub mesa_id: Option<MesaId>,
}

/// Server-sent-event channel carrying partial mesa-state updates. Devices
/// identify by token, the dashboard by mesa id.
#[get("/device/stream/")]
pub async fn stream(
    state: web::Data<HttpState>,
    query: web::Query<StreamQuery>,
) -> ApiResult<HttpResponse> {
    let mesa = match (&query.token, query.mesa_id) {
        (Some(token), _) => state.registry.authenticate(&DeviceToken::new(token.clone()))?,
        (None, Some(mesa)) if state.registry.mesa_exists(mesa) => mesa,
        (None, Some(_)) => return Err(Error::not_found("mesa not found")),
        (None, None) => return Err(Error::invalid_request("token or mesa_id required")),
    };

    let rx = state.hub.subscribe(mesa);
    let events = futures_util::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(error) => {
                            warn!(error = %error, "dropping unserializable push event");
                            continue;
                        }
                    };
                    let frame = web::Bytes::from(format!("data: {json}\n\n"));
                    return Some((Ok::<_, actix_web::Error>(frame), rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%mesa, skipped, "slow stream subscriber skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(events))
}
