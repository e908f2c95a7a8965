//! Queue coordination over real Actix handlers: assignment, auto-advance,
//! manual show, reorder, and the device completing work by token.

use std::sync::Arc;

use actix_web::dev::{Service, ServiceResponse};
use actix_web::{App, test, web};
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};

use proyeccion::inbound::http::api_scope;
use proyeccion::inbound::http::state::HttpState;
use proyeccion::push::PushHub;
use proyeccion::registry::Registry;
use proyeccion::test_support::MutableClock;

fn state() -> web::Data<HttpState> {
    let clock = Arc::new(MutableClock::new(Utc::now()));
    let registry = Arc::new(Registry::new(clock, TimeDelta::seconds(300)));
    web::Data::new(HttpState::new(registry, Arc::new(PushHub::new())))
}

macro_rules! service {
    () => {
        test::init_service(App::new().app_data(state()).service(api_scope())).await
    };
}

trait TestService:
    Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>
{
}
impl<S> TestService for S where
    S: Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>
{
}

async fn create_mesa(service: &impl TestService, nombre: &str) -> i64 {
    let request = test::TestRequest::post()
        .uri("/api/mesas/")
        .set_json(json!({ "nombre": nombre }))
        .to_request();
    let body: Value = test::call_and_read_body_json(service, request).await;
    body["id"].as_i64().expect("mesa id")
}

async fn assign(service: &impl TestService, mesa: i64, modulo: i64, fase: &str) -> ServiceResponse {
    let request = test::TestRequest::post()
        .uri("/api/mesa-queue-items/")
        .set_json(json!({
            "mesa": mesa,
            "modulo": modulo,
            "fase": fase,
            "imagenes": [
                { "id": modulo * 10, "url": format!("/media/{modulo}_0.png"), "orden": 0 },
                { "id": modulo * 10 + 1, "url": format!("/media/{modulo}_1.png"), "orden": 1 }
            ]
        }))
        .to_request();
    test::call_service(service, request).await
}

async fn assign_id(service: &impl TestService, mesa: i64, modulo: i64, fase: &str) -> i64 {
    let response = assign(service, mesa, modulo, fase).await;
    assert!(response.status().is_success());
    let body: Value = test::read_body_json(response).await;
    body["id"].as_i64().expect("item id")
}

async fn current_item(service: &impl TestService, mesa: i64) -> ServiceResponse {
    let request = test::TestRequest::get()
        .uri(&format!("/api/mesas/{mesa}/current_item/"))
        .to_request();
    test::call_service(service, request).await
}

async fn pair_device(service: &impl TestService, mesa: i64) -> String {
    let request = test::TestRequest::post()
        .uri("/api/device/init/")
        .set_json(json!({}))
        .to_request();
    let init: Value = test::call_and_read_body_json(service, request).await;
    let code = init["pairing_code"].as_str().expect("code").to_owned();

    let request = test::TestRequest::post()
        .uri("/api/device/pair/")
        .set_json(json!({ "mesa_id": mesa, "pairing_code": code }))
        .to_request();
    assert!(test::call_service(service, request).await.status().is_success());

    let request = test::TestRequest::get()
        .uri(&format!("/api/device/status/?code={code}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(service, request).await;
    status["device_token"].as_str().expect("token").to_owned()
}

#[actix_web::test]
async fn first_assignment_starts_displaying() {
    let service = service!();
    let mesa = create_mesa(&service, "Mesa 1").await;

    let item = assign_id(&service, mesa, 10, "INFERIOR").await;
    let response = current_item(&service, mesa).await;
    assert!(response.status().is_success());
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["id"].as_i64(), Some(item));
    assert_eq!(body["status"], "MOSTRANDO");
    assert_eq!(body["imagenes"].as_array().map(Vec::len), Some(2));
}

#[actix_web::test]
async fn marcar_hecho_promotes_the_next_item() {
    let service = service!();
    let mesa = create_mesa(&service, "Mesa 1").await;
    let first = assign_id(&service, mesa, 10, "INFERIOR").await;
    let second = assign_id(&service, mesa, 11, "INFERIOR").await;

    let request = test::TestRequest::post()
        .uri(&format!("/api/mesa-queue-items/{first}/marcar_hecho/"))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    let body: Value = test::read_body_json(current_item(&service, mesa).await).await;
    assert_eq!(body["id"].as_i64(), Some(second));

    // Finishing twice conflicts.
    let request = test::TestRequest::post()
        .uri(&format!("/api/mesa-queue-items/{first}/marcar_hecho/"))
        .to_request();
    assert_eq!(test::call_service(&service, request).await.status().as_u16(), 409);
}

#[actix_web::test]
async fn finishing_the_last_item_empties_the_mesa() {
    let service = service!();
    let mesa = create_mesa(&service, "Mesa 1").await;
    let item = assign_id(&service, mesa, 10, "INFERIOR").await;

    let request = test::TestRequest::post()
        .uri(&format!("/api/mesa-queue-items/{item}/marcar_hecho/"))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    assert_eq!(current_item(&service, mesa).await.status().as_u16(), 404);
}

#[actix_web::test]
async fn duplicate_subfase_is_rejected_across_mesas() {
    let service = service!();
    let mesa_a = create_mesa(&service, "Mesa A").await;
    let mesa_b = create_mesa(&service, "Mesa B").await;

    assign_id(&service, mesa_a, 10, "INFERIOR").await;
    assert_eq!(assign(&service, mesa_b, 10, "INFERIOR").await.status().as_u16(), 409);
    // The other phase of the module is independent.
    assert!(assign(&service, mesa_b, 10, "SUPERIOR").await.status().is_success());
}

#[actix_web::test]
async fn mostrar_demotes_the_current_item() {
    let service = service!();
    let mesa = create_mesa(&service, "Mesa 1").await;
    let first = assign_id(&service, mesa, 10, "INFERIOR").await;
    let third = {
        assign_id(&service, mesa, 11, "INFERIOR").await;
        assign_id(&service, mesa, 12, "INFERIOR").await
    };

    let request = test::TestRequest::post()
        .uri(&format!("/api/mesa-queue-items/{third}/mostrar/"))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    let body: Value = test::read_body_json(current_item(&service, mesa).await).await;
    assert_eq!(body["id"].as_i64(), Some(third));

    // The demoted item is back in the waiting list.
    let request = test::TestRequest::get()
        .uri(&format!("/api/mesas/{mesa}/queue_items/"))
        .to_request();
    let items: Value = test::call_and_read_body_json(&service, request).await;
    let statuses: Vec<(i64, String)> = items
        .as_array()
        .expect("array")
        .iter()
        .map(|item| {
            (
                item["id"].as_i64().expect("id"),
                item["status"].as_str().expect("status").to_owned(),
            )
        })
        .collect();
    assert!(statuses.contains(&(first, "EN_COLA".to_owned())));
}

#[actix_web::test]
async fn reorder_updates_the_waiting_order() {
    let service = service!();
    let mesa = create_mesa(&service, "Mesa 1").await;
    assign_id(&service, mesa, 10, "INFERIOR").await;
    let second = assign_id(&service, mesa, 11, "INFERIOR").await;
    let third = assign_id(&service, mesa, 12, "INFERIOR").await;

    // Move the third item to the head of the waiting list. Position 0 is
    // pinned to the displaying item, so it is coerced to slot 1.
    let request = test::TestRequest::post()
        .uri("/api/mesa-queue-items/reorder/")
        .set_json(json!({ "items": [{ "id": third, "position": 0 }] }))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    let request = test::TestRequest::get()
        .uri(&format!("/api/mesas/{mesa}/queue_items/"))
        .to_request();
    let items: Value = test::call_and_read_body_json(&service, request).await;
    let order: Vec<i64> = items
        .as_array()
        .expect("array")
        .iter()
        .map(|item| item["id"].as_i64().expect("id"))
        .collect();
    assert_eq!(order[1], third);
    assert_eq!(order[2], second);
}

#[actix_web::test]
async fn deleting_the_displayed_item_promotes_the_next() {
    let service = service!();
    let mesa = create_mesa(&service, "Mesa 1").await;
    let first = assign_id(&service, mesa, 10, "INFERIOR").await;
    let second = assign_id(&service, mesa, 11, "INFERIOR").await;

    let request = test::TestRequest::delete()
        .uri(&format!("/api/mesa-queue-items/{first}/"))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    let body: Value = test::read_body_json(current_item(&service, mesa).await).await;
    assert_eq!(body["id"].as_i64(), Some(second));
}

#[actix_web::test]
async fn device_walks_its_images_and_finishes_the_item() {
    let service = service!();
    let mesa = create_mesa(&service, "Mesa 42").await;
    let token = pair_device(&service, mesa).await;
    assign_id(&service, mesa, 10, "INFERIOR").await;
    let second = assign_id(&service, mesa, 11, "INFERIOR").await;

    // The device steps to the last image and reports its index.
    let request = test::TestRequest::post()
        .uri("/api/device/set_index/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(json!({ "index": 1 }))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    let request = test::TestRequest::get()
        .uri("/api/device/state/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let state: Value = test::call_and_read_body_json(&service, request).await;
    assert_eq!(state["current_image_index"].as_i64(), Some(1));
    assert_eq!(state["image_url"].as_str(), Some("/media/10_1.png"));

    // Advancing past the last image finishes the item; the next one is
    // promoted and served immediately.
    let request = test::TestRequest::post()
        .uri("/api/device/mark_done/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    let body: Value = test::read_body_json(current_item(&service, mesa).await).await;
    assert_eq!(body["id"].as_i64(), Some(second));

    // Heartbeats keep the binding alive.
    let request = test::TestRequest::post()
        .uri("/api/device/heartbeat/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());
}
