//! End-to-end pairing flow over real Actix handlers.

use std::sync::Arc;

use actix_web::{App, test, web};
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};

use proyeccion::inbound::http::api_scope;
use proyeccion::inbound::http::state::HttpState;
use proyeccion::push::PushHub;
use proyeccion::registry::Registry;
use proyeccion::test_support::MutableClock;

struct TestApp {
    state: web::Data<HttpState>,
    clock: Arc<MutableClock>,
}

fn test_app() -> TestApp {
    let clock = Arc::new(MutableClock::new(Utc::now()));
    let registry = Arc::new(Registry::new(clock.clone(), TimeDelta::seconds(300)));
    let hub = Arc::new(PushHub::new());
    TestApp {
        state: web::Data::new(HttpState::new(registry, hub)),
        clock,
    }
}

macro_rules! service {
    ($app:expr) => {
        test::init_service(
            App::new()
                .app_data($app.state.clone())
                .service(api_scope()),
        )
        .await
    };
}

async fn create_mesa(
    service: &impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
    >,
    nombre: &str,
) -> i64 {
    let request = test::TestRequest::post()
        .uri("/api/mesas/")
        .set_json(json!({ "nombre": nombre }))
        .to_request();
    let body: Value = test::call_and_read_body_json(service, request).await;
    body["id"].as_i64().expect("mesa id")
}

#[actix_web::test]
async fn device_pairs_and_reaches_projection() {
    let app = test_app();
    let service = service!(app);
    let mesa = create_mesa(&service, "Mesa 42").await;

    // Device opens a pairing session and shows the code.
    let request = test::TestRequest::post()
        .uri("/api/device/init/")
        .set_json(json!({}))
        .to_request();
    let init: Value = test::call_and_read_body_json(&service, request).await;
    let code = init["pairing_code"].as_str().expect("code").to_owned();
    assert_eq!(code.len(), 6);

    // Device polls: still waiting.
    let request = test::TestRequest::get()
        .uri(&format!("/api/device/status/?code={code}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&service, request).await;
    assert_eq!(status["status"], "WAITING");

    // Operator submits the code for the mesa.
    let request = test::TestRequest::post()
        .uri("/api/device/pair/")
        .set_json(json!({ "mesa_id": mesa, "pairing_code": code }))
        .to_request();
    let response = test::call_service(&service, request).await;
    assert!(response.status().is_success());

    // The next device poll delivers the token exactly once.
    let request = test::TestRequest::get()
        .uri(&format!("/api/device/status/?code={code}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&service, request).await;
    assert_eq!(status["status"], "PAIRED");
    assert_eq!(status["mesa_id"].as_i64(), Some(mesa));
    let token = status["device_token"].as_str().expect("token").to_owned();

    let request = test::TestRequest::get()
        .uri(&format!("/api/device/status/?code={code}"))
        .to_request();
    let response = test::call_service(&service, request).await;
    assert_eq!(response.status().as_u16(), 404);

    // The token authenticates the device.
    let request = test::TestRequest::get()
        .uri("/api/device/state/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let state: Value = test::call_and_read_body_json(&service, request).await;
    assert_eq!(state["id"].as_i64(), Some(mesa));
    assert_eq!(state["locked"], false);
}

#[actix_web::test]
async fn expired_codes_report_expired_and_reject_pairing() {
    let app = test_app();
    let service = service!(app);
    let mesa = create_mesa(&service, "Mesa 1").await;

    let request = test::TestRequest::post()
        .uri("/api/device/init/")
        .set_json(json!({}))
        .to_request();
    let init: Value = test::call_and_read_body_json(&service, request).await;
    let code = init["pairing_code"].as_str().expect("code").to_owned();

    app.clock.advance_seconds(301);

    let request = test::TestRequest::post()
        .uri("/api/device/pair/")
        .set_json(json!({ "mesa_id": mesa, "pairing_code": code }))
        .to_request();
    let response = test::call_service(&service, request).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[actix_web::test]
async fn expired_status_is_reported_to_the_device() {
    let app = test_app();
    let service = service!(app);

    let request = test::TestRequest::post()
        .uri("/api/device/init/")
        .set_json(json!({}))
        .to_request();
    let init: Value = test::call_and_read_body_json(&service, request).await;
    let code = init["pairing_code"].as_str().expect("code").to_owned();

    app.clock.advance_seconds(301);

    let request = test::TestRequest::get()
        .uri(&format!("/api/device/status/?code={code}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&service, request).await;
    assert_eq!(status["status"], "EXPIRED");
}

#[actix_web::test]
async fn unbinding_revokes_the_device_token() {
    let app = test_app();
    let service = service!(app);
    let mesa = create_mesa(&service, "Mesa 2").await;

    let request = test::TestRequest::post()
        .uri("/api/device/init/")
        .set_json(json!({ "mesa_id": mesa }))
        .to_request();
    let init: Value = test::call_and_read_body_json(&service, request).await;
    let code = init["pairing_code"].as_str().expect("code").to_owned();

    let request = test::TestRequest::post()
        .uri("/api/device/pair/")
        .set_json(json!({ "mesa_id": mesa, "pairing_code": code }))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    let request = test::TestRequest::get()
        .uri(&format!("/api/device/status/?code={code}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&service, request).await;
    let token = status["device_token"].as_str().expect("token").to_owned();

    let request = test::TestRequest::post()
        .uri("/api/device/unbind/")
        .set_json(json!({ "mesa_id": mesa }))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());

    // The revoked token now gets 401, sending the device back to pairing.
    let request = test::TestRequest::get()
        .uri("/api/device/state/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let response = test::call_service(&service, request).await;
    assert_eq!(response.status().as_u16(), 401);
}

#[actix_web::test]
async fn missing_bearer_token_is_unauthorized() {
    let app = test_app();
    let service = service!(app);

    let request = test::TestRequest::get()
        .uri("/api/device/state/")
        .to_request();
    let response = test::call_service(&service, request).await;
    assert_eq!(response.status().as_u16(), 401);
}

#[actix_web::test]
async fn calibration_store_round_trips_to_the_device() {
    let app = test_app();
    let service = service!(app);
    let mesa = create_mesa(&service, "Mesa 3").await;

    let request = test::TestRequest::post()
        .uri("/api/device/init/")
        .set_json(json!({ "mesa_id": mesa }))
        .to_request();
    let init: Value = test::call_and_read_body_json(&service, request).await;
    let code = init["pairing_code"].as_str().expect("code").to_owned();

    let request = test::TestRequest::post()
        .uri("/api/device/pair/")
        .set_json(json!({ "mesa_id": mesa, "pairing_code": code }))
        .to_request();
    assert!(test::call_service(&service, request).await.status().is_success());
    let request = test::TestRequest::get()
        .uri(&format!("/api/device/status/?code={code}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&service, request).await;
    let token = status["device_token"].as_str().expect("token").to_owned();

    let request = test::TestRequest::post()
        .uri(&format!("/api/mesas/{mesa}/calibration/"))
        .set_json(json!({
            "calibration_json": {
                "corners": [10.0, 10.0, 1910.0, 12.0, 8.0, 1070.0, 1915.0, 1075.0],
                "screenWidth": 1920.0,
                "screenHeight": 1080.0,
                "timestamp": Utc::now(),
            }
        }))
        .to_request();
    let response = test::call_service(&service, request).await;
    assert!(response.status().is_success());

    let request = test::TestRequest::get()
        .uri("/api/device/state/")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let state: Value = test::call_and_read_body_json(&service, request).await;
    assert_eq!(
        state["calibration_json"]["corners"][0].as_f64(),
        Some(10.0)
    );
}
