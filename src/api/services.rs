// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Service endpoints — systemd units via D-Bus or systemctl
//!
//! Service calls block on D-Bus or a child process, so each one runs on the
//! blocking pool.

use actix_web::{web, HttpResponse, HttpRequest};
use actix_web::http::StatusCode;
use serde::Deserialize;

use super::{done, error_response, require_auth, AppState};
use crate::services::ServiceError;

/// Status for a failed service call; rejected mutations are client errors
fn service_error(err: &ServiceError, mutation: bool) -> StatusCode {
    match err {
        ServiceError::UnitNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::InvalidName(_) => StatusCode::BAD_REQUEST,
        _ if mutation => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// GET /api/services — all service units
pub async fn list_services(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    let services = state.services.clone();
    match web::block(move || services.list_services()).await {
        Ok(Ok(list)) => HttpResponse::Ok().json(serde_json::json!({
            "total": list.len(),
            "services": list
        })),
        Ok(Err(e)) => error_response(service_error(&e, false), format!("Failed to list services: {}", e)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Task error: {}", e)),
    }
}

/// POST /api/services/{name}/{action} — start, stop, restart, enable or disable
pub async fn service_action(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    let (name, action) = path.into_inner();
    if !matches!(action.as_str(), "start" | "stop" | "restart" | "enable" | "disable") {
        return error_response(StatusCode::BAD_REQUEST, format!("Unknown action: {}", action));
    }

    let services = state.services.clone();
    let (svc, act) = (name.clone(), action.clone());
    let result = web::block(move || match act.as_str() {
        "start" => services.start_service(&svc),
        "stop" => services.stop_service(&svc),
        "restart" => services.restart_service(&svc),
        "enable" => services.enable_service(&svc),
        _ => services.disable_service(&svc),
    })
    .await;

    match result {
        Ok(Ok(())) => done(format!("Service {} {}", name, past_tense(&action))),
        Ok(Err(e)) => error_response(
            service_error(&e, true),
            format!("Failed to {} service {}: {}", action, name, e),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Task error: {}", e)),
    }
}

fn past_tense(action: &str) -> &'static str {
    match action {
        "start" => "started",
        "stop" => "stopped",
        "restart" => "restarted",
        "enable" => "enabled",
        _ => "disabled",
    }
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_lines")]
    pub lines: u32,
}

fn default_lines() -> u32 { 100 }

/// GET /api/services/{name}/logs?lines=100 — recent journal output
pub async fn service_logs(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LogsQuery>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    let name = path.into_inner();
    let services = state.services.clone();
    let svc = name.clone();
    let lines = query.lines;
    match web::block(move || services.service_logs(&svc, lines)).await {
        Ok(Ok(logs)) => HttpResponse::Ok().json(serde_json::json!({
            "service_name": name,
            "logs": logs
        })),
        Ok(Err(e)) => error_response(service_error(&e, false), format!("Failed to get logs for {}: {}", name, e)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Task error: {}", e)),
    }
}

/// GET /api/services/{name}/status — status text, running flag and enablement
pub async fn service_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    let name = path.into_inner();
    let services = state.services.clone();
    let svc = name.clone();
    match web::block(move || services.service_status(&svc)).await {
        Ok(Ok(status)) => HttpResponse::Ok().json(status),
        Ok(Err(e)) => error_response(service_error(&e, false), format!("Failed to get status of {}: {}", name, e)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Task error: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::configure;
    use super::super::tests::{bearer, test_state};
    use actix_web::{test, App};

    #[actix_web::test]
    async fn list_is_sorted_with_total() {
        let state = test_state(&[("zebra.service", true, true), ("apache.service", false, false)]);
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/services").insert_header(bearer()).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["services"][0]["name"], "apache");
        assert_eq!(body["services"][0]["enabled"], false);
        assert_eq!(body["services"][1]["name"], "zebra");
        assert_eq!(body["services"][1]["active_state"], "active");
        assert_eq!(body["services"][1]["enabled"], true);
    }

    #[actix_web::test]
    async fn lifecycle_round_trip() {
        let state = test_state(&[("nginx.service", false, false)]);
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post().uri("/api/services/nginx/start").insert_header(bearer()).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Service nginx started");

        let req = test::TestRequest::post().uri("/api/services/nginx/enable").insert_header(bearer()).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], "Service nginx enabled");

        let req = test::TestRequest::get().uri("/api/services/nginx/status").insert_header(bearer()).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "nginx");
        assert_eq!(body["is_active"], true);
        assert_eq!(body["enabled"], true);

        let req = test::TestRequest::post().uri("/api/services/nginx/stop").insert_header(bearer()).to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get().uri("/api/services/nginx/status").insert_header(bearer()).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["is_active"], false);
    }

    #[actix_web::test]
    async fn failed_start_is_a_client_error() {
        let state = test_state(&[]);
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post().uri("/api/services/ghost/start").insert_header(bearer()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Failed to start service ghost: Unit ghost.service not found.");
    }

    #[actix_web::test]
    async fn unknown_action_and_bad_name_rejected() {
        let state = test_state(&[("nginx.service", true, true)]);
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post().uri("/api/services/nginx/mask").insert_header(bearer()).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::post().uri("/api/services/-nginx/start").insert_header(bearer()).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn logs_for_unknown_service_are_the_sentinel() {
        let state = test_state(&[]);
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/services/ghost/logs?lines=50")
            .insert_header(bearer())
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["service_name"], "ghost");
        assert_eq!(body["logs"], "No logs available");
    }
}
