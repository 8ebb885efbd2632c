// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Container endpoints — Docker containers and images

use actix_web::{web, HttpResponse, HttpRequest};
use actix_web::http::StatusCode;
use serde::Deserialize;

use super::{done, error_response, require_auth, AppState};
use crate::containers::ContainerError;

fn container_error(err: &ContainerError, mutation: bool) -> StatusCode {
    match err {
        ContainerError::NotFound(_) => StatusCode::NOT_FOUND,
        _ if mutation => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_true")]
    pub all_containers: bool,
}

fn default_true() -> bool { true }

/// GET /api/containers?all_containers=true
pub async fn list_containers(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    match state.containers.list_containers(query.all_containers).await {
        Ok(list) => HttpResponse::Ok().json(serde_json::json!({
            "total": list.len(),
            "containers": list
        })),
        Err(e) => error_response(container_error(&e, false), e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct ActionQuery {
    #[serde(default = "default_timeout")]
    pub timeout: i64,
}

fn default_timeout() -> i64 { 10 }

/// POST /api/containers/{id}/{action} — start, stop or restart
pub async fn container_action(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    query: web::Query<ActionQuery>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    let (id, action) = path.into_inner();
    let timeout = query.timeout.max(0);

    let result = match action.as_str() {
        "start" => state.containers.start_container(&id).await,
        "stop" => state.containers.stop_container(&id, timeout).await,
        "restart" => state.containers.restart_container(&id, timeout as isize).await,
        _ => return error_response(StatusCode::BAD_REQUEST, format!("Unknown action: {}", action)),
    };

    match result {
        Ok(()) => {
            let verb = match action.as_str() {
                "start" => "started",
                "stop" => "stopped",
                _ => "restarted",
            };
            done(format!("Container {} {}", id, verb))
        }
        Err(e) => error_response(container_error(&e, true), e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct RemoveQuery {
    #[serde(default)]
    pub force: bool,
}

/// DELETE /api/containers/{id}?force=false
pub async fn remove_container(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RemoveQuery>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    let id = path.into_inner();
    match state.containers.remove_container(&id, query.force).await {
        Ok(()) => done(format!("Container {} removed", id)),
        Err(e) => error_response(container_error(&e, true), e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    pub tail: u32,
}

fn default_tail() -> u32 { 100 }

/// GET /api/containers/{id}/logs?tail=100
pub async fn container_logs(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LogsQuery>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    let id = path.into_inner();
    match state.containers.container_logs(&id, query.tail).await {
        Ok(logs) => HttpResponse::Ok().json(serde_json::json!({
            "container_id": id,
            "logs": logs
        })),
        Err(e) => error_response(container_error(&e, false), e.to_string()),
    }
}

/// GET /api/containers/images/list
pub async fn list_images(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    match state.containers.list_images().await {
        Ok(list) => HttpResponse::Ok().json(serde_json::json!({
            "total": list.len(),
            "images": list
        })),
        Err(e) => error_response(container_error(&e, false), e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct PullRequest {
    pub image_name: String,
}

/// POST /api/containers/images/pull — {"image_name": "nginx:latest"}
pub async fn pull_image(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PullRequest>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) { return resp; }
    let image_name = body.image_name.trim();
    if image_name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "image_name is required");
    }
    match state.containers.pull_image(image_name).await {
        Ok(pulled) => HttpResponse::Ok().json(serde_json::json!({
            "message": pulled.message,
            "success": true,
            "image_id": pulled.id,
            "tags": pulled.tags
        })),
        Err(e) => error_response(container_error(&e, true), e.to_string()),
    }
}
