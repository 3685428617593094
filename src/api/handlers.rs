use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use indexmap::IndexMap;
use log::error;
use serde::Serialize;
use std::sync::Arc;

use crate::error::LiantError;
use crate::logic::{CatchallRequest, CatchallView, RequestMethod};

pub type AppState = Arc<CatchallView>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

pub fn error_status(err: &LiantError) -> StatusCode {
    match err {
        LiantError::RouteNotFound | LiantError::NotFound => StatusCode::NOT_FOUND,
        LiantError::Conflict { .. } => StatusCode::CONFLICT,
        LiantError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
        err if err.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: LiantError) -> (StatusCode, Json<ErrorResponse>) {
    let status = error_status(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (status, Json(ErrorResponse::new(&err.to_string())))
}

fn request_method(method: &Method) -> RequestMethod {
    match *method {
        Method::GET => RequestMethod::Get,
        Method::POST => RequestMethod::Post,
        Method::DELETE => RequestMethod::Delete,
        _ => RequestMethod::Other,
    }
}

/// Every path other than `/health` is a route string, e.g. `/parent@1/children:+data`
pub async fn catchall(
    State(view): State<AppState>,
    method: Method,
    Path(route): Path<String>,
    Query(params): Query<IndexMap<String, String>>,
    body: String,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let request = CatchallRequest {
        method: request_method(&method),
        route: route.trim_start_matches('/').to_string(),
        params,
        body: (!body.is_empty()).then_some(body),
    };

    match view.process(&request) {
        Ok(json) => Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response()),
        Err(err) => Err(error_response(err)),
    }
}
