mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;

pub use self::state::*;
use crate::export::GroupListing;
use crate::job::{JobState, JobStatus, Stage};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::upload_handler,
        api::status_handler,
        api::results_handler,
        api::download_csv_handler,
        api::download_results_handler,
        api::image_handler,
        api::metrics_handler,
    ),
    components(schemas(
        types::UploadForm,
        types::UploadResponse,
        types::StatusResponse,
        types::GroupResult,
        types::ResultsResponse,
        JobState,
        JobStatus,
        Stage,
        GroupListing,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器，`upload_limit` 为请求体大小上限，单位为字节
pub fn create_app(state: Arc<AppState>, upload_limit: usize) -> Router {
    Router::new()
        .route("/upload", post(api::upload_handler))
        .route("/status", get(api::status_handler))
        .route("/results", get(api::results_handler))
        .route("/download_csv", get(api::download_csv_handler))
        .route("/download_results", get(api::download_results_handler))
        .route("/image/{group}/{file}", get(api::image_handler))
        .route("/metrics", get(api::metrics_handler))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit))
        .with_state(state)
}
