use crate::docs::ApiDoc;
use crate::handlers::{
    AppState, create_print_job, db_health_check, health_check, printers_health,
};
use axum::{
    Json, Router,
    routing::{get, post},
};
use utoipa::OpenApi;

/// 创建API路由
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        .route("/api/health/db", get(db_health_check))
        .route("/api/printers/health", get(printers_health))
        // 打印作业
        .route("/api/v1/print_jobs", post(create_print_job))
        // OpenAPI JSON
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
}
