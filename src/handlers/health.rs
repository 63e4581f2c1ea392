use crate::{handlers::AppState, models::PrinterHealth, response::ApiResponse};
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
pub struct HealthQuery {
    /// 返回版本与时间戳
    #[serde(default)]
    pub detail: bool,
}

/// 集群健康状况
#[derive(Debug, Serialize, ToSchema)]
pub struct FleetHealthResponse {
    pub active: usize,
    pub quarantined: usize,
    pub printers: Vec<PrinterHealth>,
}

/// 服务健康检查
#[utoipa::path(
    get,
    path = "/health",
    params(HealthQuery),
    responses(
        (status = 200, description = "服务运行中", body = ApiResponse<String>)
    ),
    tag = "系统监控"
)]
pub async fn health_check(Query(params): Query<HealthQuery>) -> Json<ApiResponse<serde_json::Value>> {
    if params.detail {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut details = HashMap::new();
        details.insert("status", "healthy");
        details.insert("version", env!("CARGO_PKG_VERSION"));
        details.insert("timestamp", timestamp.as_str());

        Json(ApiResponse::success(serde_json::json!(details)))
    } else {
        Json(ApiResponse::success(serde_json::json!({"status": "ok"})))
    }
}

/// 数据库健康检查
#[utoipa::path(
    get,
    path = "/api/health/db",
    responses(
        (status = 200, description = "数据库连接正常", body = ApiResponse<String>),
        (status = 503, description = "数据库不可用", body = ApiResponse<String>)
    ),
    tag = "系统监控"
)]
pub async fn db_health_check(
    State(app_state): State<AppState>,
) -> ApiResponse<serde_json::Value> {
    match &app_state.database {
        Some(db) => match db.health_check().await {
            Ok(true) => {
                let timestamp = chrono::Utc::now().to_rfc3339();
                let mut details = HashMap::new();
                details.insert("database", "healthy");
                details.insert("timestamp", timestamp.as_str());
                ApiResponse::success(serde_json::json!(details))
            }
            Ok(false) => ApiResponse::error_with_data(
                503,
                "数据库连接异常".to_string(),
                serde_json::json!({"status": "unhealthy"}),
            ),
            Err(e) => {
                tracing::error!("数据库健康检查失败: {}", e);
                ApiResponse::error_with_data(
                    503,
                    format!("数据库健康检查失败: {}", e),
                    serde_json::json!({"status": "error"}),
                )
            }
        },
        None => ApiResponse::error_with_data(
            503,
            "数据库未配置或连接失败".to_string(),
            serde_json::json!({"status": "unavailable"}),
        ),
    }
}

/// 打印机连接健康状况
///
/// 数据来自编排器每个轮询周期结束时发布的快照
#[utoipa::path(
    get,
    path = "/api/printers/health",
    responses(
        (status = 200, description = "各打印机的连接状态", body = ApiResponse<FleetHealthResponse>)
    ),
    tag = "系统监控"
)]
pub async fn printers_health(
    State(app_state): State<AppState>,
) -> Json<ApiResponse<FleetHealthResponse>> {
    let printers = app_state.fleet_health.read().await.clone();
    let quarantined = printers.iter().filter(|p| p.quarantined).count();

    Json(ApiResponse::success(FleetHealthResponse {
        active: printers.len() - quarantined,
        quarantined,
        printers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        models::ConnectionState,
        routes::create_api_routes,
    };
    use axum::{body::Body, http::{Request, StatusCode}};
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn state(health: Vec<PrinterHealth>) -> AppState {
        AppState {
            database: None,
            printers: Arc::new(Vec::new()),
            fleet_health: Arc::new(RwLock::new(health)),
            config: Config::default(),
        }
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_api_routes()
            .with_state(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_detail() {
        let (status, body) = get_json(state(Vec::new()), "/health?detail=true").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_db_health_without_database_is_503() {
        let (status, body) = get_json(state(Vec::new()), "/api/health/db").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["data"]["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_printers_health_counts_membership() {
        let health = vec![
            PrinterHealth {
                printer_id: 1,
                printer_name: "P1S-01".to_string(),
                state: ConnectionState::Connected,
                consecutive_failures: 0,
                last_success: Some(chrono::Utc::now()),
                quarantined: false,
            },
            PrinterHealth {
                printer_id: 2,
                printer_name: "P1S-02".to_string(),
                state: ConnectionState::Unreachable,
                consecutive_failures: 3,
                last_success: None,
                quarantined: true,
            },
        ];

        let (status, body) = get_json(state(health), "/api/printers/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["active"], 1);
        assert_eq!(body["data"]["quarantined"], 1);
        assert_eq!(body["data"]["printers"][1]["state"], "unreachable");
    }
}
