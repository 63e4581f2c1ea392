use crate::{
    error::AppError,
    file_processing::{PrintPayload, locate_payload},
    handlers::AppState,
    response::ApiResponse,
};
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::path::Path;
use utoipa::ToSchema;

fn default_use_ams() -> bool {
    true
}

fn default_ams_mapping() -> Vec<i32> {
    vec![0]
}

/// 打印作业提交请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct PrintJobRequest {
    /// 目标打印机ID
    pub printer_id: i32,
    /// 服务器本地的 `.3mf` 或 `.gcode` 文件路径
    pub file_path: String,
    pub job_name: Option<String>,
    /// 额外打印参数（plate_idx、skip_objects、flow_calibration 等）
    #[schema(value_type = Option<Object>)]
    pub print_parameters: Option<serde_json::Value>,
    #[serde(default = "default_use_ams")]
    pub use_ams: bool,
    /// 料位映射
    #[serde(default = "default_ams_mapping")]
    pub ams_mapping: Vec<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PrintJobResponse {
    pub job_id: String,
    pub printer_id: i32,
    pub job_name: String,
    pub payload: PrintPayload,
}

/// 提交打印作业
///
/// 校验文件与目标打印机后受理作业；下发到设备由状态桥接服务负责。
#[utoipa::path(
    post,
    path = "/api/v1/print_jobs",
    request_body = PrintJobRequest,
    responses(
        (status = 200, description = "作业已受理", body = ApiResponse<PrintJobResponse>),
        (status = 400, description = "文件不存在或类型不支持", body = ApiResponse<String>),
        (status = 404, description = "打印机不存在", body = ApiResponse<String>)
    ),
    tag = "打印作业"
)]
pub async fn create_print_job(
    State(app_state): State<AppState>,
    Json(request): Json<PrintJobRequest>,
) -> Result<Json<ApiResponse<PrintJobResponse>>, AppError> {
    let path = Path::new(&request.file_path);
    let payload = locate_payload(path).await?;

    let printer = app_state
        .find_printer(request.printer_id)
        .ok_or_else(|| AppError::not_found(format!("打印机 {}", request.printer_id)))?;

    let job_name = request.job_name.clone().unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.file_path.clone())
    });
    let job_id = format!("print_{}", chrono::Utc::now().timestamp());

    tracing::info!(
        printer_id = printer.id,
        job_id = %job_id,
        use_ams = request.use_ams,
        ams_mapping = ?request.ams_mapping,
        parameters = ?request.print_parameters,
        "打印作业已受理: {} -> {}",
        job_name,
        printer
    );

    Ok(Json(ApiResponse::success_with_message(
        PrintJobResponse {
            job_id,
            printer_id: printer.id,
            job_name,
            payload,
        },
        format!("打印机 {} 已受理打印作业", printer.id),
    )))
}
