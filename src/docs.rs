use crate::{
    file_processing::{PayloadLocation, PrintPayload},
    handlers::{
        health::FleetHealthResponse,
        print_job::{PrintJobRequest, PrintJobResponse},
    },
    models::{ConnectionState, FilamentProfile, JobRecord, PrinterHealth, PrinterTelemetry},
    response::ApiResponse,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        // 系统监控API
        crate::handlers::health::health_check,
        crate::handlers::health::db_health_check,
        crate::handlers::health::printers_health,
        // 打印作业API
        crate::handlers::print_job::create_print_job,
    ),
    components(
        schemas(
            // 打印机相关模型
            ConnectionState,
            PrinterHealth,
            PrinterTelemetry,
            FleetHealthResponse,
            // 作业相关模型
            JobRecord,
            FilamentProfile,
            PrintJobRequest,
            PrintJobResponse,
            PrintPayload,
            PayloadLocation,
            // 通用响应模型
            ApiResponse<FleetHealthResponse>,
            ApiResponse<PrintJobResponse>,
            ApiResponse<String>,
        )
    ),
    tags(
        (name = "系统监控", description = "服务、数据库与打印机连接的健康状态"),
        (name = "打印作业", description = "打印作业的提交与受理")
    ),
    info(
        title = "PrintFarm API",
        version = "1.0.0",
        description = "PrintFarm 打印农场监控服务 REST API 文档",
        contact(
            name = "PrintFarm Team",
            email = "contact@example.com"
        ),
        license(
            name = "CC BY-NC-SA 4.0",
            url = "https://creativecommons.org/licenses/by-nc-sa/4.0/"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "开发环境")
    )
)]
pub struct ApiDoc;
