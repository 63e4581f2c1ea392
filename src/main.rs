/*
 * PrintFarm - Print Farm Supervision Service
 * Copyright (c) 2024 PrintFarm Project
 *
 * This work is licensed under CC BY-NC-SA 4.0
 * https://creativecommons.org/licenses/by-nc-sa/4.0/
 */

use axum::http::Method;
use printfarm_backend::{
    config::Config,
    database::Database,
    error::AppResult,
    handlers::AppState,
    repositories::{
        FilamentProfileRepository, JobRepository, MaterialCatalog, MaterialUsageRepository,
        PrinterRepository, PrinterStore,
    },
    routes::create_api_routes,
    services::{
        BridgeClient, ConnectionSupervisor, FleetOrchestrator, JobLifecycleTracker,
        MaterialSnapshotEngine, TcpProbe, build_http_client,
    },
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> AppResult<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "printfarm_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = match Config::from_file("config.toml") {
        Ok(config) => {
            tracing::info!("已加载配置文件: config.toml");
            config
        }
        Err(e) => {
            tracing::warn!("未能加载配置文件（{}），使用默认配置", e);
            let default_config = Config::default();
            if let Err(e) = default_config.save_to_file("config.toml") {
                tracing::warn!("保存默认配置失败: {}", e);
            }
            default_config
        }
    };

    // 数据库不可用时无法记录任何作业，直接退出
    let database = match Database::new(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("数据库连接失败，服务无法启动: {}", e);
            return Err(e);
        }
    };

    let printer_repo = Arc::new(PrinterRepository::new(&database));
    let job_repo = Arc::new(JobRepository::new(&database));
    let usage_repo = Arc::new(MaterialUsageRepository::new(&database));
    let catalog_repo: Arc<dyn MaterialCatalog> = Arc::new(FilamentProfileRepository::new(&database));

    let printers = printer_repo.load_production_printers().await?;
    if printers.is_empty() {
        tracing::warn!("没有处于生产状态的打印机");
    } else {
        tracing::info!("已加载 {} 台生产打印机", printers.len());
    }

    let engine = MaterialSnapshotEngine::new(usage_repo.clone(), Some(catalog_repo));
    let tracker = Arc::new(JobLifecycleTracker::new(job_repo, usage_repo, engine));
    let probe = Arc::new(TcpProbe::new(
        config.fleet.probe_port,
        config.fleet.probe_timeout(),
    ));
    let http_client = build_http_client(&config.bridge)?;

    // 初始连接；失败的设备从隔离集合开始
    let mut orchestrator = FleetOrchestrator::new(printer_repo.clone(), config.fleet.clone());
    for printer in &printers {
        let client = Arc::new(BridgeClient::new(
            http_client.clone(),
            config.bridge.clone(),
            printer.clone(),
        ));
        let supervisor = ConnectionSupervisor::new(
            printer.clone(),
            client,
            probe.clone(),
            tracker.clone(),
            config.fleet.clone(),
        );
        orchestrator.admit(supervisor).await;
    }
    tracing::info!(
        active = orchestrator.active_count(),
        quarantined = orchestrator.quarantined_count(),
        "打印机初始连接完成"
    );

    let app_state = AppState {
        database: Some(database.clone()),
        printers: Arc::new(printers),
        fleet_health: orchestrator.health_handle(),
        config: config.clone(),
    };

    // 创建CORS中间件
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let app = create_api_routes()
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 启动HTTP服务
    let listener = tokio::net::TcpListener::bind(&config.server_addr()).await?;
    tracing::info!("🚀 服务器启动成功，监听地址: {}", config.server_addr());
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!("HTTP服务异常退出: {}", e);
        }
    });

    // Ctrl-C 触发关闭
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("收到中断信号，准备关闭"),
            Err(e) => tracing::error!("监听中断信号失败: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(shutdown_rx).await;

    if let Err(e) = server.await {
        tracing::error!("等待HTTP服务退出失败: {}", e);
    }
    database.close().await;
    tracing::info!("服务已关闭");

    Ok(())
}
