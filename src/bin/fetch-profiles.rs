//! 拉取厂商耗材配置并写入参考目录
//!
//! 用法: `fetch-profiles [--json <输出文件>]`
//! 指定 `--json` 时只把解析结果写到文件，不连接数据库。

use printfarm_backend::{
    config::Config,
    database::Database,
    error::{AppError, AppResult},
    repositories::FilamentProfileRepository,
    services::ProfileFetcher,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "printfarm_backend=info,fetch_profiles=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let json_output = match args.next().as_deref() {
        Some("--json") => Some(
            args.next()
                .ok_or_else(|| AppError::bad_request("--json 需要输出文件路径"))?,
        ),
        Some(other) => {
            return Err(AppError::bad_request(format!("未知参数: {}", other)));
        }
        None => None,
    };

    let config = Config::from_file("config.toml").unwrap_or_else(|e| {
        tracing::warn!("未能加载配置文件（{}），使用默认配置", e);
        Config::default()
    });

    let fetcher = ProfileFetcher::new(config.catalog.clone())?;
    let profiles = fetcher.fetch_all().await?;
    if profiles.is_empty() {
        return Err(AppError::service_unavailable("没有获取到任何耗材配置"));
    }

    for profile in profiles.iter().take(20) {
        tracing::info!(
            filament_id = %profile.filament_id,
            material = %profile.material_type,
            vendor = %profile.vendor,
            "{} ({}-{}°C, 热床 {}°C)",
            profile.name,
            profile.nozzle_temp_min,
            profile.nozzle_temp_max,
            profile.bed_temp
        );
    }
    if profiles.len() > 20 {
        tracing::info!("... 以及另外 {} 个配置", profiles.len() - 20);
    }

    if let Some(path) = json_output {
        let content = serde_json::to_string_pretty(&profiles)?;
        tokio::fs::write(&path, content).await?;
        tracing::info!("已保存 {} 个耗材配置到 {}", profiles.len(), path);
        return Ok(());
    }

    let database = Database::new(&config.database).await?;
    let repository = FilamentProfileRepository::new(&database);
    let written = repository.upsert_profiles(&profiles).await?;
    tracing::info!("已写入 {} 个耗材配置到参考目录", written);
    database.close().await;

    Ok(())
}
