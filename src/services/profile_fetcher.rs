use crate::{
    config::CatalogConfig,
    error::{AppError, AppResult},
    models::FilamentProfile,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const BASE_SUFFIX: &str = "@base.json";

/// 目录索引中的单个条目（GitHub contents API）
#[derive(Debug, Deserialize)]
struct IndexEntry {
    name: String,
}

/// 厂商耗材配置拉取器
///
/// 列出配置目录中的 `*@base.json` 文件，逐个下载并解析为 [`FilamentProfile`]。
pub struct ProfileFetcher {
    client: Client,
    config: CatalogConfig,
}

impl ProfileFetcher {
    pub fn new(config: CatalogConfig) -> AppResult<Self> {
        // GitHub API 要求带 User-Agent
        let client = Client::builder()
            .user_agent(concat!("printfarm-backend/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::config(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self { client, config })
    }

    /// 获取 `*@base.json` 文件名列表
    pub async fn fetch_index(&self) -> AppResult<Vec<String>> {
        info!("正在获取耗材配置目录: {}", self.config.profile_index_url);

        let response = self
            .client
            .get(&self.config.profile_index_url)
            .send()
            .await
            .map_err(|e| AppError::service_unavailable(format!("获取耗材配置目录失败: {}", e)))?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::service_unavailable(format!(
                "获取耗材配置目录失败: HTTP {} - {}",
                status, text
            )));
        }

        let entries: Vec<IndexEntry> = serde_json::from_str(&text)?;
        let files: Vec<String> = entries
            .into_iter()
            .map(|entry| entry.name)
            .filter(|name| name.ends_with(BASE_SUFFIX))
            .collect();

        info!("找到 {} 个 @base.json 配置文件", files.len());
        Ok(files)
    }

    /// 下载并解析单个配置文件
    pub async fn fetch_profile(&self, filename: &str) -> AppResult<FilamentProfile> {
        let url = format!(
            "{}/{}",
            self.config.profile_raw_base_url.trim_end_matches('/'),
            filename
        );
        debug!("下载耗材配置: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::service_unavailable(format!("下载 {} 失败: {}", filename, e)))?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::service_unavailable(format!(
                "下载 {} 失败: HTTP {}",
                filename, status
            )));
        }

        let value: Value = serde_json::from_str(&text)?;
        Ok(parse_profile(&value, filename))
    }

    /// 拉取全部配置；单个文件失败只记录警告
    pub async fn fetch_all(&self) -> AppResult<Vec<FilamentProfile>> {
        let files = self.fetch_index().await?;
        let mut profiles = Vec::with_capacity(files.len());

        for filename in &files {
            match self.fetch_profile(filename).await {
                Ok(profile) if profile.filament_id.is_empty() => {
                    warn!(filename = %filename, "配置缺少 filament_id，跳过");
                }
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(filename = %filename, error = %e, "处理耗材配置失败"),
            }
        }

        info!("成功解析 {}/{} 个耗材配置", profiles.len(), files.len());
        Ok(profiles)
    }
}

/// 数组取第一个元素，其他值原样返回
fn first_value(value: Option<&Value>) -> Option<&Value> {
    match value {
        Some(Value::Array(items)) => items.first(),
        other => other,
    }
}

fn text_field(data: &Value, key: &str) -> String {
    match first_value(data.get(key)) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

/// 数字或数字字符串，无法解析时为 `default`
fn float_field(data: &Value, key: &str, default: f64) -> f64 {
    match first_value(data.get(key)) {
        None => default,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(_) => 0.0,
    }
}

/// 同 [`float_field`]，`"190.0"` 得到 190
fn int_field(data: &Value, key: &str) -> i32 {
    float_field(data, key, 0.0) as i32
}

/// 由名称或继承关系推断材料类型
pub fn infer_material_type(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if lower.contains("pla") {
        "PLA"
    } else if lower.contains("abs") {
        "ABS"
    } else if lower.contains("petg") {
        "PETG"
    } else if lower.contains("tpu") {
        "TPU"
    } else {
        "UNKNOWN"
    }
}

/// 材料的默认温度 (喷嘴最低, 喷嘴最高, 热床)
fn default_temperatures(material_type: &str) -> Option<(i32, i32, i32)> {
    match material_type {
        "PLA" => Some((190, 230, 60)),
        "ABS" => Some((240, 270, 80)),
        "PETG" => Some((230, 260, 70)),
        "TPU" => Some((200, 250, 50)),
        _ => None,
    }
}

/// 把厂商配置 JSON 解析为参考目录条目
///
/// 字段缺失或格式错误时取 0 或空串。喷嘴温度范围不完整时按 `inherits` 推断材料
/// 类型并补上默认温度，否则按名称推断。
pub fn parse_profile(data: &Value, filename: &str) -> FilamentProfile {
    let name = text_field(data, "name").replace(" @base", "").trim().to_string();

    let mut profile = FilamentProfile {
        filename: filename.to_string(),
        name,
        filament_id: text_field(data, "filament_id"),
        profile_type: text_field(data, "type"),
        inherits: text_field(data, "inherits"),
        from_source: text_field(data, "from"),
        vendor: text_field(data, "filament_vendor"),
        cost: float_field(data, "filament_cost", 0.0),
        density: float_field(data, "filament_density", 0.0),
        flow_ratio: float_field(data, "filament_flow_ratio", 0.0),
        material_type: String::new(),
        nozzle_temp_min: int_field(data, "nozzle_temperature_range_low"),
        nozzle_temp_max: int_field(data, "nozzle_temperature_range_high"),
        bed_temp: int_field(data, "bed_temperature"),
        bed_temp_initial: int_field(data, "bed_temperature_initial_layer"),
        impact_strength_z: float_field(data, "impact_strength_z", 0.0),
        diameter: float_field(data, "filament_diameter", 1.75),
        retraction_length: float_field(data, "retraction_length", 0.0),
        retraction_speed: float_field(data, "retraction_speed", 0.0),
        print_speed: float_field(data, "outer_wall_speed", 0.0),
        start_gcode: text_field(data, "filament_start_gcode"),
        end_gcode: text_field(data, "filament_end_gcode"),
        raw_json: data.clone(),
    };

    if profile.nozzle_temp_min == 0 || profile.nozzle_temp_max == 0 {
        let material_type = infer_material_type(&profile.inherits);
        if let Some((nozzle_min, nozzle_max, bed)) = default_temperatures(material_type) {
            if profile.nozzle_temp_min == 0 {
                profile.nozzle_temp_min = nozzle_min;
            }
            if profile.nozzle_temp_max == 0 {
                profile.nozzle_temp_max = nozzle_max;
            }
            if profile.bed_temp == 0 {
                profile.bed_temp = bed;
            }
        }
        profile.material_type = material_type.to_string();
    } else {
        profile.material_type = infer_material_type(&profile.name).to_string();
    }

    profile
}
