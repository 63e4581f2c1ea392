use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// 耗材参考目录条目（来自厂商的 `*@base.json` 配置）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct FilamentProfile {
    /// 源文件名
    pub filename: String,
    /// 去掉 ` @base` 后缀的名称
    pub name: String,
    /// 耗材配置ID（唯一键）
    pub filament_id: String,
    /// 配置类型
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub profile_type: String,
    /// 继承的父配置
    pub inherits: String,
    /// 配置来源
    pub from_source: String,
    /// 品牌
    pub vendor: String,
    /// 价格
    pub cost: f64,
    /// 密度
    pub density: f64,
    /// 流量系数
    pub flow_ratio: f64,
    /// 推断出的材料类型（PLA/ABS/PETG/TPU/UNKNOWN）
    pub material_type: String,
    pub nozzle_temp_min: i32,
    pub nozzle_temp_max: i32,
    pub bed_temp: i32,
    pub bed_temp_initial: i32,
    pub impact_strength_z: f64,
    /// 线径（毫米）
    pub diameter: f64,
    pub retraction_length: f64,
    pub retraction_speed: f64,
    pub print_speed: f64,
    pub start_gcode: String,
    pub end_gcode: String,
    /// 原始配置 JSON
    #[schema(value_type = Object)]
    pub raw_json: serde_json::Value,
}
