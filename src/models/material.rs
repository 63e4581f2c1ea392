use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::FilamentProfile;

/// 最多支持的料盒（AMS）数量
pub const HOLDER_COUNT: usize = 4;
/// 每个料盒的料位数量
pub const POSITIONS_PER_HOLDER: usize = 4;

/// 料位坐标：料盒内的某个位置，或外挂料架
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotPosition {
    /// 料盒料位
    Holder { unit: u8, tray: u8 },
    /// 外挂料架
    External,
}

impl SlotPosition {
    /// 料盒编号（外挂料架为 None）
    pub fn unit(&self) -> Option<i16> {
        match self {
            SlotPosition::Holder { unit, .. } => Some(i16::from(*unit)),
            SlotPosition::External => None,
        }
    }

    /// 料位编号（外挂料架为 None）
    pub fn tray(&self) -> Option<i16> {
        match self {
            SlotPosition::Holder { tray, .. } => Some(i16::from(*tray)),
            SlotPosition::External => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, SlotPosition::External)
    }

    /// 由数据库列还原坐标，坐标超出 `u8` 范围时返回 `None`
    pub fn from_columns(unit: Option<i16>, tray: Option<i16>) -> Option<Self> {
        match (unit, tray) {
            (Some(unit), Some(tray)) => Some(SlotPosition::Holder {
                unit: u8::try_from(unit).ok()?,
                tray: u8::try_from(tray).ok()?,
            }),
            _ => Some(SlotPosition::External),
        }
    }
}

impl std::fmt::Display for SlotPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotPosition::Holder { unit, tray } => write!(f, "AMS{}-T{}", unit, tray),
            SlotPosition::External => write!(f, "external"),
        }
    }
}

/// 当前供料料位（由设备上报的整数编码解码而来）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSlot {
    /// 料盒料位或外挂料架
    Slot(SlotPosition),
    /// 无法识别的编码
    Unknown,
}

impl ActiveSlot {
    /// 解码供料编码
    ///
    /// - `0..=15`：料盒 `code / 4`，料位 `code % 4`
    /// - `254`、`255`：外挂料架
    /// - 其他：未知
    pub fn decode(code: i32) -> Self {
        match code {
            0..=15 => ActiveSlot::Slot(SlotPosition::Holder {
                unit: (code / POSITIONS_PER_HOLDER as i32) as u8,
                tray: (code % POSITIONS_PER_HOLDER as i32) as u8,
            }),
            254 | 255 => ActiveSlot::Slot(SlotPosition::External),
            _ => ActiveSlot::Unknown,
        }
    }

    /// 解码可能缺失的编码
    pub fn from_code(code: Option<i32>) -> Self {
        code.map(Self::decode).unwrap_or(ActiveSlot::Unknown)
    }

    pub fn position(&self) -> Option<SlotPosition> {
        match self {
            ActiveSlot::Slot(position) => Some(*position),
            ActiveSlot::Unknown => None,
        }
    }

    /// 仅当编码指向料盒料位时返回坐标
    pub fn holder_position(&self) -> Option<SlotPosition> {
        self.position().filter(|p| !p.is_external())
    }
}

/// 单个料位的耗材描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MaterialDescriptor {
    /// 耗材类型，如 PLA、PETG
    pub material_type: Option<String>,
    /// 颜色（RRGGBB）
    pub color: Option<String>,
    /// 品牌
    pub vendor: Option<String>,
    /// 最低喷嘴温度
    pub nozzle_temp_min: Option<i32>,
    /// 最高喷嘴温度
    pub nozzle_temp_max: Option<i32>,
    /// 热床温度
    pub bed_temp: Option<i32>,
    /// 耗材重量（克）
    pub weight_grams: Option<f64>,
    /// 料卷唯一标识
    pub tray_uuid: Option<String>,
    /// 耗材配置ID（参考目录键）
    pub filament_id: Option<String>,
    /// 参考目录中的名称
    pub catalog_name: Option<String>,
}

impl MaterialDescriptor {
    /// 料位是否装有耗材
    pub fn is_loaded(&self) -> bool {
        self.material_type
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// 使用参考目录补全缺失字段，设备上报的原始值优先
    pub fn enrich_with(&mut self, profile: &FilamentProfile) {
        if self.vendor.is_none() && !profile.vendor.is_empty() {
            self.vendor = Some(profile.vendor.clone());
        }
        if self.nozzle_temp_min.is_none_or(|t| t == 0) && profile.nozzle_temp_min > 0 {
            self.nozzle_temp_min = Some(profile.nozzle_temp_min);
        }
        if self.nozzle_temp_max.is_none_or(|t| t == 0) && profile.nozzle_temp_max > 0 {
            self.nozzle_temp_max = Some(profile.nozzle_temp_max);
        }
        if self.bed_temp.is_none_or(|t| t == 0) && profile.bed_temp > 0 {
            self.bed_temp = Some(profile.bed_temp);
        }
        self.catalog_name = Some(profile.name.clone());
    }
}

/// 去掉 RRGGBBAA 颜色末尾的不透明度 FF
pub fn normalize_color(color: &str) -> String {
    let color = color.trim();
    if color.len() == 8 && color.to_ascii_uppercase().ends_with("FF") {
        color[..6].to_string()
    } else {
        color.to_string()
    }
}

/// 固定尺寸的料位网格（料盒 × 料位），空料位显式为 None
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialGrid {
    holders: [[Option<MaterialDescriptor>; POSITIONS_PER_HOLDER]; HOLDER_COUNT],
    external: Option<MaterialDescriptor>,
}

impl MaterialGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入耗材，坐标越界时返回 false
    pub fn set(&mut self, slot: SlotPosition, material: MaterialDescriptor) -> bool {
        match slot {
            SlotPosition::Holder { unit, tray } => {
                let (unit, tray) = (unit as usize, tray as usize);
                if unit >= HOLDER_COUNT || tray >= POSITIONS_PER_HOLDER {
                    return false;
                }
                self.holders[unit][tray] = Some(material);
                true
            }
            SlotPosition::External => {
                self.external = Some(material);
                true
            }
        }
    }

    pub fn get(&self, slot: SlotPosition) -> Option<&MaterialDescriptor> {
        match slot {
            SlotPosition::Holder { unit, tray } => self
                .holders
                .get(unit as usize)
                .and_then(|row| row.get(tray as usize))
                .and_then(|m| m.as_ref()),
            SlotPosition::External => self.external.as_ref(),
        }
    }

    /// 按料盒、料位顺序遍历已装载的料位，外挂料架最后
    pub fn loaded(&self) -> impl Iterator<Item = (SlotPosition, &MaterialDescriptor)> {
        let holders = self.holders.iter().enumerate().flat_map(|(unit, row)| {
            row.iter().enumerate().filter_map(move |(tray, material)| {
                material.as_ref().map(|m| {
                    (
                        SlotPosition::Holder {
                            unit: unit as u8,
                            tray: tray as u8,
                        },
                        m,
                    )
                })
            })
        });
        let external = self
            .external
            .as_ref()
            .map(|m| (SlotPosition::External, m));
        holders
            .chain(external)
            .filter(|(_, material)| material.is_loaded())
    }

    pub fn is_empty(&self) -> bool {
        self.loaded().next().is_none()
    }
}

/// 作业耗材使用记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MaterialUsageEntry {
    pub id: i64,
    pub job_id: i64,
    pub slot: SlotPosition,
    pub material: MaterialDescriptor,
    /// 是否为作业开始时的主料位
    pub is_primary: bool,
    /// 作业期间是否曾被供料（只会由 false 变为 true）
    pub was_used: bool,
}

/// 待写入的耗材使用记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewMaterialUsage {
    pub slot: SlotPosition,
    pub material: MaterialDescriptor,
    pub is_primary: bool,
    pub was_used: bool,
}
