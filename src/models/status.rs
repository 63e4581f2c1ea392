use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

use super::{ActiveSlot, MaterialGrid};

/// 剩余时间的合理上限（分钟），超过即视为非法上报
pub const MAX_REMAINING_MINUTES: i64 = 30 * 24 * 60;

/// 把上报的剩余分钟数换算成秒，负数或超出上限视为未知
pub fn remaining_seconds(minutes: Option<i64>) -> Option<i64> {
    minutes
        .filter(|m| (0..=MAX_REMAINING_MINUTES).contains(m))
        .and_then(|m| m.checked_mul(60))
}

/// 打印机运行状态（设备上报的 gcode_state）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Prepare,
    Running,
    Pause,
    Finish,
    Failed,
    Slicing,
    Init,
    Offline,
    /// 无法识别的状态字符串，原样保留
    Unknown(String),
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunState::Idle => "IDLE",
            RunState::Prepare => "PREPARE",
            RunState::Running => "RUNNING",
            RunState::Pause => "PAUSE",
            RunState::Finish => "FINISH",
            RunState::Failed => "FAILED",
            RunState::Slicing => "SLICING",
            RunState::Init => "INIT",
            RunState::Offline => "OFFLINE",
            RunState::Unknown(raw) => raw.as_str(),
        }
    }
}

impl FromStr for RunState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_uppercase().as_str() {
            "IDLE" => RunState::Idle,
            "PREPARE" => RunState::Prepare,
            "RUNNING" => RunState::Running,
            "PAUSE" => RunState::Pause,
            "FINISH" => RunState::Finish,
            "FAILED" => RunState::Failed,
            "SLICING" => RunState::Slicing,
            "INIT" => RunState::Init,
            "OFFLINE" => RunState::Offline,
            "" => RunState::Unknown("UNKNOWN".to_string()),
            other => RunState::Unknown(other.to_string()),
        };
        Ok(state)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Unknown("UNKNOWN".to_string())
    }
}

/// 某一时刻的打印机状态快照，仅用于推导，不原样持久化
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    /// 运行状态
    pub run_state: RunState,
    /// 完成百分比
    pub percentage: Option<f64>,
    /// 当前作业文件名
    pub file_name: Option<String>,
    /// 当前层
    pub layer_num: Option<i64>,
    /// 总层数
    pub total_layers: Option<i64>,
    /// 热床温度
    pub bed_temp: Option<f64>,
    /// 喷嘴温度
    pub nozzle_temp: Option<f64>,
    /// 剩余时间（分钟）
    pub remaining_minutes: Option<i64>,
    /// 当前供料编码
    pub active_slot_code: Option<i32>,
    /// 当前供料料卷的唯一标识
    pub active_material_uuid: Option<String>,
    /// 已装载耗材
    pub materials: MaterialGrid,
}

impl StatusSnapshot {
    pub fn active_slot(&self) -> ActiveSlot {
        ActiveSlot::from_code(self.active_slot_code)
    }

    /// 推导需要持久化的通用遥测字段
    pub fn telemetry(&self) -> PrinterTelemetry {
        PrinterTelemetry {
            status: self.run_state.to_string(),
            progress: self
                .percentage
                .filter(|p| (0.0..=100.0).contains(p)),
            remaining_seconds: remaining_seconds(self.remaining_minutes),
            current_file: self.file_name.clone(),
        }
    }
}

/// 每个轮询周期无条件写入的通用遥测字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PrinterTelemetry {
    /// 运行状态
    pub status: String,
    /// 完成百分比（0-100）
    pub progress: Option<f64>,
    /// 剩余时间（秒）
    pub remaining_seconds: Option<i64>,
    /// 当前作业文件名
    pub current_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_parse() {
        assert_eq!("RUNNING".parse::<RunState>().unwrap(), RunState::Running);
        assert_eq!("finish".parse::<RunState>().unwrap(), RunState::Finish);
        assert_eq!(
            "CALIBRATING".parse::<RunState>().unwrap(),
            RunState::Unknown("CALIBRATING".to_string())
        );
        assert_eq!(RunState::Unknown("X".to_string()).to_string(), "X");
        assert!(RunState::Running.is_running());
        assert!(!RunState::Pause.is_running());
    }

    #[test]
    fn test_telemetry_normalisation() {
        let snapshot = StatusSnapshot {
            run_state: RunState::Running,
            percentage: Some(42.4),
            remaining_minutes: Some(30),
            file_name: Some("benchy.gcode".to_string()),
            ..Default::default()
        };
        let telemetry = snapshot.telemetry();
        assert_eq!(telemetry.status, "RUNNING");
        assert_eq!(telemetry.progress, Some(42.4));
        assert_eq!(telemetry.remaining_seconds, Some(1800));

        let broken = StatusSnapshot {
            percentage: Some(140.0),
            remaining_minutes: Some(-1),
            ..Default::default()
        };
        let telemetry = broken.telemetry();
        assert_eq!(telemetry.status, "UNKNOWN");
        assert_eq!(telemetry.progress, None);
        assert_eq!(telemetry.remaining_seconds, None);
    }

    #[test]
    fn test_telemetry_ignores_absurd_remaining_time() {
        let snapshot = StatusSnapshot {
            remaining_minutes: Some(i64::MAX),
            ..Default::default()
        };
        assert_eq!(snapshot.telemetry().remaining_seconds, None);

        assert_eq!(
            remaining_seconds(Some(MAX_REMAINING_MINUTES)),
            Some(MAX_REMAINING_MINUTES * 60)
        );
        assert_eq!(remaining_seconds(Some(MAX_REMAINING_MINUTES + 1)), None);
    }
}
