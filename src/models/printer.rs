use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 打印机身份信息，启动时从设备注册表加载，进程生命周期内不变
#[derive(Clone, PartialEq, Eq)]
pub struct Printer {
    /// 打印机ID
    pub id: i32,
    /// 打印机名称
    pub name: String,
    /// 网络地址
    pub ip: String,
    /// 设备序列号
    pub serial: String,
    /// 局域网访问码
    pub access_code: String,
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Printer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("serial", &self.serial)
            .field("access_code", &"***")
            .finish()
    }
}

impl std::fmt::Display for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (ID: {}, IP: {})", self.name, self.id, self.ip)
    }
}

/// 连接状态，由对应的连接监管器独占维护
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// 未连接
    Disconnected,
    /// 连接中（已通过可达性探测，等待就绪）
    Connecting,
    /// 已连接
    Connected,
    /// 降级（健康检查失败但尚未达到阈值）
    Degraded,
    /// 不可达（连续失败超过阈值，连接已拆除）
    Unreachable,
}

impl ConnectionState {
    /// 是否持有协议会话
    pub fn has_session(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded => write!(f, "degraded"),
            ConnectionState::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// 打印机连接健康状态（供HTTP接口展示）
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PrinterHealth {
    /// 打印机ID
    pub printer_id: i32,
    /// 打印机名称
    pub printer_name: String,
    /// 连接状态
    pub state: ConnectionState,
    /// 连续失败次数
    pub consecutive_failures: u32,
    /// 最近一次成功通信时间
    pub last_success: Option<DateTime<Utc>>,
    /// 是否处于隔离集合
    pub quarantined: bool,
}
