use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 打印机集群轮询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 隔离设备重连间隔（秒），与轮询节奏无关
    pub quarantine_retry_interval_secs: u64,
    /// 连续失败阈值，达到后断开连接并隔离
    pub max_consecutive_failures: u32,
    /// 可达性探测端口
    pub probe_port: u16,
    /// 可达性探测超时（毫秒）
    pub probe_timeout_ms: u64,
    /// 协议握手超时（秒）
    pub connect_timeout_secs: u64,
    /// 等待客户端就绪的超时（秒）
    pub ready_timeout_secs: u64,
    /// 就绪检查采样间隔（毫秒）
    pub ready_poll_interval_ms: u64,
    /// 完整状态读取超时（秒）
    pub status_timeout_secs: u64,
    /// 健康检查超时（秒）
    pub health_timeout_secs: u64,
    /// 轮询循环异常后的退避时间（秒）
    pub error_backoff_secs: u64,
    /// 状态日志写入间隔（秒）
    pub status_log_interval_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            quarantine_retry_interval_secs: 60,
            max_consecutive_failures: 3,
            probe_port: 8883,
            probe_timeout_ms: 1000,
            connect_timeout_secs: 10,
            ready_timeout_secs: 10,
            ready_poll_interval_ms: 500,
            status_timeout_secs: 5,
            health_timeout_secs: 3,
            error_backoff_secs: 30,
            status_log_interval_secs: 300,
        }
    }
}

impl FleetConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_secs == 0 {
            return Err("轮询间隔必须大于0".to_string());
        }
        if self.quarantine_retry_interval_secs == 0 {
            return Err("隔离重连间隔必须大于0".to_string());
        }
        if self.max_consecutive_failures == 0 {
            return Err("连续失败阈值必须大于0".to_string());
        }
        if self.probe_timeout_ms == 0 {
            return Err("探测超时必须大于0".to_string());
        }
        if self.connect_timeout_secs == 0 || self.ready_timeout_secs == 0 {
            return Err("连接与就绪超时必须大于0".to_string());
        }
        if self.ready_poll_interval_ms == 0
            || self.ready_poll_interval_ms >= self.ready_timeout_secs.saturating_mul(1000)
        {
            return Err("就绪采样间隔必须大于0且小于就绪超时".to_string());
        }
        if self.status_timeout_secs == 0 || self.health_timeout_secs == 0 {
            return Err("状态读取与健康检查超时必须大于0".to_string());
        }
        if self.error_backoff_secs < self.poll_interval_secs {
            return Err("异常退避时间不应小于轮询间隔".to_string());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn quarantine_retry_interval(&self) -> Duration {
        Duration::from_secs(self.quarantine_retry_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn status_log_interval(&self) -> Duration {
        Duration::from_secs(self.status_log_interval_secs)
    }
}
