use serde::{Deserialize, Serialize};

/// 打印机状态桥接服务配置
///
/// 设备协议会话由桥接服务维护，本服务只通过HTTP读取结构化状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// 桥接服务基础URL
    pub base_url: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_string(),
            request_timeout_secs: 5,
        }
    }
}

impl BridgeConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("桥接服务 base_url 不能为空".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("桥接服务 base_url 必须以 http:// 或 https:// 开头".to_string());
        }

        if self.request_timeout_secs == 0 {
            return Err("请求超时必须大于0".to_string());
        }

        Ok(())
    }

    /// 获取完整的API URL
    pub fn get_api_url(&self, endpoint: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        format!("{}/{}", base, endpoint)
    }
}
