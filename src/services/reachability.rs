use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// 建立协议会话前的可达性探测
#[async_trait::async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str) -> bool;
}

/// TCP 端口探测：在超时内能完成握手即视为可达
#[derive(Debug, Clone)]
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait::async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, host: &str) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, self.port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(host, port = self.port, error = %e, "可达性探测失败");
                false
            }
            Err(_) => {
                debug!(host, port = self.port, "可达性探测超时");
                false
            }
        }
    }
}
