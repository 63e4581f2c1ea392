use crate::{
    config::DatabaseConfig,
    error::{AppResult, is_transient_sqlx},
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::future::Future;
use std::time::Duration;

/// 数据库连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool", &"<PgPool>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl Database {
    /// 创建数据库连接池
    pub async fn new(config: &DatabaseConfig) -> AppResult<Self> {
        tracing::info!("正在连接数据库: {}", mask_database_url(&config.url));

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        // 测试连接
        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        tracing::info!("数据库连接成功，最大连接数: {}", config.max_connections);

        Ok(Self {
            pool,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 获取重试策略
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 检查数据库健康状态
    pub async fn health_check(&self) -> AppResult<bool> {
        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(result == 1)
    }

    /// 关闭数据库连接池
    pub async fn close(&self) {
        tracing::info!("正在关闭数据库连接池...");
        self.pool.close().await;
        tracing::info!("数据库连接池已关闭");
    }
}

/// 有界重试策略：固定次数、固定间隔
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        }
    }
}

/// 执行数据库操作，遇到瞬时连接错误时按策略重试
///
/// 每次尝试都应是独立的语句或事务：失败的事务在被丢弃时自动回滚，
/// 连接池会在下一次获取连接时重新建立断开的连接。
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient_sqlx(&e) && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = policy.max_retries,
                    error = %e,
                    "数据库连接异常，{}ms 后重试",
                    policy.delay.as_millis()
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::error!(operation, attempt, error = %e, "数据库操作重试耗尽");
                }
                return Err(e);
            }
        }
    }
}

/// 隐藏数据库URL中的敏感信息
fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        // 查找协议部分后的第一个冒号位置
        if let Some(protocol_end) = url.find("://") {
            let auth_part = &url[protocol_end + 3..at_pos];
            if let Some(colon_pos) = auth_part.find(':') {
                // 找到了用户名:密码格式，需要掩码密码
                let mut masked = url.to_string();
                let password_start = protocol_end + 3 + colon_pos + 1;
                masked.replace_range(password_start..at_pos, "***");
                return masked;
            }
        }
    }
    url.to_string()
}
