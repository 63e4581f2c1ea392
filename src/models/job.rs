use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// 作业被新作业取代时写入的终止状态
pub const SUPERSEDED_STATUS: &str = "SUPERSEDED";

/// 打印作业记录，`end_time` 为空表示作业仍在进行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct JobRecord {
    /// 作业ID
    pub id: i64,
    /// 打印机ID
    pub printer_id: i32,
    /// 作业文件名
    pub filename: String,
    /// 开始时间（可能由进度反推）
    pub start_time: DateTime<Utc>,
    /// 预估总时长（秒）
    pub total_seconds: Option<i64>,
    /// 结束时间
    pub end_time: Option<DateTime<Utc>>,
    /// 状态（进行中为 RUNNING，结束后为终止状态）
    pub status: String,
}

impl JobRecord {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// 新建作业请求
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobRecord {
    pub printer_id: i32,
    pub filename: String,
    pub start_time: DateTime<Utc>,
    pub total_seconds: Option<i64>,
}

/// 追踪器内存中记住的未结束作业
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenJob {
    pub id: i64,
    pub filename: String,
}

impl From<&JobRecord> for OpenJob {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename.clone(),
        }
    }
}
