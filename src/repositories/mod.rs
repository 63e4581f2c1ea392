// 持久化层：核心逻辑只依赖这里的 trait，Postgres 实现与内存实现可互换
pub mod catalog;
pub mod job;
pub mod printer;
pub mod usage;

#[cfg(test)]
pub mod memory;

pub use catalog::FilamentProfileRepository;
pub use job::JobRepository;
pub use printer::PrinterRepository;
pub use usage::MaterialUsageRepository;

use crate::{
    error::AppResult,
    models::{
        FilamentProfile, JobRecord, MaterialUsageEntry, NewJobRecord, NewMaterialUsage, Printer,
        PrinterTelemetry, SlotPosition,
    },
};
use chrono::{DateTime, Utc};

/// 设备注册表与遥测写入
#[async_trait::async_trait]
pub trait PrinterStore: Send + Sync {
    /// 加载所有投产中的打印机
    async fn load_production_printers(&self) -> AppResult<Vec<Printer>>;

    /// 写入每个轮询周期的通用遥测字段
    async fn update_telemetry(
        &self,
        printer_id: i32,
        telemetry: &PrinterTelemetry,
        polled_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// 追加一条状态日志
    async fn log_status(
        &self,
        printer_id: i32,
        status: &str,
        logged_at: DateTime<Utc>,
    ) -> AppResult<()>;
}

/// 作业记录存储
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// 查找指定设备、指定文件的未结束作业
    async fn find_open_job(&self, printer_id: i32, filename: &str)
    -> AppResult<Option<JobRecord>>;

    /// 查找设备最近的未结束作业
    async fn latest_open_job(&self, printer_id: i32) -> AppResult<Option<JobRecord>>;

    /// 新建一条未结束作业（状态 RUNNING）
    async fn insert_job(&self, job: &NewJobRecord) -> AppResult<JobRecord>;

    /// 结束指定设备、指定文件最近的未结束作业，返回被结束的作业ID
    async fn close_open_job(
        &self,
        printer_id: i32,
        filename: &str,
        end_time: DateTime<Utc>,
        status: &str,
    ) -> AppResult<Option<i64>>;

    /// 以指定状态结束设备上除 `keep_filename` 之外的所有未结束作业，返回结束的条数
    async fn close_other_open_jobs(
        &self,
        printer_id: i32,
        keep_filename: &str,
        end_time: DateTime<Utc>,
        status: &str,
    ) -> AppResult<u64>;

    /// 作业成功完成后登记成品入库，返回写入的库存流水条数
    async fn record_completion_stock(
        &self,
        printer_id: i32,
        filename: &str,
        completed_at: DateTime<Utc>,
    ) -> AppResult<u64>;
}

/// 作业耗材使用台账
#[async_trait::async_trait]
pub trait UsageLedger: Send + Sync {
    /// 作业是否已有台账记录
    async fn has_entries(&self, job_id: i64) -> AppResult<bool>;

    /// 在一个事务中写入作业的全部料位记录
    async fn insert_entries(&self, job_id: i64, entries: &[NewMaterialUsage]) -> AppResult<u64>;

    /// 标记料位已被使用，仅在状态由 false 变为 true 时返回 true
    async fn mark_used(&self, job_id: i64, slot: SlotPosition) -> AppResult<bool>;

    /// 读取作业的台账
    async fn entries_for_job(&self, job_id: i64) -> AppResult<Vec<MaterialUsageEntry>>;
}

/// 耗材参考目录（只读，尽力而为）
#[async_trait::async_trait]
pub trait MaterialCatalog: Send + Sync {
    async fn lookup_material(&self, filament_id: &str) -> AppResult<Option<FilamentProfile>>;
}
