//! 测试用的内存存储，实现全部持久化 trait

use super::{JobStore, MaterialCatalog, PrinterStore, UsageLedger};
use crate::{
    error::{AppError, AppResult},
    models::{
        FilamentProfile, JobRecord, MaterialUsageEntry, NewJobRecord, NewMaterialUsage, Printer,
        PrinterTelemetry, SlotPosition,
    },
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct Inner {
    printers: Vec<Printer>,
    telemetry: HashMap<i32, PrinterTelemetry>,
    status_logs: Vec<(i32, String)>,
    jobs: Vec<JobRecord>,
    usage: Vec<MaterialUsageEntry>,
    stock: Vec<(i32, String)>,
    profiles: HashMap<String, FilamentProfile>,
    mark_used_writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_telemetry: AtomicBool,
    fail_jobs: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_printers(printers: Vec<Printer>) -> Self {
        let store = Self::default();
        store.inner.lock().unwrap().printers = printers;
        store
    }

    pub fn add_profile(&self, profile: FilamentProfile) {
        self.inner
            .lock()
            .unwrap()
            .profiles
            .insert(profile.filament_id.clone(), profile);
    }

    /// 直接放入一条作业记录（模拟上一次进程留下的数据）
    pub fn seed_job(&self, record: JobRecord) {
        self.inner.lock().unwrap().jobs.push(record);
    }

    pub fn set_fail_telemetry(&self, fail: bool) {
        self.fail_telemetry.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_jobs(&self, fail: bool) {
        self.fail_jobs.store(fail, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.inner.lock().unwrap().jobs.clone()
    }

    pub fn open_jobs(&self, printer_id: i32) -> Vec<JobRecord> {
        self.jobs()
            .into_iter()
            .filter(|j| j.printer_id == printer_id && j.is_open())
            .collect()
    }

    pub fn usage(&self, job_id: i64) -> Vec<MaterialUsageEntry> {
        self.inner
            .lock()
            .unwrap()
            .usage
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn telemetry(&self, printer_id: i32) -> Option<PrinterTelemetry> {
        self.inner.lock().unwrap().telemetry.get(&printer_id).cloned()
    }

    pub fn status_logs(&self) -> Vec<(i32, String)> {
        self.inner.lock().unwrap().status_logs.clone()
    }

    pub fn stock(&self) -> Vec<(i32, String)> {
        self.inner.lock().unwrap().stock.clone()
    }

    /// mark_used 实际产生写入的次数
    pub fn mark_used_writes(&self) -> usize {
        self.inner.lock().unwrap().mark_used_writes
    }

    fn check_jobs(&self) -> AppResult<()> {
        if self.fail_jobs.load(Ordering::SeqCst) {
            return Err(AppError::service_unavailable("作业存储不可用"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PrinterStore for MemoryStore {
    async fn load_production_printers(&self) -> AppResult<Vec<Printer>> {
        Ok(self.inner.lock().unwrap().printers.clone())
    }

    async fn update_telemetry(
        &self,
        printer_id: i32,
        telemetry: &PrinterTelemetry,
        _polled_at: DateTime<Utc>,
    ) -> AppResult<()> {
        if self.fail_telemetry.load(Ordering::SeqCst) {
            return Err(AppError::service_unavailable("遥测写入失败"));
        }
        self.inner
            .lock()
            .unwrap()
            .telemetry
            .insert(printer_id, telemetry.clone());
        Ok(())
    }

    async fn log_status(
        &self,
        printer_id: i32,
        status: &str,
        _logged_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.inner
            .lock()
            .unwrap()
            .status_logs
            .push((printer_id, status.to_string()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryStore {
    async fn find_open_job(
        &self,
        printer_id: i32,
        filename: &str,
    ) -> AppResult<Option<JobRecord>> {
        self.check_jobs()?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|j| j.printer_id == printer_id && j.filename == filename && j.is_open())
            .max_by_key(|j| j.start_time)
            .cloned())
    }

    async fn latest_open_job(&self, printer_id: i32) -> AppResult<Option<JobRecord>> {
        self.check_jobs()?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .jobs
            .iter()
            .filter(|j| j.printer_id == printer_id && j.is_open())
            .max_by_key(|j| j.start_time)
            .cloned())
    }

    async fn insert_job(&self, job: &NewJobRecord) -> AppResult<JobRecord> {
        self.check_jobs()?;
        let mut inner = self.inner.lock().unwrap();
        let id = inner.jobs.iter().map(|j| j.id).max().unwrap_or(0) + 1;
        let record = JobRecord {
            id,
            printer_id: job.printer_id,
            filename: job.filename.clone(),
            start_time: job.start_time,
            total_seconds: job.total_seconds,
            end_time: None,
            status: "RUNNING".to_string(),
        };
        inner.jobs.push(record.clone());
        Ok(record)
    }

    async fn close_open_job(
        &self,
        printer_id: i32,
        filename: &str,
        end_time: DateTime<Utc>,
        status: &str,
    ) -> AppResult<Option<i64>> {
        self.check_jobs()?;
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .iter_mut()
            .filter(|j| j.printer_id == printer_id && j.filename == filename && j.is_open())
            .max_by_key(|j| j.start_time);
        Ok(job.map(|job| {
            job.end_time = Some(end_time);
            job.status = status.to_string();
            job.id
        }))
    }

    async fn close_other_open_jobs(
        &self,
        printer_id: i32,
        keep_filename: &str,
        end_time: DateTime<Utc>,
        status: &str,
    ) -> AppResult<u64> {
        self.check_jobs()?;
        let mut inner = self.inner.lock().unwrap();
        let mut closed = 0;
        for job in inner.jobs.iter_mut().filter(|j| {
            j.printer_id == printer_id && j.filename != keep_filename && j.is_open()
        }) {
            job.end_time = Some(end_time);
            job.status = status.to_string();
            closed += 1;
        }
        Ok(closed)
    }

    async fn record_completion_stock(
        &self,
        printer_id: i32,
        filename: &str,
        _completed_at: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.inner
            .lock()
            .unwrap()
            .stock
            .push((printer_id, filename.to_string()));
        Ok(1)
    }
}

#[async_trait::async_trait]
impl UsageLedger for MemoryStore {
    async fn has_entries(&self, job_id: i64) -> AppResult<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .usage
            .iter()
            .any(|e| e.job_id == job_id))
    }

    async fn insert_entries(&self, job_id: i64, entries: &[NewMaterialUsage]) -> AppResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        for entry in entries {
            let id = inner.usage.len() as i64 + 1;
            inner.usage.push(MaterialUsageEntry {
                id,
                job_id,
                slot: entry.slot,
                material: entry.material.clone(),
                is_primary: entry.is_primary,
                was_used: entry.was_used,
            });
        }
        Ok(entries.len() as u64)
    }

    async fn mark_used(&self, job_id: i64, slot: SlotPosition) -> AppResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let mut changed = false;
        for entry in inner
            .usage
            .iter_mut()
            .filter(|e| e.job_id == job_id && e.slot == slot && !e.was_used)
        {
            entry.was_used = true;
            changed = true;
        }
        if changed {
            inner.mark_used_writes += 1;
        }
        Ok(changed)
    }

    async fn entries_for_job(&self, job_id: i64) -> AppResult<Vec<MaterialUsageEntry>> {
        Ok(self.usage(job_id))
    }
}

#[async_trait::async_trait]
impl MaterialCatalog for MemoryStore {
    async fn lookup_material(&self, filament_id: &str) -> AppResult<Option<FilamentProfile>> {
        Ok(self.inner.lock().unwrap().profiles.get(filament_id).cloned())
    }
}
