use crate::{
    error::AppResult,
    models::{
        NewJobRecord, OpenJob, RunState, SUPERSEDED_STATUS, StatusSnapshot, remaining_seconds,
    },
    repositories::{JobStore, UsageLedger},
    services::MaterialSnapshotEngine,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 单台打印机的作业追踪状态，由该打印机的连接监管器独占持有
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    /// 上一次成功处理的运行状态
    pub previous_state: Option<RunState>,
    /// 上一次成功处理的文件名
    pub previous_file: Option<String>,
    /// 当前未结束作业
    pub open_job: Option<OpenJob>,
    /// 启动对账接管的作业还没有耗材台账，需在下一次 RUNNING 时补录
    pub needs_backfill: bool,
}

/// 相邻两次观测之间的状态迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 非 RUNNING → RUNNING
    Start,
    /// RUNNING → 非 RUNNING
    End,
    /// RUNNING → RUNNING，但文件名变化
    FileChanged,
    /// RUNNING → RUNNING
    InProgress,
    None,
}

/// 由前后两次观测判断迁移类型
pub fn detect_transition(
    previous_state: Option<&RunState>,
    previous_file: Option<&str>,
    current_state: &RunState,
    current_file: Option<&str>,
) -> Transition {
    let was_running = previous_state.is_some_and(RunState::is_running);
    let is_running = current_state.is_running();

    match (was_running, is_running) {
        (false, true) if current_file.is_some() => Transition::Start,
        (true, false) if previous_file.is_some() => Transition::End,
        (true, true) => match (previous_file, current_file) {
            (Some(previous), Some(current)) if previous != current => Transition::FileChanged,
            _ => Transition::InProgress,
        },
        _ => Transition::None,
    }
}

/// 作业时间估算结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTiming {
    pub start_time: DateTime<Utc>,
    pub total_seconds: Option<i64>,
}

/// 由进度与剩余时间反推作业开始时间和总时长
///
/// 只有 `0 < percentage < 100` 且剩余时间已知时才反推；否则开始时间取 `now`，
/// 总时长取剩余时间本身。进度接近 0% 或 100% 时结果并不可靠。
pub fn estimate_timing(
    now: DateTime<Utc>,
    remaining_minutes: Option<i64>,
    percentage: Option<f64>,
) -> JobTiming {
    let remaining_seconds = remaining_seconds(remaining_minutes);

    match (remaining_seconds, percentage) {
        (Some(remaining), Some(pct)) if pct > 0.0 && pct < 100.0 => {
            let remaining = remaining as f64;
            let elapsed = pct * remaining / (100.0 - pct);
            let total = remaining * 100.0 / (100.0 - pct);
            // 进度贴近 100% 时反推值会非常大，算不出合法时间就退回 now
            let start_time = TimeDelta::try_milliseconds((elapsed * 1000.0) as i64)
                .and_then(|delta| now.checked_sub_signed(delta))
                .unwrap_or(now);
            JobTiming {
                start_time,
                total_seconds: Some(total as i64),
            }
        }
        _ => JobTiming {
            start_time: now,
            total_seconds: remaining_seconds,
        },
    }
}

/// 作业生命周期追踪器
///
/// 本身无状态，每台打印机的记忆状态通过 [`TrackerState`] 传入。
pub struct JobLifecycleTracker {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn UsageLedger>,
    materials: MaterialSnapshotEngine,
}

impl JobLifecycleTracker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Arc<dyn UsageLedger>,
        materials: MaterialSnapshotEngine,
    ) -> Self {
        Self {
            jobs,
            ledger,
            materials,
        }
    }

    /// 启动（或重连）对账：接管设备最近的未结束作业
    pub async fn reconcile(&self, printer_id: i32, state: &mut TrackerState) -> AppResult<()> {
        match self.jobs.latest_open_job(printer_id).await? {
            Some(job) => {
                let needs_backfill = !self.ledger.has_entries(job.id).await?;
                info!(
                    printer_id,
                    job_id = job.id,
                    filename = %job.filename,
                    needs_backfill,
                    "接管未结束的作业"
                );
                state.previous_state = Some(RunState::Running);
                state.previous_file = Some(job.filename.clone());
                state.open_job = Some(OpenJob::from(&job));
                state.needs_backfill = needs_backfill;
            }
            None => {
                debug!(printer_id, "没有未结束的作业");
                state.open_job = None;
                state.needs_backfill = false;
            }
        }
        Ok(())
    }

    /// 处理一次状态观测
    ///
    /// 只有处理成功时才更新记忆状态，失败的开始检测会在下一次轮询重试。
    pub async fn observe(
        &self,
        printer_id: i32,
        state: &mut TrackerState,
        snapshot: &StatusSnapshot,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        let current_file = snapshot.file_name.as_deref();
        let transition = detect_transition(
            state.previous_state.as_ref(),
            state.previous_file.as_deref(),
            &snapshot.run_state,
            current_file,
        );

        match transition {
            Transition::Start => {
                if let Some(file) = current_file {
                    self.start_job(printer_id, state, snapshot, file, now).await?;
                }
            }
            Transition::End => {
                if let Some(previous) = state.previous_file.clone() {
                    self.end_job(printer_id, &previous, snapshot.run_state.as_str(), now)
                        .await?;
                }
                state.open_job = None;
                state.needs_backfill = false;
            }
            Transition::FileChanged => {
                if let (Some(previous), Some(file)) = (state.previous_file.clone(), current_file) {
                    info!(printer_id, from = %previous, to = file, "运行中切换了作业文件");
                    self.end_job(printer_id, &previous, SUPERSEDED_STATUS, now)
                        .await?;
                    state.open_job = None;
                    state.needs_backfill = false;
                    self.start_job(printer_id, state, snapshot, file, now).await?;
                }
            }
            Transition::InProgress => match state.open_job.clone() {
                Some(job) => self.track_progress(printer_id, state, &job, snapshot).await?,
                None => {
                    if let Some(file) = current_file {
                        debug!(printer_id, filename = file, "运行中但没有未结束作业，按开始处理");
                        self.start_job(printer_id, state, snapshot, file, now).await?;
                    }
                }
            },
            Transition::None => {}
        }

        state.previous_state = Some(snapshot.run_state.clone());
        state.previous_file = snapshot.file_name.clone();
        Ok(transition)
    }

    async fn start_job(
        &self,
        printer_id: i32,
        state: &mut TrackerState,
        snapshot: &StatusSnapshot,
        file: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        // 重复轮询保护：同一文件已有未结束作业时不再插入
        if let Some(existing) = self.jobs.find_open_job(printer_id, file).await? {
            debug!(printer_id, job_id = existing.id, filename = file, "作业已存在，跳过插入");
            state.open_job = Some(OpenJob::from(&existing));
            state.needs_backfill = !self.ledger.has_entries(existing.id).await?;
            if let Some(job) = state.open_job.clone() {
                self.track_progress(printer_id, state, &job, snapshot).await?;
            }
            return Ok(());
        }

        let superseded = self
            .jobs
            .close_other_open_jobs(printer_id, file, now, SUPERSEDED_STATUS)
            .await?;
        if superseded > 0 {
            warn!(printer_id, count = superseded, "关闭了遗留的未结束作业");
        }

        let timing = estimate_timing(now, snapshot.remaining_minutes, snapshot.percentage);
        let record = self
            .jobs
            .insert_job(&NewJobRecord {
                printer_id,
                filename: file.to_string(),
                start_time: timing.start_time,
                total_seconds: timing.total_seconds,
            })
            .await?;

        info!(
            printer_id,
            job_id = record.id,
            filename = file,
            start_time = %record.start_time.format("%H:%M:%S"),
            total_seconds = ?record.total_seconds,
            "作业开始"
        );

        state.open_job = Some(OpenJob::from(&record));
        state.needs_backfill = false;

        if let Err(e) = self.materials.capture(printer_id, record.id, snapshot).await {
            warn!(printer_id, job_id = record.id, error = %e, "记录耗材快照失败，将在下次轮询补录");
            state.needs_backfill = true;
        }
        Ok(())
    }

    async fn end_job(
        &self,
        printer_id: i32,
        file: &str,
        status: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        match self.jobs.close_open_job(printer_id, file, now, status).await? {
            Some(job_id) => {
                info!(printer_id, job_id, filename = file, status, "作业结束");
                self.log_usage_summary(printer_id, job_id).await;
                if status == RunState::Finish.as_str() {
                    if let Err(e) = self
                        .jobs
                        .record_completion_stock(printer_id, file, now)
                        .await
                    {
                        warn!(printer_id, filename = file, error = %e, "成品入库登记失败");
                    }
                }
            }
            None => {
                warn!(printer_id, filename = file, status, "没有找到匹配的未结束作业，无法记录结束");
            }
        }
        Ok(())
    }

    /// 作业结束时输出耗材台账摘要，读取失败只记录告警
    async fn log_usage_summary(&self, printer_id: i32, job_id: i64) {
        match self.ledger.entries_for_job(job_id).await {
            Ok(entries) => {
                let used: Vec<String> = entries
                    .iter()
                    .filter(|entry| entry.was_used)
                    .map(|entry| {
                        format!(
                            "{}:{}",
                            entry.slot,
                            entry.material.material_type.as_deref().unwrap_or("?")
                        )
                    })
                    .collect();
                info!(
                    printer_id,
                    job_id,
                    slots = entries.len(),
                    used = %used.join(","),
                    "作业耗材台账"
                );
            }
            Err(e) => {
                warn!(printer_id, job_id, error = %e, "读取耗材台账失败");
            }
        }
    }

    async fn track_progress(
        &self,
        printer_id: i32,
        state: &mut TrackerState,
        job: &OpenJob,
        snapshot: &StatusSnapshot,
    ) -> AppResult<()> {
        if state.needs_backfill {
            self.materials.capture(printer_id, job.id, snapshot).await?;
            state.needs_backfill = false;
        }
        self.materials.update_usage(job.id, snapshot).await?;
        Ok(())
    }
}
