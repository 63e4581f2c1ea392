use crate::{
    config::FleetConfig,
    error::{AppError, AppResult},
    models::{PrinterHealth, StatusSnapshot},
    repositories::PrinterStore,
    services::ConnectionSupervisor,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

/// 编排器每个周期发布的集群健康视图
pub type FleetHealth = Arc<RwLock<Vec<PrinterHealth>>>;

/// 集群编排器
///
/// 持有活跃与隔离两个互不相交的监管器集合，驱动轮询周期并在两者之间迁移设备。
pub struct FleetOrchestrator {
    active: Vec<ConnectionSupervisor>,
    quarantined: Vec<ConnectionSupervisor>,
    printers: Arc<dyn PrinterStore>,
    config: FleetConfig,
    last_quarantine_retry: Instant,
    health: FleetHealth,
}

impl FleetOrchestrator {
    pub fn new(printers: Arc<dyn PrinterStore>, config: FleetConfig) -> Self {
        Self {
            active: Vec::new(),
            quarantined: Vec::new(),
            printers,
            config,
            last_quarantine_retry: Instant::now(),
            health: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 健康视图的共享句柄（供HTTP接口读取）
    pub fn health_handle(&self) -> FleetHealth {
        Arc::clone(&self.health)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn quarantined_count(&self) -> usize {
        self.quarantined.len()
    }

    pub fn is_quarantined(&self, printer_id: i32) -> bool {
        self.quarantined
            .iter()
            .any(|s| s.printer().id == printer_id)
    }

    /// 首次连接设备；连接失败的设备直接进入隔离集合
    pub async fn admit(&mut self, mut supervisor: ConnectionSupervisor) {
        if supervisor.connect().await {
            self.active.push(supervisor);
        } else {
            warn!(
                printer_id = supervisor.printer().id,
                "初始连接失败，进入隔离集合"
            );
            self.quarantined.push(supervisor);
        }
    }

    /// 执行一个轮询周期
    ///
    /// 单台设备的作业追踪错误只记录日志，不影响其他设备和轮询节奏。
    /// 只有本周期所有取得状态的设备都追踪失败（存储整体不可用）时才返回错误，
    /// 由 [`run`](Self::run) 退避。
    pub async fn poll_cycle(&mut self, now: Instant) -> AppResult<()> {
        let mut tracked = 0usize;
        let mut last_error: Option<AppError> = None;
        let mut failed = 0usize;

        for mut supervisor in std::mem::take(&mut self.active) {
            let printer_id = supervisor.printer().id;

            if !supervisor.check_health().await {
                if !supervisor.should_quarantine() {
                    // 未达阈值：保持活跃，本周期跳过
                    self.active.push(supervisor);
                    continue;
                }
                info!(printer_id, "健康检查失败，尝试重连");
                if !supervisor.connect().await {
                    self.quarantine(supervisor).await;
                    continue;
                }
            }

            match supervisor.get_status_safe().await {
                Some(snapshot) => {
                    tracked += 1;
                    if let Err(e) = self.process_snapshot(&mut supervisor, &snapshot).await {
                        error!(printer_id, error = %e, "作业追踪失败，下个周期重试");
                        failed += 1;
                        last_error = Some(e);
                    }
                    self.active.push(supervisor);
                }
                None if supervisor.should_quarantine() => {
                    self.quarantine(supervisor).await;
                }
                None => self.active.push(supervisor),
            }
        }

        if now.duration_since(self.last_quarantine_retry) >= self.config.quarantine_retry_interval()
        {
            self.last_quarantine_retry = now;
            self.retry_quarantined().await;
        }

        self.publish_health().await;

        match last_error {
            Some(e) if failed == tracked => Err(e),
            _ => Ok(()),
        }
    }

    async fn quarantine(&mut self, mut supervisor: ConnectionSupervisor) {
        supervisor.disconnect().await;
        warn!(
            printer_id = supervisor.printer().id,
            retry_secs = self.config.quarantine_retry_interval_secs,
            "设备已移入隔离集合"
        );
        self.quarantined.push(supervisor);
    }

    /// 对隔离集合中的设备重新探测并连接，成功的移回活跃集合
    pub async fn retry_quarantined(&mut self) {
        if self.quarantined.is_empty() {
            return;
        }
        info!(count = self.quarantined.len(), "重试隔离设备");

        for mut supervisor in std::mem::take(&mut self.quarantined) {
            if supervisor.connect().await {
                info!(printer_id = supervisor.printer().id, "隔离设备已恢复");
                self.active.push(supervisor);
            } else {
                self.quarantined.push(supervisor);
            }
        }
    }

    /// 作业追踪 + 遥测写入；遥测失败只记录日志
    async fn process_snapshot(
        &self,
        supervisor: &mut ConnectionSupervisor,
        snapshot: &StatusSnapshot,
    ) -> AppResult<()> {
        let printer_id = supervisor.printer().id;
        let now = Utc::now();

        let tracked = supervisor.observe(snapshot, now).await;

        let telemetry = snapshot.telemetry();
        if let Err(e) = self
            .printers
            .update_telemetry(printer_id, &telemetry, now)
            .await
        {
            warn!(printer_id, error = %e, "更新打印机遥测失败");
        }

        if supervisor.status_log_due(Instant::now()) {
            if let Err(e) = self
                .printers
                .log_status(printer_id, &telemetry.status, now)
                .await
            {
                warn!(printer_id, error = %e, "写入状态日志失败");
            }
        }

        tracked.map(|_| ())
    }

    async fn publish_health(&self) {
        let mut health: Vec<PrinterHealth> = self
            .active
            .iter()
            .map(|s| s.health(false))
            .chain(self.quarantined.iter().map(|s| s.health(true)))
            .collect();
        health.sort_by_key(|h| h.printer_id);
        *self.health.write().await = health;
    }

    /// 运行轮询循环直到收到关闭信号，然后断开所有设备
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            active = self.active.len(),
            quarantined = self.quarantined.len(),
            interval_secs = self.config.poll_interval_secs,
            "开始轮询打印机集群"
        );
        self.publish_health().await;

        while !*shutdown.borrow() {
            let delay = match self.poll_cycle(Instant::now()).await {
                Ok(()) => self.config.poll_interval(),
                Err(e) => {
                    error!(
                        error = %e,
                        backoff_secs = self.config.error_backoff_secs,
                        "轮询周期出现错误，退避后继续"
                    );
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// 断开全部设备
    pub async fn shutdown(&mut self) {
        info!("正在断开所有打印机连接...");
        for supervisor in self.active.iter_mut().chain(self.quarantined.iter_mut()) {
            supervisor.disconnect().await;
        }
        self.publish_health().await;
        info!("打印机集群轮询已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{ConnectionState, RunState},
        repositories::memory::MemoryStore,
        services::testing::{FakeClient, FakeProbe, test_fleet_config, test_printer, test_tracker},
    };
    use std::time::Duration;

    struct Device {
        client: Arc<FakeClient>,
        probe: Arc<FakeProbe>,
    }

    async fn fleet(count: i32, config: FleetConfig) -> (FleetOrchestrator, Vec<Device>, Arc<MemoryStore>) {
        let (tracker, store) = test_tracker();
        let mut orchestrator = FleetOrchestrator::new(store.clone(), config.clone());
        let mut devices = Vec::new();
        for id in 1..=count {
            let client = Arc::new(FakeClient::new());
            let probe = Arc::new(FakeProbe::new(true));
            let supervisor = ConnectionSupervisor::new(
                test_printer(id),
                client.clone(),
                probe.clone(),
                tracker.clone(),
                config.clone(),
            );
            orchestrator.admit(supervisor).await;
            devices.push(Device { client, probe });
        }
        (orchestrator, devices, store)
    }

    #[tokio::test]
    async fn test_cycle_writes_telemetry_and_tracks_jobs() {
        let (mut orchestrator, devices, store) = fleet(1, test_fleet_config()).await;
        devices[0].client.push_snapshot(StatusSnapshot {
            run_state: RunState::Running,
            file_name: Some("a.job".to_string()),
            percentage: Some(10.0),
            remaining_minutes: Some(90),
            ..Default::default()
        });

        orchestrator.poll_cycle(Instant::now()).await.unwrap();

        let telemetry = store.telemetry(1).unwrap();
        assert_eq!(telemetry.status, "RUNNING");
        assert_eq!(telemetry.remaining_seconds, Some(5400));
        assert_eq!(store.open_jobs(1).len(), 1);
        assert_eq!(store.status_logs(), vec![(1, "RUNNING".to_string())]);

        let health = orchestrator.health_handle();
        let health = health.read().await;
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].state, ConnectionState::Connected);
        assert!(!health[0].quarantined);
    }

    #[tokio::test]
    async fn test_device_is_quarantined_after_threshold() {
        let config = test_fleet_config();
        let (mut orchestrator, devices, _store) = fleet(2, config.clone()).await;
        let dead = &devices[0];
        dead.client.set_healthy(false);
        dead.probe.set_reachable(false);

        let start = Instant::now();
        for cycle in 1..config.max_consecutive_failures {
            orchestrator.poll_cycle(start).await.unwrap();
            assert_eq!(orchestrator.active_count(), 2, "cycle {cycle}");
        }

        orchestrator.poll_cycle(start).await.unwrap();
        assert_eq!(orchestrator.active_count(), 1);
        assert_eq!(orchestrator.quarantined_count(), 1);
        assert!(orchestrator.is_quarantined(1));
        assert!(!orchestrator.is_quarantined(2));
        assert!(dead.client.disconnect_calls() >= 1);

        // 重试间隔未到，不会尝试重连
        let connects = dead.client.connect_calls();
        dead.probe.set_reachable(true);
        dead.client.set_healthy(true);
        orchestrator.poll_cycle(start).await.unwrap();
        assert_eq!(dead.client.connect_calls(), connects);
        assert!(orchestrator.is_quarantined(1));

        // 到达重试间隔后恢复
        orchestrator
            .poll_cycle(start + config.quarantine_retry_interval())
            .await
            .unwrap();
        assert!(!orchestrator.is_quarantined(1));
        assert_eq!(orchestrator.active_count(), 2);
    }

    #[tokio::test]
    async fn test_telemetry_failure_keeps_device_active() {
        let (mut orchestrator, _devices, store) = fleet(1, test_fleet_config()).await;
        store.set_fail_telemetry(true);

        orchestrator.poll_cycle(Instant::now()).await.unwrap();
        assert_eq!(orchestrator.active_count(), 1);
        assert_eq!(orchestrator.quarantined_count(), 0);
    }

    #[tokio::test]
    async fn test_single_device_tracker_error_keeps_poll_rate() {
        let (mut orchestrator, devices, store) = fleet(2, test_fleet_config()).await;
        devices[0].client.push_snapshot(StatusSnapshot {
            run_state: RunState::Running,
            file_name: Some("a.job".to_string()),
            ..Default::default()
        });
        store.set_fail_jobs(true);

        // 设备 2 空闲，不触发作业写入；设备 1 的失败不应让整个周期退避
        orchestrator.poll_cycle(Instant::now()).await.unwrap();
        assert_eq!(orchestrator.active_count(), 2);
        assert!(store.telemetry(1).is_some());
        assert!(store.telemetry(2).is_some());

        // 存储恢复后设备 1 在下个周期补上作业
        store.set_fail_jobs(false);
        orchestrator.poll_cycle(Instant::now()).await.unwrap();
        assert_eq!(store.open_jobs(1).len(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_on_every_device_fails_cycle() {
        let (mut orchestrator, devices, store) = fleet(2, test_fleet_config()).await;
        for device in &devices {
            device.client.push_snapshot(StatusSnapshot {
                run_state: RunState::Running,
                file_name: Some("a.job".to_string()),
                ..Default::default()
            });
        }
        store.set_fail_jobs(true);

        assert!(orchestrator.poll_cycle(Instant::now()).await.is_err());
        assert_eq!(orchestrator.active_count(), 2);
        assert!(store.telemetry(1).is_some());
        assert!(store.telemetry(2).is_some());
    }

    #[tokio::test]
    async fn test_successful_reconnect_keeps_device_active() {
        let config = test_fleet_config();
        let (mut orchestrator, devices, store) = fleet(1, config.clone()).await;
        let device = &devices[0];
        device.client.push_snapshot(StatusSnapshot {
            run_state: RunState::Running,
            file_name: Some("a.job".to_string()),
            percentage: Some(20.0),
            remaining_minutes: Some(40),
            ..Default::default()
        });
        device.client.set_healthy(false);
        let connects = device.client.connect_calls();

        let start = Instant::now();
        for _ in 1..config.max_consecutive_failures {
            orchestrator.poll_cycle(start).await.unwrap();
            assert_eq!(orchestrator.active_count(), 1);
            assert!(store.telemetry(1).is_none());
        }

        // 达到阈值：重连成功，同一周期内继续取状态
        orchestrator.poll_cycle(start).await.unwrap();
        assert_eq!(device.client.connect_calls(), connects + 1);
        assert_eq!(orchestrator.active_count(), 1);
        assert!(!orchestrator.is_quarantined(1));
        assert_eq!(store.telemetry(1).unwrap().status, "RUNNING");
        assert_eq!(store.open_jobs(1).len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_at_startup_starts_quarantined() {
        let (tracker, store) = test_tracker();
        let mut orchestrator = FleetOrchestrator::new(store, test_fleet_config());
        let client = Arc::new(FakeClient::new());
        let probe = Arc::new(FakeProbe::new(false));
        orchestrator
            .admit(ConnectionSupervisor::new(
                test_printer(9),
                client.clone(),
                probe,
                tracker,
                test_fleet_config(),
            ))
            .await;

        assert!(orchestrator.is_quarantined(9));
        assert_eq!(client.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let (orchestrator, devices, _store) = fleet(1, test_fleet_config()).await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(orchestrator.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(devices[0].client.disconnect_calls() >= 1);
    }
}
