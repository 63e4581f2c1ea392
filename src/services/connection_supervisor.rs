use crate::{
    config::FleetConfig,
    error::{AppError, AppResult},
    models::{ConnectionState, Printer, PrinterHealth, StatusSnapshot},
    services::{
        JobLifecycleTracker, PrinterClient, ReachabilityProbe, TrackerState, Transition,
    },
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// 单台打印机的连接监管器
///
/// 独占持有该打印机的连接状态、失败计数与作业追踪记忆，其他组件只能通过这里的方法改变它们。
pub struct ConnectionSupervisor {
    printer: Printer,
    client: Arc<dyn PrinterClient>,
    probe: Arc<dyn ReachabilityProbe>,
    tracker: Arc<JobLifecycleTracker>,
    config: FleetConfig,
    state: ConnectionState,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    job_state: TrackerState,
    last_status_log: Option<Instant>,
}

impl ConnectionSupervisor {
    pub fn new(
        printer: Printer,
        client: Arc<dyn PrinterClient>,
        probe: Arc<dyn ReachabilityProbe>,
        tracker: Arc<JobLifecycleTracker>,
        config: FleetConfig,
    ) -> Self {
        Self {
            printer,
            client,
            probe,
            tracker,
            config,
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            last_success: None,
            job_state: TrackerState::default(),
            last_status_log: None,
        }
    }

    pub fn printer(&self) -> &Printer {
        &self.printer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn job_state(&self) -> &TrackerState {
        &self.job_state
    }

    /// 连续失败是否已达到隔离阈值
    pub fn should_quarantine(&self) -> bool {
        self.consecutive_failures >= self.config.max_consecutive_failures
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(
                printer_id = self.printer.id,
                from = %self.state,
                to = %next,
                "连接状态变化"
            );
            self.state = next;
        }
    }

    /// 拆除协议会话，客户端无响应时不会无限等待
    async fn teardown(&mut self, next: ConnectionState) {
        if timeout(self.config.health_timeout(), self.client.disconnect())
            .await
            .is_err()
        {
            warn!(printer_id = self.printer.id, "断开连接超时");
        }
        self.set_state(next);
    }

    /// 建立连接：可达性探测 → 协议握手 → 等待就绪 → 作业对账
    ///
    /// 失败只返回 `false` 并记录日志，不向外抛出错误。
    pub async fn connect(&mut self) -> bool {
        let printer_id = self.printer.id;

        if !self.probe.probe(&self.printer.ip).await {
            warn!(printer_id, ip = %self.printer.ip, "打印机不可达，跳过连接");
            self.set_state(ConnectionState::Disconnected);
            return false;
        }

        self.set_state(ConnectionState::Connecting);

        match timeout(self.config.connect_timeout(), self.client.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(printer_id, error = %e, "协议连接失败");
                self.teardown(ConnectionState::Disconnected).await;
                return false;
            }
            Err(_) => {
                let e = AppError::timeout(format!(
                    "协议连接超过 {} 秒",
                    self.config.connect_timeout_secs
                ));
                warn!(printer_id, error = %e, "协议连接失败");
                self.teardown(ConnectionState::Disconnected).await;
                return false;
            }
        }

        let client = Arc::clone(&self.client);
        let interval = self.config.ready_poll_interval();
        let wait_ready = async move {
            loop {
                if client.is_ready().await {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        };
        if timeout(self.config.ready_timeout(), wait_ready).await.is_err() {
            warn!(
                printer_id,
                timeout_secs = self.config.ready_timeout_secs,
                "等待客户端就绪超时"
            );
            self.teardown(ConnectionState::Disconnected).await;
            return false;
        }

        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.set_state(ConnectionState::Connected);
        info!(printer_id, name = %self.printer.name, "打印机已连接");

        if let Err(e) = self.tracker.reconcile(printer_id, &mut self.job_state).await {
            warn!(printer_id, error = %e, "启动作业对账失败");
        }
        true
    }

    /// 轻量健康检查：会话存活、已就绪、能读出运行状态
    pub async fn check_health(&mut self) -> bool {
        let client = Arc::clone(&self.client);
        let probe = async move {
            client.is_connected().await && client.is_ready().await && client.current_state().await.is_ok()
        };
        let healthy = timeout(self.config.health_timeout(), probe)
            .await
            .unwrap_or(false);

        if healthy {
            self.consecutive_failures = 0;
            self.last_success = Some(Utc::now());
            if self.state == ConnectionState::Degraded {
                info!(printer_id = self.printer.id, "打印机恢复正常");
            }
            self.set_state(ConnectionState::Connected);
            return true;
        }

        self.consecutive_failures += 1;
        warn!(
            printer_id = self.printer.id,
            failures = self.consecutive_failures,
            threshold = self.config.max_consecutive_failures,
            "健康检查失败"
        );

        if self.should_quarantine() {
            error!(printer_id = self.printer.id, "连续失败达到阈值，断开连接");
            self.teardown(ConnectionState::Unreachable).await;
        } else if self.state.has_session() {
            self.set_state(ConnectionState::Degraded);
        }
        false
    }

    /// 带硬超时的完整状态读取
    ///
    /// 读取在独立任务中执行，超时后任务被中止，调用方最多等待 `status_timeout`。
    pub async fn get_status_safe(&mut self) -> Option<StatusSnapshot> {
        let client = Arc::clone(&self.client);
        let mut handle = tokio::spawn(async move { client.get_status_snapshot().await });

        let failure = match timeout(self.config.status_timeout(), &mut handle).await {
            Ok(Ok(Ok(snapshot))) => {
                self.consecutive_failures = 0;
                self.last_success = Some(Utc::now());
                return Some(snapshot);
            }
            Ok(Ok(Err(e))) => e,
            Ok(Err(join_error)) => AppError::printer(format!("状态读取任务异常退出: {}", join_error)),
            Err(_) => {
                handle.abort();
                AppError::timeout(format!("状态读取超过 {} 秒", self.config.status_timeout_secs))
            }
        };

        self.consecutive_failures += 1;
        warn!(
            printer_id = self.printer.id,
            failures = self.consecutive_failures,
            timed_out = matches!(failure, AppError::Timeout(_)),
            error = %failure,
            "本周期未取得状态"
        );

        if self.should_quarantine() {
            error!(printer_id = self.printer.id, "状态读取连续失败，断开连接");
            self.teardown(ConnectionState::Disconnected).await;
        }
        None
    }

    /// 把快照交给作业追踪器
    pub async fn observe(
        &mut self,
        snapshot: &StatusSnapshot,
        now: DateTime<Utc>,
    ) -> AppResult<Transition> {
        self.tracker
            .observe(self.printer.id, &mut self.job_state, snapshot, now)
            .await
    }

    /// 状态日志是否到了写入时间；返回 true 时同时记下本次时间
    pub fn status_log_due(&mut self, now: Instant) -> bool {
        let due = self
            .last_status_log
            .is_none_or(|last| now.duration_since(last) >= self.config.status_log_interval());
        if due {
            self.last_status_log = Some(now);
        }
        due
    }

    /// 断开连接，任何状态下都可调用
    pub async fn disconnect(&mut self) {
        self.teardown(ConnectionState::Disconnected).await;
    }

    pub fn health(&self, quarantined: bool) -> PrinterHealth {
        PrinterHealth {
            printer_id: self.printer.id,
            printer_name: self.printer.name.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_success: self.last_success,
            quarantined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::RunState,
        services::testing::{FakeClient, FakeProbe, test_fleet_config, test_printer, test_tracker},
    };
    use std::time::Duration;

    fn supervisor(client: &Arc<FakeClient>, probe: &Arc<FakeProbe>) -> ConnectionSupervisor {
        let (tracker, _store) = test_tracker();
        ConnectionSupervisor::new(
            test_printer(1),
            client.clone(),
            probe.clone(),
            tracker,
            test_fleet_config(),
        )
    }

    #[tokio::test]
    async fn test_unreachable_device_skips_handshake() {
        let client = Arc::new(FakeClient::new());
        let probe = Arc::new(FakeProbe::new(false));
        let mut sup = supervisor(&client, &probe);

        assert!(!sup.connect().await);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(client.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_connect_success_resets_failures() {
        let client = Arc::new(FakeClient::new());
        let probe = Arc::new(FakeProbe::new(true));
        let mut sup = supervisor(&client, &probe);

        assert!(sup.connect().await);
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(sup.consecutive_failures(), 0);
        assert!(sup.last_success().is_some());
    }

    #[tokio::test]
    async fn test_ready_timeout_tears_down() {
        let client = Arc::new(FakeClient::new());
        client.set_ready(false);
        let probe = Arc::new(FakeProbe::new(true));
        let mut sup = supervisor(&client, &probe);

        assert!(!sup.connect().await);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(client.disconnect_calls() >= 1);
    }

    #[tokio::test]
    async fn test_health_degrades_then_becomes_unreachable() {
        let client = Arc::new(FakeClient::new());
        let probe = Arc::new(FakeProbe::new(true));
        let mut sup = supervisor(&client, &probe);
        assert!(sup.connect().await);

        client.set_healthy(false);
        assert!(!sup.check_health().await);
        assert_eq!(sup.state(), ConnectionState::Degraded);

        client.set_healthy(true);
        assert!(sup.check_health().await);
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(sup.consecutive_failures(), 0);

        client.set_healthy(false);
        for _ in 0..test_fleet_config().max_consecutive_failures {
            sup.check_health().await;
        }
        assert_eq!(sup.state(), ConnectionState::Unreachable);
        assert!(sup.should_quarantine());
        assert!(client.disconnect_calls() >= 1);
    }

    #[tokio::test]
    async fn test_hanging_status_read_times_out() {
        let client = Arc::new(FakeClient::new());
        let probe = Arc::new(FakeProbe::new(true));
        let mut sup = supervisor(&client, &probe);
        assert!(sup.connect().await);

        client.set_hang_status(true);
        let started = Instant::now();
        assert!(sup.get_status_safe().await.is_none());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(sup.consecutive_failures(), 1);

        client.set_hang_status(false);
        client.push_snapshot(StatusSnapshot {
            run_state: RunState::Idle,
            ..Default::default()
        });
        let snapshot = sup.get_status_safe().await.unwrap();
        assert_eq!(snapshot.run_state, RunState::Idle);
        assert_eq!(sup.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_repeated_status_failures_disconnect() {
        let client = Arc::new(FakeClient::new());
        let probe = Arc::new(FakeProbe::new(true));
        let mut sup = supervisor(&client, &probe);
        assert!(sup.connect().await);

        client.set_fail_status(true);
        for _ in 0..test_fleet_config().max_consecutive_failures {
            assert!(sup.get_status_safe().await.is_none());
        }
        assert!(sup.should_quarantine());
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = Arc::new(FakeClient::new());
        let probe = Arc::new(FakeProbe::new(true));
        let mut sup = supervisor(&client, &probe);

        sup.disconnect().await;
        sup.disconnect().await;
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_status_log_interval() {
        let client = Arc::new(FakeClient::new());
        let probe = Arc::new(FakeProbe::new(true));
        let mut sup = supervisor(&client, &probe);
        let now = Instant::now();

        assert!(sup.status_log_due(now));
        assert!(!sup.status_log_due(now + Duration::from_secs(1)));
        assert!(sup.status_log_due(now + test_fleet_config().status_log_interval()));
    }
}
