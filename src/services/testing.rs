//! 监管器与编排器测试用的脚本化假客户端

use crate::{
    config::FleetConfig,
    error::{AppError, AppResult},
    models::{Printer, RunState, StatusSnapshot},
    repositories::memory::MemoryStore,
    services::{JobLifecycleTracker, MaterialSnapshotEngine, PrinterClient, ReachabilityProbe},
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub fn test_printer(id: i32) -> Printer {
    Printer {
        id,
        name: format!("P1S-{:02}", id),
        ip: format!("10.0.0.{}", id),
        serial: format!("01P00A{:09}", id),
        access_code: "12345678".to_string(),
    }
}

/// 所有超时压到 1 秒以内的配置
pub fn test_fleet_config() -> FleetConfig {
    FleetConfig {
        poll_interval_secs: 1,
        quarantine_retry_interval_secs: 60,
        max_consecutive_failures: 3,
        probe_port: 8883,
        probe_timeout_ms: 100,
        connect_timeout_secs: 1,
        ready_timeout_secs: 1,
        ready_poll_interval_ms: 10,
        status_timeout_secs: 1,
        health_timeout_secs: 1,
        error_backoff_secs: 1,
        status_log_interval_secs: 300,
    }
}

pub fn test_tracker() -> (Arc<JobLifecycleTracker>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = MaterialSnapshotEngine::new(store.clone(), None);
    let tracker = JobLifecycleTracker::new(store.clone(), store.clone(), engine);
    (Arc::new(tracker), store)
}

pub struct FakeProbe {
    reachable: AtomicBool,
}

impl FakeProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, _host: &str) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// 状态读取会依次返回排队的快照，队列取空后重复最后一个
pub struct FakeClient {
    connected: AtomicBool,
    ready: AtomicBool,
    healthy: AtomicBool,
    fail_connect: AtomicBool,
    fail_status: AtomicBool,
    hang_status: AtomicBool,
    snapshots: Mutex<VecDeque<StatusSnapshot>>,
    last: Mutex<StatusSnapshot>,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            ready: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            fail_connect: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            hang_status: AtomicBool::new(false),
            snapshots: Mutex::new(VecDeque::new()),
            last: Mutex::new(StatusSnapshot {
                run_state: RunState::Idle,
                ..Default::default()
            }),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn set_hang_status(&self, hang: bool) {
        self.hang_status.store(hang, Ordering::SeqCst);
    }

    pub fn push_snapshot(&self, snapshot: StatusSnapshot) {
        self.snapshots.lock().unwrap().push_back(snapshot);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PrinterClient for FakeClient {
    async fn connect(&self) -> AppResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AppError::printer("握手被拒绝"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.ready.load(Ordering::SeqCst)
    }

    async fn current_state(&self) -> AppResult<RunState> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(AppError::printer("状态读取失败"));
        }
        Ok(self.last.lock().unwrap().run_state.clone())
    }

    async fn get_status_snapshot(&self) -> AppResult<StatusSnapshot> {
        if self.hang_status.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(AppError::printer("状态报文不完整"));
        }
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.snapshots.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}
