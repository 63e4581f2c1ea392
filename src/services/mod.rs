// 服务层模块
pub mod connection_supervisor;
pub mod fleet_orchestrator;
pub mod job_tracker;
pub mod material_snapshot;
pub mod printer_client;
pub mod profile_fetcher;
pub mod reachability;

#[cfg(test)]
pub mod testing;

pub use connection_supervisor::ConnectionSupervisor;
pub use fleet_orchestrator::{FleetHealth, FleetOrchestrator};
pub use job_tracker::{
    JobLifecycleTracker, JobTiming, TrackerState, Transition, detect_transition, estimate_timing,
};
pub use material_snapshot::MaterialSnapshotEngine;
pub use printer_client::{BridgeClient, PrinterClient, build_http_client, parse_report};
pub use profile_fetcher::{ProfileFetcher, infer_material_type, parse_profile};
pub use reachability::{ReachabilityProbe, TcpProbe};
