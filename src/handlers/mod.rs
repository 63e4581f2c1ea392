pub mod health;
pub mod print_job;

pub use health::{db_health_check, health_check, printers_health};
pub use print_job::create_print_job;

use crate::{config::Config, database::Database, models::Printer, services::FleetHealth};
use std::sync::Arc;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub database: Option<Database>,
    /// 启动时加载的生产打印机
    pub printers: Arc<Vec<Printer>>,
    pub fleet_health: FleetHealth,
    pub config: Config,
}

impl AppState {
    pub fn find_printer(&self, printer_id: i32) -> Option<&Printer> {
        self.printers.iter().find(|p| p.id == printer_id)
    }
}
