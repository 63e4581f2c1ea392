use super::PrinterStore;
use crate::{
    database::{Database, RetryPolicy, retry_transient},
    error::AppResult,
    models::{Printer, PrinterTelemetry},
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// 打印机表仓库
#[derive(Debug, Clone)]
pub struct PrinterRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PrinterRepository {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
            retry: *database.retry_policy(),
        }
    }
}

#[async_trait::async_trait]
impl PrinterStore for PrinterRepository {
    async fn load_production_printers(&self) -> AppResult<Vec<Printer>> {
        let query = r#"
            SELECT printer_id, printer_name, printer_ip, printer_bambu_id, access_code
            FROM printers
            WHERE in_production = true
            ORDER BY printer_id
        "#;

        let rows = retry_transient(&self.retry, "load_production_printers", || {
            sqlx::query(query).fetch_all(&self.pool)
        })
        .await?;

        let mut printers = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i32 = row.get("printer_id");
            let name: Option<String> = row.get("printer_name");
            let ip: Option<String> = row.get("printer_ip");
            let serial: Option<String> = row.get("printer_bambu_id");
            let access_code: Option<String> = row.get("access_code");

            match (ip, serial, access_code) {
                (Some(ip), Some(serial), Some(access_code))
                    if !ip.is_empty() && !serial.is_empty() && !access_code.is_empty() =>
                {
                    printers.push(Printer {
                        id,
                        name: name.unwrap_or_else(|| format!("printer-{}", id)),
                        ip,
                        serial,
                        access_code,
                    });
                }
                _ => {
                    tracing::warn!(printer_id = id, "打印机缺少地址、序列号或访问码，已跳过");
                }
            }
        }

        tracing::info!("已加载 {} 台投产打印机", printers.len());
        Ok(printers)
    }

    async fn update_telemetry(
        &self,
        printer_id: i32,
        telemetry: &PrinterTelemetry,
        polled_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let query = r#"
            UPDATE printers
            SET last_poll_status = $1,
                last_polled_at = $2,
                remaining_time = $3,
                current_print_job = $4,
                print_progress = $5
            WHERE printer_id = $6
        "#;

        retry_transient(&self.retry, "update_telemetry", || {
            sqlx::query(query)
                .bind(&telemetry.status)
                .bind(polled_at)
                .bind(telemetry.remaining_seconds)
                .bind(&telemetry.current_file)
                .bind(telemetry.progress)
                .bind(printer_id)
                .execute(&self.pool)
        })
        .await?;

        Ok(())
    }

    async fn log_status(
        &self,
        printer_id: i32,
        status: &str,
        logged_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let query = r#"
            INSERT INTO printer_status_logs (printer_id, status, logged_at)
            VALUES ($1, $2, $3)
        "#;

        retry_transient(&self.retry, "log_status", || {
            sqlx::query(query)
                .bind(printer_id)
                .bind(status)
                .bind(logged_at)
                .execute(&self.pool)
        })
        .await?;

        Ok(())
    }
}
