use super::JobStore;
use crate::{
    database::{Database, RetryPolicy, retry_transient},
    error::AppResult,
    models::{JobRecord, NewJobRecord},
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// 作业记录的查询列，总时长以秒为单位读出
const JOB_COLUMNS: &str = r#"
    id::BIGINT AS id,
    printer_id,
    filename,
    start_time,
    EXTRACT(EPOCH FROM total_print_time)::BIGINT AS total_seconds,
    end_time,
    status
"#;

/// 作业历史仓库
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl JobRepository {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
            retry: *database.retry_policy(),
        }
    }
}

#[async_trait::async_trait]
impl JobStore for JobRepository {
    async fn find_open_job(
        &self,
        printer_id: i32,
        filename: &str,
    ) -> AppResult<Option<JobRecord>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM printer_job_history
            WHERE printer_id = $1 AND filename = $2 AND end_time IS NULL
            ORDER BY start_time DESC
            LIMIT 1
            "#
        );

        let job = retry_transient(&self.retry, "find_open_job", || {
            sqlx::query_as::<_, JobRecord>(&query)
                .bind(printer_id)
                .bind(filename)
                .fetch_optional(&self.pool)
        })
        .await?;

        Ok(job)
    }

    async fn latest_open_job(&self, printer_id: i32) -> AppResult<Option<JobRecord>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM printer_job_history
            WHERE printer_id = $1 AND end_time IS NULL
            ORDER BY start_time DESC
            LIMIT 1
            "#
        );

        let job = retry_transient(&self.retry, "latest_open_job", || {
            sqlx::query_as::<_, JobRecord>(&query)
                .bind(printer_id)
                .fetch_optional(&self.pool)
        })
        .await?;

        Ok(job)
    }

    async fn insert_job(&self, job: &NewJobRecord) -> AppResult<JobRecord> {
        let query = format!(
            r#"
            INSERT INTO printer_job_history (printer_id, filename, start_time, status, total_print_time)
            VALUES ($1, $2, $3, 'RUNNING', $4::BIGINT * INTERVAL '1 second')
            RETURNING {JOB_COLUMNS}
            "#
        );

        let record = retry_transient(&self.retry, "insert_job", || {
            sqlx::query_as::<_, JobRecord>(&query)
                .bind(job.printer_id)
                .bind(&job.filename)
                .bind(job.start_time)
                .bind(job.total_seconds)
                .fetch_one(&self.pool)
        })
        .await?;

        Ok(record)
    }

    async fn close_open_job(
        &self,
        printer_id: i32,
        filename: &str,
        end_time: DateTime<Utc>,
        status: &str,
    ) -> AppResult<Option<i64>> {
        let query = r#"
            UPDATE printer_job_history
            SET end_time = $3, status = $4
            WHERE id = (
                SELECT id FROM printer_job_history
                WHERE printer_id = $1 AND filename = $2 AND end_time IS NULL
                ORDER BY start_time DESC
                LIMIT 1
            )
            RETURNING id::BIGINT AS id
        "#;

        let closed = retry_transient(&self.retry, "close_open_job", || {
            sqlx::query_scalar::<_, i64>(query)
                .bind(printer_id)
                .bind(filename)
                .bind(end_time)
                .bind(status)
                .fetch_optional(&self.pool)
        })
        .await?;

        Ok(closed)
    }

    async fn close_other_open_jobs(
        &self,
        printer_id: i32,
        keep_filename: &str,
        end_time: DateTime<Utc>,
        status: &str,
    ) -> AppResult<u64> {
        let query = r#"
            UPDATE printer_job_history
            SET end_time = $3, status = $4
            WHERE printer_id = $1 AND filename <> $2 AND end_time IS NULL
        "#;

        let result = retry_transient(&self.retry, "close_other_open_jobs", || {
            sqlx::query(query)
                .bind(printer_id)
                .bind(keep_filename)
                .bind(end_time)
                .bind(status)
                .execute(&self.pool)
        })
        .await?;

        Ok(result.rows_affected())
    }

    async fn record_completion_stock(
        &self,
        printer_id: i32,
        filename: &str,
        completed_at: DateTime<Utc>,
    ) -> AppResult<u64> {
        let pool = &self.pool;

        let inserted = retry_transient(&self.retry, "record_completion_stock", || async move {
            let mut tx = pool.begin().await?;

            let items = sqlx::query(
                r#"
                SELECT pfm.item_id::BIGINT AS item_id, pfm.quantity::INT AS quantity
                FROM printer_file_models pfm
                JOIN printer_files pf ON pfm.printer_file_id = pf.id
                WHERE pf.filename = $1
                "#,
            )
            .bind(filename)
            .fetch_all(&mut *tx)
            .await?;

            if items.is_empty() {
                tracing::warn!(printer_id, filename, "文件未关联任何成品，跳过入库登记");
                return Ok(0);
            }

            let notes = format!("Print completed on printer ID {}", printer_id);
            let mut inserted = 0u64;
            for row in items {
                let item_id: Option<i64> = row.get("item_id");
                let quantity: Option<i32> = row.get("quantity");
                let (Some(item_id), Some(quantity)) = (item_id, quantity) else {
                    tracing::warn!(printer_id, filename, "成品关联缺少 item_id 或数量，已跳过");
                    continue;
                };

                sqlx::query(
                    r#"
                    INSERT INTO stock_transactions
                        (item_id, quantity, transaction_type, transaction_date, notes)
                    VALUES ($1, $2, 'PRINT_COMPLETE', $3, $4)
                    "#,
                )
                .bind(item_id)
                .bind(quantity)
                .bind(completed_at)
                .bind(&notes)
                .execute(&mut *tx)
                .await?;
                inserted += 1;
            }

            tx.commit().await?;
            Ok(inserted)
        })
        .await?;

        if inserted > 0 {
            tracing::info!(printer_id, filename, items = inserted, "成品入库登记完成");
        }
        Ok(inserted)
    }
}
