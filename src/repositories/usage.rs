use super::UsageLedger;
use crate::{
    database::{Database, RetryPolicy, retry_transient},
    error::AppResult,
    models::{MaterialDescriptor, MaterialUsageEntry, NewMaterialUsage, SlotPosition},
};
use sqlx::{PgPool, Row};

/// 作业耗材台账仓库（表 job_material_usage）
#[derive(Debug, Clone)]
pub struct MaterialUsageRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl MaterialUsageRepository {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
            retry: *database.retry_policy(),
        }
    }
}

#[async_trait::async_trait]
impl UsageLedger for MaterialUsageRepository {
    async fn has_entries(&self, job_id: i64) -> AppResult<bool> {
        let exists = retry_transient(&self.retry, "has_usage_entries", || {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM job_material_usage WHERE job_id = $1)",
            )
            .bind(job_id)
            .fetch_one(&self.pool)
        })
        .await?;

        Ok(exists)
    }

    async fn insert_entries(&self, job_id: i64, entries: &[NewMaterialUsage]) -> AppResult<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        let pool = &self.pool;

        let inserted = retry_transient(&self.retry, "insert_usage_entries", || async move {
            let mut tx = pool.begin().await?;
            for entry in entries {
                let material = &entry.material;
                sqlx::query(
                    r#"
                    INSERT INTO job_material_usage (
                        job_id, ams_unit, tray, is_external, material_type, color, vendor,
                        nozzle_temp_min, nozzle_temp_max, bed_temp, weight_grams, tray_uuid,
                        filament_id, catalog_name, is_primary, was_used
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                    "#,
                )
                .bind(job_id)
                .bind(entry.slot.unit())
                .bind(entry.slot.tray())
                .bind(entry.slot.is_external())
                .bind(&material.material_type)
                .bind(&material.color)
                .bind(&material.vendor)
                .bind(material.nozzle_temp_min)
                .bind(material.nozzle_temp_max)
                .bind(material.bed_temp)
                .bind(material.weight_grams)
                .bind(&material.tray_uuid)
                .bind(&material.filament_id)
                .bind(&material.catalog_name)
                .bind(entry.is_primary)
                .bind(entry.was_used)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(entries.len() as u64)
        })
        .await?;

        Ok(inserted)
    }

    async fn mark_used(&self, job_id: i64, slot: SlotPosition) -> AppResult<bool> {
        // 条件更新：已为 true 的行不会被再次写入
        let query = r#"
            UPDATE job_material_usage
            SET was_used = true
            WHERE job_id = $1
              AND ams_unit IS NOT DISTINCT FROM $2
              AND tray IS NOT DISTINCT FROM $3
              AND was_used = false
        "#;

        let result = retry_transient(&self.retry, "mark_material_used", || {
            sqlx::query(query)
                .bind(job_id)
                .bind(slot.unit())
                .bind(slot.tray())
                .execute(&self.pool)
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn entries_for_job(&self, job_id: i64) -> AppResult<Vec<MaterialUsageEntry>> {
        let query = r#"
            SELECT id::BIGINT AS id, job_id::BIGINT AS job_id, ams_unit, tray,
                   material_type, color, vendor, nozzle_temp_min, nozzle_temp_max, bed_temp,
                   weight_grams, tray_uuid, filament_id, catalog_name, is_primary, was_used
            FROM job_material_usage
            WHERE job_id = $1
            ORDER BY is_external, ams_unit, tray
        "#;

        let rows = retry_transient(&self.retry, "load_usage_entries", || {
            sqlx::query(query).bind(job_id).fetch_all(&self.pool)
        })
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let Some(slot) = SlotPosition::from_columns(row.get("ams_unit"), row.get("tray"))
                else {
                    tracing::warn!(job_id, "耗材台账中的料位坐标超出范围，已跳过");
                    return None;
                };
                Some(MaterialUsageEntry {
                    id: row.get("id"),
                    job_id: row.get("job_id"),
                    slot,
                    material: MaterialDescriptor {
                        material_type: row.get("material_type"),
                        color: row.get("color"),
                        vendor: row.get("vendor"),
                        nozzle_temp_min: row.get("nozzle_temp_min"),
                        nozzle_temp_max: row.get("nozzle_temp_max"),
                        bed_temp: row.get("bed_temp"),
                        weight_grams: row.get("weight_grams"),
                        tray_uuid: row.get("tray_uuid"),
                        filament_id: row.get("filament_id"),
                        catalog_name: row.get("catalog_name"),
                    },
                    is_primary: row.get("is_primary"),
                    was_used: row.get("was_used"),
                })
            })
            .collect())
    }
}
