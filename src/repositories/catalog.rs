use super::MaterialCatalog;
use crate::{
    database::{Database, RetryPolicy, retry_transient},
    error::AppResult,
    models::FilamentProfile,
};
use sqlx::PgPool;

/// 耗材参考目录仓库（表 bambu_filament_profiles）
#[derive(Debug, Clone)]
pub struct FilamentProfileRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl FilamentProfileRepository {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
            retry: *database.retry_policy(),
        }
    }

    /// 按 filament_id 批量插入或更新配置，整批在一个事务中完成
    pub async fn upsert_profiles(&self, profiles: &[FilamentProfile]) -> AppResult<u64> {
        if profiles.is_empty() {
            return Ok(0);
        }
        let pool = &self.pool;

        let written = retry_transient(&self.retry, "upsert_filament_profiles", || async move {
            let mut tx = pool.begin().await?;
            for profile in profiles {
                sqlx::query(
                    r#"
                    INSERT INTO bambu_filament_profiles (
                        filename, name, filament_id, type, inherits, from_source, vendor, cost, density,
                        flow_ratio, material_type, nozzle_temp_min, nozzle_temp_max, bed_temp, bed_temp_initial,
                        impact_strength_z, diameter, retraction_length, retraction_speed, print_speed,
                        start_gcode, end_gcode, raw_json
                    ) VALUES (
                        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                        $19, $20, $21, $22, $23
                    )
                    ON CONFLICT (filament_id) DO UPDATE SET
                        filename = EXCLUDED.filename,
                        name = EXCLUDED.name,
                        type = EXCLUDED.type,
                        inherits = EXCLUDED.inherits,
                        from_source = EXCLUDED.from_source,
                        vendor = EXCLUDED.vendor,
                        cost = EXCLUDED.cost,
                        density = EXCLUDED.density,
                        flow_ratio = EXCLUDED.flow_ratio,
                        material_type = EXCLUDED.material_type,
                        nozzle_temp_min = EXCLUDED.nozzle_temp_min,
                        nozzle_temp_max = EXCLUDED.nozzle_temp_max,
                        bed_temp = EXCLUDED.bed_temp,
                        bed_temp_initial = EXCLUDED.bed_temp_initial,
                        impact_strength_z = EXCLUDED.impact_strength_z,
                        diameter = EXCLUDED.diameter,
                        retraction_length = EXCLUDED.retraction_length,
                        retraction_speed = EXCLUDED.retraction_speed,
                        print_speed = EXCLUDED.print_speed,
                        start_gcode = EXCLUDED.start_gcode,
                        end_gcode = EXCLUDED.end_gcode,
                        raw_json = EXCLUDED.raw_json,
                        updated_at = CURRENT_TIMESTAMP
                    "#,
                )
                .bind(&profile.filename)
                .bind(&profile.name)
                .bind(&profile.filament_id)
                .bind(&profile.profile_type)
                .bind(&profile.inherits)
                .bind(&profile.from_source)
                .bind(&profile.vendor)
                .bind(profile.cost)
                .bind(profile.density)
                .bind(profile.flow_ratio)
                .bind(&profile.material_type)
                .bind(profile.nozzle_temp_min)
                .bind(profile.nozzle_temp_max)
                .bind(profile.bed_temp)
                .bind(profile.bed_temp_initial)
                .bind(profile.impact_strength_z)
                .bind(profile.diameter)
                .bind(profile.retraction_length)
                .bind(profile.retraction_speed)
                .bind(profile.print_speed)
                .bind(&profile.start_gcode)
                .bind(&profile.end_gcode)
                .bind(&profile.raw_json)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(profiles.len() as u64)
        })
        .await?;

        tracing::info!("已写入 {} 条耗材配置", written);
        Ok(written)
    }
}

#[async_trait::async_trait]
impl MaterialCatalog for FilamentProfileRepository {
    async fn lookup_material(&self, filament_id: &str) -> AppResult<Option<FilamentProfile>> {
        let query = r#"
            SELECT filename, name, filament_id, type, inherits, from_source, vendor,
                   cost::FLOAT8 AS cost, density::FLOAT8 AS density,
                   flow_ratio::FLOAT8 AS flow_ratio, material_type,
                   nozzle_temp_min, nozzle_temp_max, bed_temp, bed_temp_initial,
                   impact_strength_z::FLOAT8 AS impact_strength_z, diameter::FLOAT8 AS diameter,
                   retraction_length::FLOAT8 AS retraction_length,
                   retraction_speed::FLOAT8 AS retraction_speed,
                   print_speed::FLOAT8 AS print_speed,
                   start_gcode, end_gcode, raw_json::JSONB AS raw_json
            FROM bambu_filament_profiles
            WHERE filament_id = $1
        "#;

        let profile = retry_transient(&self.retry, "lookup_material", || {
            sqlx::query_as::<_, FilamentProfile>(query)
                .bind(filament_id)
                .fetch_optional(&self.pool)
        })
        .await?;

        Ok(profile)
    }
}
