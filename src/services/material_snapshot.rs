use crate::{
    error::AppResult,
    models::{NewMaterialUsage, StatusSnapshot},
    repositories::{MaterialCatalog, UsageLedger},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 耗材快照引擎
///
/// 作业开始（或重启后补录）时记录全部已装载料位，之后在每次 RUNNING 轮询中
/// 根据当前供料编码更新使用标记。
pub struct MaterialSnapshotEngine {
    ledger: Arc<dyn UsageLedger>,
    catalog: Option<Arc<dyn MaterialCatalog>>,
}

impl MaterialSnapshotEngine {
    pub fn new(ledger: Arc<dyn UsageLedger>, catalog: Option<Arc<dyn MaterialCatalog>>) -> Self {
        Self { ledger, catalog }
    }

    /// 由快照生成台账条目（参考目录补全之前）
    ///
    /// 主料位优先按当前供料料卷的 UUID 匹配，设备未上报时退回到解码后的供料料位；
    /// 使用标记只给解码结果所指的料位。
    pub fn build_entries(snapshot: &StatusSnapshot) -> Vec<NewMaterialUsage> {
        let active = snapshot.active_slot().position();
        let active_uuid = snapshot.active_material_uuid.as_deref();

        snapshot
            .materials
            .loaded()
            .map(|(slot, material)| {
                let is_primary = match active_uuid {
                    Some(uuid) => material.tray_uuid.as_deref() == Some(uuid),
                    None => active == Some(slot),
                };
                NewMaterialUsage {
                    slot,
                    material: material.clone(),
                    is_primary,
                    was_used: active == Some(slot),
                }
            })
            .collect()
    }

    /// 为作业记录全部已装载料位；台账已存在时不重复写入
    pub async fn capture(
        &self,
        printer_id: i32,
        job_id: i64,
        snapshot: &StatusSnapshot,
    ) -> AppResult<usize> {
        if self.ledger.has_entries(job_id).await? {
            debug!(printer_id, job_id, "作业已有耗材台账，跳过快照");
            return Ok(0);
        }

        let mut entries = Self::build_entries(snapshot);
        if entries.is_empty() {
            info!(printer_id, job_id, "未检测到已装载的耗材");
            return Ok(0);
        }

        if let Some(catalog) = &self.catalog {
            for entry in entries.iter_mut() {
                let Some(filament_id) = entry.material.filament_id.clone() else {
                    continue;
                };
                match catalog.lookup_material(&filament_id).await {
                    Ok(Some(profile)) => entry.material.enrich_with(&profile),
                    Ok(None) => debug!(filament_id = %filament_id, "参考目录中没有该耗材，使用原始字段"),
                    Err(e) => warn!(filament_id = %filament_id, error = %e, "查询参考目录失败，使用原始字段"),
                }
            }
        }

        self.ledger.insert_entries(job_id, &entries).await?;
        info!(
            printer_id,
            job_id,
            slots = entries.len(),
            "已记录作业耗材快照"
        );
        Ok(entries.len())
    }

    /// 根据当前供料编码标记料位已使用，只处理料盒料位
    pub async fn update_usage(&self, job_id: i64, snapshot: &StatusSnapshot) -> AppResult<bool> {
        let Some(slot) = snapshot.active_slot().holder_position() else {
            return Ok(false);
        };

        let changed = self.ledger.mark_used(job_id, slot).await?;
        if changed {
            info!(job_id, %slot, "料位首次被使用");
        }
        Ok(changed)
    }
}
