use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::task;
use utoipa::ToSchema;
use zip::ZipArchive;

/// 打印包中切片结果所在目录与前缀
const PLATE_PREFIX: &str = "Metadata/plate_";
const GCODE_EXTENSION: &str = ".gcode";

/// 打印文件的载荷位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PayloadLocation {
    /// `.3mf` 打印包内的切片条目
    Archive { entry: String },
    /// 文件本身就是 G-code
    Gcode,
}

/// 待下发打印文件
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PrintPayload {
    #[schema(value_type = String)]
    pub path: PathBuf,
    pub size: u64,
    pub location: PayloadLocation,
}

/// 检查打印文件并找到实际要执行的载荷
///
/// `.3mf` 取第一个 `Metadata/plate_*.gcode` 条目，`.gcode` 就是载荷本身，
/// 其他扩展名一律拒绝。
pub async fn locate_payload(path: &Path) -> AppResult<PrintPayload> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(AppError::file_not_found(path.display().to_string())),
    };

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let location = match extension.as_str() {
        "gcode" => PayloadLocation::Gcode,
        "3mf" => {
            let archive_path = path.to_path_buf();
            let entry = task::spawn_blocking(move || find_plate_entry(&archive_path))
                .await
                .map_err(|e| AppError::FileProcessing(format!("读取打印包任务失败: {}", e)))??;
            PayloadLocation::Archive { entry }
        }
        "" => return Err(AppError::unsupported_file_type("(无扩展名)")),
        other => return Err(AppError::unsupported_file_type(other)),
    };

    Ok(PrintPayload {
        path: path.to_path_buf(),
        size: metadata.len(),
        location,
    })
}

/// 按归档顺序找第一个切片条目（阻塞，在后台线程中运行）
fn find_plate_entry(path: &Path) -> AppResult<String> {
    let mut archive = ZipArchive::new(File::open(path)?)
        .map_err(|e| AppError::bad_request(format!("无效的3mf文件 {}: {}", path.display(), e)))?;

    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        let name = entry.name();
        if !entry.is_dir() && name.starts_with(PLATE_PREFIX) && name.ends_with(GCODE_EXTENSION) {
            return Ok(name.to_string());
        }
    }

    Err(AppError::bad_request(format!(
        "打印包中没有切片文件: {}",
        path.display()
    )))
}
