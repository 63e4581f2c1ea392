use crate::{
    config::BridgeConfig,
    error::{AppError, AppResult},
    models::{
        MAX_REMAINING_MINUTES, MaterialDescriptor, MaterialGrid, Printer, RunState, SlotPosition,
        StatusSnapshot, deserialize_lenient_f64, deserialize_lenient_i64, deserialize_lenient_string,
        normalize_color,
    },
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 打印机状态客户端
///
/// 每台打印机一个实例，由对应的连接监管器独占使用。
#[async_trait::async_trait]
pub trait PrinterClient: Send + Sync {
    /// 建立协议会话
    async fn connect(&self) -> AppResult<()>;

    /// 会话是否存活
    async fn is_connected(&self) -> bool;

    /// 会话是否已收到完整的初始状态
    async fn is_ready(&self) -> bool;

    /// 读取运行状态（仅一个字段，用于健康检查）
    async fn current_state(&self) -> AppResult<RunState>;

    /// 读取完整状态快照
    async fn get_status_snapshot(&self) -> AppResult<StatusSnapshot>;

    /// 断开会话，可重复调用
    async fn disconnect(&self);
}

/// 创建访问桥接服务的HTTP客户端
pub fn build_http_client(config: &BridgeConfig) -> AppResult<Client> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| AppError::config(format!("创建HTTP客户端失败: {}", e)))
}

/// 通过本地状态桥接服务访问打印机
///
/// 桥接服务持有设备的协议会话，本客户端只负责会话管理请求与结构化状态读取。
#[derive(Debug, Clone)]
pub struct BridgeClient {
    client: Client,
    config: BridgeConfig,
    printer: Printer,
}

/// 建立会话请求
#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    ip: &'a str,
    serial: &'a str,
    access_code: &'a str,
}

/// 会话状态
#[derive(Debug, Default, Deserialize)]
struct SessionStatus {
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    ready: bool,
}

/// 运行状态
#[derive(Debug, Deserialize)]
struct StatePayload {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    gcode_state: Option<String>,
}

impl BridgeClient {
    pub fn new(client: Client, config: BridgeConfig, printer: Printer) -> Self {
        Self {
            client,
            config,
            printer,
        }
    }

    fn url(&self, suffix: &str) -> String {
        self.config
            .get_api_url(&format!("printers/{}/{}", self.printer.serial, suffix))
    }

    async fn session_status(&self) -> AppResult<SessionStatus> {
        let response = self
            .client
            .get(self.url("session"))
            .send()
            .await
            .map_err(|e| AppError::printer(format!("查询会话状态失败: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::printer(format!(
                "会话状态查询返回错误: {}",
                response.status()
            )));
        }

        response
            .json::<SessionStatus>()
            .await
            .map_err(|e| AppError::printer(format!("解析会话状态失败: {}", e)))
    }

    async fn get_text(&self, suffix: &str) -> AppResult<String> {
        let response = self
            .client
            .get(self.url(suffix))
            .send()
            .await
            .map_err(|e| AppError::printer(format!("请求 {} 失败: {}", suffix, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::printer(format!("读取 {} 响应失败: {}", suffix, e)))?;

        if !status.is_success() {
            return Err(AppError::printer(format!(
                "{} 返回错误 {}: {}",
                suffix, status, text
            )));
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl PrinterClient for BridgeClient {
    async fn connect(&self) -> AppResult<()> {
        let request = SessionRequest {
            ip: &self.printer.ip,
            serial: &self.printer.serial,
            access_code: &self.printer.access_code,
        };

        let response = self
            .client
            .post(self.url("session"))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::printer(format!("建立会话失败: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::printer(format!(
                "建立会话返回错误 {}: {}",
                status, text
            )));
        }

        debug!(printer_id = self.printer.id, "桥接会话已建立");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session_status()
            .await
            .map(|s| s.connected)
            .unwrap_or(false)
    }

    async fn is_ready(&self) -> bool {
        self.session_status()
            .await
            .map(|s| s.connected && s.ready)
            .unwrap_or(false)
    }

    async fn current_state(&self) -> AppResult<RunState> {
        let text = self.get_text("state").await?;
        let payload: StatePayload = serde_json::from_str(&text)?;
        let state = payload.gcode_state.unwrap_or_default();
        Ok(state.parse().unwrap_or_default())
    }

    async fn get_status_snapshot(&self) -> AppResult<StatusSnapshot> {
        let text = self.get_text("report").await?;
        parse_report(&text)
    }

    async fn disconnect(&self) {
        match self.client.delete(self.url("session")).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(printer_id = self.printer.id, "桥接会话已断开");
            }
            Ok(response) => {
                debug!(printer_id = self.printer.id, status = %response.status(), "断开会话返回非成功状态");
            }
            Err(e) => {
                warn!(printer_id = self.printer.id, error = %e, "断开会话失败");
            }
        }
    }
}

/// 设备上报的原始状态报文
///
/// 字段类型不稳定，全部走宽松解析。
#[derive(Debug, Default, Deserialize)]
struct ReportPayload {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    gcode_state: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    mc_percent: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    gcode_file: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    subtask_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    layer_num: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    total_layer_num: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    bed_temper: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    nozzle_temper: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    mc_remaining_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_object")]
    ams: Option<AmsPayload>,
    #[serde(default, deserialize_with = "lenient_object")]
    vt_tray: Option<TrayPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct AmsPayload {
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    tray_now: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    active_tray_uuid: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    ams: Vec<AmsUnitPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct AmsUnitPayload {
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_list")]
    tray: Vec<TrayPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct TrayPayload {
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    id: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    tray_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    tray_color: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    tray_sub_brands: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    tray_weight: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    nozzle_temp_min: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    nozzle_temp_max: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_i64")]
    bed_temp: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    tray_uuid: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    tray_info_idx: Option<String>,
}

impl From<TrayPayload> for MaterialDescriptor {
    fn from(tray: TrayPayload) -> Self {
        // 全零的 UUID 表示料卷没有芯片
        let tray_uuid = tray
            .tray_uuid
            .filter(|uuid| !uuid.chars().all(|c| c == '0'));
        MaterialDescriptor {
            material_type: tray.tray_type,
            color: tray.tray_color.map(|c| normalize_color(&c)),
            vendor: tray.tray_sub_brands,
            nozzle_temp_min: tray.nozzle_temp_min.and_then(|t| i32::try_from(t).ok()),
            nozzle_temp_max: tray.nozzle_temp_max.and_then(|t| i32::try_from(t).ok()),
            bed_temp: tray.bed_temp.and_then(|t| i32::try_from(t).ok()),
            weight_grams: tray.tray_weight,
            tray_uuid,
            filament_id: tray.tray_info_idx,
            catalog_name: None,
        }
    }
}

/// 嵌套对象格式不对时视为缺失
fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

/// 列表中格式不对的元素被丢弃
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter(|item| item.is_object())
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// 将状态报文解析为严格的状态快照
///
/// 只有报文不是JSON对象时才返回错误，单个字段缺失或非法一律视为 `None`。
pub fn parse_report(text: &str) -> AppResult<StatusSnapshot> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(AppError::printer("状态报文不是JSON对象"));
    }
    let payload: ReportPayload = serde_json::from_value(value)?;

    let mut materials = MaterialGrid::new();
    let mut active_slot_code = None;
    let mut active_material_uuid = None;

    if let Some(ams) = payload.ams {
        active_slot_code = ams.tray_now.and_then(|code| i32::try_from(code).ok());
        active_material_uuid = ams.active_tray_uuid;
        for unit in ams.ams {
            let Some(unit_id) = unit.id.and_then(|id| u8::try_from(id).ok()) else {
                continue;
            };
            for tray in unit.tray {
                let Some(tray_id) = tray.id.and_then(|id| u8::try_from(id).ok()) else {
                    continue;
                };
                let slot = SlotPosition::Holder {
                    unit: unit_id,
                    tray: tray_id,
                };
                if !materials.set(slot, tray.into()) {
                    debug!(%slot, "料位坐标超出范围，已忽略");
                }
            }
        }
    }

    if let Some(vt_tray) = payload.vt_tray {
        materials.set(SlotPosition::External, vt_tray.into());
    }

    Ok(StatusSnapshot {
        run_state: payload
            .gcode_state
            .map(|s| s.parse().unwrap_or_default())
            .unwrap_or_default(),
        percentage: payload.mc_percent,
        file_name: payload.gcode_file.or(payload.subtask_name),
        layer_num: payload.layer_num,
        total_layers: payload.total_layer_num,
        bed_temp: payload.bed_temper,
        nozzle_temp: payload.nozzle_temper,
        remaining_minutes: payload
            .mc_remaining_time
            .filter(|m| (0..=MAX_REMAINING_MINUTES).contains(m)),
        active_slot_code,
        active_material_uuid,
        materials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActiveSlot;

    #[test]
    fn test_parse_full_report() {
        let text = r#"{
            "gcode_state": "RUNNING",
            "mc_percent": "50",
            "gcode_file": "benchy.gcode",
            "layer_num": 12,
            "total_layer_num": "240",
            "bed_temper": 60.5,
            "nozzle_temper": "219.8",
            "mc_remaining_time": 30,
            "ams": {
                "tray_now": "5",
                "ams": [
                    {"id": "0", "tray": [{"id": "0", "tray_type": "PLA", "tray_color": "FF6A13FF"}]},
                    {"id": "1", "tray": [
                        {"id": "1", "tray_type": "PETG", "tray_color": "00AE42FF",
                         "tray_sub_brands": "PETG HF", "tray_weight": "1000",
                         "nozzle_temp_min": "230", "nozzle_temp_max": "260",
                         "tray_uuid": "A1B2", "tray_info_idx": "GFG02"}
                    ]}
                ]
            },
            "vt_tray": {"id": "254", "tray_type": "", "tray_color": "N/A"}
        }"#;

        let snapshot = parse_report(text).unwrap();
        assert_eq!(snapshot.run_state, RunState::Running);
        assert_eq!(snapshot.percentage, Some(50.0));
        assert_eq!(snapshot.total_layers, Some(240));
        assert_eq!(snapshot.nozzle_temp, Some(219.8));
        assert_eq!(
            snapshot.active_slot(),
            ActiveSlot::Slot(SlotPosition::Holder { unit: 1, tray: 1 })
        );

        let petg = snapshot
            .materials
            .get(SlotPosition::Holder { unit: 1, tray: 1 })
            .unwrap();
        assert_eq!(petg.color.as_deref(), Some("00AE42"));
        assert_eq!(petg.nozzle_temp_min, Some(230));
        assert_eq!(petg.weight_grams, Some(1000.0));
        assert_eq!(petg.filament_id.as_deref(), Some("GFG02"));

        // 外挂料架为空，不算已装载
        let loaded: Vec<_> = snapshot.materials.loaded().map(|(slot, _)| slot).collect();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_parse_report_tolerates_garbage_fields() {
        let text = r#"{
            "gcode_state": 7,
            "mc_percent": "N/A",
            "mc_remaining_time": null,
            "ams": "broken",
            "vt_tray": [1, 2, 3]
        }"#;

        let snapshot = parse_report(text).unwrap();
        assert_eq!(snapshot.run_state, RunState::Unknown("7".to_string()));
        assert_eq!(snapshot.percentage, None);
        assert_eq!(snapshot.remaining_minutes, None);
        assert_eq!(snapshot.active_slot_code, None);
        assert!(snapshot.materials.is_empty());
    }

    #[test]
    fn test_parse_report_drops_out_of_range_numbers() {
        let snapshot = parse_report(r#"{"mc_remaining_time": 1e30}"#).unwrap();
        assert_eq!(snapshot.remaining_minutes, None);
        assert_eq!(snapshot.telemetry().remaining_seconds, None);

        let snapshot = parse_report(r#"{"mc_remaining_time": -5}"#).unwrap();
        assert_eq!(snapshot.remaining_minutes, None);

        let tray: TrayPayload = serde_json::from_str(
            r#"{"nozzle_temp_min": "190", "nozzle_temp_max": 5000000000, "bed_temp": -3000000000}"#,
        )
        .unwrap();
        let material = MaterialDescriptor::from(tray);
        assert_eq!(material.nozzle_temp_min, Some(190));
        assert_eq!(material.nozzle_temp_max, None);
        assert_eq!(material.bed_temp, None);
    }

    #[test]
    fn test_parse_report_rejects_non_object() {
        assert!(parse_report("[]").is_err());
        assert!(parse_report("not json").is_err());
    }

    #[test]
    fn test_zero_uuid_is_dropped() {
        let tray: TrayPayload = serde_json::from_str(
            r#"{"tray_type": "PLA", "tray_uuid": "00000000000000000000000000000000"}"#,
        )
        .unwrap();
        let material = MaterialDescriptor::from(tray);
        assert_eq!(material.tray_uuid, None);
    }
}
