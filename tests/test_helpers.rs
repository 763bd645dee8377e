// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、应用装配、模具台账数据、检查表定义
// ==========================================
#![allow(dead_code)]

use chrono::NaiveDate;
use mold_inspection::api::ChecklistVersionStore;
use mold_inspection::app::AppState;
use mold_inspection::engine::{FixedClock, InspectionEventPublisher, OptionalEventPublisher};
use mold_inspection::{ChecklistDefinition, ChecklistItem, ChecklistVersion, ChecklistVersionStatus};
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const SCOPE: &str = "global";

/// 测试基准日期
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
}

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = mold_inspection::db::open_sqlite_connection(&db_path)?;
    mold_inspection::db::init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 在指定数据库上装配应用（固定时钟，无事件发布）
pub fn open_state(db_path: &str) -> AppState {
    open_state_with(db_path, OptionalEventPublisher::none())
}

pub fn open_state_with(db_path: &str, publisher: OptionalEventPublisher) -> AppState {
    let conn = mold_inspection::db::open_sqlite_connection(db_path).unwrap();
    AppState::from_connection(
        db_path.to_string(),
        conn,
        Arc::new(FixedClock::at(today())),
        publisher,
    )
    .unwrap()
}

pub fn open_state_with_publisher(db_path: &str, publisher: Arc<dyn InspectionEventPublisher>) -> AppState {
    open_state_with(db_path, OptionalEventPublisher::with_publisher(publisher))
}

/// 写入模具台账（模拟上游协作方）
pub fn insert_mold(state: &AppState, mold_id: &str, scope: Option<&str>, current_shots: i64) {
    let conn = state.conn.lock().unwrap();
    conn.execute(
        "INSERT INTO mold (mold_id, mold_code, checklist_scope, current_shots) VALUES (?, ?, ?, ?)",
        params![mold_id, format!("CODE-{}", mold_id), scope, current_shots],
    )
    .unwrap();
}

/// 模拟上游打数更新
pub fn set_mold_shots(state: &AppState, mold_id: &str, current_shots: i64) {
    let conn = state.conn.lock().unwrap();
    conn.execute(
        "UPDATE mold SET current_shots = ? WHERE mold_id = ?",
        params![current_shots, mold_id],
    )
    .unwrap();
}

pub fn item(item_id: &str, required: bool, cycle_codes: &[&str]) -> ChecklistItem {
    ChecklistItem {
        item_id: item_id.to_string(),
        title: format!("检查项{}", item_id),
        description: None,
        required,
        sort_order: 0,
        cycle_codes: cycle_codes.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn definition(scope: &str, items: Vec<ChecklistItem>) -> ChecklistDefinition {
    ChecklistDefinition {
        target_scope: scope.to_string(),
        title: "注塑模具点检表".to_string(),
        items,
    }
}

/// 标准检查表: 型腔(必填,2万) / 排气(选填,2万) / 冷却(必填,10万) / 外观(必填,日常)
pub fn standard_definition(scope: &str) -> ChecklistDefinition {
    definition(
        scope,
        vec![
            item("CAVITY", true, &["SHOT_20K"]),
            item("VENT", false, &["SHOT_20K"]),
            item("COOLING", true, &["SHOT_100K"]),
            item("SURFACE", true, &["DAILY"]),
        ],
    )
}

/// 草稿推进到审批通过（不部署）
pub fn approve_draft(store: &ChecklistVersionStore, def: &ChecklistDefinition) -> ChecklistVersion {
    let v = store.create_draft(def, "author").unwrap();
    store.transition(&v.version_id, ChecklistVersionStatus::Review, "author").unwrap();
    store.transition(&v.version_id, ChecklistVersionStatus::Approved, "reviewer").unwrap()
}

/// 创建并部署
pub fn deploy(store: &ChecklistVersionStore, def: &ChecklistDefinition) -> ChecklistVersion {
    let v = approve_draft(store, def);
    store.transition(&v.version_id, ChecklistVersionStatus::Deployed, "release").unwrap()
}

/// 范围内 is_current_deployed = 1 的版本数
pub fn count_current_deployed(db_path: &str, scope: &str) -> i64 {
    let conn = Connection::open(db_path).unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM checklist_version WHERE target_scope = ? AND is_current_deployed = 1",
        params![scope],
        |row| row.get(0),
    )
    .unwrap()
}
