// ==========================================
// 模具点检系统 - 检查表版本数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 快照只写一次 (WHERE snapshot_json IS NULL + 触发器双重保护)
// ==========================================

use crate::db::{format_datetime, invalid_text_col, parse_datetime_col, parse_opt_datetime_col};
use crate::domain::checklist::{ChecklistItem, ChecklistSnapshot, ChecklistVersion};
use crate::domain::types::ChecklistVersionStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const VERSION_COLUMNS: &str = r#"version_id, target_scope, title, version_no, status,
    snapshot_json, is_current_deployed, created_by, created_at, updated_at,
    deployed_at, revision"#;

// ==========================================
// ChecklistVersionRepository - 检查表版本仓储
// ==========================================
pub struct ChecklistVersionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ChecklistVersionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 读取
    // ==========================================

    pub fn find_by_id(&self, version_id: &str) -> RepositoryResult<Option<ChecklistVersion>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, version_id)
    }

    pub fn find_current_deployed(&self, target_scope: &str) -> RepositoryResult<Option<ChecklistVersion>> {
        let conn = self.get_conn()?;
        Self::find_current_deployed_tx(&conn, target_scope)
    }

    /// 查询范围内全部版本（版本号降序）
    pub fn list_by_scope(&self, target_scope: &str) -> RepositoryResult<Vec<ChecklistVersion>> {
        let conn = self.get_conn()?;

        let sql = format!(
            "SELECT {} FROM checklist_version WHERE target_scope = ? ORDER BY version_no DESC",
            VERSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let versions = stmt
            .query_map(params![target_scope], Self::map_row)?
            .collect::<Result<Vec<ChecklistVersion>, _>>()?;

        Ok(versions)
    }

    pub fn load_items(&self, version_id: &str) -> RepositoryResult<Vec<ChecklistItem>> {
        let conn = self.get_conn()?;
        Self::load_items_tx(&conn, version_id)
    }

    pub fn find_by_id_tx(conn: &Connection, version_id: &str) -> RepositoryResult<Option<ChecklistVersion>> {
        let sql = format!("SELECT {} FROM checklist_version WHERE version_id = ?", VERSION_COLUMNS);
        let found = conn
            .query_row(&sql, params![version_id], Self::map_row)
            .optional()?;
        Ok(found)
    }

    pub fn find_current_deployed_tx(
        conn: &Connection,
        target_scope: &str,
    ) -> RepositoryResult<Option<ChecklistVersion>> {
        let sql = format!(
            "SELECT {} FROM checklist_version WHERE target_scope = ? AND is_current_deployed = 1",
            VERSION_COLUMNS
        );
        let found = conn
            .query_row(&sql, params![target_scope], Self::map_row)
            .optional()?;
        Ok(found)
    }

    /// 读取版本的检查项图（检查项 + 周期映射）
    pub fn load_items_tx(conn: &Connection, version_id: &str) -> RepositoryResult<Vec<ChecklistItem>> {
        let mut stmt = conn.prepare(
            r#"SELECT item_id, title, description, required, sort_order
               FROM checklist_item
               WHERE version_id = ?
               ORDER BY sort_order, item_id"#,
        )?;
        let mut items = stmt
            .query_map(params![version_id], |row| {
                Ok(ChecklistItem {
                    item_id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    required: row.get(3)?,
                    sort_order: row.get(4)?,
                    cycle_codes: Vec::new(),
                })
            })?
            .collect::<Result<Vec<ChecklistItem>, _>>()?;

        let mut stmt = conn.prepare(
            r#"SELECT item_id, cycle_code
               FROM checklist_item_cycle
               WHERE version_id = ?
               ORDER BY item_id, cycle_code"#,
        )?;
        let mut mappings: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let rows = stmt.query_map(params![version_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (item_id, code) = row?;
            mappings.entry(item_id).or_default().push(code);
        }

        for item in items.iter_mut() {
            if let Some(codes) = mappings.remove(&item.item_id) {
                item.cycle_codes = codes;
            }
        }

        Ok(items)
    }

    // ==========================================
    // 写入 (调用方事务内执行)
    // ==========================================

    /// 创建版本（在同一事务内分配 version_no）
    ///
    /// 说明：该方法会覆盖传入的 `version.version_no`。
    pub fn insert_with_next_version_no_tx(
        conn: &Connection,
        version: &mut ChecklistVersion,
    ) -> RepositoryResult<()> {
        let max_version_no: Option<i32> = conn.query_row(
            "SELECT MAX(version_no) FROM checklist_version WHERE target_scope = ?",
            params![&version.target_scope],
            |row| row.get(0),
        )?;

        version.version_no = max_version_no.unwrap_or(0) + 1;

        conn.execute(
            r#"INSERT INTO checklist_version (
                version_id, target_scope, title, version_no, status,
                snapshot_json, is_current_deployed, created_by, created_at, updated_at,
                deployed_at, revision
            ) VALUES (?, ?, ?, ?, ?, NULL, 0, ?, ?, ?, NULL, ?)"#,
            params![
                &version.version_id,
                &version.target_scope,
                &version.title,
                &version.version_no,
                version.status.to_db_str(),
                &version.created_by,
                format_datetime(&version.created_at),
                format_datetime(&version.updated_at),
                &version.revision,
            ],
        )?;

        Ok(())
    }

    /// 整体替换检查项图
    pub fn replace_items_tx(
        conn: &Connection,
        version_id: &str,
        items: &[ChecklistItem],
    ) -> RepositoryResult<()> {
        conn.execute(
            "DELETE FROM checklist_item_cycle WHERE version_id = ?",
            params![version_id],
        )?;
        conn.execute("DELETE FROM checklist_item WHERE version_id = ?", params![version_id])?;

        let mut item_stmt = conn.prepare(
            r#"INSERT INTO checklist_item (version_id, item_id, title, description, required, sort_order)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )?;
        let mut cycle_stmt = conn.prepare(
            "INSERT INTO checklist_item_cycle (version_id, item_id, cycle_code) VALUES (?, ?, ?)",
        )?;

        for item in items {
            item_stmt.execute(params![
                version_id,
                &item.item_id,
                &item.title,
                &item.description,
                item.required,
                item.sort_order,
            ])?;
            for code in &item.cycle_codes {
                cycle_stmt.execute(params![version_id, &item.item_id, code])?;
            }
        }

        Ok(())
    }

    /// 修改标题并递增修订号（草稿编辑）
    pub fn update_title_tx(
        conn: &Connection,
        version_id: &str,
        title: &str,
        expected_revision: i32,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE checklist_version
               SET title = ?, updated_at = ?, revision = revision + 1
               WHERE version_id = ? AND revision = ?"#,
            params![title, format_datetime(&now), version_id, expected_revision],
        )?;
        Self::ensure_updated(conn, rows, version_id, expected_revision)
    }

    /// 状态迁移（带乐观锁检查）
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配
    /// - `RepositoryError::NotFound`: version_id 不存在
    pub fn update_status_tx(
        conn: &Connection,
        version_id: &str,
        to: ChecklistVersionStatus,
        expected_revision: i32,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE checklist_version
               SET status = ?, updated_at = ?, revision = revision + 1
               WHERE version_id = ? AND revision = ?"#,
            params![to.to_db_str(), format_datetime(&now), version_id, expected_revision],
        )?;
        Self::ensure_updated(conn, rows, version_id, expected_revision)
    }

    /// 写入部署快照（只允许写一次）
    pub fn write_snapshot_tx(
        conn: &Connection,
        version_id: &str,
        snapshot: &ChecklistSnapshot,
    ) -> RepositoryResult<()> {
        let json = serde_json::to_string(snapshot)?;
        let rows = conn.execute(
            r#"UPDATE checklist_version
               SET snapshot_json = ?, deployed_at = ?
               WHERE version_id = ? AND snapshot_json IS NULL"#,
            params![json, format_datetime(&snapshot.deployed_at), version_id],
        )?;

        if rows == 0 {
            return match Self::find_by_id_tx(conn, version_id)? {
                Some(_) => Err(RepositoryError::SnapshotImmutable(version_id.to_string())),
                None => Err(RepositoryError::NotFound {
                    entity: "ChecklistVersion".to_string(),
                    id: version_id.to_string(),
                }),
            };
        }
        Ok(())
    }

    /// 取消范围内当前部署标记
    ///
    /// # 返回
    /// - 被取消标记的版本ID（若有）
    pub fn clear_current_deployed_tx(conn: &Connection, target_scope: &str) -> RepositoryResult<Option<String>> {
        let previous: Option<String> = conn
            .query_row(
                "SELECT version_id FROM checklist_version WHERE target_scope = ? AND is_current_deployed = 1",
                params![target_scope],
                |row| row.get(0),
            )
            .optional()?;

        if previous.is_some() {
            conn.execute(
                "UPDATE checklist_version SET is_current_deployed = 0 WHERE target_scope = ? AND is_current_deployed = 1",
                params![target_scope],
            )?;
        }

        Ok(previous)
    }

    pub fn mark_current_deployed_tx(conn: &Connection, version_id: &str) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE checklist_version SET is_current_deployed = 1 WHERE version_id = ?",
            params![version_id],
        )?;
        Ok(())
    }

    /// 区分“记录不存在”与“revision 冲突”
    fn ensure_updated(
        conn: &Connection,
        rows_affected: usize,
        version_id: &str,
        expected_revision: i32,
    ) -> RepositoryResult<()> {
        if rows_affected > 0 {
            return Ok(());
        }

        let actual: Option<i32> = conn
            .query_row(
                "SELECT revision FROM checklist_version WHERE version_id = ?",
                params![version_id],
                |row| row.get(0),
            )
            .optional()?;

        match actual {
            Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                entity: "ChecklistVersion".to_string(),
                id: version_id.to_string(),
                expected: expected_revision,
                actual,
            }),
            None => Err(RepositoryError::NotFound {
                entity: "ChecklistVersion".to_string(),
                id: version_id.to_string(),
            }),
        }
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ChecklistVersion> {
        let status_str: String = row.get(4)?;
        let status = ChecklistVersionStatus::from_db_str(&status_str)
            .ok_or_else(|| invalid_text_col(4, "status", &status_str))?;

        let snapshot = match row.get::<_, Option<String>>(5)? {
            Some(raw) => Some(serde_json::from_str::<ChecklistSnapshot>(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
            })?),
            None => None,
        };

        Ok(ChecklistVersion {
            version_id: row.get(0)?,
            target_scope: row.get(1)?,
            title: row.get(2)?,
            version_no: row.get(3)?,
            status,
            snapshot,
            is_current_deployed: row.get(6)?,
            created_by: row.get(7)?,
            created_at: parse_datetime_col(8, &row.get::<_, String>(8)?)?,
            updated_at: parse_datetime_col(9, &row.get::<_, String>(9)?)?,
            deployed_at: parse_opt_datetime_col(10, row.get(10)?)?,
            revision: row.get(11)?,
        })
    }
}
