// ==========================================
// 模具点检系统 - 审计日志数据仓储
// ==========================================
// 红线: 写入与被记录的状态迁移处于同一事务
// ==========================================

use crate::db::{format_datetime, parse_datetime_col};
use crate::domain::audit::AuditLog;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct AuditLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在调用方事务内写入审计日志
    pub fn insert_tx(conn: &Connection, log: &AuditLog) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO inspection_audit_log (
                log_id, entity_type, entity_id, action, actor, payload_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &log.log_id,
                &log.entity_type,
                &log.entity_id,
                &log.action,
                &log.actor,
                log.payload_json.as_ref().map(|v| v.to_string()),
                format_datetime(&log.created_at),
            ],
        )?;
        Ok(())
    }

    /// 查询某实体的审计日志（按时间升序）
    pub fn list_by_entity(&self, entity_type: &str, entity_id: &str) -> RepositoryResult<Vec<AuditLog>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT log_id, entity_type, entity_id, action, actor, payload_json, created_at
               FROM inspection_audit_log
               WHERE entity_type = ? AND entity_id = ?
               ORDER BY created_at ASC, rowid ASC"#,
        )?;

        let logs = stmt
            .query_map(params![entity_type, entity_id], Self::map_row)?
            .collect::<Result<Vec<AuditLog>, _>>()?;

        Ok(logs)
    }

    /// 最近的审计日志
    pub fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<AuditLog>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT log_id, entity_type, entity_id, action, actor, payload_json, created_at
               FROM inspection_audit_log
               ORDER BY created_at DESC, rowid DESC
               LIMIT ?"#,
        )?;

        let logs = stmt
            .query_map(params![limit as i64], Self::map_row)?
            .collect::<Result<Vec<AuditLog>, _>>()?;

        Ok(logs)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<AuditLog> {
        let payload: Option<String> = row.get(5)?;
        Ok(AuditLog {
            log_id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            action: row.get(3)?,
            actor: row.get(4)?,
            payload_json: payload.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: parse_datetime_col(6, &row.get::<_, String>(6)?)?,
        })
    }
}
