// ==========================================
// 模具点检系统 - 周期码数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::db::invalid_text_col;
use crate::domain::cycle_code::CycleCode;
use crate::domain::types::CycleUnit;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct CycleCodeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CycleCodeRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 查询全部周期码
    pub fn list_all(&self) -> RepositoryResult<Vec<CycleCode>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT code, unit, interval_value, label
               FROM cycle_code
               ORDER BY unit, interval_value"#,
        )?;

        let codes = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<CycleCode>, _>>()?;

        Ok(codes)
    }

    pub fn find_by_code(&self, code: &str) -> RepositoryResult<Option<CycleCode>> {
        let conn = self.get_conn()?;

        let found = conn
            .query_row(
                "SELECT code, unit, interval_value, label FROM cycle_code WHERE code = ?",
                params![code],
                Self::map_row,
            )
            .optional()?;

        Ok(found)
    }

    /// 写入周期码目录（存在则覆盖）
    ///
    /// # 返回
    /// - `Ok(count)`: 写入条数
    pub fn upsert_all(&self, codes: &[CycleCode]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for code in codes {
            count += tx.execute(
                r#"INSERT INTO cycle_code (code, unit, interval_value, label)
                   VALUES (?1, ?2, ?3, ?4)
                   ON CONFLICT(code) DO UPDATE SET
                       unit = excluded.unit,
                       interval_value = excluded.interval_value,
                       label = excluded.label"#,
                params![&code.code, code.unit.to_db_str(), code.interval, &code.label],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<CycleCode> {
        let unit_str: String = row.get(1)?;
        let unit = CycleUnit::from_db_str(&unit_str)
            .ok_or_else(|| invalid_text_col(1, "unit", &unit_str))?;

        Ok(CycleCode {
            code: row.get(0)?,
            unit,
            interval: row.get(2)?,
            label: row.get(3)?,
        })
    }
}
