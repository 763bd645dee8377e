// ==========================================
// 模具点检系统 - 模具台账只读仓储
// ==========================================
// 红线: 打数由模具台账写入，本系统只读
// ==========================================

use crate::domain::mold::MoldSnapshot;
use crate::engine::mold_registry::MoldRegistry;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct MoldRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MoldRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, mold_id: &str) -> RepositoryResult<Option<MoldSnapshot>> {
        let conn = self.get_conn()?;

        let found = conn
            .query_row(
                r#"SELECT mold_id, mold_code, checklist_scope, current_shots
                   FROM mold
                   WHERE mold_id = ?"#,
                params![mold_id],
                |row| {
                    Ok(MoldSnapshot {
                        mold_id: row.get(0)?,
                        mold_code: row.get(1)?,
                        checklist_scope: row.get(2)?,
                        current_shots: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(found)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<MoldSnapshot>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT mold_id, mold_code, checklist_scope, current_shots
               FROM mold
               ORDER BY mold_id"#,
        )?;
        let molds = stmt
            .query_map([], |row| {
                Ok(MoldSnapshot {
                    mold_id: row.get(0)?,
                    mold_code: row.get(1)?,
                    checklist_scope: row.get(2)?,
                    current_shots: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(molds)
    }
}

impl MoldRegistry for MoldRepository {
    fn find_mold(&self, mold_id: &str) -> RepositoryResult<Option<MoldSnapshot>> {
        self.find_by_id(mold_id)
    }

    fn list_molds(&self) -> RepositoryResult<Vec<MoldSnapshot>> {
        self.list_all()
    }
}
