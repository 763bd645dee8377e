// ==========================================
// 模具点检系统 - 点检实例数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: checklist_version_id 写入后不提供任何更新入口
// ==========================================

use crate::db::{
    format_date, format_datetime, invalid_text_col, parse_datetime_col, parse_opt_date_col,
    parse_opt_datetime_col,
};
use crate::domain::inspection::{InspectionInstance, ItemResult};
use crate::domain::schedule::MeasuredValue;
use crate::domain::types::{InspectionStatus, ItemOutcome};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const INSTANCE_COLUMNS: &str = r#"instance_id, mold_id, checklist_version_id, cycle_code_id, status,
    baseline_shots, baseline_date, created_by, created_at,
    submitted_by, submitted_at, approved_by, approved_at,
    return_note, returned_by, returned_at, revision"#;

pub struct InspectionInstanceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl InspectionInstanceRepository {
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

    pub fn find_by_id(&self, instance_id: &str) -> RepositoryResult<Option<InspectionInstance>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, instance_id)
    }

    /// 查询模具的点检实例（创建时间降序，含结果）
    pub fn list_by_mold(&self, mold_id: &str) -> RepositoryResult<Vec<InspectionInstance>> {
        let conn = self.get_conn()?;

        let sql = format!(
            "SELECT {} FROM inspection_instance WHERE mold_id = ? ORDER BY created_at DESC, rowid DESC",
            INSTANCE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut instances = stmt
            .query_map(params![mold_id], Self::map_row)?
            .collect::<Result<Vec<InspectionInstance>, _>>()?;

        for instance in instances.iter_mut() {
            instance.results = Self::load_results_tx(&conn, &instance.instance_id)?;
        }

        Ok(instances)
    }

    pub fn find_by_id_tx(conn: &Connection, instance_id: &str) -> RepositoryResult<Option<InspectionInstance>> {
        let sql = format!("SELECT {} FROM inspection_instance WHERE instance_id = ?", INSTANCE_COLUMNS);
        let found = conn
            .query_row(&sql, params![instance_id], Self::map_row)
            .optional()?;

        match found {
            Some(mut instance) => {
                instance.results = Self::load_results_tx(conn, instance_id)?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    pub fn load_results_tx(conn: &Connection, instance_id: &str) -> RepositoryResult<Vec<ItemResult>> {
        let mut stmt = conn.prepare(
            r#"SELECT item_id, outcome, measured_text, note, recorded_by, recorded_at
               FROM inspection_item_result
               WHERE instance_id = ?
               ORDER BY item_id"#,
        )?;

        let results = stmt
            .query_map(params![instance_id], |row| {
                let outcome_str: String = row.get(1)?;
                let outcome = ItemOutcome::from_db_str(&outcome_str)
                    .ok_or_else(|| invalid_text_col(1, "outcome", &outcome_str))?;
                Ok(ItemResult {
                    item_id: row.get(0)?,
                    outcome,
                    measured_text: row.get(2)?,
                    note: row.get(3)?,
                    recorded_by: row.get(4)?,
                    recorded_at: parse_datetime_col(5, &row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<Result<Vec<ItemResult>, _>>()?;

        Ok(results)
    }

    // ==========================================
    // 写入 (调用方事务内执行)
    // ==========================================

    pub fn insert_tx(conn: &Connection, instance: &InspectionInstance) -> RepositoryResult<()> {
        let (baseline_shots, baseline_date) = match &instance.baseline {
            MeasuredValue::Shots(v) => (Some(*v), None),
            MeasuredValue::Date(d) => (None, Some(format_date(d))),
        };

        conn.execute(
            r#"INSERT INTO inspection_instance (
                instance_id, mold_id, checklist_version_id, cycle_code_id, status,
                baseline_shots, baseline_date, created_by, created_at, revision
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &instance.instance_id,
                &instance.mold_id,
                &instance.checklist_version_id,
                &instance.cycle_code_id,
                instance.status.to_db_str(),
                baseline_shots,
                baseline_date,
                &instance.created_by,
                format_datetime(&instance.created_at),
                instance.revision,
            ],
        )?;

        Ok(())
    }

    /// 录入或覆盖检查项结果
    pub fn upsert_result_tx(conn: &Connection, instance_id: &str, result: &ItemResult) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO inspection_item_result (
                instance_id, item_id, outcome, measured_text, note, recorded_by, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(instance_id, item_id) DO UPDATE SET
                outcome = excluded.outcome,
                measured_text = excluded.measured_text,
                note = excluded.note,
                recorded_by = excluded.recorded_by,
                recorded_at = excluded.recorded_at"#,
            params![
                instance_id,
                &result.item_id,
                result.outcome.to_db_str(),
                &result.measured_text,
                &result.note,
                &result.recorded_by,
                format_datetime(&result.recorded_at),
            ],
        )?;
        Ok(())
    }

    /// 写回状态及审批字段（带乐观锁检查）
    pub fn update_status_tx(
        conn: &Connection,
        instance: &InspectionInstance,
        expected_revision: i32,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE inspection_instance
               SET status = ?, submitted_by = ?, submitted_at = ?,
                   approved_by = ?, approved_at = ?,
                   return_note = ?, returned_by = ?, returned_at = ?,
                   revision = revision + 1
               WHERE instance_id = ? AND revision = ?"#,
            params![
                instance.status.to_db_str(),
                &instance.submitted_by,
                instance.submitted_at.as_ref().map(format_datetime),
                &instance.approved_by,
                instance.approved_at.as_ref().map(format_datetime),
                &instance.return_note,
                &instance.returned_by,
                instance.returned_at.as_ref().map(format_datetime),
                &instance.instance_id,
                expected_revision,
            ],
        )?;

        if rows == 0 {
            let actual: Option<i32> = conn
                .query_row(
                    "SELECT revision FROM inspection_instance WHERE instance_id = ?",
                    params![&instance.instance_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match actual {
                Some(actual) => RepositoryError::OptimisticLockFailure {
                    entity: "InspectionInstance".to_string(),
                    id: instance.instance_id.clone(),
                    expected: expected_revision,
                    actual,
                },
                None => RepositoryError::NotFound {
                    entity: "InspectionInstance".to_string(),
                    id: instance.instance_id.clone(),
                },
            });
        }
        Ok(())
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<InspectionInstance> {
        let status_str: String = row.get(4)?;
        let status = InspectionStatus::from_db_str(&status_str)
            .ok_or_else(|| invalid_text_col(4, "status", &status_str))?;

        let baseline_shots: Option<i64> = row.get(5)?;
        let baseline_date = parse_opt_date_col(6, row.get(6)?)?;
        let baseline = match (baseline_shots, baseline_date) {
            (Some(v), None) => MeasuredValue::Shots(v),
            (None, Some(d)) => MeasuredValue::Date(d),
            _ => return Err(invalid_text_col(5, "baseline", "shots/date 必须且只能有一个")),
        };

        Ok(InspectionInstance {
            instance_id: row.get(0)?,
            mold_id: row.get(1)?,
            checklist_version_id: row.get(2)?,
            cycle_code_id: row.get(3)?,
            status,
            baseline,
            results: Vec::new(),
            created_by: row.get(7)?,
            created_at: parse_datetime_col(8, &row.get::<_, String>(8)?)?,
            submitted_by: row.get(9)?,
            submitted_at: parse_opt_datetime_col(10, row.get(10)?)?,
            approved_by: row.get(11)?,
            approved_at: parse_opt_datetime_col(12, row.get(12)?)?,
            return_note: row.get(13)?,
            returned_by: row.get(14)?,
            returned_at: parse_opt_datetime_col(15, row.get(15)?)?,
            revision: row.get(16)?,
        })
    }
}
