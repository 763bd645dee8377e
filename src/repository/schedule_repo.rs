// ==========================================
// 模具点检系统 - 点检排程数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 排程只通过 advance 修改，不提供任意字段更新
// ==========================================

use crate::db::{
    format_date, format_datetime, invalid_text_col, parse_datetime_col, parse_opt_date_col,
    parse_opt_datetime_col,
};
use crate::domain::schedule::{InspectionSchedule, MeasuredValue};
use crate::domain::types::{CycleUnit, ScheduleStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SCHEDULE_SELECT: &str = r#"SELECT s.schedule_id, s.mold_id, s.item_id, s.cycle_code_id,
           c.unit, c.interval_value,
           s.last_done_value, s.last_done_date, s.last_done_at,
           s.next_due_value, s.next_due_date,
           s.status, s.overdue_percentage, s.revision, s.created_at, s.updated_at
    FROM inspection_schedule s
    JOIN cycle_code c ON c.code = s.cycle_code_id"#;

pub struct ScheduleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleRepository {
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

    pub fn find_by_id(&self, schedule_id: &str) -> RepositoryResult<Option<InspectionSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE s.schedule_id = ?", SCHEDULE_SELECT);
        let found = conn
            .query_row(&sql, params![schedule_id], Self::map_row)
            .optional()?;
        Ok(found)
    }

    pub fn find(&self, mold_id: &str, item_id: &str, cycle_code_id: &str) -> RepositoryResult<Option<InspectionSchedule>> {
        let conn = self.get_conn()?;
        Self::find_tx(&conn, mold_id, item_id, cycle_code_id)
    }

    pub fn list_by_mold(&self, mold_id: &str) -> RepositoryResult<Vec<InspectionSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE s.mold_id = ? ORDER BY s.cycle_code_id, s.item_id",
            SCHEDULE_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map(params![mold_id], Self::map_row)?
            .collect::<Result<Vec<InspectionSchedule>, _>>()?;
        Ok(schedules)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<InspectionSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} ORDER BY s.mold_id, s.cycle_code_id, s.item_id",
            SCHEDULE_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<InspectionSchedule>, _>>()?;
        Ok(schedules)
    }

    pub fn find_tx(
        conn: &Connection,
        mold_id: &str,
        item_id: &str,
        cycle_code_id: &str,
    ) -> RepositoryResult<Option<InspectionSchedule>> {
        let sql = format!(
            "{} WHERE s.mold_id = ? AND s.item_id = ? AND s.cycle_code_id = ?",
            SCHEDULE_SELECT
        );
        let found = conn
            .query_row(&sql, params![mold_id, item_id, cycle_code_id], Self::map_row)
            .optional()?;
        Ok(found)
    }

    // ==========================================
    // 写入 (调用方事务内执行)
    // ==========================================

    /// 不存在时插入
    ///
    /// # 返回
    /// - `Ok(true)`: 新建
    /// - `Ok(false)`: 已存在，未做修改
    pub fn insert_if_absent_tx(conn: &Connection, schedule: &InspectionSchedule) -> RepositoryResult<bool> {
        let (last_value, last_date) = split_value(schedule.last_done.as_ref());
        let (next_value, next_date) = split_value(Some(&schedule.next_due));

        let rows = conn.execute(
            r#"INSERT INTO inspection_schedule (
                schedule_id, mold_id, item_id, cycle_code_id,
                last_done_value, last_done_date, last_done_at,
                next_due_value, next_due_date,
                status, overdue_percentage, revision, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(mold_id, item_id, cycle_code_id) DO NOTHING"#,
            params![
                &schedule.schedule_id,
                &schedule.mold_id,
                &schedule.item_id,
                &schedule.cycle_code_id,
                last_value,
                last_date,
                schedule.last_done_at.as_ref().map(format_datetime),
                next_value,
                next_date,
                schedule.status.to_db_str(),
                schedule.overdue_percentage,
                schedule.revision,
                format_datetime(&schedule.created_at),
                format_datetime(&schedule.updated_at),
            ],
        )?;

        Ok(rows == 1)
    }

    /// 写回 advance 结果（带乐观锁检查）
    pub fn update_advanced_tx(
        conn: &Connection,
        schedule: &InspectionSchedule,
        expected_revision: i32,
    ) -> RepositoryResult<()> {
        let (last_value, last_date) = split_value(schedule.last_done.as_ref());
        let (next_value, next_date) = split_value(Some(&schedule.next_due));

        let rows = conn.execute(
            r#"UPDATE inspection_schedule
               SET last_done_value = ?, last_done_date = ?, last_done_at = ?,
                   next_due_value = ?, next_due_date = ?,
                   status = ?, overdue_percentage = ?,
                   updated_at = ?, revision = revision + 1
               WHERE schedule_id = ? AND revision = ?"#,
            params![
                last_value,
                last_date,
                schedule.last_done_at.as_ref().map(format_datetime),
                next_value,
                next_date,
                schedule.status.to_db_str(),
                schedule.overdue_percentage,
                format_datetime(&schedule.updated_at),
                &schedule.schedule_id,
                expected_revision,
            ],
        )?;

        if rows == 0 {
            let actual: Option<i32> = conn
                .query_row(
                    "SELECT revision FROM inspection_schedule WHERE schedule_id = ?",
                    params![&schedule.schedule_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match actual {
                Some(actual) => RepositoryError::OptimisticLockFailure {
                    entity: "InspectionSchedule".to_string(),
                    id: schedule.schedule_id.clone(),
                    expected: expected_revision,
                    actual,
                },
                None => RepositoryError::NotFound {
                    entity: "InspectionSchedule".to_string(),
                    id: schedule.schedule_id.clone(),
                },
            });
        }
        Ok(())
    }

    /// 刷新缓存分类（不递增 revision，不参与正确性）
    pub fn update_cached_status(
        &self,
        schedule_id: &str,
        status: ScheduleStatus,
        overdue_percentage: f64,
        now: NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"UPDATE inspection_schedule
               SET status = ?, overdue_percentage = ?, updated_at = ?
               WHERE schedule_id = ?"#,
            params![status.to_db_str(), overdue_percentage, format_datetime(&now), schedule_id],
        )?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<InspectionSchedule> {
        let unit_str: String = row.get(4)?;
        let unit = CycleUnit::from_db_str(&unit_str)
            .ok_or_else(|| invalid_text_col(4, "unit", &unit_str))?;

        let last_done_value: Option<i64> = row.get(6)?;
        let last_done_date = parse_opt_date_col(7, row.get(7)?)?;
        let next_due_value: Option<i64> = row.get(9)?;
        let next_due_date = parse_opt_date_col(10, row.get(10)?)?;

        let (last_done, next_due) = match unit {
            CycleUnit::Shots => (
                last_done_value.map(MeasuredValue::Shots),
                next_due_value.map(MeasuredValue::Shots),
            ),
            CycleUnit::CalendarDay => (
                last_done_date.map(MeasuredValue::Date),
                next_due_date.map(MeasuredValue::Date),
            ),
        };
        let next_due = next_due.ok_or_else(|| invalid_text_col(9, "next_due", "NULL"))?;

        let status_str: String = row.get(11)?;
        let status = ScheduleStatus::from_db_str(&status_str)
            .ok_or_else(|| invalid_text_col(11, "status", &status_str))?;

        Ok(InspectionSchedule {
            schedule_id: row.get(0)?,
            mold_id: row.get(1)?,
            item_id: row.get(2)?,
            cycle_code_id: row.get(3)?,
            unit,
            interval: row.get(5)?,
            last_done,
            last_done_at: parse_opt_datetime_col(8, row.get(8)?)?,
            next_due,
            status,
            overdue_percentage: row.get(12)?,
            revision: row.get(13)?,
            created_at: parse_datetime_col(14, &row.get::<_, String>(14)?)?,
            updated_at: parse_datetime_col(15, &row.get::<_, String>(15)?)?,
        })
    }
}

/// 拆分为 (打数列, 日期列)
fn split_value(value: Option<&MeasuredValue>) -> (Option<i64>, Option<String>) {
    match value {
        Some(MeasuredValue::Shots(v)) => (Some(*v), None),
        Some(MeasuredValue::Date(d)) => (None, Some(format_date(d))),
        None => (None, None),
    }
}
