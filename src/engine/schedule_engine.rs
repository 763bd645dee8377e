// ==========================================
// 模具点检系统 - 点检排程引擎
// ==========================================
// 职责: 维护 (模具, 检查项, 周期码) 到期记录；实时分类；推进到下一周期
// 红线: classify 是纯函数，每次读取都重新计算，存储的 status 只是缓存
// 红线: 排程只通过 advance 修改，且 advance 必须与审批处于同一事务
// 红线: next_due 永远严格大于 last_done
// ==========================================
// 分类规则:
// - completed: 自上次推进以来计量值未超过 last_done（读时派生，非终态）
// - overdue:   当前值超过到期点
// - due:       打数在到期点之前最后 ratio*interval 范围内（含到期点）；日历为当天
// - upcoming:  其他
// ==========================================

use crate::db::{run_in_transaction, RetryPolicy};
use crate::domain::audit::{AuditAction, AuditLog};
use crate::domain::checklist::ChecklistSnapshot;
use crate::domain::mold::MoldSnapshot;
use crate::domain::schedule::{
    InspectionSchedule, MeasuredValue, MoldReading, ScheduleClassification, ScheduleView,
};
use crate::domain::types::ScheduleStatus;
use crate::engine::clock::Clock;
use crate::engine::cycle_code_registry::{next_target, CycleCodeRegistry};
use crate::engine::mold_registry::MoldRegistry;
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::checklist_version_repo::ChecklistVersionRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::schedule_repo::ScheduleRepository;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::instrument;
use uuid::Uuid;

// ==========================================
// 纯函数
// ==========================================

/// 实时分类（纯函数，不读写任何存储）
pub fn classify_schedule(
    schedule: &InspectionSchedule,
    reading: &MoldReading,
    due_window_ratio: f64,
) -> ScheduleClassification {
    let current = reading.value_for(schedule.unit);

    let status = if schedule.last_done.map_or(false, |done| current <= done) {
        ScheduleStatus::Completed
    } else if current > schedule.next_due {
        ScheduleStatus::Overdue
    } else if in_due_window(&current, &schedule.next_due, schedule.interval, due_window_ratio) {
        ScheduleStatus::Due
    } else {
        ScheduleStatus::Upcoming
    };

    let overdue_percentage = if status == ScheduleStatus::Overdue {
        overdue_percentage(&current, &schedule.next_due, schedule.interval)
    } else {
        0.0
    };

    ScheduleClassification {
        status,
        overdue_percentage,
        current,
    }
}

fn in_due_window(current: &MeasuredValue, due: &MeasuredValue, interval: i64, ratio: f64) -> bool {
    match (current, due) {
        (MeasuredValue::Shots(c), MeasuredValue::Shots(d)) => {
            let window_start = *d as f64 - ratio * interval as f64;
            (*c as f64) >= window_start && c <= d
        }
        (MeasuredValue::Date(c), MeasuredValue::Date(d)) => c == d,
        _ => false,
    }
}

/// max(0, (current - due) / interval * 100)；日历周期按天数计
fn overdue_percentage(current: &MeasuredValue, due: &MeasuredValue, interval: i64) -> f64 {
    let over = match (current, due) {
        (MeasuredValue::Shots(c), MeasuredValue::Shots(d)) => (c - d) as f64,
        (MeasuredValue::Date(c), MeasuredValue::Date(d)) => (*c - *d).num_days() as f64,
        _ => 0.0,
    };
    if interval <= 0 {
        return 0.0;
    }
    (over / interval as f64 * 100.0).max(0.0)
}

/// 推进到下一周期（纯函数）
///
/// 完成值早于原 last_done 时保留原 (last_done, last_done_at)，保证到期点单调前进；
/// next_due 由 CycleCodeRegistry 从生效的 last_done 计算，分类重置为 upcoming
///
/// # Panics
/// - `done` 的单位与排程周期单位不一致
pub fn advance_schedule(
    schedule: &InspectionSchedule,
    done: MeasuredValue,
    done_at: NaiveDateTime,
) -> InspectionSchedule {
    let mut advanced = schedule.clone();
    match schedule.last_done {
        // 较旧的基线不回退；last_done 与 last_done_at 保持成对
        Some(previous) if previous.unit() == done.unit() && previous > done => {
            advanced.next_due = next_target(schedule.unit, &previous, schedule.interval);
        }
        _ => {
            advanced.next_due = next_target(schedule.unit, &done, schedule.interval);
            advanced.last_done = Some(done);
            advanced.last_done_at = Some(done_at);
        }
    }
    advanced.status = ScheduleStatus::Upcoming;
    advanced.overdue_percentage = 0.0;
    advanced.updated_at = done_at;
    advanced
}

// ==========================================
// ScheduleEngine - 排程引擎
// ==========================================
pub struct ScheduleEngine {
    conn: Arc<Mutex<Connection>>,
    schedule_repo: Arc<ScheduleRepository>,
    version_repo: Arc<ChecklistVersionRepository>,
    registry: Arc<CycleCodeRegistry>,
    mold_registry: Arc<dyn MoldRegistry>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    due_window_ratio: f64,
    default_scope: String,
}

impl ScheduleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        schedule_repo: Arc<ScheduleRepository>,
        version_repo: Arc<ChecklistVersionRepository>,
        registry: Arc<CycleCodeRegistry>,
        mold_registry: Arc<dyn MoldRegistry>,
        clock: Arc<dyn Clock>,
        retry_policy: RetryPolicy,
        due_window_ratio: f64,
        default_scope: String,
    ) -> Self {
        Self {
            conn,
            schedule_repo,
            version_repo,
            registry,
            mold_registry,
            clock,
            retry_policy,
            due_window_ratio,
            default_scope,
        }
    }

    pub fn registry(&self) -> &CycleCodeRegistry {
        &self.registry
    }

    // ==========================================
    // 读取（实时分类）
    // ==========================================

    /// 模具当前读数（打数 + 今天）
    pub fn reading_for(&self, mold_id: &str) -> RepositoryResult<MoldReading> {
        let mold = self.require_mold(mold_id)?;
        Ok(MoldReading::new(mold.current_shots, self.clock.today()))
    }

    fn require_mold(&self, mold_id: &str) -> RepositoryResult<MoldSnapshot> {
        self.mold_registry
            .find_mold(mold_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Mold".to_string(),
                id: mold_id.to_string(),
            })
    }

    /// 按给定读数分类
    pub fn classify(&self, schedule: &InspectionSchedule, reading: &MoldReading) -> ScheduleClassification {
        classify_schedule(schedule, reading, self.due_window_ratio)
    }

    /// 模具的全部排程（带实时分类）
    ///
    /// 读取前补齐当前部署快照要求、但尚未建立的排程
    #[instrument(skip(self), fields(mold_id = %mold_id))]
    pub fn list_for_mold(&self, mold_id: &str) -> RepositoryResult<Vec<ScheduleView>> {
        let mold = self.require_mold(mold_id)?;
        self.sync_mold(&mold)?;

        let reading = MoldReading::new(mold.current_shots, self.clock.today());
        let views = self
            .schedule_repo
            .list_by_mold(mold_id)?
            .into_iter()
            .map(|schedule| {
                let classification = self.classify(&schedule, &reading);
                ScheduleView {
                    schedule,
                    classification,
                }
            })
            .collect();
        Ok(views)
    }

    /// 全部 due/overdue 排程（告警服务读模型）
    ///
    /// 模具台账中已不存在的模具跳过并告警
    #[instrument(skip(self))]
    pub fn list_actionable(&self) -> RepositoryResult<Vec<ScheduleView>> {
        for mold in self.mold_registry.list_molds()? {
            self.sync_mold(&mold)?;
        }

        let mut readings: HashMap<String, Option<MoldReading>> = HashMap::new();
        let mut actionable = Vec::new();

        for schedule in self.schedule_repo.list_all()? {
            if !readings.contains_key(&schedule.mold_id) {
                let reading = match self.reading_for(&schedule.mold_id) {
                    Ok(reading) => Some(reading),
                    Err(RepositoryError::NotFound { .. }) => {
                        tracing::warn!(mold_id = %schedule.mold_id, "模具不在台账中，跳过其排程");
                        None
                    }
                    Err(e) => return Err(e),
                };
                readings.insert(schedule.mold_id.clone(), reading);
            }

            let reading = match readings.get(&schedule.mold_id) {
                Some(Some(reading)) => *reading,
                _ => continue,
            };

            let classification = self.classify(&schedule, &reading);
            if classification.status.is_actionable() {
                actionable.push(ScheduleView {
                    schedule,
                    classification,
                });
            }
        }

        tracing::debug!(count = actionable.len(), "可执行排程统计完成");
        Ok(actionable)
    }

    /// 回写缓存分类（机会性刷新，分类本身永不依赖此缓存）
    ///
    /// # 返回
    /// - 实际变化的行数
    #[instrument(skip(self), fields(mold_id = %mold_id))]
    pub fn refresh_cached_status(&self, mold_id: &str) -> RepositoryResult<usize> {
        let now = self.clock.now();
        let mut refreshed = 0;

        for view in self.list_for_mold(mold_id)? {
            let cached = (view.schedule.status, view.schedule.overdue_percentage);
            let live = (view.classification.status, view.classification.overdue_percentage);
            if cached != live {
                refreshed += self.schedule_repo.update_cached_status(
                    &view.schedule.schedule_id,
                    live.0,
                    live.1,
                    now,
                )?;
            }
        }

        Ok(refreshed)
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 确保排程存在（幂等）
    #[instrument(skip(self), fields(mold_id = %mold_id, item_id = %item_id, cycle = %cycle_code_id))]
    pub fn ensure_schedule(
        &self,
        mold_id: &str,
        item_id: &str,
        cycle_code_id: &str,
    ) -> RepositoryResult<InspectionSchedule> {
        run_in_transaction(&self.conn, &self.retry_policy, "ensure_schedule", |tx| {
            self.ensure_schedule_tx(tx, mold_id, item_id, cycle_code_id)
                .map(|(schedule, _)| schedule)
        })
    }

    /// 为快照中的全部 (检查项, 周期码) 映射建立排程
    ///
    /// # 返回
    /// - 新建的排程数
    #[instrument(skip(self, snapshot), fields(mold_id = %mold_id, version_id = %snapshot.version_id))]
    pub fn sync_mold_schedules(&self, mold_id: &str, snapshot: &ChecklistSnapshot) -> RepositoryResult<usize> {
        let created = run_in_transaction(&self.conn, &self.retry_policy, "sync_mold_schedules", |tx| {
            self.sync_mold_schedules_tx(tx, mold_id, snapshot)
        })?;

        if created > 0 {
            tracing::info!(created, "新建点检排程");
        }
        Ok(created)
    }

    /// 按模具所属范围的当前部署快照补齐排程
    ///
    /// 范围尚无部署版本或排程已齐全时不开启写事务
    pub fn sync_mold(&self, mold: &MoldSnapshot) -> RepositoryResult<usize> {
        let scope = mold.scope_or(&self.default_scope);
        let snapshot = match self.version_repo.find_current_deployed(scope)? {
            Some(version) => match version.snapshot {
                Some(snapshot) => snapshot,
                None => return Ok(0),
            },
            None => return Ok(0),
        };

        let existing: HashSet<(String, String)> = self
            .schedule_repo
            .list_by_mold(&mold.mold_id)?
            .into_iter()
            .map(|s| (s.item_id, s.cycle_code_id))
            .collect();
        if snapshot.cycle_mappings().iter().all(|pair| existing.contains(pair)) {
            return Ok(0);
        }

        self.sync_mold_schedules(&mold.mold_id, &snapshot)
    }

    /// 台账中归属该范围的模具
    pub fn molds_in_scope(&self, scope: &str) -> RepositoryResult<Vec<MoldSnapshot>> {
        Ok(self
            .mold_registry
            .list_molds()?
            .into_iter()
            .filter(|m| m.scope_or(&self.default_scope) == scope)
            .collect())
    }

    /// 事务内为一组模具按快照建立排程（部署时调用）
    pub fn sync_scope_tx(
        &self,
        conn: &Connection,
        molds: &[MoldSnapshot],
        snapshot: &ChecklistSnapshot,
    ) -> RepositoryResult<usize> {
        let mut created = 0;
        for mold in molds {
            created += self.sync_mold_schedules_tx(conn, &mold.mold_id, snapshot)?;
        }
        Ok(created)
    }

    pub fn sync_mold_schedules_tx(
        &self,
        conn: &Connection,
        mold_id: &str,
        snapshot: &ChecklistSnapshot,
    ) -> RepositoryResult<usize> {
        let mut created = 0;
        for (item_id, cycle_code_id) in snapshot.cycle_mappings() {
            let (_, is_new) = self.ensure_schedule_tx(conn, mold_id, &item_id, &cycle_code_id)?;
            if is_new {
                created += 1;
            }
        }
        Ok(created)
    }

    /// 事务内确保排程存在
    ///
    /// # 返回
    /// - `(schedule, true)`: 新建；首个目标从 0 / 今天起算
    /// - `(schedule, false)`: 已存在
    pub fn ensure_schedule_tx(
        &self,
        conn: &Connection,
        mold_id: &str,
        item_id: &str,
        cycle_code_id: &str,
    ) -> RepositoryResult<(InspectionSchedule, bool)> {
        if let Some(existing) = ScheduleRepository::find_tx(conn, mold_id, item_id, cycle_code_id)? {
            return Ok((existing, false));
        }

        let cycle = self.registry.get(cycle_code_id).ok_or_else(|| RepositoryError::NotFound {
            entity: "CycleCode".to_string(),
            id: cycle_code_id.to_string(),
        })?;
        let now = self.clock.now();
        let next_due = self
            .registry
            .first_target(cycle_code_id, now.date())
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "CycleCode".to_string(),
                id: cycle_code_id.to_string(),
            })?;

        let schedule = InspectionSchedule {
            schedule_id: Uuid::new_v4().to_string(),
            mold_id: mold_id.to_string(),
            item_id: item_id.to_string(),
            cycle_code_id: cycle_code_id.to_string(),
            unit: cycle.unit,
            interval: cycle.interval,
            last_done: None,
            last_done_at: None,
            next_due,
            status: ScheduleStatus::Upcoming,
            overdue_percentage: 0.0,
            revision: 1,
            created_at: now,
            updated_at: now,
        };

        let inserted = ScheduleRepository::insert_if_absent_tx(conn, &schedule)?;
        if inserted {
            tracing::debug!(schedule_id = %schedule.schedule_id, "排程已创建");
            return Ok((schedule, true));
        }

        // 并发插入竞争失败：读取胜者
        let existing = ScheduleRepository::find_tx(conn, mold_id, item_id, cycle_code_id)?.ok_or_else(|| {
            RepositoryError::NotFound {
                entity: "InspectionSchedule".to_string(),
                id: format!("{}/{}/{}", mold_id, item_id, cycle_code_id),
            }
        })?;
        Ok((existing, false))
    }

    /// 事务内推进排程（仅由点检审批调用）
    ///
    /// 排程不存在时先在同一事务内建立；写入带 revision 检查，并记录审计
    pub(crate) fn advance_tx(
        &self,
        conn: &Connection,
        mold_id: &str,
        item_id: &str,
        cycle_code_id: &str,
        done: MeasuredValue,
        done_at: NaiveDateTime,
        actor: &str,
    ) -> RepositoryResult<InspectionSchedule> {
        let (current, _) = self.ensure_schedule_tx(conn, mold_id, item_id, cycle_code_id)?;

        if current.unit != done.unit() {
            return Err(RepositoryError::FieldValueError {
                field: "done_value".to_string(),
                message: format!(
                    "周期{}单位为{}，完成值单位为{}",
                    cycle_code_id,
                    current.unit,
                    done.unit()
                ),
            });
        }

        let mut advanced = advance_schedule(&current, done, done_at);
        ScheduleRepository::update_advanced_tx(conn, &advanced, current.revision)?;
        advanced.revision = current.revision + 1;

        AuditLogRepository::insert_tx(
            conn,
            &AuditLog::new(
                "inspection_schedule",
                &advanced.schedule_id,
                AuditAction::AdvanceSchedule,
                actor,
                Some(json!({
                    "done": done,
                    "previous_next_due": current.next_due,
                    "next_due": advanced.next_due,
                })),
                done_at,
            ),
        )?;

        tracing::info!(
            schedule_id = %advanced.schedule_id,
            item_id = %item_id,
            cycle = %cycle_code_id,
            "排程已推进"
        );
        Ok(advanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CycleUnit;
    use crate::engine::clock::FixedClock;
    use crate::repository::cycle_code_repo::CycleCodeRepository;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts() -> NaiveDateTime {
        date(2026, 6, 1).and_hms_opt(10, 0, 0).unwrap()
    }

    fn shot_schedule(last_done: Option<i64>, next_due: i64) -> InspectionSchedule {
        InspectionSchedule {
            schedule_id: "S1".to_string(),
            mold_id: "M1".to_string(),
            item_id: "CAVITY".to_string(),
            cycle_code_id: "SHOT_20K".to_string(),
            unit: CycleUnit::Shots,
            interval: 20_000,
            last_done: last_done.map(MeasuredValue::Shots),
            last_done_at: None,
            next_due: MeasuredValue::Shots(next_due),
            status: ScheduleStatus::Upcoming,
            overdue_percentage: 0.0,
            revision: 1,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn daily_schedule(next_due: NaiveDate) -> InspectionSchedule {
        InspectionSchedule {
            cycle_code_id: "DAILY".to_string(),
            unit: CycleUnit::CalendarDay,
            interval: 1,
            next_due: MeasuredValue::Date(next_due),
            ..shot_schedule(None, 0)
        }
    }

    fn at_shots(shots: i64) -> MoldReading {
        MoldReading::new(shots, date(2026, 6, 1))
    }

    #[test]
    fn test_classify_shot_windows() {
        let s = shot_schedule(Some(0), 20_000);

        let c = classify_schedule(&s, &at_shots(17_999), 0.1);
        assert_eq!(c.status, ScheduleStatus::Upcoming);

        let c = classify_schedule(&s, &at_shots(19_000), 0.1);
        assert_eq!(c.status, ScheduleStatus::Due);
        assert_eq!(c.overdue_percentage, 0.0);

        let c = classify_schedule(&s, &at_shots(18_000), 0.1);
        assert_eq!(c.status, ScheduleStatus::Due);

        let c = classify_schedule(&s, &at_shots(20_000), 0.1);
        assert_eq!(c.status, ScheduleStatus::Due);

        let c = classify_schedule(&s, &at_shots(21_000), 0.1);
        assert_eq!(c.status, ScheduleStatus::Overdue);
        assert!((c.overdue_percentage - 5.0).abs() < 1e-9);
        assert_eq!(c.current, MeasuredValue::Shots(21_000));
    }

    #[test]
    fn test_classify_is_pure() {
        let s = shot_schedule(Some(0), 20_000);
        let before = s.clone();
        let first = classify_schedule(&s, &at_shots(25_000), 0.1);
        let second = classify_schedule(&s, &at_shots(25_000), 0.1);
        assert_eq!(first, second);
        assert_eq!(s, before);
    }

    #[test]
    fn test_classify_completed_until_counter_moves() {
        let s = shot_schedule(Some(19_500), 20_000);
        assert_eq!(classify_schedule(&s, &at_shots(19_500), 0.1).status, ScheduleStatus::Completed);
        assert_eq!(classify_schedule(&s, &at_shots(19_501), 0.1).status, ScheduleStatus::Due);
        // 从未完成过的排程不会是 completed
        let fresh = shot_schedule(None, 20_000);
        assert_eq!(classify_schedule(&fresh, &at_shots(0), 0.1).status, ScheduleStatus::Upcoming);
    }

    #[test]
    fn test_classify_calendar() {
        let s = daily_schedule(date(2026, 6, 10));
        let reading = |d: NaiveDate| MoldReading::new(0, d);

        assert_eq!(classify_schedule(&s, &reading(date(2026, 6, 9)), 0.1).status, ScheduleStatus::Upcoming);
        assert_eq!(classify_schedule(&s, &reading(date(2026, 6, 10)), 0.1).status, ScheduleStatus::Due);

        let c = classify_schedule(&s, &reading(date(2026, 6, 12)), 0.1);
        assert_eq!(c.status, ScheduleStatus::Overdue);
        assert!((c.overdue_percentage - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_advance_uses_baseline_and_resets_status() {
        let mut s = shot_schedule(Some(0), 20_000);
        s.status = ScheduleStatus::Due;

        let advanced = advance_schedule(&s, MeasuredValue::Shots(19_500), ts());
        assert_eq!(advanced.last_done, Some(MeasuredValue::Shots(19_500)));
        assert_eq!(advanced.next_due, MeasuredValue::Shots(20_000));
        assert_eq!(advanced.status, ScheduleStatus::Upcoming);
        assert_eq!(advanced.last_done_at, Some(ts()));

        let later = advance_schedule(&advanced, MeasuredValue::Shots(20_000), ts());
        assert_eq!(later.next_due, MeasuredValue::Shots(40_000));
    }

    #[test]
    fn test_advance_never_moves_backward() {
        let s = shot_schedule(Some(45_000), 60_000);
        let advanced = advance_schedule(&s, MeasuredValue::Shots(30_000), ts());
        assert_eq!(advanced.last_done, Some(MeasuredValue::Shots(45_000)));
        assert_eq!(advanced.next_due, MeasuredValue::Shots(60_000));
    }

    #[test]
    fn test_stale_baseline_keeps_completion_timestamp() {
        let earlier = date(2026, 5, 20).and_hms_opt(9, 0, 0).unwrap();
        let s = InspectionSchedule {
            last_done_at: Some(earlier),
            ..shot_schedule(Some(45_000), 60_000)
        };

        let advanced = advance_schedule(&s, MeasuredValue::Shots(30_000), ts());
        assert_eq!(advanced.last_done, Some(MeasuredValue::Shots(45_000)));
        assert_eq!(advanced.last_done_at, Some(earlier));
        assert_eq!(advanced.updated_at, ts());

        let fresh = advance_schedule(&s, MeasuredValue::Shots(61_000), ts());
        assert_eq!(fresh.last_done, Some(MeasuredValue::Shots(61_000)));
        assert_eq!(fresh.last_done_at, Some(ts()));
        assert_eq!(fresh.next_due, MeasuredValue::Shots(80_000));
    }

    struct FixedMolds(Vec<MoldSnapshot>);

    impl MoldRegistry for FixedMolds {
        fn find_mold(&self, mold_id: &str) -> RepositoryResult<Option<MoldSnapshot>> {
            Ok(self.0.iter().find(|m| m.mold_id == mold_id).cloned())
        }

        fn list_molds(&self) -> RepositoryResult<Vec<MoldSnapshot>> {
            Ok(self.0.clone())
        }
    }

    fn engine_with(shots: i64) -> ScheduleEngine {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let registry = CycleCodeRegistry::standard();
        registry.seed(&CycleCodeRepository::new(conn.clone())).unwrap();

        ScheduleEngine::new(
            conn.clone(),
            Arc::new(ScheduleRepository::new(conn.clone())),
            Arc::new(ChecklistVersionRepository::new(conn)),
            Arc::new(registry),
            Arc::new(FixedMolds(vec![MoldSnapshot {
                mold_id: "M1".to_string(),
                mold_code: "MD-001".to_string(),
                checklist_scope: None,
                current_shots: shots,
            }])),
            Arc::new(FixedClock(ts())),
            RetryPolicy::default(),
            0.1,
            "global".to_string(),
        )
    }

    #[test]
    fn test_ensure_schedule_is_idempotent() {
        let engine = engine_with(0);
        let first = engine.ensure_schedule("M1", "CAVITY", "SHOT_20K").unwrap();
        let second = engine.ensure_schedule("M1", "CAVITY", "SHOT_20K").unwrap();

        assert_eq!(first.schedule_id, second.schedule_id);
        assert_eq!(second.next_due, MeasuredValue::Shots(20_000));

        let daily = engine.ensure_schedule("M1", "CAVITY", "DAILY").unwrap();
        assert_eq!(daily.next_due, MeasuredValue::Date(date(2026, 6, 2)));

        let err = engine.ensure_schedule("M1", "CAVITY", "SHOT_1K").unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }

    #[test]
    fn test_list_actionable_and_refresh_cache() {
        let engine = engine_with(21_000);
        engine.ensure_schedule("M1", "CAVITY", "SHOT_20K").unwrap();
        engine.ensure_schedule("M1", "CAVITY", "SHOT_50K").unwrap();
        engine.ensure_schedule("M404", "CAVITY", "SHOT_20K").unwrap();

        let actionable = engine.list_actionable().unwrap();
        assert_eq!(actionable.len(), 1);
        assert_eq!(actionable[0].schedule.cycle_code_id, "SHOT_20K");
        assert_eq!(actionable[0].classification.status, ScheduleStatus::Overdue);
        // 缓存未刷新前仍是创建时的值
        assert_eq!(actionable[0].schedule.status, ScheduleStatus::Upcoming);

        assert_eq!(engine.refresh_cached_status("M1").unwrap(), 1);
        assert_eq!(engine.refresh_cached_status("M1").unwrap(), 0);

        let views = engine.list_for_mold("M1").unwrap();
        let cached = views.iter().find(|v| v.schedule.cycle_code_id == "SHOT_20K").unwrap();
        assert_eq!(cached.schedule.status, ScheduleStatus::Overdue);
        assert!((cached.schedule.overdue_percentage - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_advance_tx_writes_audit() {
        let engine = engine_with(19_500);
        let conn = engine.conn.clone();

        let advanced = run_in_transaction(&conn, &RetryPolicy::default(), "test", |tx| {
            engine.advance_tx(tx, "M1", "CAVITY", "SHOT_20K", MeasuredValue::Shots(19_500), ts(), "bob")
        })
        .unwrap();
        assert_eq!(advanced.revision, 2);
        assert_eq!(advanced.next_due, MeasuredValue::Shots(20_000));

        let audit = AuditLogRepository::new(conn);
        let logs = audit.list_by_entity("inspection_schedule", &advanced.schedule_id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "ADVANCE_SCHEDULE");
    }
}
