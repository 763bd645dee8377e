// ==========================================
// 模具点检系统 - 点检周期码注册表
// ==========================================
// 职责: 周期码目录 + "下一目标值"计算
// 红线: 纯查找与算术，不修改任何状态
// 红线: 打数目标永远严格大于刚记录的值，且是间隔的正整数倍
// ==========================================
// 单位不匹配属于编程错误（契约违反），直接 panic，不作为运行时错误返回
// ==========================================

use crate::domain::cycle_code::CycleCode;
use crate::domain::schedule::MeasuredValue;
use crate::domain::types::CycleUnit;
use crate::repository::cycle_code_repo::CycleCodeRepository;
use crate::repository::error::RepositoryResult;
use chrono::{Duration, NaiveDate};

pub const CYCLE_DAILY: &str = "DAILY";
pub const CYCLE_SHOT_20K: &str = "SHOT_20K";
pub const CYCLE_SHOT_50K: &str = "SHOT_50K";
pub const CYCLE_SHOT_100K: &str = "SHOT_100K";
pub const CYCLE_SHOT_300K: &str = "SHOT_300K";

// ==========================================
// 目标值算术
// ==========================================

/// 打数周期的下一目标
///
/// ceil(current / interval) * interval；结果不严格大于 current 时再加一个间隔
pub fn next_shot_target(current: i64, interval: i64) -> i64 {
    assert!(interval > 0, "打数周期间隔必须为正: {}", interval);

    let current = current.max(0);
    let mut target = current.div_euclid(interval) * interval;
    if target < current {
        target += interval;
    }
    if target <= current {
        target += interval;
    }
    target
}

/// 日历周期的下一目标：current + interval 天（无条件）
pub fn next_calendar_target(current: NaiveDate, interval_days: i64) -> NaiveDate {
    current + Duration::days(interval_days)
}

/// 按单位计算下一目标
///
/// # Panics
/// - `current` 的单位与 `unit` 不一致
pub fn next_target(unit: CycleUnit, current: &MeasuredValue, interval: i64) -> MeasuredValue {
    match (unit, current) {
        (CycleUnit::Shots, MeasuredValue::Shots(v)) => {
            MeasuredValue::Shots(next_shot_target(*v, interval))
        }
        (CycleUnit::CalendarDay, MeasuredValue::Date(d)) => {
            MeasuredValue::Date(next_calendar_target(*d, interval))
        }
        (unit, value) => panic!(
            "周期单位不匹配: cycle_unit={}, measured_unit={}",
            unit,
            value.unit()
        ),
    }
}

// ==========================================
// CycleCodeRegistry - 周期码目录
// ==========================================
#[derive(Debug, Clone)]
pub struct CycleCodeRegistry {
    codes: Vec<CycleCode>,
}

impl CycleCodeRegistry {
    /// 标准目录：一个日历周期 + 四个打数档位
    pub fn standard() -> Self {
        Self::from_codes(vec![
            CycleCode::new(CYCLE_DAILY, CycleUnit::CalendarDay, 1, "日常点检"),
            CycleCode::new(CYCLE_SHOT_20K, CycleUnit::Shots, 20_000, "2万模次点检"),
            CycleCode::new(CYCLE_SHOT_50K, CycleUnit::Shots, 50_000, "5万模次点检"),
            CycleCode::new(CYCLE_SHOT_100K, CycleUnit::Shots, 100_000, "10万模次点检"),
            CycleCode::new(CYCLE_SHOT_300K, CycleUnit::Shots, 300_000, "30万模次保养"),
        ])
    }

    pub fn from_codes(codes: Vec<CycleCode>) -> Self {
        Self { codes }
    }

    /// 从 cycle_code 表加载目录；表为空时使用标准目录
    pub fn load_from(repo: &CycleCodeRepository) -> RepositoryResult<Self> {
        let codes = repo.list_all()?;
        if codes.is_empty() {
            tracing::info!("cycle_code 表为空，使用标准周期码目录");
            return Ok(Self::standard());
        }
        Ok(Self::from_codes(codes))
    }

    /// 将目录写入 cycle_code 表（幂等）
    pub fn seed(&self, repo: &CycleCodeRepository) -> RepositoryResult<usize> {
        repo.upsert_all(&self.codes)
    }

    pub fn get(&self, code: &str) -> Option<&CycleCode> {
        self.codes.iter().find(|c| c.code == code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    pub fn list(&self) -> &[CycleCode] {
        &self.codes
    }

    /// 按周期码计算下一目标；未知周期码返回 None
    pub fn next_target_for(&self, code: &str, current: &MeasuredValue) -> Option<MeasuredValue> {
        self.get(code)
            .map(|cycle| next_target(cycle.unit, current, cycle.interval))
    }

    /// 新排程的首个目标：打数从 0 起算，日历从今天起算
    pub fn first_target(&self, code: &str, today: NaiveDate) -> Option<MeasuredValue> {
        let cycle = self.get(code)?;
        let origin = match cycle.unit {
            CycleUnit::Shots => MeasuredValue::Shots(0),
            CycleUnit::CalendarDay => MeasuredValue::Date(today),
        };
        Some(next_target(cycle.unit, &origin, cycle.interval))
    }
}

impl Default for CycleCodeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
