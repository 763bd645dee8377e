// ==========================================
// 模具点检系统 - 点检排程领域模型
// ==========================================
// 红线: next_due 永远严格大于 last_done
// 红线: 存储的 status/overdue_percentage 只是缓存，读取时必须重新分类
// ==========================================

use crate::domain::types::{CycleUnit, ScheduleStatus};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// MeasuredValue - 计量值
// ==========================================
// 打数周期使用 Shots，日历周期使用 Date，二者互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum MeasuredValue {
    Shots(i64),
    Date(NaiveDate),
}

impl MeasuredValue {
    pub fn unit(&self) -> CycleUnit {
        match self {
            MeasuredValue::Shots(_) => CycleUnit::Shots,
            MeasuredValue::Date(_) => CycleUnit::CalendarDay,
        }
    }

    pub fn as_shots(&self) -> Option<i64> {
        match self {
            MeasuredValue::Shots(v) => Some(*v),
            MeasuredValue::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            MeasuredValue::Date(d) => Some(*d),
            MeasuredValue::Shots(_) => None,
        }
    }
}

// ==========================================
// MoldReading - 模具当前读数
// ==========================================
// 分类时按周期单位取用其中之一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoldReading {
    pub current_shots: i64,
    pub today: NaiveDate,
}

impl MoldReading {
    pub fn new(current_shots: i64, today: NaiveDate) -> Self {
        Self { current_shots, today }
    }

    pub fn value_for(&self, unit: CycleUnit) -> MeasuredValue {
        match unit {
            CycleUnit::Shots => MeasuredValue::Shots(self.current_shots),
            CycleUnit::CalendarDay => MeasuredValue::Date(self.today),
        }
    }
}

// ==========================================
// InspectionSchedule - 点检排程
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionSchedule {
    pub schedule_id: String,
    pub mold_id: String,
    pub item_id: String,
    pub cycle_code_id: String,
    pub unit: CycleUnit,                   // 来自周期码
    pub interval: i64,                     // 来自周期码
    pub last_done: Option<MeasuredValue>,  // 最近完成点
    pub last_done_at: Option<NaiveDateTime>,
    pub next_due: MeasuredValue,           // 下次到期点
    pub status: ScheduleStatus,            // 缓存
    pub overdue_percentage: f64,           // 缓存
    pub revision: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// ScheduleClassification - 实时分类结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleClassification {
    pub status: ScheduleStatus,
    pub overdue_percentage: f64,
    pub current: MeasuredValue,
}

/// 排程 + 实时分类（读模型）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleView {
    pub schedule: InspectionSchedule,
    pub classification: ScheduleClassification,
}
