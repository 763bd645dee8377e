// ==========================================
// 模具点检系统 - 领域类型定义
// ==========================================
// 序列化格式: snake_case (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 周期计量单位 (Cycle Unit)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleUnit {
    Shots,       // 累计打数
    CalendarDay, // 日历天数
}

impl CycleUnit {
    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "shots" => Some(CycleUnit::Shots),
            "calendar_day" => Some(CycleUnit::CalendarDay),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            CycleUnit::Shots => "shots",
            CycleUnit::CalendarDay => "calendar_day",
        }
    }
}

impl fmt::Display for CycleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 检查表版本状态 (Checklist Version Status)
// ==========================================
// 顺序: Draft → Review → Approved → Deployed，只允许单步前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistVersionStatus {
    Draft,    // 草稿
    Review,   // 审核中
    Approved, // 已批准
    Deployed, // 已部署
}

impl ChecklistVersionStatus {
    /// 生命周期中的下一个状态
    pub fn next(&self) -> Option<Self> {
        match self {
            ChecklistVersionStatus::Draft => Some(ChecklistVersionStatus::Review),
            ChecklistVersionStatus::Review => Some(ChecklistVersionStatus::Approved),
            ChecklistVersionStatus::Approved => Some(ChecklistVersionStatus::Deployed),
            ChecklistVersionStatus::Deployed => None,
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ChecklistVersionStatus::Draft),
            "review" => Some(ChecklistVersionStatus::Review),
            "approved" => Some(ChecklistVersionStatus::Approved),
            "deployed" => Some(ChecklistVersionStatus::Deployed),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ChecklistVersionStatus::Draft => "draft",
            ChecklistVersionStatus::Review => "review",
            ChecklistVersionStatus::Approved => "approved",
            ChecklistVersionStatus::Deployed => "deployed",
        }
    }
}

impl fmt::Display for ChecklistVersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 排程状态 (Schedule Status)
// ==========================================
// 注: Completed 只是读取时的分类，advance 之后存储值立刻回到 Upcoming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Upcoming,  // 未到期
    Due,       // 到期
    Overdue,   // 超期
    Completed, // 本周期已完成
}

impl ScheduleStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "upcoming" => Some(ScheduleStatus::Upcoming),
            "due" => Some(ScheduleStatus::Due),
            "overdue" => Some(ScheduleStatus::Overdue),
            "completed" => Some(ScheduleStatus::Completed),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Upcoming => "upcoming",
            ScheduleStatus::Due => "due",
            ScheduleStatus::Overdue => "overdue",
            ScheduleStatus::Completed => "completed",
        }
    }

    /// 告警服务需要关注的状态
    pub fn is_actionable(&self) -> bool {
        matches!(self, ScheduleStatus::Due | ScheduleStatus::Overdue)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 点检实例状态 (Inspection Status)
// ==========================================
// 线性状态机: Draft → Submitted → Approved (终态)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    Draft,     // 填写中
    Submitted, // 已提交
    Approved,  // 已批准
}

impl InspectionStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InspectionStatus::Draft),
            "submitted" => Some(InspectionStatus::Submitted),
            "approved" => Some(InspectionStatus::Approved),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            InspectionStatus::Draft => "draft",
            InspectionStatus::Submitted => "submitted",
            InspectionStatus::Approved => "approved",
        }
    }
}

impl fmt::Display for InspectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 检查项结果 (Item Outcome)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Pass,          // 合格
    Fail,          // 不合格
    NotApplicable, // 不适用
}

impl ItemOutcome {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(ItemOutcome::Pass),
            "fail" => Some(ItemOutcome::Fail),
            "not_applicable" => Some(ItemOutcome::NotApplicable),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ItemOutcome::Pass => "pass",
            ItemOutcome::Fail => "fail",
            ItemOutcome::NotApplicable => "not_applicable",
        }
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_status_moves_one_step_forward_only() {
        assert_eq!(ChecklistVersionStatus::Draft.next(), Some(ChecklistVersionStatus::Review));
        assert_eq!(ChecklistVersionStatus::Review.next(), Some(ChecklistVersionStatus::Approved));
        assert_eq!(ChecklistVersionStatus::Approved.next(), Some(ChecklistVersionStatus::Deployed));
        assert_eq!(ChecklistVersionStatus::Deployed.next(), None);
    }

    #[test]
    fn test_db_strings_are_stable() {
        for status in [
            ChecklistVersionStatus::Draft,
            ChecklistVersionStatus::Review,
            ChecklistVersionStatus::Approved,
            ChecklistVersionStatus::Deployed,
        ] {
            assert_eq!(ChecklistVersionStatus::from_db_str(status.to_db_str()), Some(status));
        }
        assert_eq!(CycleUnit::from_db_str("calendar_day"), Some(CycleUnit::CalendarDay));
        assert_eq!(CycleUnit::from_db_str("weeks"), None);
        assert_eq!(ItemOutcome::NotApplicable.to_string(), "not_applicable");
    }

    #[test]
    fn test_actionable_statuses() {
        assert!(ScheduleStatus::Due.is_actionable());
        assert!(ScheduleStatus::Overdue.is_actionable());
        assert!(!ScheduleStatus::Upcoming.is_actionable());
        assert!(!ScheduleStatus::Completed.is_actionable());
    }
}
