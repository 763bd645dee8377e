// ==========================================
// 模具点检系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod audit;
pub mod checklist;
pub mod cycle_code;
pub mod inspection;
pub mod mold;
pub mod schedule;
pub mod types;

// 重导出核心类型
pub use audit::{AuditAction, AuditLog};
pub use checklist::{
    ChecklistDefinition, ChecklistItem, ChecklistSnapshot, ChecklistVersion, DeployedChecklist,
};
pub use cycle_code::CycleCode;
pub use inspection::{InspectionInstance, ItemResult, ItemResultInput};
pub use mold::MoldSnapshot;
pub use schedule::{
    InspectionSchedule, MeasuredValue, MoldReading, ScheduleClassification, ScheduleView,
};
pub use types::{ChecklistVersionStatus, CycleUnit, InspectionStatus, ItemOutcome, ScheduleStatus};
