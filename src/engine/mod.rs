// ==========================================
// 模具点检系统 - 引擎层
// ==========================================
// 职责: 周期码算术、排程分类与推进、事件发布接口
// 红线: 分类为纯函数；排程推进只发生在审批事务内
// ==========================================

pub mod clock;
pub mod cycle_code_registry;
pub mod events;
pub mod mold_registry;
pub mod schedule_engine;

// 重导出核心引擎
pub use clock::{Clock, FixedClock, SystemClock};
pub use cycle_code_registry::{
    next_calendar_target, next_shot_target, next_target, CycleCodeRegistry, CYCLE_DAILY,
    CYCLE_SHOT_100K, CYCLE_SHOT_20K, CYCLE_SHOT_300K, CYCLE_SHOT_50K,
};
pub use events::{
    InspectionEvent, InspectionEventPublisher, InspectionEventType, NoOpEventPublisher,
    OptionalEventPublisher,
};
pub use mold_registry::MoldRegistry;
pub use schedule_engine::{advance_schedule, classify_schedule, ScheduleEngine};
