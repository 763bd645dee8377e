// ==========================================
// 模具点检系统 - 核心库
// ==========================================
// 核心: 点检排程与检查表版本引擎
// 技术栈: Rust + SQLite
// 外部协作方: 模具台账（上游，只读）、告警服务（下游，只读排程）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 周期码算术与排程
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/写事务）
pub mod db;

// 日志系统
pub mod logging;

// 服务层 - 检查表版本库与点检实例
pub mod api;

// 应用层 - 组合根
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ChecklistVersionStatus, CycleUnit, InspectionStatus, ItemOutcome, ScheduleStatus,
};

// 领域实体
pub use domain::{
    ChecklistDefinition, ChecklistItem, ChecklistSnapshot, ChecklistVersion, CycleCode,
    InspectionInstance, InspectionSchedule, ItemResult, ItemResultInput, MeasuredValue,
    MoldReading, MoldSnapshot, ScheduleClassification, ScheduleView,
};

// 引擎
pub use engine::{CycleCodeRegistry, ScheduleEngine};

// 服务
pub use api::{ChecklistVersionStore, InspectionError, InspectionInstanceManager, InspectionResult};

// 应用
pub use app::AppState;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "模具点检系统";
