// ==========================================
// 模具点检系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: `*_tx` 关联函数在调用方持有的事务上执行
// ==========================================

pub mod audit_log_repo;
pub mod checklist_version_repo;
pub mod cycle_code_repo;
pub mod error;
pub mod inspection_repo;
pub mod mold_repo;
pub mod schedule_repo;

// 重导出核心仓储
pub use audit_log_repo::AuditLogRepository;
pub use checklist_version_repo::ChecklistVersionRepository;
pub use cycle_code_repo::CycleCodeRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use inspection_repo::InspectionInstanceRepository;
pub use mold_repo::MoldRepository;
pub use schedule_repo::ScheduleRepository;
