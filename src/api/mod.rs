// ==========================================
// 模具点检系统 - 服务层
// ==========================================
// 职责: 对外暴露检查表版本库与点检实例管理
// 红线: 所有写操作在 db::run_in_transaction 内完成
// ==========================================

pub mod checklist_version_store;
pub mod error;
pub mod inspection_manager;

pub use checklist_version_store::ChecklistVersionStore;
pub use error::{InspectionError, InspectionResult};
pub use inspection_manager::{ApprovalOutcome, InspectionInstanceManager};
