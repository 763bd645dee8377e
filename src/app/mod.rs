// ==========================================
// 模具点检系统 - 应用层
// ==========================================
// 职责: 组合根，装配仓储/引擎/服务
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState, DB_PATH_ENV};
