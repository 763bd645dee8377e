// ==========================================
// 模具点检系统 - 服务层错误类型
// ==========================================
// 职责: 定义点检核心对外错误分类，转换 Repository 错误
// 红线: 除瞬时冲突在事务边界有限重试外，错误一律原样上抛，不吞没
// ==========================================

use crate::db::TransientError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 点检核心错误类型
#[derive(Error, Debug)]
pub enum InspectionError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    /// 非法的生命周期迁移，或部署冲突
    #[error("版本状态错误: {0}")]
    VersionState(String),

    /// 必填项缺失等输入校验失败
    #[error("校验失败: {message}")]
    Validation {
        message: String,
        missing_items: Vec<String>,
    },

    /// 在不允许的状态下执行操作
    #[error("无效状态: {0}")]
    InvalidState(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    /// 存储层检测到的并发推进/并发部署冲突（可重试）
    #[error("并发冲突: {0}")]
    ScheduleConflict(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    Database(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InspectionError {
    pub fn validation(message: impl Into<String>) -> Self {
        InspectionError::Validation {
            message: message.into(),
            missing_items: Vec::new(),
        }
    }

    /// 提交时缺少必填项结果
    pub fn missing_required(missing_items: Vec<String>) -> Self {
        InspectionError::Validation {
            message: format!("必填检查项缺少结果: {}", missing_items.join(", ")),
            missing_items,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, InspectionError::ScheduleConflict(_))
    }
}

impl TransientError for InspectionError {
    fn is_transient(&self) -> bool {
        InspectionError::is_transient(self)
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for InspectionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                entity,
                id,
                expected,
                actual,
            } => InspectionError::ScheduleConflict(format!(
                "{}(id={})已被并发修改（期望revision={}，实际revision={}）",
                entity, id, expected, actual
            )),
            RepositoryError::Busy(msg) => InspectionError::ScheduleConflict(msg),
            // 部分唯一索引 (target_scope WHERE is_current_deployed = 1) 或 version_no 分配碰撞
            RepositoryError::UniqueConstraintViolation(msg) if msg.contains("checklist_version.target_scope") => {
                InspectionError::ScheduleConflict(format!("并发部署冲突: {}", msg))
            }
            RepositoryError::UniqueConstraintViolation(msg) => {
                InspectionError::Database(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::NotFound { entity, id } => {
                InspectionError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::SnapshotImmutable(version_id) => {
                InspectionError::VersionState(format!("版本{}的部署快照不可修改", version_id))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                InspectionError::NotFound(format!("引用的记录不存在: {}", msg))
            }
            RepositoryError::LockError(msg) => {
                InspectionError::Database(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => InspectionError::Database(msg),
            RepositoryError::SerializationError(msg) => {
                InspectionError::Internal(format!("序列化失败: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                InspectionError::Internal(format!("字段值错误 (field={}): {}", field, message))
            }
            RepositoryError::Other(e) => InspectionError::Other(e),
        }
    }
}

/// Result 类型别名
pub type InspectionResult<T> = Result<T, InspectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_are_transient() {
        let err: InspectionError = RepositoryError::OptimisticLockFailure {
            entity: "InspectionSchedule".to_string(),
            id: "S1".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_transient());

        let err: InspectionError = RepositoryError::Busy("database is locked".to_string()).into();
        assert!(matches!(err, InspectionError::ScheduleConflict(_)));
    }

    #[test]
    fn test_deployed_flag_collision_maps_to_conflict() {
        let err: InspectionError = RepositoryError::UniqueConstraintViolation(
            "UNIQUE constraint failed: checklist_version.target_scope".to_string(),
        )
        .into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_non_transient_errors_surface_unchanged() {
        let err: InspectionError = RepositoryError::NotFound {
            entity: "Mold".to_string(),
            id: "M404".to_string(),
        }
        .into();
        assert!(matches!(err, InspectionError::NotFound(ref m) if m.contains("M404")));
        assert!(!err.is_transient());

        let err = InspectionError::missing_required(vec!["CAVITY".to_string(), "VENT".to_string()]);
        match err {
            InspectionError::Validation { missing_items, message } => {
                assert_eq!(missing_items, vec!["CAVITY", "VENT"]);
                assert!(message.contains("CAVITY"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
