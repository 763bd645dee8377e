// ==========================================
// 模具点检系统 - 模具台账协作接口
// ==========================================
// 职责: 向引擎提供模具身份与当前打数
// 说明: Engine 层定义 trait，Repository 层实现（依赖倒置）
// 红线: 只读，本系统从不写入打数
// ==========================================

use crate::domain::mold::MoldSnapshot;
use crate::repository::error::RepositoryResult;

/// 模具台账（上游协作方）
///
/// 打数允许陈旧：陈旧读数只影响本次读取的派生分类，不影响存储正确性
pub trait MoldRegistry: Send + Sync {
    fn find_mold(&self, mold_id: &str) -> RepositoryResult<Option<MoldSnapshot>>;

    /// 台账中的全部模具（用于按范围建立排程）
    fn list_molds(&self) -> RepositoryResult<Vec<MoldSnapshot>>;
}
