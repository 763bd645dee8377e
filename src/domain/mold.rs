// ==========================================
// 模具点检系统 - 模具只读视图
// ==========================================
// 模具台账由外部维护，本系统只读取打数与检查表范围
// ==========================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoldSnapshot {
    pub mold_id: String,
    pub mold_code: String,
    pub checklist_scope: Option<String>, // 为空时使用默认范围
    pub current_shots: i64,
}

impl MoldSnapshot {
    pub fn scope_or<'a>(&'a self, default_scope: &'a str) -> &'a str {
        self.checklist_scope
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default_scope)
    }
}
