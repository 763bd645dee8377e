// ==========================================
// 模具点检系统 - 点检周期码
// ==========================================
// 参考数据: 一个日历周期 + 若干打数档位，创建后不可变
// ==========================================

use crate::domain::types::CycleUnit;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCode {
    pub code: String,   // 周期码 (如 SHOT_20K)
    pub unit: CycleUnit,
    pub interval: i64,  // 间隔: 打数 或 天数
    pub label: String,  // 显示名称
}

impl CycleCode {
    pub fn new(code: &str, unit: CycleUnit, interval: i64, label: &str) -> Self {
        Self {
            code: code.to_string(),
            unit,
            interval,
            label: label.to_string(),
        }
    }
}
