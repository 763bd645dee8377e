// ==========================================
// 模具点检系统 - 点检实例领域模型
// ==========================================
// 红线: checklist_version_id 在创建时绑定，之后永不改变
// ==========================================

use crate::domain::schedule::MeasuredValue;
use crate::domain::types::{InspectionStatus, ItemOutcome};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: String,
    pub outcome: ItemOutcome,
    pub measured_text: Option<String>, // 实测值 (自由文本)
    pub note: Option<String>,
    pub recorded_by: String,
    pub recorded_at: NaiveDateTime,
}

/// 录入检查项结果的输入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResultInput {
    pub outcome: ItemOutcome,
    pub measured_text: Option<String>,
    pub note: Option<String>,
}

impl ItemResultInput {
    pub fn outcome(outcome: ItemOutcome) -> Self {
        Self {
            outcome,
            measured_text: None,
            note: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionInstance {
    pub instance_id: String,
    pub mold_id: String,
    pub checklist_version_id: String,
    pub cycle_code_id: String,
    pub status: InspectionStatus,
    pub baseline: MeasuredValue, // 创建时的计量基线
    pub results: Vec<ItemResult>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub submitted_by: Option<String>,
    pub submitted_at: Option<NaiveDateTime>,
    pub approved_by: Option<String>,
    pub approved_at: Option<NaiveDateTime>,
    pub return_note: Option<String>, // 最近一次退回说明
    pub returned_by: Option<String>,
    pub returned_at: Option<NaiveDateTime>,
    pub revision: i32,
}

impl InspectionInstance {
    pub fn result_for(&self, item_id: &str) -> Option<&ItemResult> {
        self.results.iter().find(|r| r.item_id == item_id)
    }
}
