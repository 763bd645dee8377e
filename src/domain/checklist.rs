// ==========================================
// 模具点检系统 - 检查表领域模型
// ==========================================
// 红线: 部署后的快照不可变，后续修改只能产生新版本
// ==========================================

use crate::domain::types::ChecklistVersionStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// ChecklistItem - 检查项
// ==========================================
// item_id 在版本间保持稳定，排程按 item_id 延续
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub item_id: String,
    pub title: String,
    pub description: Option<String>,
    pub required: bool,
    pub sort_order: i32,
    pub cycle_codes: Vec<String>, // 周期映射
}

impl ChecklistItem {
    pub fn applies_to(&self, cycle_code: &str) -> bool {
        self.cycle_codes.iter().any(|c| c == cycle_code)
    }
}

// ==========================================
// ChecklistDefinition - 草稿编辑输入
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistDefinition {
    pub target_scope: String,
    pub title: String,
    pub items: Vec<ChecklistItem>,
}

// ==========================================
// ChecklistSnapshot - 部署快照
// ==========================================
// 部署时整体序列化为 JSON 存入 checklist_version.snapshot_json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistSnapshot {
    pub version_id: String,
    pub version_no: i32,
    pub target_scope: String,
    pub title: String,
    pub deployed_at: NaiveDateTime,
    pub items: Vec<ChecklistItem>,
}

impl ChecklistSnapshot {
    /// 映射到指定周期码的检查项
    pub fn items_for_cycle<'a>(&'a self, cycle_code: &'a str) -> impl Iterator<Item = &'a ChecklistItem> + 'a {
        self.items.iter().filter(move |item| item.applies_to(cycle_code))
    }

    /// 指定周期码下的必填检查项
    pub fn required_items_for_cycle<'a>(&'a self, cycle_code: &'a str) -> impl Iterator<Item = &'a ChecklistItem> + 'a {
        self.items_for_cycle(cycle_code).filter(|item| item.required)
    }

    pub fn find_item(&self, item_id: &str) -> Option<&ChecklistItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    /// 全部 (item_id, cycle_code) 映射
    pub fn cycle_mappings(&self) -> Vec<(String, String)> {
        self.items
            .iter()
            .flat_map(|item| {
                item.cycle_codes
                    .iter()
                    .map(move |code| (item.item_id.clone(), code.clone()))
            })
            .collect()
    }
}

// ==========================================
// ChecklistVersion - 检查表版本
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistVersion {
    pub version_id: String,
    pub target_scope: String,
    pub title: String,
    pub version_no: i32,
    pub status: ChecklistVersionStatus,
    pub snapshot: Option<ChecklistSnapshot>, // 仅部署后存在
    pub is_current_deployed: bool,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deployed_at: Option<NaiveDateTime>,
    pub revision: i32, // 乐观锁：版本修订号
}

impl ChecklistVersion {
    pub fn is_draft(&self) -> bool {
        self.status == ChecklistVersionStatus::Draft
    }

    pub fn is_deployed(&self) -> bool {
        self.status == ChecklistVersionStatus::Deployed
    }
}

/// 当前部署版本及其快照
#[derive(Debug, Clone)]
pub struct DeployedChecklist {
    pub version: ChecklistVersion,
    pub snapshot: ChecklistSnapshot,
}
