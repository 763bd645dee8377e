// ==========================================
// 模具点检系统 - 审计日志
// ==========================================
// 红线: 所有状态迁移必须在同一事务内留痕
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    CreateDraft,
    UpdateDraft,
    TransitionVersion,
    DeployVersion,
    CreateInspection,
    RecordItemResult,
    SubmitInspection,
    ReturnInspection,
    ApproveInspection,
    AdvanceSchedule,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateDraft => "CREATE_DRAFT",
            AuditAction::UpdateDraft => "UPDATE_DRAFT",
            AuditAction::TransitionVersion => "TRANSITION_VERSION",
            AuditAction::DeployVersion => "DEPLOY_VERSION",
            AuditAction::CreateInspection => "CREATE_INSPECTION",
            AuditAction::RecordItemResult => "RECORD_ITEM_RESULT",
            AuditAction::SubmitInspection => "SUBMIT_INSPECTION",
            AuditAction::ReturnInspection => "RETURN_INSPECTION",
            AuditAction::ApproveInspection => "APPROVE_INSPECTION",
            AuditAction::AdvanceSchedule => "ADVANCE_SCHEDULE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub log_id: String,
    pub entity_type: String, // checklist_version / inspection_instance / inspection_schedule
    pub entity_id: String,
    pub action: String,
    pub actor: String,
    pub payload_json: Option<Value>,
    pub created_at: NaiveDateTime,
}

impl AuditLog {
    pub fn new(
        entity_type: &str,
        entity_id: &str,
        action: AuditAction,
        actor: &str,
        payload_json: Option<Value>,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            log_id: uuid::Uuid::new_v4().to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: action.as_str().to_string(),
            actor: actor.to_string(),
            payload_json,
            created_at,
        }
    }
}
