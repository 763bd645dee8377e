// ==========================================
// 模具点检系统 - 点检实例管理
// ==========================================
// 职责: 点检执行记录 (draft → submitted → approved)
// 红线: 实例在创建时绑定当前部署快照，之后永不改变
// 红线: 审批是排程推进的唯一入口；状态变更与全部推进处于同一事务，任一失败整体回滚
// 红线: 本层不做重试以外的任何容错，失败的迁移原样上抛
// ==========================================
// 退回: submitted → draft（附说明），排程不受影响
// ==========================================

use crate::api::checklist_version_store::ChecklistVersionStore;
use crate::api::error::{InspectionError, InspectionResult};
use crate::db::{run_in_transaction, RetryPolicy};
use crate::domain::audit::{AuditAction, AuditLog};
use crate::domain::checklist::ChecklistSnapshot;
use crate::domain::inspection::{InspectionInstance, ItemResult, ItemResultInput};
use crate::domain::schedule::{InspectionSchedule, MoldReading};
use crate::domain::types::InspectionStatus;
use crate::engine::clock::Clock;
use crate::engine::events::{InspectionEvent, OptionalEventPublisher};
use crate::engine::mold_registry::MoldRegistry;
use crate::engine::schedule_engine::ScheduleEngine;
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::checklist_version_repo::ChecklistVersionRepository;
use crate::repository::inspection_repo::InspectionInstanceRepository;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::instrument;
use uuid::Uuid;

const ENTITY_TYPE: &str = "inspection_instance";

/// 审批结果：审批后的实例 + 本次推进的排程
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub instance: InspectionInstance,
    pub advanced_schedules: Vec<InspectionSchedule>,
}

// ==========================================
// InspectionInstanceManager - 点检实例管理器
// ==========================================
pub struct InspectionInstanceManager {
    conn: Arc<Mutex<Connection>>,
    instance_repo: Arc<InspectionInstanceRepository>,
    mold_registry: Arc<dyn MoldRegistry>,
    schedule_engine: Arc<ScheduleEngine>,
    clock: Arc<dyn Clock>,
    publisher: OptionalEventPublisher,
    retry_policy: RetryPolicy,
    default_scope: String,
}

impl InspectionInstanceManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        instance_repo: Arc<InspectionInstanceRepository>,
        mold_registry: Arc<dyn MoldRegistry>,
        schedule_engine: Arc<ScheduleEngine>,
        clock: Arc<dyn Clock>,
        publisher: OptionalEventPublisher,
        retry_policy: RetryPolicy,
        default_scope: String,
    ) -> Self {
        Self {
            conn,
            instance_repo,
            mold_registry,
            schedule_engine,
            clock,
            publisher,
            retry_policy,
            default_scope,
        }
    }

    // ==========================================
    // 创建
    // ==========================================

    /// 创建点检实例
    ///
    /// 绑定模具所属范围的当前部署快照，并以当前计量值（打数或今天）作为基线
    #[instrument(skip(self), fields(mold_id = %mold_id, cycle = %cycle_code_id, created_by = %created_by))]
    pub fn create(
        &self,
        mold_id: &str,
        cycle_code_id: &str,
        created_by: &str,
    ) -> InspectionResult<InspectionInstance> {
        // 台账读取在事务外进行（台账与本系统可能共享连接）
        let mold = self
            .mold_registry
            .find_mold(mold_id)?
            .ok_or_else(|| InspectionError::NotFound(format!("模具{}不存在", mold_id)))?;
        let cycle = self
            .schedule_engine
            .registry()
            .get(cycle_code_id)
            .cloned()
            .ok_or_else(|| InspectionError::NotFound(format!("周期码{}不存在", cycle_code_id)))?;
        let scope = mold.scope_or(&self.default_scope).to_string();

        let instance = run_in_transaction(&self.conn, &self.retry_policy, "create_inspection", |tx| {
            let deployed = ChecklistVersionStore::get_deployed_tx(tx, &scope)?;
            if deployed.snapshot.items_for_cycle(cycle_code_id).next().is_none() {
                return Err(InspectionError::validation(format!(
                    "部署版本{}没有映射到周期{}的检查项",
                    deployed.version.version_id, cycle_code_id
                )));
            }

            let now = self.clock.now();
            let baseline = MoldReading::new(mold.current_shots, now.date()).value_for(cycle.unit);
            let instance = InspectionInstance {
                instance_id: Uuid::new_v4().to_string(),
                mold_id: mold_id.to_string(),
                checklist_version_id: deployed.version.version_id.clone(),
                cycle_code_id: cycle_code_id.to_string(),
                status: InspectionStatus::Draft,
                baseline,
                results: Vec::new(),
                created_by: created_by.to_string(),
                created_at: now,
                submitted_by: None,
                submitted_at: None,
                approved_by: None,
                approved_at: None,
                return_note: None,
                returned_by: None,
                returned_at: None,
                revision: 1,
            };

            InspectionInstanceRepository::insert_tx(tx, &instance)?;
            // 模具首次受部署快照约束时建立排程
            self.schedule_engine
                .sync_mold_schedules_tx(tx, mold_id, &deployed.snapshot)?;
            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    &instance.instance_id,
                    AuditAction::CreateInspection,
                    created_by,
                    Some(json!({
                        "mold_id": mold_id,
                        "checklist_version_id": instance.checklist_version_id,
                        "cycle_code_id": cycle_code_id,
                        "baseline": instance.baseline,
                    })),
                    now,
                ),
            )?;
            Ok(instance)
        })?;

        tracing::info!(
            instance_id = %instance.instance_id,
            version_id = %instance.checklist_version_id,
            "点检实例已创建"
        );
        Ok(instance)
    }

    // ==========================================
    // 执行
    // ==========================================

    /// 录入检查项结果（仅 draft；同一检查项重复录入覆盖）
    #[instrument(skip(self, input), fields(instance_id = %instance_id, item_id = %item_id))]
    pub fn record_item_result(
        &self,
        instance_id: &str,
        item_id: &str,
        input: ItemResultInput,
        recorded_by: &str,
    ) -> InspectionResult<InspectionInstance> {
        run_in_transaction(&self.conn, &self.retry_policy, "record_item_result", |tx| {
            let instance = Self::require_instance_tx(tx, instance_id)?;
            Self::require_status(&instance, InspectionStatus::Draft, "录入结果")?;

            let snapshot = Self::bound_snapshot_tx(tx, &instance)?;
            let applies = snapshot
                .find_item(item_id)
                .map_or(false, |item| item.applies_to(&instance.cycle_code_id));
            if !applies {
                return Err(InspectionError::validation(format!(
                    "检查项{}不属于版本{}的{}周期",
                    item_id, instance.checklist_version_id, instance.cycle_code_id
                )));
            }

            let now = self.clock.now();
            let result = ItemResult {
                item_id: item_id.to_string(),
                outcome: input.outcome,
                measured_text: input.measured_text.clone(),
                note: input.note.clone(),
                recorded_by: recorded_by.to_string(),
                recorded_at: now,
            };
            InspectionInstanceRepository::upsert_result_tx(tx, instance_id, &result)?;
            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    instance_id,
                    AuditAction::RecordItemResult,
                    recorded_by,
                    Some(json!({ "item_id": item_id, "outcome": result.outcome.to_db_str() })),
                    now,
                ),
            )?;

            Self::require_instance_tx(tx, instance_id)
        })
    }

    /// draft → submitted；绑定快照中该周期的必填项必须全部有结果
    #[instrument(skip(self), fields(instance_id = %instance_id, submitted_by = %submitted_by))]
    pub fn submit(&self, instance_id: &str, submitted_by: &str) -> InspectionResult<InspectionInstance> {
        let instance = run_in_transaction(&self.conn, &self.retry_policy, "submit_inspection", |tx| {
            let mut instance = Self::require_instance_tx(tx, instance_id)?;
            Self::require_status(&instance, InspectionStatus::Draft, "提交")?;

            let snapshot = Self::bound_snapshot_tx(tx, &instance)?;
            let missing: Vec<String> = snapshot
                .required_items_for_cycle(&instance.cycle_code_id)
                .filter(|item| instance.result_for(&item.item_id).is_none())
                .map(|item| item.item_id.clone())
                .collect();
            if !missing.is_empty() {
                return Err(InspectionError::missing_required(missing));
            }

            let now = self.clock.now();
            let expected_revision = instance.revision;
            instance.status = InspectionStatus::Submitted;
            instance.submitted_by = Some(submitted_by.to_string());
            instance.submitted_at = Some(now);
            InspectionInstanceRepository::update_status_tx(tx, &instance, expected_revision)?;
            instance.revision += 1;

            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    instance_id,
                    AuditAction::SubmitInspection,
                    submitted_by,
                    Some(json!({ "result_count": instance.results.len() })),
                    now,
                ),
            )?;
            Ok(instance)
        })?;

        tracing::info!("点检实例已提交");
        Ok(instance)
    }

    /// submitted → approved，并推进绑定快照中该周期码下每个检查项的排程
    ///
    /// 推进使用实例基线作为完成值；状态变更、全部推进与审计处于同一事务
    #[instrument(skip(self), fields(instance_id = %instance_id, approver_id = %approver_id))]
    pub fn approve(&self, instance_id: &str, approver_id: &str) -> InspectionResult<ApprovalOutcome> {
        let outcome = run_in_transaction(&self.conn, &self.retry_policy, "approve_inspection", |tx| {
            let mut instance = Self::require_instance_tx(tx, instance_id)?;
            Self::require_status(&instance, InspectionStatus::Submitted, "审批")?;

            let now = self.clock.now();
            let expected_revision = instance.revision;
            instance.status = InspectionStatus::Approved;
            instance.approved_by = Some(approver_id.to_string());
            instance.approved_at = Some(now);
            InspectionInstanceRepository::update_status_tx(tx, &instance, expected_revision)?;
            instance.revision += 1;

            // 绑定快照中该周期码下的全部检查项（含未填写的选填项）
            let snapshot = Self::bound_snapshot_tx(tx, &instance)?;
            let item_ids: BTreeSet<String> = snapshot
                .items_for_cycle(&instance.cycle_code_id)
                .map(|item| item.item_id.clone())
                .collect();

            let mut advanced_schedules = Vec::new();
            for item_id in &item_ids {
                let advanced = self.schedule_engine.advance_tx(
                    tx,
                    &instance.mold_id,
                    item_id,
                    &instance.cycle_code_id,
                    instance.baseline,
                    now,
                    approver_id,
                )?;
                advanced_schedules.push(advanced);
            }

            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    instance_id,
                    AuditAction::ApproveInspection,
                    approver_id,
                    Some(json!({
                        "baseline": instance.baseline,
                        "advanced_schedule_ids": advanced_schedules
                            .iter()
                            .map(|s| s.schedule_id.as_str())
                            .collect::<Vec<_>>(),
                    })),
                    now,
                ),
            )?;

            Ok::<_, InspectionError>(ApprovalOutcome {
                instance,
                advanced_schedules,
            })
        })?;

        tracing::info!(advanced = outcome.advanced_schedules.len(), "点检实例已审批");

        self.publisher.publish_after_commit(InspectionEvent::inspection_approved(
            instance_id,
            &outcome.instance.mold_id,
            approver_id,
        ));
        for schedule in &outcome.advanced_schedules {
            self.publisher
                .publish_after_commit(InspectionEvent::schedule_advanced(&schedule.schedule_id, &schedule.mold_id));
        }

        Ok(outcome)
    }

    /// 退回: submitted → draft（附说明）；排程不受影响
    #[instrument(skip(self, note), fields(instance_id = %instance_id, reviewer_id = %reviewer_id))]
    pub fn return_to_draft(
        &self,
        instance_id: &str,
        reviewer_id: &str,
        note: &str,
    ) -> InspectionResult<InspectionInstance> {
        if note.trim().is_empty() {
            return Err(InspectionError::validation("退回必须填写说明"));
        }

        let instance = run_in_transaction(&self.conn, &self.retry_policy, "return_inspection", |tx| {
            let mut instance = Self::require_instance_tx(tx, instance_id)?;
            Self::require_status(&instance, InspectionStatus::Submitted, "退回")?;

            let now = self.clock.now();
            let expected_revision = instance.revision;
            instance.status = InspectionStatus::Draft;
            instance.submitted_by = None;
            instance.submitted_at = None;
            instance.return_note = Some(note.to_string());
            instance.returned_by = Some(reviewer_id.to_string());
            instance.returned_at = Some(now);
            InspectionInstanceRepository::update_status_tx(tx, &instance, expected_revision)?;
            instance.revision += 1;

            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    instance_id,
                    AuditAction::ReturnInspection,
                    reviewer_id,
                    Some(json!({ "note": note })),
                    now,
                ),
            )?;
            Ok::<_, InspectionError>(instance)
        })?;

        tracing::info!("点检实例已退回草稿");
        Ok(instance)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get(&self, instance_id: &str) -> InspectionResult<InspectionInstance> {
        self.instance_repo
            .find_by_id(instance_id)?
            .ok_or_else(|| InspectionError::NotFound(format!("点检实例{}不存在", instance_id)))
    }

    pub fn list_for_mold(&self, mold_id: &str) -> InspectionResult<Vec<InspectionInstance>> {
        Ok(self.instance_repo.list_by_mold(mold_id)?)
    }

    // ==========================================
    // 内部
    // ==========================================

    fn require_instance_tx(conn: &Connection, instance_id: &str) -> InspectionResult<InspectionInstance> {
        InspectionInstanceRepository::find_by_id_tx(conn, instance_id)?
            .ok_or_else(|| InspectionError::NotFound(format!("点检实例{}不存在", instance_id)))
    }

    fn require_status(
        instance: &InspectionInstance,
        expected: InspectionStatus,
        operation: &str,
    ) -> InspectionResult<()> {
        if instance.status == expected {
            return Ok(());
        }
        Err(InspectionError::InvalidState(format!(
            "点检实例{}处于{}状态，不允许{}（需要{}）",
            instance.instance_id, instance.status, operation, expected
        )))
    }

    /// 实例绑定的快照（版本被取代后依然可读）
    fn bound_snapshot_tx(conn: &Connection, instance: &InspectionInstance) -> InspectionResult<ChecklistSnapshot> {
        let version = ChecklistVersionRepository::find_by_id_tx(conn, &instance.checklist_version_id)?
            .ok_or_else(|| {
                InspectionError::NotFound(format!("检查表版本{}不存在", instance.checklist_version_id))
            })?;
        version.snapshot.ok_or_else(|| {
            InspectionError::Internal(format!("绑定版本{}缺少快照", instance.checklist_version_id))
        })
    }
}
