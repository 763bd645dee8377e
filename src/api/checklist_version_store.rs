// ==========================================
// 模具点检系统 - 检查表版本库
// ==========================================
// 职责: 检查表定义生命周期 (draft → review → approved → deployed)，部署时生成不可变快照
// 红线: 只允许单步前进迁移，其余请求一律 VersionState 错误
// 红线: 同一范围任意时刻至多一个 is_current_deployed 版本
// 红线: 快照部署后不可变，后续修改只能产生新版本
// ==========================================
// 部署串行化:
// - 进程内: 按范围登记"部署进行中"，并发部署显式失败
// - 跨进程: BEGIN IMMEDIATE 写锁 + 部分唯一索引
// ==========================================

use crate::api::error::{InspectionError, InspectionResult};
use crate::db::{run_in_transaction, RetryPolicy};
use crate::domain::audit::{AuditAction, AuditLog};
use crate::domain::checklist::{
    ChecklistDefinition, ChecklistItem, ChecklistSnapshot, ChecklistVersion, DeployedChecklist,
};
use crate::domain::mold::MoldSnapshot;
use crate::domain::types::ChecklistVersionStatus;
use crate::engine::clock::Clock;
use crate::engine::cycle_code_registry::CycleCodeRegistry;
use crate::engine::events::{InspectionEvent, OptionalEventPublisher};
use crate::engine::schedule_engine::ScheduleEngine;
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::checklist_version_repo::ChecklistVersionRepository;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::instrument;
use uuid::Uuid;

const ENTITY_TYPE: &str = "checklist_version";

// ==========================================
// ChecklistVersionStore - 检查表版本库
// ==========================================
pub struct ChecklistVersionStore {
    conn: Arc<Mutex<Connection>>,
    version_repo: Arc<ChecklistVersionRepository>,
    registry: Arc<CycleCodeRegistry>,
    schedule_engine: Arc<ScheduleEngine>,
    clock: Arc<dyn Clock>,
    publisher: OptionalEventPublisher,
    retry_policy: RetryPolicy,
    deploys_in_flight: Mutex<HashSet<String>>,
}

impl ChecklistVersionStore {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        version_repo: Arc<ChecklistVersionRepository>,
        registry: Arc<CycleCodeRegistry>,
        schedule_engine: Arc<ScheduleEngine>,
        clock: Arc<dyn Clock>,
        publisher: OptionalEventPublisher,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            conn,
            version_repo,
            registry,
            schedule_engine,
            clock,
            publisher,
            retry_policy,
            deploys_in_flight: Mutex::new(HashSet::new()),
        }
    }

    // ==========================================
    // 草稿编辑
    // ==========================================

    /// 创建草稿，版本号 = 范围内最大版本号 + 1
    #[instrument(skip(self, definition), fields(scope = %definition.target_scope, created_by = %created_by))]
    pub fn create_draft(
        &self,
        definition: &ChecklistDefinition,
        created_by: &str,
    ) -> InspectionResult<ChecklistVersion> {
        self.validate_definition(definition)?;

        let version = run_in_transaction(&self.conn, &self.retry_policy, "create_draft", |tx| {
            let now = self.clock.now();
            let mut version = ChecklistVersion {
                version_id: Uuid::new_v4().to_string(),
                target_scope: definition.target_scope.trim().to_string(),
                title: definition.title.clone(),
                version_no: 0,
                status: ChecklistVersionStatus::Draft,
                snapshot: None,
                is_current_deployed: false,
                created_by: created_by.to_string(),
                created_at: now,
                updated_at: now,
                deployed_at: None,
                revision: 1,
            };

            ChecklistVersionRepository::insert_with_next_version_no_tx(tx, &mut version)?;
            ChecklistVersionRepository::replace_items_tx(tx, &version.version_id, &definition.items)?;
            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    &version.version_id,
                    AuditAction::CreateDraft,
                    created_by,
                    Some(json!({
                        "target_scope": version.target_scope,
                        "version_no": version.version_no,
                        "item_count": definition.items.len(),
                    })),
                    now,
                ),
            )?;
            Ok::<_, InspectionError>(version)
        })?;

        tracing::info!(
            version_id = %version.version_id,
            version_no = version.version_no,
            "检查表草稿已创建"
        );
        Ok(version)
    }

    /// 整体替换草稿的检查项图（仅 draft 状态）
    #[instrument(skip(self, definition), fields(version_id = %version_id, actor = %actor))]
    pub fn update_draft(
        &self,
        version_id: &str,
        definition: &ChecklistDefinition,
        actor: &str,
    ) -> InspectionResult<ChecklistVersion> {
        self.validate_definition(definition)?;

        let version = run_in_transaction(&self.conn, &self.retry_policy, "update_draft", |tx| {
            let current = Self::require_version_tx(tx, version_id)?;
            if !current.is_draft() {
                return Err(InspectionError::VersionState(format!(
                    "版本{}处于{}状态，只有草稿可以编辑",
                    version_id, current.status
                )));
            }
            if current.target_scope != definition.target_scope.trim() {
                return Err(InspectionError::validation(format!(
                    "草稿范围不可变更: {} → {}",
                    current.target_scope, definition.target_scope
                )));
            }

            let now = self.clock.now();
            ChecklistVersionRepository::update_title_tx(tx, version_id, &definition.title, current.revision, now)?;
            ChecklistVersionRepository::replace_items_tx(tx, version_id, &definition.items)?;
            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    version_id,
                    AuditAction::UpdateDraft,
                    actor,
                    Some(json!({ "item_count": definition.items.len() })),
                    now,
                ),
            )?;

            Self::require_version_tx(tx, version_id)
        })?;

        tracing::info!("检查表草稿已更新");
        Ok(version)
    }

    /// 以当前部署快照为底稿创建新草稿
    #[instrument(skip(self), fields(scope = %target_scope, created_by = %created_by))]
    pub fn create_draft_from_deployed(
        &self,
        target_scope: &str,
        created_by: &str,
    ) -> InspectionResult<ChecklistVersion> {
        let deployed = self.get_deployed(target_scope)?;
        let definition = ChecklistDefinition {
            target_scope: deployed.snapshot.target_scope.clone(),
            title: deployed.snapshot.title.clone(),
            items: deployed.snapshot.items.clone(),
        };
        self.create_draft(&definition, created_by)
    }

    // ==========================================
    // 生命周期迁移
    // ==========================================

    /// 单步前进迁移；迁移到 deployed 时在同一事务内写快照并切换当前部署标记
    #[instrument(skip(self), fields(version_id = %version_id, target = %target, actor = %actor))]
    pub fn transition(
        &self,
        version_id: &str,
        target: ChecklistVersionStatus,
        actor: &str,
    ) -> InspectionResult<ChecklistVersion> {
        if target != ChecklistVersionStatus::Deployed {
            return self.transition_forward(version_id, target, actor);
        }

        let scope = self.get_version(version_id)?.target_scope;
        let _deploy_guard = self.begin_deploy(&scope)?;
        // 台账读取在事务外进行（台账与本系统可能共享连接）
        let molds = self.schedule_engine.molds_in_scope(&scope)?;
        let (version, previous, synced) = self.deploy(version_id, actor, &molds)?;

        tracing::info!(
            scope = %version.target_scope,
            previous = ?previous,
            molds = molds.len(),
            synced,
            "检查表版本已部署"
        );
        self.publisher
            .publish_after_commit(InspectionEvent::version_deployed(version_id, &version.target_scope, actor));
        Ok(version)
    }

    fn transition_forward(
        &self,
        version_id: &str,
        target: ChecklistVersionStatus,
        actor: &str,
    ) -> InspectionResult<ChecklistVersion> {
        let version = run_in_transaction(&self.conn, &self.retry_policy, "transition_version", |tx| {
            let current = Self::require_version_tx(tx, version_id)?;
            Self::check_forward_step(&current, target)?;

            let now = self.clock.now();
            ChecklistVersionRepository::update_status_tx(tx, version_id, target, current.revision, now)?;
            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    version_id,
                    AuditAction::TransitionVersion,
                    actor,
                    Some(json!({ "from": current.status.to_db_str(), "to": target.to_db_str() })),
                    now,
                ),
            )?;

            Self::require_version_tx(tx, version_id)
        })?;

        tracing::info!(status = %version.status, "检查表版本状态已迁移");
        Ok(version)
    }

    /// approved → deployed
    ///
    /// 事务内顺序: 取消旧标记 → 写快照 → 改状态 → 置新标记 → 为范围内模具建立排程 → 审计
    fn deploy(
        &self,
        version_id: &str,
        actor: &str,
        molds: &[MoldSnapshot],
    ) -> InspectionResult<(ChecklistVersion, Option<String>, usize)> {
        run_in_transaction(&self.conn, &self.retry_policy, "deploy_version", |tx| {
            let current = Self::require_version_tx(tx, version_id)?;
            Self::check_forward_step(&current, ChecklistVersionStatus::Deployed)?;

            let now = self.clock.now();
            let snapshot = ChecklistSnapshot {
                version_id: current.version_id.clone(),
                version_no: current.version_no,
                target_scope: current.target_scope.clone(),
                title: current.title.clone(),
                deployed_at: now,
                items: ChecklistVersionRepository::load_items_tx(tx, version_id)?,
            };

            let previous = ChecklistVersionRepository::clear_current_deployed_tx(tx, &current.target_scope)?;
            ChecklistVersionRepository::write_snapshot_tx(tx, version_id, &snapshot)?;
            ChecklistVersionRepository::update_status_tx(
                tx,
                version_id,
                ChecklistVersionStatus::Deployed,
                current.revision,
                now,
            )?;
            ChecklistVersionRepository::mark_current_deployed_tx(tx, version_id)?;
            let synced = self.schedule_engine.sync_scope_tx(tx, molds, &snapshot)?;
            AuditLogRepository::insert_tx(
                tx,
                &AuditLog::new(
                    ENTITY_TYPE,
                    version_id,
                    AuditAction::DeployVersion,
                    actor,
                    Some(json!({
                        "target_scope": current.target_scope,
                        "version_no": current.version_no,
                        "superseded_version_id": previous,
                        "created_schedules": synced,
                    })),
                    now,
                ),
            )?;

            Ok((Self::require_version_tx(tx, version_id)?, previous, synced))
        })
    }

    fn check_forward_step(current: &ChecklistVersion, target: ChecklistVersionStatus) -> InspectionResult<()> {
        if current.status.next() == Some(target) {
            return Ok(());
        }
        Err(InspectionError::VersionState(format!(
            "版本{}不允许从{}迁移到{}（只允许单步前进）",
            current.version_id, current.status, target
        )))
    }

    /// 登记范围部署进行中；已有部署在途时显式失败
    fn begin_deploy(&self, scope: &str) -> InspectionResult<DeployGuard<'_>> {
        let mut in_flight = self
            .deploys_in_flight
            .lock()
            .map_err(|e| InspectionError::Internal(format!("部署登记锁获取失败: {}", e)))?;

        if !in_flight.insert(scope.to_string()) {
            tracing::warn!(scope = %scope, "范围内已有部署进行中");
            return Err(InspectionError::VersionState(format!(
                "范围{}已有部署进行中，请稍后重试",
                scope
            )));
        }

        Ok(DeployGuard {
            in_flight: &self.deploys_in_flight,
            scope: scope.to_string(),
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 当前部署版本及快照
    pub fn get_deployed(&self, target_scope: &str) -> InspectionResult<DeployedChecklist> {
        let version = self
            .version_repo
            .find_current_deployed(target_scope)?
            .ok_or_else(|| InspectionError::NotFound(format!("范围{}尚无部署版本", target_scope)))?;
        Self::into_deployed(version)
    }

    /// 事务内读取当前部署版本（供点检实例创建绑定）
    pub fn get_deployed_tx(conn: &Connection, target_scope: &str) -> InspectionResult<DeployedChecklist> {
        let version = ChecklistVersionRepository::find_current_deployed_tx(conn, target_scope)?
            .ok_or_else(|| InspectionError::NotFound(format!("范围{}尚无部署版本", target_scope)))?;
        Self::into_deployed(version)
    }

    fn into_deployed(version: ChecklistVersion) -> InspectionResult<DeployedChecklist> {
        let snapshot = version.snapshot.clone().ok_or_else(|| {
            InspectionError::Internal(format!("部署版本{}缺少快照", version.version_id))
        })?;
        Ok(DeployedChecklist { version, snapshot })
    }

    pub fn get_version(&self, version_id: &str) -> InspectionResult<ChecklistVersion> {
        self.version_repo
            .find_by_id(version_id)?
            .ok_or_else(|| InspectionError::NotFound(format!("检查表版本{}不存在", version_id)))
    }

    /// 范围内全部版本（版本号降序）
    pub fn list_versions(&self, target_scope: &str) -> InspectionResult<Vec<ChecklistVersion>> {
        Ok(self.version_repo.list_by_scope(target_scope)?)
    }

    /// 版本的可编辑检查项图（草稿查看用）
    pub fn get_items(&self, version_id: &str) -> InspectionResult<Vec<ChecklistItem>> {
        self.get_version(version_id)?;
        Ok(self.version_repo.load_items(version_id)?)
    }

    /// 已部署（含被取代）版本的不可变快照
    pub fn get_snapshot(&self, version_id: &str) -> InspectionResult<ChecklistSnapshot> {
        let version = self.get_version(version_id)?;
        version.snapshot.ok_or_else(|| {
            InspectionError::VersionState(format!("版本{}尚未部署，没有快照", version_id))
        })
    }

    fn require_version_tx(conn: &Connection, version_id: &str) -> InspectionResult<ChecklistVersion> {
        ChecklistVersionRepository::find_by_id_tx(conn, version_id)?
            .ok_or_else(|| InspectionError::NotFound(format!("检查表版本{}不存在", version_id)))
    }

    // ==========================================
    // 定义校验
    // ==========================================

    fn validate_definition(&self, definition: &ChecklistDefinition) -> InspectionResult<()> {
        if definition.target_scope.trim().is_empty() {
            return Err(InspectionError::validation("检查表范围不能为空"));
        }
        if definition.items.is_empty() {
            return Err(InspectionError::validation("检查表至少需要一个检查项"));
        }

        let mut seen = HashSet::new();
        for item in &definition.items {
            if item.item_id.trim().is_empty() {
                return Err(InspectionError::validation("检查项ID不能为空"));
            }
            if !seen.insert(item.item_id.as_str()) {
                return Err(InspectionError::validation(format!("检查项ID重复: {}", item.item_id)));
            }
            if item.cycle_codes.is_empty() {
                return Err(InspectionError::validation(format!(
                    "检查项{}未映射任何周期码",
                    item.item_id
                )));
            }
            if let Some(unknown) = item.cycle_codes.iter().find(|c| !self.registry.contains(c)) {
                return Err(InspectionError::validation(format!(
                    "检查项{}引用了未知周期码: {}",
                    item.item_id, unknown
                )));
            }
        }
        Ok(())
    }
}

/// 部署在途登记，离开作用域时注销
struct DeployGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    scope: String,
}

impl Drop for DeployGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.scope);
        }
    }
}
