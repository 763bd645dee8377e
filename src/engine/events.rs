// ==========================================
// 模具点检系统 - 引擎层事件发布
// ==========================================
// 职责: 定义点检事件发布 trait，实现依赖倒置
// 说明: 事件在事务提交之后发布；发布失败只记录日志，不回滚已提交事务
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 点检事件类型
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InspectionEventType {
    /// 检查表版本部署（当前部署版本切换）
    VersionDeployed,
    /// 点检实例审批通过
    InspectionApproved,
    /// 排程推进到下一周期
    ScheduleAdvanced,
}

impl InspectionEventType {
    pub fn as_str(&self) -> &str {
        match self {
            InspectionEventType::VersionDeployed => "VersionDeployed",
            InspectionEventType::InspectionApproved => "InspectionApproved",
            InspectionEventType::ScheduleAdvanced => "ScheduleAdvanced",
        }
    }
}

/// 点检事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionEvent {
    pub event_type: InspectionEventType,
    /// 主体ID（version_id / instance_id / schedule_id）
    pub entity_id: String,
    /// 相关模具（版本部署事件为空）
    pub mold_id: Option<String>,
    /// 检查表范围（仅版本部署事件）
    pub target_scope: Option<String>,
    pub actor: Option<String>,
}

impl InspectionEvent {
    pub fn version_deployed(version_id: &str, target_scope: &str, actor: &str) -> Self {
        Self {
            event_type: InspectionEventType::VersionDeployed,
            entity_id: version_id.to_string(),
            mold_id: None,
            target_scope: Some(target_scope.to_string()),
            actor: Some(actor.to_string()),
        }
    }

    pub fn inspection_approved(instance_id: &str, mold_id: &str, approver_id: &str) -> Self {
        Self {
            event_type: InspectionEventType::InspectionApproved,
            entity_id: instance_id.to_string(),
            mold_id: Some(mold_id.to_string()),
            target_scope: None,
            actor: Some(approver_id.to_string()),
        }
    }

    pub fn schedule_advanced(schedule_id: &str, mold_id: &str) -> Self {
        Self {
            event_type: InspectionEventType::ScheduleAdvanced,
            entity_id: schedule_id.to_string(),
            mold_id: Some(mold_id.to_string()),
            target_scope: None,
            actor: None,
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 点检事件发布者（下游如告警服务实现）
///
/// # 返回
/// - `Ok(id)`: 下游回执 ID（如果支持）或空字符串
pub trait InspectionEventPublisher: Send + Sync {
    fn publish(&self, event: InspectionEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl InspectionEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: InspectionEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - entity_id={}, event_type={}",
            event.entity_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 可选的事件发布者包装
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn InspectionEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn InspectionEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件；失败只告警，不向调用方传播
    pub fn publish_after_commit(&self, event: InspectionEvent) {
        if let Some(publisher) = &self.inner {
            let event_type = event.event_type.as_str().to_string();
            let entity_id = event.entity_id.clone();
            if let Err(e) = publisher.publish(event) {
                tracing::warn!(
                    event_type = %event_type,
                    entity_id = %entity_id,
                    error = %e,
                    "事件发布失败（事务已提交，不回滚）"
                );
            }
        } else {
            tracing::debug!(
                "OptionalEventPublisher: 未配置发布者，跳过事件 - entity_id={}, event_type={}",
                event.entity_id,
                event.event_type.as_str()
            );
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}
