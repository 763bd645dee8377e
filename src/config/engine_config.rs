// ==========================================
// 模具点检系统 - 引擎配置
// ==========================================
// 由 ConfigManager 从 config_kv 加载，缺省值如下
// ==========================================

use crate::db::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_DUE_WINDOW_RATIO: f64 = 0.1;
pub const DEFAULT_TX_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TX_RETRY_BACKOFF_MS: u64 = 25;
pub const DEFAULT_CHECKLIST_SCOPE: &str = "global";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 打数周期"到期窗口"占间隔的比例（到期点之前的最后 10%）
    pub due_window_ratio: f64,
    /// 瞬时冲突的最大重试次数
    pub tx_max_retries: u32,
    /// 重试退避基数（毫秒，线性递增）
    pub tx_retry_backoff_ms: u64,
    /// 模具未指定检查表范围时使用的范围
    pub default_checklist_scope: String,
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.tx_max_retries,
            backoff: Duration::from_millis(self.tx_retry_backoff_ms),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            due_window_ratio: DEFAULT_DUE_WINDOW_RATIO,
            tx_max_retries: DEFAULT_TX_MAX_RETRIES,
            tx_retry_backoff_ms: DEFAULT_TX_RETRY_BACKOFF_MS,
            default_checklist_scope: DEFAULT_CHECKLIST_SCOPE.to_string(),
        }
    }
}
