// ==========================================
// 模具点检系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 约定: 配置缺失或格式错误时回退默认值并告警，不阻断业务
// ==========================================

use crate::config::engine_config::{
    EngineConfig, DEFAULT_CHECKLIST_SCOPE, DEFAULT_DUE_WINDOW_RATIO, DEFAULT_TX_MAX_RETRIES,
    DEFAULT_TX_RETRY_BACKOFF_MS,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO config_kv (scope_id, key, value, updated_at)
               VALUES (?1, ?2, ?3, datetime('now'))
               ON CONFLICT(scope_id, key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at"#,
            params![GLOBAL_SCOPE, key, value],
        )?;

        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }

    /// 读取并解析配置，缺失或格式错误时使用默认值
    fn get_parsed_or<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr + Copy,
    {
        let raw = match self.get_value(key)? {
            Some(raw) => raw,
            None => return Ok(default),
        };

        match raw.trim().parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %raw, "配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }

    /// 加载引擎配置
    pub fn load_engine_config(&self) -> RepositoryResult<EngineConfig> {
        let mut due_window_ratio =
            self.get_parsed_or(config_keys::DUE_WINDOW_RATIO, DEFAULT_DUE_WINDOW_RATIO)?;
        if !(0.0..1.0).contains(&due_window_ratio) {
            tracing::warn!(
                config_key = config_keys::DUE_WINDOW_RATIO,
                value = due_window_ratio,
                "到期窗口比例超出 [0, 1)，使用默认值"
            );
            due_window_ratio = DEFAULT_DUE_WINDOW_RATIO;
        }

        let default_checklist_scope = self
            .get_value(config_keys::DEFAULT_CHECKLIST_SCOPE)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CHECKLIST_SCOPE.to_string());

        Ok(EngineConfig {
            due_window_ratio,
            tx_max_retries: self.get_parsed_or(config_keys::TX_MAX_RETRIES, DEFAULT_TX_MAX_RETRIES)?,
            tx_retry_backoff_ms: self
                .get_parsed_or(config_keys::TX_RETRY_BACKOFF_MS, DEFAULT_TX_RETRY_BACKOFF_MS)?,
            default_checklist_scope,
        })
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let config_map = stmt
            .query_map(params![GLOBAL_SCOPE], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<BTreeMap<String, String>, _>>()?;

        Ok(serde_json::to_string(&json!(config_map))?)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    /// 打数周期到期窗口比例 (默认 0.1)
    pub const DUE_WINDOW_RATIO: &str = "due_window_ratio";
    /// 事务冲突最大重试次数 (默认 3)
    pub const TX_MAX_RETRIES: &str = "tx_max_retries";
    /// 事务重试退避基数，毫秒 (默认 25)
    pub const TX_RETRY_BACKOFF_MS: &str = "tx_retry_backoff_ms";
    /// 模具未指定范围时的检查表范围 (默认 global)
    pub const DEFAULT_CHECKLIST_SCOPE: &str = "default_checklist_scope";
}
