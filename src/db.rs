// ==========================================
// 模具点检系统 - SQLite 连接与事务边界
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 统一写事务入口: BEGIN IMMEDIATE + 有限次重试
// ==========================================

use crate::repository::error::RepositoryError;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::Mutex;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version（与 `schema.sql` 对齐）
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 时间戳存储格式
pub const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// 日期存储格式
pub const DATE_FMT: &str = "%Y-%m-%d";

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 初始化数据库结构（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    if let Some(v) = read_schema_version(conn)? {
        if v != CURRENT_SCHEMA_VERSION {
            tracing::warn!(
                expected = CURRENT_SCHEMA_VERSION,
                actual = v,
                "schema_version 与代码不一致"
            );
        }
    }
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

// ==========================================
// 时间字段编解码
// ==========================================

pub fn format_datetime(ts: &NaiveDateTime) -> String {
    ts.format(DATETIME_FMT).to_string()
}

pub fn format_date(d: &NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

pub fn parse_datetime_col(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub fn parse_date_col(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// 枚举/字典列取到未知值
pub fn invalid_text_col(idx: usize, field: &str, raw: &str) -> rusqlite::Error {
    let message = format!("{} 列取值非法: {}", field, raw);
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}

pub fn parse_opt_datetime_col(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    raw.map(|s| parse_datetime_col(idx, &s)).transpose()
}

pub fn parse_opt_date_col(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    raw.map(|s| parse_date_col(idx, &s)).transpose()
}

// ==========================================
// 写事务与重试
// ==========================================

/// 事务冲突重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 首次执行之外的最大重试次数
    pub max_retries: u32,
    /// 线性退避基数
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

/// 可重试错误判定
pub trait TransientError {
    fn is_transient(&self) -> bool;
}

/// 在共享连接上执行一个写事务
///
/// # 说明
/// - 使用 BEGIN IMMEDIATE，事务开始即持有写锁，读者只能看到提交前或提交后的状态
/// - 闭包返回 Err 时事务回滚；瞬时冲突（busy/乐观锁）按策略重试，闭包会被重新执行
/// - 非瞬时错误原样返回，不做吞没
pub fn run_in_transaction<T, E, F>(
    conn: &Mutex<Connection>,
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, E>
where
    E: From<RepositoryError> + TransientError + std::fmt::Display,
    F: FnMut(&Transaction<'_>) -> Result<T, E>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        let result = {
            let mut guard = conn
                .lock()
                .map_err(|e| E::from(RepositoryError::LockError(e.to_string())))?;
            let outcome = match guard.transaction_with_behavior(TransactionBehavior::Immediate) {
                Ok(tx) => match f(&tx) {
                    Ok(value) => tx
                        .commit()
                        .map(|_| value)
                        .map_err(|e| E::from(RepositoryError::from(e))),
                    Err(e) => Err(e),
                },
                Err(e) => Err(E::from(RepositoryError::from(e))),
            };
            outcome
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                tracing::warn!(operation = %operation, attempt, error = %e, "事务冲突，准备重试");
                std::thread::sleep(policy.backoff * attempt);
            }
            Err(e) => return Err(e),
        }
    }
}
