// ==========================================
// 模具点检系统 - 应用状态
// ==========================================
// 职责: 组合根。所有仓储、引擎、服务在此一次性显式装配
// 红线: 不做运行时自注册，依赖只经由构造参数注入
// ==========================================

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rusqlite::Connection;

use crate::api::{ChecklistVersionStore, InspectionInstanceManager};
use crate::config::{ConfigManager, EngineConfig};
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::{
    Clock, CycleCodeRegistry, MoldRegistry, OptionalEventPublisher, ScheduleEngine, SystemClock,
};
use crate::repository::{
    AuditLogRepository, ChecklistVersionRepository, CycleCodeRepository,
    InspectionInstanceRepository, MoldRepository, ScheduleRepository,
};

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "MOLD_INSPECTION_DB_PATH";

/// 应用状态
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 共享连接（所有仓储与写事务共用）
    pub conn: Arc<Mutex<Connection>>,

    /// 启动时加载的引擎配置
    pub config: EngineConfig,

    pub config_manager: Arc<ConfigManager>,

    /// 周期码目录
    pub cycle_codes: Arc<CycleCodeRegistry>,

    /// 检查表版本库
    pub checklist_store: Arc<ChecklistVersionStore>,

    /// 点检排程引擎
    pub schedule_engine: Arc<ScheduleEngine>,

    /// 点检实例管理
    pub inspection_manager: Arc<InspectionInstanceManager>,

    /// 审计日志仓储（用于审计追踪）
    pub audit_log_repo: Arc<AuditLogRepository>,
}

impl AppState {
    /// 打开数据库文件并装配
    pub fn new(db_path: String) -> anyhow::Result<Self> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .with_context(|| format!("无法打开数据库: {}", db_path))?;

        Self::from_connection(db_path, conn, Arc::new(SystemClock), OptionalEventPublisher::none())
    }

    /// 在已有连接上装配（测试可注入固定时钟与事件发布者）
    pub fn from_connection(
        db_path: String,
        conn: Connection,
        clock: Arc<dyn Clock>,
        publisher: OptionalEventPublisher,
    ) -> anyhow::Result<Self> {
        init_schema(&conn).context("数据库结构初始化失败")?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let config = config_manager
            .load_engine_config()
            .context("引擎配置加载失败")?;
        let retry_policy = config.retry_policy();

        // ==========================================
        // Repository 层
        // ==========================================
        let cycle_code_repo = CycleCodeRepository::new(conn.clone());
        let version_repo = Arc::new(ChecklistVersionRepository::new(conn.clone()));
        let schedule_repo = Arc::new(ScheduleRepository::new(conn.clone()));
        let instance_repo = Arc::new(InspectionInstanceRepository::new(conn.clone()));
        let audit_log_repo = Arc::new(AuditLogRepository::new(conn.clone()));
        let mold_registry: Arc<dyn MoldRegistry> = Arc::new(MoldRepository::new(conn.clone()));

        // 周期码目录：以库内为准，库为空时写入标准目录
        let cycle_codes = CycleCodeRegistry::load_from(&cycle_code_repo).context("周期码目录加载失败")?;
        cycle_codes.seed(&cycle_code_repo).context("周期码目录写入失败")?;
        let cycle_codes = Arc::new(cycle_codes);

        // ==========================================
        // Engine 层
        // ==========================================
        let schedule_engine = Arc::new(ScheduleEngine::new(
            conn.clone(),
            schedule_repo,
            version_repo.clone(),
            cycle_codes.clone(),
            mold_registry.clone(),
            clock.clone(),
            retry_policy,
            config.due_window_ratio,
            config.default_checklist_scope.clone(),
        ));

        // ==========================================
        // 服务层
        // ==========================================
        let checklist_store = Arc::new(ChecklistVersionStore::new(
            conn.clone(),
            version_repo,
            cycle_codes.clone(),
            schedule_engine.clone(),
            clock.clone(),
            publisher.clone(),
            retry_policy,
        ));

        let inspection_manager = Arc::new(InspectionInstanceManager::new(
            conn.clone(),
            instance_repo,
            mold_registry,
            schedule_engine.clone(),
            clock,
            publisher,
            retry_policy,
            config.default_checklist_scope.clone(),
        ));

        tracing::info!(
            cycle_codes = cycle_codes.list().len(),
            due_window_ratio = config.due_window_ratio,
            tx_max_retries = config.tx_max_retries,
            "AppState初始化完成"
        );

        Ok(Self {
            db_path,
            conn,
            config,
            config_manager,
            cycle_codes,
            checklist_store,
            schedule_engine,
            inspection_manager,
            audit_log_repo,
        })
    }
}

/// 默认数据库路径
///
/// 优先级: 环境变量 `MOLD_INSPECTION_DB_PATH` → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./mold_inspection.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("mold-inspection");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("mold_inspection.db");
        }
    }

    path.to_string_lossy().to_string()
}
