// ==========================================
// 模具点检系统 - 命令行入口
// ==========================================
// 输出全部 due/overdue 排程（供告警服务或人工巡检使用）
// 用法: mold-inspection [数据库路径]
// ==========================================

use mold_inspection::app::{get_default_db_path, AppState};
use mold_inspection::{logging, MeasuredValue, ScheduleStatus};

fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", mold_inspection::APP_NAME, mold_inspection::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args().nth(1).unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path)?;
    let actionable = state.schedule_engine.list_actionable()?;

    if actionable.is_empty() {
        println!("没有到期或超期的点检排程");
        return Ok(());
    }

    println!(
        "{:<12} {:<16} {:<10} {:<9} {:>12} {:>12} {:>9}",
        "模具", "检查项", "周期", "状态", "当前", "到期点", "超期%"
    );
    for view in &actionable {
        let schedule = &view.schedule;
        let status = match view.classification.status {
            ScheduleStatus::Overdue => "超期",
            ScheduleStatus::Due => "到期",
            _ => "-",
        };
        println!(
            "{:<12} {:<16} {:<10} {:<9} {:>12} {:>12} {:>9.1}",
            schedule.mold_id,
            schedule.item_id,
            schedule.cycle_code_id,
            status,
            display_value(&view.classification.current),
            display_value(&schedule.next_due),
            view.classification.overdue_percentage,
        );
    }

    let overdue = actionable
        .iter()
        .filter(|v| v.classification.status == ScheduleStatus::Overdue)
        .count();
    tracing::info!(total = actionable.len(), overdue, "点检到期报告完成");
    Ok(())
}

fn display_value(value: &MeasuredValue) -> String {
    match value {
        MeasuredValue::Shots(v) => v.to_string(),
        MeasuredValue::Date(d) => d.to_string(),
    }
}
