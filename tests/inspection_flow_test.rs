// ==========================================
// 点检实例流程测试
// ==========================================
// 职责: 验证 创建 → 录入 → 提交 → 审批/退回 全流程，及审批推进排程
// 红线: 审批失败时实例状态与排程整体回滚
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod inspection_flow_test {
    use chrono::Duration;
    use mold_inspection::app::AppState;
    use mold_inspection::engine::{InspectionEvent, InspectionEventPublisher, InspectionEventType};
    use mold_inspection::{
        InspectionError, InspectionStatus, ItemOutcome, ItemResultInput, MeasuredValue,
        ScheduleStatus, ScheduleView,
    };
    use std::error::Error;
    use std::sync::{Arc, Mutex};

    use crate::test_helpers::*;

    const MOLD: &str = "M1";

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<InspectionEvent>>,
    }

    impl InspectionEventPublisher for RecordingPublisher {
        fn publish(&self, event: InspectionEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
            self.events.lock().unwrap().push(event);
            Ok(String::new())
        }
    }

    /// 部署标准检查表并登记模具
    fn setup(state: &AppState, shots: i64) {
        deploy(&state.checklist_store, &standard_definition(SCOPE));
        insert_mold(state, MOLD, None, shots);
    }

    fn schedule_view(state: &AppState, item_id: &str, cycle: &str) -> ScheduleView {
        state
            .schedule_engine
            .list_for_mold(MOLD)
            .unwrap()
            .into_iter()
            .find(|v| v.schedule.item_id == item_id && v.schedule.cycle_code_id == cycle)
            .unwrap()
    }

    fn pass() -> ItemResultInput {
        ItemResultInput::outcome(ItemOutcome::Pass)
    }

    #[test]
    fn test_create_binds_deployed_snapshot_and_syncs_schedules() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 19_500);

        let instance = state.inspection_manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        let deployed = state.checklist_store.get_deployed(SCOPE).unwrap();

        assert_eq!(instance.status, InspectionStatus::Draft);
        assert_eq!(instance.checklist_version_id, deployed.version.version_id);
        assert_eq!(instance.baseline, MeasuredValue::Shots(19_500));

        // 快照中每个 (检查项, 周期码) 都建立了排程
        let views = state.schedule_engine.list_for_mold(MOLD).unwrap();
        assert_eq!(views.len(), 4);
        assert_eq!(schedule_view(&state, "COOLING", "SHOT_100K").schedule.next_due, MeasuredValue::Shots(100_000));
        assert_eq!(
            schedule_view(&state, "SURFACE", "DAILY").schedule.next_due,
            MeasuredValue::Date(today() + Duration::days(1))
        );
    }

    #[test]
    fn test_schedule_classification_follows_upstream_shots() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 19_000);
        state.inspection_manager.create(MOLD, "SHOT_20K", "alice").unwrap();

        // 到期点 20000，窗口 10%: 19000 落在窗口内
        let view = schedule_view(&state, "CAVITY", "SHOT_20K");
        assert_eq!(view.classification.status, ScheduleStatus::Due);
        assert_eq!(view.classification.overdue_percentage, 0.0);

        set_mold_shots(&state, MOLD, 21_000);
        let view = schedule_view(&state, "CAVITY", "SHOT_20K");
        assert_eq!(view.classification.status, ScheduleStatus::Overdue);
        assert!((view.classification.overdue_percentage - 5.0).abs() < 1e-9);

        set_mold_shots(&state, MOLD, 5_000);
        let view = schedule_view(&state, "CAVITY", "SHOT_20K");
        assert_eq!(view.classification.status, ScheduleStatus::Upcoming);
    }

    #[test]
    fn test_approve_advances_every_item_of_cycle() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 19_500);
        let manager = &state.inspection_manager;

        let instance = manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        manager.record_item_result(&instance.instance_id, "CAVITY", pass(), "alice").unwrap();
        manager.submit(&instance.instance_id, "alice").unwrap();
        let outcome = manager.approve(&instance.instance_id, "bob").unwrap();

        assert_eq!(outcome.instance.status, InspectionStatus::Approved);
        assert_eq!(outcome.instance.approved_by.as_deref(), Some("bob"));

        // 该周期下的全部检查项都推进，包括未录入的选填项 VENT
        assert_eq!(outcome.advanced_schedules.len(), 2);
        let cavity = schedule_view(&state, "CAVITY", "SHOT_20K");
        assert_eq!(cavity.schedule.last_done, Some(MeasuredValue::Shots(19_500)));
        assert_eq!(cavity.schedule.next_due, MeasuredValue::Shots(20_000));
        assert_eq!(cavity.schedule.revision, 2);
        assert_eq!(cavity.classification.status, ScheduleStatus::Completed);

        let vent = schedule_view(&state, "VENT", "SHOT_20K");
        assert_eq!(vent.schedule.last_done, Some(MeasuredValue::Shots(19_500)));
        assert_eq!(vent.schedule.revision, 2);

        // 其他周期不受影响
        assert_eq!(schedule_view(&state, "COOLING", "SHOT_100K").schedule.revision, 1);

        set_mold_shots(&state, MOLD, 19_600);
        assert_eq!(schedule_view(&state, "CAVITY", "SHOT_20K").classification.status, ScheduleStatus::Due);

        let logs = state
            .audit_log_repo
            .list_by_entity("inspection_instance", &instance.instance_id)
            .unwrap();
        let actions: Vec<&str> = logs.iter().map(|l| l.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["CREATE_INSPECTION", "RECORD_ITEM_RESULT", "SUBMIT_INSPECTION", "APPROVE_INSPECTION"]
        );
        let schedule_logs = state
            .audit_log_repo
            .list_by_entity("inspection_schedule", &cavity.schedule.schedule_id)
            .unwrap();
        assert_eq!(schedule_logs.len(), 1);
        assert_eq!(schedule_logs[0].action, "ADVANCE_SCHEDULE");
    }

    #[test]
    fn test_approve_without_results_advances_optional_item() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        deploy(
            &state.checklist_store,
            &definition(SCOPE, vec![item("VENT", false, &["SHOT_20K"])]),
        );
        insert_mold(&state, MOLD, None, 21_000);
        let manager = &state.inspection_manager;

        assert_eq!(schedule_view(&state, "VENT", "SHOT_20K").classification.status, ScheduleStatus::Overdue);

        let instance = manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        let submitted = manager.submit(&instance.instance_id, "alice").unwrap();
        assert!(submitted.results.is_empty());
        let outcome = manager.approve(&instance.instance_id, "bob").unwrap();

        assert_eq!(outcome.advanced_schedules.len(), 1);
        let vent = schedule_view(&state, "VENT", "SHOT_20K");
        assert_eq!(vent.schedule.last_done, Some(MeasuredValue::Shots(21_000)));
        assert_eq!(vent.schedule.next_due, MeasuredValue::Shots(40_000));
        assert_ne!(vent.classification.status, ScheduleStatus::Overdue);
        assert_eq!(vent.classification.status, ScheduleStatus::Completed);
    }

    #[test]
    fn test_calendar_cycle_advances_by_days() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 0);
        let manager = &state.inspection_manager;

        let instance = manager.create(MOLD, "DAILY", "alice").unwrap();
        assert_eq!(instance.baseline, MeasuredValue::Date(today()));

        manager.record_item_result(&instance.instance_id, "SURFACE", pass(), "alice").unwrap();
        manager.submit(&instance.instance_id, "alice").unwrap();
        manager.approve(&instance.instance_id, "bob").unwrap();

        let surface = schedule_view(&state, "SURFACE", "DAILY");
        assert_eq!(surface.schedule.last_done, Some(MeasuredValue::Date(today())));
        assert_eq!(surface.schedule.next_due, MeasuredValue::Date(today() + Duration::days(1)));
        assert_eq!(surface.classification.status, ScheduleStatus::Completed);
    }

    #[test]
    fn test_instance_stays_pinned_after_redeploy() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 19_500);
        let manager = &state.inspection_manager;

        let pinned = manager.create(MOLD, "SHOT_20K", "alice").unwrap();

        // 新版本: 删去 VENT，新增 LUBE
        let mut def_b = standard_definition(SCOPE);
        def_b.items.retain(|i| i.item_id != "VENT");
        def_b.items.push(item("LUBE", true, &["SHOT_20K"]));
        let b = deploy(&state.checklist_store, &def_b);

        // 旧实例仍按旧快照校验
        manager.record_item_result(&pinned.instance_id, "VENT", pass(), "alice").unwrap();
        let err = manager
            .record_item_result(&pinned.instance_id, "LUBE", pass(), "alice")
            .unwrap_err();
        assert!(matches!(err, InspectionError::Validation { .. }));
        manager.record_item_result(&pinned.instance_id, "CAVITY", pass(), "alice").unwrap();
        let submitted = manager.submit(&pinned.instance_id, "alice").unwrap();
        assert_ne!(submitted.checklist_version_id, b.version_id);

        // 新实例绑定新部署版本，且 LUBE 成为必填
        let fresh = manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        assert_eq!(fresh.checklist_version_id, b.version_id);
        manager.record_item_result(&fresh.instance_id, "CAVITY", pass(), "alice").unwrap();
        match manager.submit(&fresh.instance_id, "alice").unwrap_err() {
            InspectionError::Validation { missing_items, .. } => assert_eq!(missing_items, vec!["LUBE".to_string()]),
            other => panic!("unexpected error: {}", other),
        }

        let instances = manager.list_for_mold(MOLD).unwrap();
        assert_eq!(instances.len(), 2);
    }

    #[test]
    fn test_submit_requires_all_required_items() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 19_500);
        let manager = &state.inspection_manager;

        let instance = manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        manager.record_item_result(&instance.instance_id, "VENT", pass(), "alice").unwrap();

        match manager.submit(&instance.instance_id, "alice").unwrap_err() {
            InspectionError::Validation { missing_items, .. } => {
                assert_eq!(missing_items, vec!["CAVITY".to_string()])
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(manager.get(&instance.instance_id).unwrap().status, InspectionStatus::Draft);

        // 不属于该周期的检查项被拒绝
        let err = manager
            .record_item_result(&instance.instance_id, "COOLING", pass(), "alice")
            .unwrap_err();
        assert!(matches!(err, InspectionError::Validation { .. }));

        // 覆盖录入
        manager
            .record_item_result(&instance.instance_id, "CAVITY", ItemResultInput::outcome(ItemOutcome::Fail), "alice")
            .unwrap();
        let updated = manager.record_item_result(&instance.instance_id, "CAVITY", pass(), "carol").unwrap();
        assert_eq!(updated.results.len(), 2);
        assert_eq!(updated.result_for("CAVITY").unwrap().outcome, ItemOutcome::Pass);
        assert_eq!(updated.result_for("CAVITY").unwrap().recorded_by, "carol");
    }

    #[test]
    fn test_illegal_state_operations_are_rejected() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 19_500);
        let manager = &state.inspection_manager;

        let instance = manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        let id = instance.instance_id.as_str();

        assert!(matches!(manager.approve(id, "bob"), Err(InspectionError::InvalidState(_))));
        assert!(matches!(
            manager.return_to_draft(id, "bob", "请补充"),
            Err(InspectionError::InvalidState(_))
        ));

        manager.record_item_result(id, "CAVITY", pass(), "alice").unwrap();
        manager.submit(id, "alice").unwrap();
        assert!(matches!(
            manager.record_item_result(id, "VENT", pass(), "alice"),
            Err(InspectionError::InvalidState(_))
        ));
        assert!(matches!(manager.submit(id, "alice"), Err(InspectionError::InvalidState(_))));

        manager.approve(id, "bob").unwrap();
        assert!(matches!(manager.approve(id, "bob"), Err(InspectionError::InvalidState(_))));

        // 排程只推进一次
        assert_eq!(schedule_view(&state, "CAVITY", "SHOT_20K").schedule.revision, 2);
        assert!(matches!(manager.get("missing"), Err(InspectionError::NotFound(_))));
    }

    #[test]
    fn test_return_to_draft_leaves_schedules_untouched() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 19_500);
        let manager = &state.inspection_manager;

        let instance = manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        let id = instance.instance_id.as_str();
        manager.record_item_result(id, "CAVITY", pass(), "alice").unwrap();
        manager.submit(id, "alice").unwrap();

        assert!(matches!(
            manager.return_to_draft(id, "bob", "  "),
            Err(InspectionError::Validation { .. })
        ));

        let before = schedule_view(&state, "CAVITY", "SHOT_20K").schedule;
        let returned = manager.return_to_draft(id, "bob", "型腔照片不清晰").unwrap();
        assert_eq!(returned.status, InspectionStatus::Draft);
        assert_eq!(returned.return_note.as_deref(), Some("型腔照片不清晰"));
        assert_eq!(returned.submitted_by, None);
        assert_eq!(schedule_view(&state, "CAVITY", "SHOT_20K").schedule, before);

        // 退回后可重新提交并审批
        manager.submit(id, "alice").unwrap();
        manager.approve(id, "bob").unwrap();
        assert_eq!(
            schedule_view(&state, "CAVITY", "SHOT_20K").schedule.last_done,
            Some(MeasuredValue::Shots(19_500))
        );
    }

    #[test]
    fn test_failed_advance_rolls_back_approval() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        setup(&state, 19_500);
        let manager = &state.inspection_manager;

        let instance = manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        let id = instance.instance_id.as_str();
        manager.record_item_result(id, "CAVITY", pass(), "alice").unwrap();
        manager.record_item_result(id, "VENT", pass(), "alice").unwrap();
        manager.submit(id, "alice").unwrap();

        // VENT 排程写入失败
        {
            let conn = state.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER fail_vent_advance BEFORE UPDATE ON inspection_schedule
                 WHEN OLD.item_id = 'VENT'
                 BEGIN SELECT RAISE(ABORT, 'vent advance rejected'); END;",
            )
            .unwrap();
        }

        let cavity_before = schedule_view(&state, "CAVITY", "SHOT_20K").schedule;
        assert!(manager.approve(id, "bob").is_err());

        let after = manager.get(id).unwrap();
        assert_eq!(after.status, InspectionStatus::Submitted);
        assert_eq!(after.approved_by, None);
        assert_eq!(schedule_view(&state, "CAVITY", "SHOT_20K").schedule, cavity_before);

        let approvals = state
            .audit_log_repo
            .list_by_entity("inspection_instance", id)
            .unwrap()
            .into_iter()
            .filter(|l| l.action == "APPROVE_INSPECTION")
            .count();
        assert_eq!(approvals, 0);

        // 故障解除后审批成功
        {
            let conn = state.conn.lock().unwrap();
            conn.execute_batch("DROP TRIGGER fail_vent_advance;").unwrap();
        }
        let outcome = manager.approve(id, "bob").unwrap();
        assert_eq!(outcome.advanced_schedules.len(), 2);
    }

    #[test]
    fn test_create_rejections() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        insert_mold(&state, MOLD, None, 100);
        let manager = &state.inspection_manager;

        // 尚无部署版本
        assert!(matches!(manager.create(MOLD, "SHOT_20K", "alice"), Err(InspectionError::NotFound(_))));

        deploy(&state.checklist_store, &standard_definition(SCOPE));
        assert!(matches!(manager.create("M404", "SHOT_20K", "alice"), Err(InspectionError::NotFound(_))));
        assert!(matches!(manager.create(MOLD, "SHOT_1K", "alice"), Err(InspectionError::NotFound(_))));

        // 部署版本没有映射到 SHOT_300K 的检查项
        assert!(matches!(
            manager.create(MOLD, "SHOT_300K", "alice"),
            Err(InspectionError::Validation { .. })
        ));
        assert!(manager.list_for_mold(MOLD).unwrap().is_empty());
    }

    #[test]
    fn test_mold_scope_selects_checklist() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let state = open_state(&db_path);
        deploy(&state.checklist_store, &standard_definition(SCOPE));
        let press = deploy(
            &state.checklist_store,
            &definition("press-line", vec![item("GUIDE_PIN", true, &["SHOT_50K"])]),
        );
        insert_mold(&state, MOLD, Some("press-line"), 1_000);

        let instance = state.inspection_manager.create(MOLD, "SHOT_50K", "alice").unwrap();
        assert_eq!(instance.checklist_version_id, press.version_id);
        assert_eq!(state.schedule_engine.list_for_mold(MOLD).unwrap().len(), 1);
    }

    #[test]
    fn test_approve_publishes_events() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let recorder = Arc::new(RecordingPublisher::default());
        let state = open_state_with_publisher(&db_path, recorder.clone());
        setup(&state, 19_500);
        let manager = &state.inspection_manager;

        let instance = manager.create(MOLD, "SHOT_20K", "alice").unwrap();
        manager.record_item_result(&instance.instance_id, "CAVITY", pass(), "alice").unwrap();
        manager.submit(&instance.instance_id, "alice").unwrap();
        manager.approve(&instance.instance_id, "bob").unwrap();

        let events = recorder.events.lock().unwrap();
        let types: Vec<InspectionEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                InspectionEventType::VersionDeployed,
                InspectionEventType::InspectionApproved,
                InspectionEventType::ScheduleAdvanced,
                InspectionEventType::ScheduleAdvanced,
            ]
        );
        assert_eq!(events[1].entity_id, instance.instance_id);
        assert!(events[2..].iter().all(|e| e.mold_id.as_deref() == Some(MOLD)));
    }
}
