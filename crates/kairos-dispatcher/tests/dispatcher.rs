use chrono::{Duration, Local, Utc};
use kairos_core::NodeIdentity;
use kairos_dispatcher::{
    Action, DispatchError, Dispatcher, DispatcherOptions, EntityKind, Program, Server, IMMEDIATELY,
};
use kairos_scheduler::{Immediately, Scheduler, Timely};
use serde_json::json;
use tempfile::TempDir;

fn dispatcher(out: &TempDir) -> Dispatcher {
    Dispatcher::new(
        DispatcherOptions::new(NodeIdentity::new("127.0.0.1", 18181)).output_dir(out.path()),
    )
}

fn every_second() -> Scheduler {
    Scheduler::Timely(Timely::every(1))
}

fn read(out: &TempDir, file: &str) -> String {
    std::fs::read_to_string(out.path().join(file)).unwrap_or_default()
}

#[test]
fn add_twice_is_a_conflict_and_unknown_is_not_found() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("foo", Action::success()).unwrap();

    let err = d.add_action("foo", Action::success()).unwrap_err();
    assert!(matches!(err, DispatchError::Conflict { kind: EntityKind::Action, .. }));
    assert_eq!(err.code(), "CONFLICT");

    let err = d.get_scheduler("nope").unwrap_err();
    assert!(matches!(err, DispatchError::NotFound { kind: EntityKind::Scheduler, .. }));
    assert!(d.schedule_action("nope", "foo").is_err());
}

#[test]
fn binding_installs_one_job_per_scheduler() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("a1", Action::success()).unwrap();
    d.add_action("a2", Action::success()).unwrap();
    d.add_scheduler("s", every_second()).unwrap();

    d.schedule_action("s", "a1").unwrap();
    d.schedule_action("s", "a2").unwrap();
    assert_eq!(d.get_scheduled_action_count(), 2);
    assert_eq!(d.job_count(), 1);

    d.unschedule_scheduler("s").unwrap();
    assert_eq!(d.get_scheduled_action_count(), 0);
    assert_eq!(d.job_count(), 0);
    assert_eq!(d.action_names(), vec!["a1", "a2"]);
    assert_eq!(d.scheduler_names(), vec!["s"]);
}

#[test]
fn binding_the_same_pair_twice_is_a_noop() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("foo", Action::success()).unwrap();
    d.add_scheduler("bar", every_second()).unwrap();

    d.schedule_action("bar", "foo").unwrap();
    d.schedule_action("bar", "foo").unwrap();
    assert_eq!(d.get_scheduled_action_count(), 1);
    assert_eq!(d.job_count(), 1);
}

#[test]
fn last_unbind_removes_the_job() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("a1", Action::success()).unwrap();
    d.add_action("a2", Action::success()).unwrap();
    d.add_scheduler("s", every_second()).unwrap();
    d.schedule_action("s", "a1").unwrap();
    d.schedule_action("s", "a2").unwrap();

    d.unschedule_scheduler_action("s", "a1").unwrap();
    assert_eq!(d.job_count(), 1);
    d.unschedule_scheduler_action("s", "a2").unwrap();
    assert_eq!(d.job_count(), 0);
    // unbinding an unbound pair is fine
    d.unschedule_scheduler_action("s", "a2").unwrap();
}

#[test]
fn immediate_scheduler_runs_once_and_holds_nothing() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action(
        "note",
        Action::FileAppend {
            file: Some("note.txt".into()),
            payload: Some(json!("hello")),
            header: None,
        },
    )
    .unwrap();
    d.add_scheduler(IMMEDIATELY, Scheduler::Immediately(Immediately::default()))
        .unwrap();

    d.schedule_action(IMMEDIATELY, "note").unwrap();
    assert_eq!(read(&out, "note.txt"), "hello\n");
    assert_eq!(d.get_scheduled_action_count(), 0);
    assert_eq!(d.job_count(), 0);
}

#[test]
fn firing_runs_bound_actions_in_binding_order() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    for (name, text) in [("first", "1"), ("second", "2")] {
        d.add_action(
            name,
            Action::FileAppend {
                file: Some("order.txt".into()),
                payload: Some(json!(text)),
                header: None,
            },
        )
        .unwrap();
    }
    d.add_action("broken", Action::failure("nope")).unwrap();
    d.add_scheduler("s", every_second()).unwrap();
    d.schedule_action("s", "first").unwrap();
    d.schedule_action("s", "broken").unwrap();
    d.schedule_action("s", "second").unwrap();

    let report = d.fire("s");
    assert_eq!(report.succeeded, vec!["first", "second"]);
    assert_eq!(report.failed, vec!["broken"]);
    assert_eq!(read(&out, "order.txt"), "1\n2\n");
}

#[test]
fn tick_drives_the_executor() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action(
        "foo",
        Action::FileAppend {
            file: Some("o.txt".into()),
            payload: Some(json!({"k": "v"})),
            header: None,
        },
    )
    .unwrap();
    d.add_scheduler("bar", every_second()).unwrap();
    d.schedule_action("bar", "foo").unwrap();

    let fired = d.tick_jobs_at(Local::now().naive_local() + Duration::seconds(2));
    assert_eq!(fired, 1);
    assert!(read(&out, "o.txt").contains("\"k\""));
}

#[test]
fn terminate_unschedules_the_firing_scheduler() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("stop", Action::Terminate {}).unwrap();
    d.add_action("after", Action::file_append("after.txt")).unwrap();
    d.add_scheduler("s", every_second()).unwrap();
    d.schedule_action("s", "stop").unwrap();
    d.schedule_action("s", "after").unwrap();

    let report = d.fire("s");
    assert_eq!(report.terminated_by.as_deref(), Some("stop"));
    assert!(report.succeeded.is_empty());
    assert_eq!(d.get_scheduled_action_count(), 0);
    assert_eq!(d.job_count(), 0);
    assert_eq!(read(&out, "after.txt"), "");
}

#[test]
fn deleting_an_action_cascades() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("a", Action::success()).unwrap();
    d.add_action("b", Action::success()).unwrap();
    d.add_scheduler("s", every_second()).unwrap();
    d.add_scheduler("t", every_second()).unwrap();
    d.schedule_action("s", "a").unwrap();
    d.schedule_action("t", "a").unwrap();
    d.schedule_action("t", "b").unwrap();
    let later = Utc::now() + Duration::hours(1);
    d.defer_action("s", "a", later).unwrap();
    d.expire_action("t", "a", later).unwrap();
    d.add_program("uses_a", Program::default().with_body("s", &["a"])).unwrap();
    d.add_program("uses_b", Program::default().with_body("t", &["b"])).unwrap();

    d.delete_action("a").unwrap();

    assert_eq!(d.get_scheduled_action_count(), 1);
    assert_eq!(d.get_deferred_action_count(), 0);
    assert_eq!(d.get_expiring_action_count(), 0);
    // s lost its only action, t still has b
    assert_eq!(d.job_tags(), vec!["t"]);
    assert_eq!(d.program_names(), vec!["uses_b"]);
}

#[test]
fn deleting_a_scheduler_cascades() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("a", Action::success()).unwrap();
    d.add_scheduler("s", every_second()).unwrap();
    d.schedule_action("s", "a").unwrap();
    d.expire_action("s", "a", Utc::now() + Duration::hours(1)).unwrap();
    d.add_program("p", Program::default().with_body("s", &["a"])).unwrap();
    d.schedule_program("p", Utc::now(), Utc::now() + Duration::hours(1))
        .unwrap();

    d.delete_scheduler("s").unwrap();

    assert_eq!(d.job_count(), 0);
    assert_eq!(d.get_scheduled_action_count(), 0);
    assert_eq!(d.get_expiring_action_count(), 0);
    assert_eq!(d.get_deferred_program_count(), 0);
    assert!(d.program_names().is_empty());
    assert_eq!(d.action_names(), vec!["a"]);
}

#[test]
fn programs_must_reference_existing_names() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("a", Action::success()).unwrap();
    d.add_scheduler("s", every_second()).unwrap();

    let err = d
        .add_program("ghost", Program::default().with_body("s", &["missing"]))
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    let err = d.add_program("empty", Program::default()).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    // a prologue needs the immediately scheduler
    let with_prologue = Program {
        prologue_name: Some("a".into()),
        ..Program::default()
    };
    assert!(d.add_program("pro", with_prologue.clone()).is_err());
    d.add_scheduler(IMMEDIATELY, Scheduler::Immediately(Immediately::default()))
        .unwrap();
    d.add_program("pro", with_prologue).unwrap();
}

#[test]
fn program_stop_before_start_is_rejected() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("a", Action::success()).unwrap();
    d.add_scheduler("s", every_second()).unwrap();
    d.add_program("p", Program::default().with_body("s", &["a"])).unwrap();

    let now = Utc::now();
    let err = d.schedule_program("p", now, now - Duration::seconds(1)).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(d.get_deferred_program_count(), 0);
}

#[test]
fn program_offsets_out_of_range_are_rejected() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("foo", Action::success()).unwrap();
    d.add_scheduler("bar", every_second()).unwrap();

    let huge = Program {
        offset_seconds: i64::MAX / 100,
        ..Program::default()
    }
    .with_body("bar", &["foo"]);
    let err = d.add_program("huge", huge).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    let far = Program {
        offset_seconds: 400_000 * 365 * 86_400,
        ..Program::default()
    }
    .with_body("bar", &["foo"]);
    d.add_program("far", far).unwrap();
    let now = Utc::now();
    let err = d.schedule_program("far", now, now + Duration::seconds(60)).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(d.get_deferred_program_count(), 0);
    assert!(d.sweep_at(now + Duration::seconds(1)).is_empty());
}

#[test]
fn sweep_promotes_deferrals_exactly_once() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("foo", Action::success()).unwrap();
    d.add_scheduler("bar", every_second()).unwrap();
    let t = Utc::now();
    d.defer_action("bar", "foo", t).unwrap();

    // not yet strictly in the past
    assert!(d.sweep_at(t).is_empty());
    assert_eq!(d.get_deferred_action_count(), 1);

    let report = d.sweep_at(t + Duration::seconds(1));
    assert_eq!(report.promoted, 1);
    assert_eq!(d.get_scheduled_action_count(), 1);
    assert_eq!(d.get_deferred_action_count(), 0);
    assert_eq!(d.job_count(), 1);

    assert!(d.sweep_at(t + Duration::seconds(2)).is_empty());
    assert_eq!(d.get_scheduled_action_count(), 1);
}

#[test]
fn sweep_retires_expirations() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("foo", Action::success()).unwrap();
    d.add_scheduler("bar", every_second()).unwrap();
    d.schedule_action("bar", "foo").unwrap();
    let t = Utc::now() + Duration::seconds(1);
    d.expire_action("bar", "foo", t).unwrap();

    let report = d.sweep_at(t + Duration::seconds(1));
    assert_eq!(report.retired, 1);
    assert_eq!(d.get_scheduled_action_count(), 0);
    assert_eq!(d.get_expiring_action_count(), 0);
    assert_eq!(d.job_count(), 0);
}

#[test]
fn sweep_expands_programs_into_the_tables() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    for name in ["foo1", "foo2", "foo3"] {
        d.add_action(
            name,
            Action::FileAppend {
                file: Some(format!("{name}.txt")),
                payload: Some(json!(name)),
                header: None,
            },
        )
        .unwrap();
    }
    d.add_scheduler("bar", every_second()).unwrap();
    d.add_scheduler(IMMEDIATELY, Scheduler::Immediately(Immediately::default()))
        .unwrap();
    let program = Program {
        prologue_name: Some("foo1".into()),
        epilogue_name: Some("foo3".into()),
        ..Program::default()
    }
    .with_body("bar", &["foo2"]);
    d.add_program("pbe", program).unwrap();

    let start = Utc::now();
    let stop = start + Duration::seconds(4);
    d.schedule_program("pbe", start, stop).unwrap();
    assert_eq!(d.get_deferred_program_count(), 1);

    // expansion, prologue and body deferral all land in one sweep
    let report = d.sweep_at(start + Duration::seconds(1));
    assert_eq!(report.programs, 1);
    assert_eq!(report.promoted, 2);
    assert_eq!(d.get_deferred_program_count(), 0);
    assert_eq!(read(&out, "foo1.txt"), "foo1\n");
    assert_eq!(d.get_scheduled_action_count(), 1);
    assert_eq!(d.get_expiring_action_count(), 1);
    assert_eq!(d.get_deferred_action_count(), 1);

    d.fire("bar");
    assert_eq!(read(&out, "foo2.txt"), "foo2\n");

    let report = d.sweep_at(stop + Duration::seconds(1));
    assert_eq!(report.retired, 1);
    assert_eq!(report.promoted, 1);
    assert_eq!(read(&out, "foo3.txt"), "foo3\n");
    assert_eq!(d.get_scheduled_action_count(), 0);
    assert_eq!(d.job_count(), 0);
}

#[test]
fn clear_all_scheduling_is_idempotent() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("foo", Action::success()).unwrap();
    d.add_scheduler("bar", every_second()).unwrap();
    d.schedule_action("bar", "foo").unwrap();
    d.defer_action("bar", "foo", Utc::now()).unwrap();

    d.clear_all_scheduling();
    let once = d.snapshot();
    d.clear_all_scheduling();
    assert_eq!(d.snapshot(), once);
    assert_eq!(d.job_count(), 0);
    assert_eq!(once.tables.scheduled_count(), 0);
    assert_eq!(once.actions.len(), 1);
}

#[test]
fn replace_all_swaps_state_and_leaves_timed_empty() {
    let out = TempDir::new().unwrap();
    let source = dispatcher(&out);
    source.add_action("foo", Action::success()).unwrap();
    source.add_scheduler("bar", every_second()).unwrap();
    source.add_server("pi", Server::new("pi.local", 8181)).unwrap();
    source.schedule_action("bar", "foo").unwrap();
    source
        .defer_action("bar", "foo", Utc::now() + Duration::minutes(5))
        .unwrap();
    let other = source.snapshot();

    let d = dispatcher(&out);
    d.add_action("old", Action::success()).unwrap();
    d.add_scheduler("old", every_second()).unwrap();
    d.schedule_action("old", "old").unwrap();

    d.replace_all(other.clone());
    assert_eq!(d.snapshot(), other);
    assert_eq!(d.job_count(), 0);

    assert_eq!(d.reschedule_all_schedulers(), 1);
    assert_eq!(d.job_tags(), vec!["bar"]);
}

#[test]
fn setting_a_scheduler_reprimes_its_binding() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("foo", Action::success()).unwrap();
    d.add_scheduler("bar", every_second()).unwrap();
    d.schedule_action("bar", "foo").unwrap();

    d.set_scheduler("bar", Scheduler::Timely(Timely::every(5))).unwrap();
    assert_eq!(d.job_count(), 1);
    assert_eq!(d.get_scheduled_action_count(), 1);

    let invalid = Scheduler::Timely(Timely::every(0));
    assert!(matches!(
        d.set_scheduler("bar", invalid),
        Err(DispatchError::Validation(_))
    ));

    d.set_scheduler("bar", Scheduler::Immediately(Immediately::default()))
        .unwrap();
    assert_eq!(d.job_count(), 0);
    assert_eq!(d.get_scheduled_action_count(), 0);
}

#[test]
fn server_tags_never_keep_empty_sets() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_server("pi", Server::new("pi.local", 8181)).unwrap();
    d.add_server_tags("pi", "role", vec!["pivot".into(), "edge".into()])
        .unwrap();

    assert!(d.delete_server_tag("pi", "role", "pivot").unwrap());
    assert!(!d.delete_server_tag("pi", "role", "pivot").unwrap());
    assert!(d.delete_server_tag("pi", "role", "edge").unwrap());
    assert!(d.get_server("pi").unwrap().tags.is_empty());
    assert!(!d.delete_server_key("pi", "role").unwrap());
}

#[test]
fn control_actions_drive_bindings() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("foo", Action::success()).unwrap();
    d.add_scheduler("bar", every_second()).unwrap();

    d.execute_supplied_action(&Action::ScheduleAction {
        scheduler_name: "bar".into(),
        action_name: "foo".into(),
    })
    .unwrap();
    assert_eq!(d.get_scheduled_action_count(), 1);

    d.execute_supplied_action(&Action::ExpireAction {
        scheduler_name: "bar".into(),
        action_name: "foo".into(),
        expire_on: None,
        delay_seconds: Some(60),
    })
    .unwrap();
    assert_eq!(d.get_expiring_action_count(), 1);

    d.execute_supplied_action(&Action::ClearAllScheduling {}).unwrap();
    assert_eq!(d.get_scheduled_action_count(), 0);
    assert_eq!(d.get_expiring_action_count(), 0);
}

#[test]
fn local_server_short_circuits() {
    let out = TempDir::new().unwrap();
    let d = dispatcher(&out);
    d.add_action("answer", Action::SetResult { value: json!(42) }).unwrap();
    d.add_server("me", Server::new("127.0.0.1", 18181)).unwrap();

    let rez = d.execute_on_server("me", "answer").unwrap();
    assert_eq!(rez.result, Some(json!(42)));

    let err = d.execute_on_server("nobody", "answer").unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}
