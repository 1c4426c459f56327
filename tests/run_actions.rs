//! End-to-end exercise of the run loop against a local host: a three-action chain
//! that fully saturates and then releases the host's resource pool at each step,
//! and a dependency check that blocks a downstream action on an upstream failure.

use std::collections::HashMap;

use causeway::action::{Action, ActionState, ActionStatus, DependencyKind};
use causeway::config::OrchestratorSettings;
use causeway::host::Host;
use causeway::resource::{Amount, Unit};
use causeway::scheduler::Scheduler;

fn settings(dir: &std::path::Path) -> OrchestratorSettings {
    OrchestratorSettings {
        save_location: dir.join("save"),
        log_location: dir.join("log"),
        working_directory: dir.to_path_buf(),
        clear_errors: true,
        clear_failures: true,
        skip_unrunnable: false,
        hpc_poll_interval_secs: 60,
        // "true" ignores its arguments and always exits 0, standing in for the real
        // causeway-launcher binary without depending on a separately built target.
        launcher_path: "true".into(),
    }
}

#[test]
fn chained_actions_share_a_tight_resource_budget() {
    let dir = tempfile::tempdir().unwrap();

    let mut host = Host::new_local("build-host");
    if let causeway::host::HostKind::Local { resources } = &mut host.kind {
        resources.add_resource("cpus", Amount::new(4, Unit::None), false).unwrap();
    }
    let mut hosts = HashMap::new();
    hosts.insert("build-host".to_string(), host);

    let mut compile = Action::new("compile");
    compile.add_resource_requirement("cpus", "4");
    let mut link = Action::new("link");
    link.add_dependency("compile", DependencyKind::AfterOk);
    link.add_resource_requirement("cpus", "4");
    let mut test = Action::new("test");
    test.add_dependency("link", DependencyKind::AfterOk);

    let mut actions = HashMap::new();
    actions.insert("compile".to_string(), compile);
    actions.insert("link".to_string(), link);
    actions.insert("test".to_string(), test);

    let mut scheduler = Scheduler::new(actions, hosts, "build-host".to_string(), settings(dir.path()));
    let success = scheduler.run_actions(&["test".to_string()]).unwrap();

    assert!(success);
    for id in ["compile", "link", "test"] {
        assert_eq!(scheduler.actions[id].state, ActionState::Finished);
        assert_eq!(scheduler.actions[id].status, ActionStatus::Success);
    }
}

#[test]
fn a_failed_upstream_blocks_an_after_ok_dependent() {
    let dir = tempfile::tempdir().unwrap();

    let mut hosts = HashMap::new();
    hosts.insert("build-host".to_string(), Host::new_local("build-host"));

    let mut actions = HashMap::new();
    let mut flaky = Action::new("flaky");
    // Already resolved (e.g. from a prior run) as a failure; try_run_one must treat
    // a terminal action as done rather than relaunching it.
    flaky.mark_finished(ActionStatus::Failure);
    actions.insert("flaky".to_string(), flaky);

    let mut dependent = Action::new("dependent");
    dependent.add_dependency("flaky", DependencyKind::AfterOk);
    actions.insert("dependent".to_string(), dependent);

    let mut scheduler = Scheduler::new(actions, hosts, "build-host".to_string(), settings(dir.path()));

    let err = scheduler.run_actions(&["dependent".to_string()]);
    assert!(err.is_err(), "dependent must not run after an AfterOk upstream failed");
}
