//! Integration test: tree lifecycle, commands, auto-enable and aggregation.

use dsk_core::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::support::{Recorder, machine_node, ticking_clock, wait_for};

// ── Initialization ──────────────────────────────────────────────────

#[test]
fn initialize_registers_children_before_parents() {
    let root = Node::new("dev");
    machine_node(&root, "Channel", StateHandlers::default(), AutoEnable::None);
    root.add_child(InputPv::new("Status", ValueType::Int32)).unwrap();

    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    let registered = recorder.registered();
    let position = |name: &str| registered.iter().position(|n| n == name).unwrap();
    assert!(position("dev-Channel.StateMachine") < position("dev-Channel"));
    assert!(position("dev-Channel") < position("dev"));
    assert_eq!(registered.last().map(String::as_str), Some("dev"));
    assert!(registered.contains(&"dev-Status".to_string()));

    assert!(recorder.has_command("dev-Channel", "switchOn"));
    assert!(recorder.has_command("dev-Channel", "stop"));
    assert!(recorder.has_command("dev-Status", "decimation"));
    assert!(recorder.has_command("dev-Status", "replicate"));
    assert!(recorder.has_command("dev", "setLogLevel"));
}

#[test]
fn initialize_is_root_only_and_once() {
    let root = Node::new("dev");
    let child = root.add_child(Node::new("child")).unwrap().upgrade().unwrap();
    let recorder = Recorder::new();

    assert!(matches!(
        child.initialize(recorder.clone()),
        Err(KernelError::Tree(TreeError::NotRoot(_)))
    ));

    root.initialize(recorder.clone()).unwrap();
    assert!(matches!(
        root.initialize(recorder.clone()),
        Err(KernelError::Tree(TreeError::AlreadyInitialized(_)))
    ));
    assert!(matches!(
        root.add_child(Node::new("late")),
        Err(TreeError::AlreadyInitialized(_))
    ));

    root.deinitialize().unwrap();
    assert!(recorder.registered().is_empty());
    assert!(matches!(
        root.deinitialize(),
        Err(KernelError::Tree(TreeError::NotInitialized(_)))
    ));
}

#[test]
fn failed_registration_rolls_back_only_this_tree() {
    let root = Node::new("dev");
    machine_node(&root, "Channel", StateHandlers::default(), AutoEnable::DriveToOn);
    root.add_child(InputPv::new("Status", ValueType::Int32)).unwrap();

    let recorder = Recorder::new();
    recorder.reject("dev-Channel");
    assert!(matches!(
        root.initialize(recorder.clone()),
        Err(KernelError::Tree(TreeError::NameAlreadyDeclared(name))) if name == "dev-Channel"
    ));
    assert!(recorder.registered().is_empty());
    assert!(!recorder.has_command("dev-Channel", "switchOn"));
    assert!(!recorder.has_command("dev-Status", "replicate"));
    assert!(!root.is_initialized());
    assert!(recorder.states_of("dev-Channel.StateMachine").is_empty());
}

#[test]
fn node_commands_drive_state_machine() {
    let root = Node::new("dev");
    machine_node(&root, "Channel", StateHandlers::default(), AutoEnable::None);
    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    assert_eq!(recorder.run("dev-Channel", "switchOn", &[]).unwrap(), vec!["on"]);
    assert_eq!(recorder.run("dev-Channel", "start", &[]).unwrap(), vec!["running"]);
    assert!(recorder.run("dev-Channel", "switchOff", &[]).is_err());

    assert_eq!(
        recorder.states_of("dev-Channel.StateMachine"),
        vec![State::SwitchingOn, State::On, State::Starting, State::Running]
    );
}

#[test]
fn set_log_level_command_reaches_subtree() {
    let root = Node::new("dev");
    let pv = root
        .add_child(InputPv::new("Status", ValueType::Int32))
        .unwrap()
        .upgrade()
        .unwrap();
    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    recorder.run("dev", "setLogLevel", &["error"]).unwrap();
    assert_eq!(pv.core().log_level(), LogLevel::Error);
    assert!(recorder.run("dev", "setLogLevel", &["loud"]).is_err());
}

// ── Auto-enable and cascading ───────────────────────────────────────

#[test]
fn auto_enable_applied_after_initialize() {
    let root = Node::new("dev");
    let (_, manual) = machine_node(&root, "Manual", StateHandlers::default(), AutoEnable::None);
    let (_, to_on) = machine_node(&root, "ToOn", StateHandlers::default(), AutoEnable::DriveToOn);
    let (_, to_running) =
        machine_node(&root, "ToRunning", StateHandlers::default(), AutoEnable::DriveToRunning);

    root.initialize(Recorder::new()).unwrap();

    assert_eq!(manual.state(), State::Off);
    assert_eq!(to_on.state(), State::On);
    assert_eq!(to_running.state(), State::Running);
}

#[test]
fn parent_transitions_cascade_to_auto_enabled_children() {
    let root = Node::new("dev");
    let parent = root
        .add_child(StateMachine::new(false, StateHandlers::default()))
        .unwrap()
        .upgrade()
        .unwrap();
    let (_, follower) = machine_node(&root, "Follower", StateHandlers::default(), AutoEnable::DriveToOn);
    let (_, manual) = machine_node(&root, "Manual", StateHandlers::default(), AutoEnable::None);

    parent.set_state(State::On).unwrap();
    assert_eq!(follower.state(), State::On);
    assert_eq!(manual.state(), State::Off);

    parent.set_state(State::Running).unwrap();
    assert_eq!(follower.state(), State::On);

    parent.set_state(State::On).unwrap();
    parent.set_state(State::Off).unwrap();
    assert_eq!(follower.state(), State::Off);
}

#[test]
fn running_follower_keeps_running_whatever_its_name() {
    for name in ["Alpha", "Zulu"] {
        let root = Node::new("dev");
        root.add_child(
            StateMachine::new(false, StateHandlers::default()).with_auto_enable(AutoEnable::DriveToOn),
        )
        .unwrap();
        let (_, child) = machine_node(&root, name, StateHandlers::default(), AutoEnable::DriveToRunning);

        root.initialize(Recorder::new()).unwrap();

        assert_eq!(root.local_state().0, State::On, "{name}");
        assert_eq!(child.state(), State::Running, "{name}");
    }
}

#[test]
fn followers_never_move_against_parent() {
    let root = Node::new("dev");
    let parent = root
        .add_child(StateMachine::new(false, StateHandlers::default()))
        .unwrap()
        .upgrade()
        .unwrap();
    let (_, follower) =
        machine_node(&root, "Follower", StateHandlers::default(), AutoEnable::DriveToRunning);
    follower.drive_to(State::Running).unwrap();

    parent.set_state(State::On).unwrap();
    assert_eq!(follower.state(), State::Running);
    parent.set_state(State::Running).unwrap();
    assert_eq!(follower.state(), State::Running);

    parent.set_state(State::On).unwrap();
    assert_eq!(follower.state(), State::On);
    parent.set_state(State::Off).unwrap();
    assert_eq!(follower.state(), State::Off);
}

#[test]
fn set_children_state_restores_on_refusal() {
    let root = Node::new("dev");
    let (_, first) = machine_node(&root, "A", StateHandlers::default(), AutoEnable::None);
    let (_, second) = machine_node(
        &root,
        "B",
        StateHandlers::default().on_switch_on(|| Err("interlock open".into())),
        AutoEnable::None,
    );

    assert!(!root.set_children_state(Timestamp::now(), State::On));
    assert_eq!(first.state(), State::Off);
    assert_eq!(second.state(), State::Fault);
}

#[test]
fn set_children_state_reaches_nested_machines() {
    let root = Node::new("dev");
    let group = root.add_child(Node::new("Group")).unwrap().upgrade().unwrap();
    let (_, nested) = machine_node(&group, "Leaf", StateHandlers::default(), AutoEnable::None);
    let (_, direct) = machine_node(&root, "Direct", StateHandlers::default(), AutoEnable::None);

    assert!(root.set_children_state(Timestamp::now(), State::Running));
    assert_eq!(nested.state(), State::Running);
    assert_eq!(direct.state(), State::Running);
}

// ── Aggregation ─────────────────────────────────────────────────────

#[test]
fn aggregation_orders_states_and_breaks_ties_by_time() {
    let root = Node::new("dev");
    ticking_clock(&root);
    root.add_child(StateMachine::new(false, StateHandlers::default())).unwrap();
    let (a, sm_a) = machine_node(&root, "A", StateHandlers::default(), AutoEnable::None);
    let (_, sm_b) = machine_node(&root, "B", StateHandlers::default(), AutoEnable::None);
    let (_, sm_g) = machine_node(&a, "G", StateHandlers::default(), AutoEnable::None);

    sm_a.set_state(State::On).unwrap();
    sm_b.set_state(State::On).unwrap();
    sm_g.drive_to(State::Running).unwrap();

    assert_eq!(root.local_state().0, State::Off);
    assert_eq!(root.global_state(), sm_g.get_state());
    assert_eq!(root.highest_child_state(), sm_g.get_state());

    // A and B are both On; B entered it later.
    assert!(sm_b.get_state().1 > sm_a.get_state().1);
    assert_eq!(root.lowest_child_state(), sm_b.get_state());

    sm_b.set_state(State::Fault).unwrap();
    assert_eq!(root.global_state().0, State::Fault);
    assert_eq!(root.highest_child_state().0, State::Fault);
    assert_eq!(root.lowest_child_state(), sm_a.get_state());
}

#[test]
fn allow_change_sees_owner_global_state() {
    let root = Node::new("dev");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let (node, sm) = machine_node(
        &root,
        "Owner",
        StateHandlers::default().allow_change(move |current, global, target| {
            log.lock().push((current, global, target));
            true
        }),
        AutoEnable::None,
    );
    let (_, child) = machine_node(&node, "Sub", StateHandlers::default(), AutoEnable::None);
    child.drive_to(State::Running).unwrap();

    sm.set_state(State::On).unwrap();
    assert_eq!(*seen.lock(), vec![(State::Off, State::Running, State::On)]);
}

// ── Asynchronous machines ───────────────────────────────────────────

#[test]
fn deinitialize_waits_for_async_transition() {
    let root = Node::new("dev");
    let sm = root
        .add_child(StateMachine::new(
            true,
            StateHandlers::default().on_switch_on(|| {
                std::thread::sleep(Duration::from_millis(30));
                Ok(())
            }),
        ))
        .unwrap()
        .upgrade()
        .unwrap();
    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    sm.set_state(State::On).unwrap();
    assert_eq!(sm.state(), State::SwitchingOn);
    root.deinitialize().unwrap();
    assert_eq!(sm.state(), State::On);
}

#[test]
fn async_command_does_not_wait_for_previous_cascade() {
    let root = Node::new("dev");
    let parent = root
        .add_child(StateMachine::new(true, StateHandlers::default()))
        .unwrap()
        .upgrade()
        .unwrap();
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock();
    let waiter = Arc::clone(&gate);
    let (_, follower) = machine_node(
        &root,
        "Follower",
        StateHandlers::default().on_switch_on(move || {
            drop(waiter.lock());
            Ok(())
        }),
        AutoEnable::DriveToOn,
    );

    parent.set_state(State::On).unwrap();
    // The first worker is stuck cascading On into the follower.
    wait_for(|| follower.state() == State::SwitchingOn);
    assert_eq!(parent.state(), State::On);

    parent.set_state(State::Off).unwrap();
    assert_eq!(parent.state(), State::SwitchingOff);

    drop(held);
    parent.wait_idle();
    assert_eq!(parent.state(), State::Off);
    assert_eq!(follower.state(), State::Off);
}
