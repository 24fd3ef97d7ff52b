//! Integration test: pushes, subscriptions and replication through an adapter.

use dsk_core::prelude::*;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};

use super::support::Recorder;

fn ts(secs: i64) -> Timestamp {
    Timestamp::from_secs_nanos(secs, 0)
}

fn recording_output(name: &str, value_type: ValueType) -> (OutputPv, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let pv = OutputPv::new(name, value_type).with_write(move |_, value| {
        sink.lock().push(value.clone());
        Ok(())
    });
    (pv, seen)
}

/// `dev` with an input `Src` and a node `Mirror` holding an input `Copy`.
fn mirror_tree() -> (Arc<Node>, Arc<InputPv>, Arc<InputPv>) {
    let root = Node::new("dev");
    let src = root
        .add_child(InputPv::new("Src", ValueType::Int32))
        .unwrap()
        .upgrade()
        .unwrap();
    let mirror = root.add_child(Node::new("Mirror")).unwrap().upgrade().unwrap();
    let copy = mirror
        .add_child(InputPv::new("Copy", ValueType::Int32))
        .unwrap()
        .upgrade()
        .unwrap();
    (root, src, copy)
}

// ── Adapter forwarding ──────────────────────────────────────────────

#[test]
fn adapter_sees_decimated_pushes() {
    let (root, src, _) = mirror_tree();
    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    recorder.run("dev-Src", "decimation", &["3"]).unwrap();
    assert_eq!(src.decimation(), 3);
    for i in 1..=6 {
        src.push(ts(i), Value::Int32(i as i32)).unwrap();
    }

    assert_eq!(
        recorder.pushes_of("dev-Src"),
        vec![(ts(3), Value::Int32(3)), (ts(6), Value::Int32(6))]
    );
    assert_eq!(src.read(), (ts(6), Value::Int32(6)));
    assert!(recorder.run("dev-Src", "decimation", &["often"]).is_err());
}

#[test]
fn rejected_push_is_not_forwarded() {
    let (root, src, _) = mirror_tree();
    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    assert!(matches!(
        src.push(ts(1), Value::Float64(0.5)),
        Err(KernelError::Pv(PvError::TypeMismatch { .. }))
    ));
    assert!(recorder.pushes_of("dev-Src").is_empty());
}

// ── Replication ─────────────────────────────────────────────────────

#[test]
fn replication_by_name_copies_value_and_timestamp() {
    let (root, src, copy) = mirror_tree();
    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    copy.replicate_from("dev-Src").unwrap();
    assert_eq!(src.replica_count(), 1);
    src.push(ts(5), Value::Int32(42)).unwrap();
    assert_eq!(copy.read(), (ts(5), Value::Int32(42)));
    assert_eq!(recorder.pushes_of("dev-Mirror.Copy"), vec![(ts(5), Value::Int32(42))]);

    copy.stop_replication_from("dev-Src").unwrap();
    src.push(ts(6), Value::Int32(43)).unwrap();
    assert_eq!(copy.read(), (ts(5), Value::Int32(42)));
    assert_eq!(src.replica_count(), 0);
}

#[test]
fn replicate_command_and_status_propagation() {
    let (root, src, copy) = mirror_tree();
    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    recorder.run("dev-Mirror.Copy", "replicate", &["dev-Src"]).unwrap();
    src.push_with_status(ts(1), Value::Int32(7), PvStatus::Failure)
        .unwrap();
    assert_eq!(copy.status(), PvStatus::Failure);
    assert_eq!(copy.read().1, Value::Int32(7));
}

#[test]
fn replicas_apply_their_own_decimation() {
    let (root, src, copy) = mirror_tree();
    let (sink, seen) = recording_output("Sink", ValueType::Int32);
    let sink = root.add_child(sink).unwrap().upgrade().unwrap();
    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();

    copy.replicate_from("dev-Src").unwrap();
    sink.subscribe_to("dev-Mirror.Copy").unwrap();
    copy.set_decimation(2);
    assert_eq!(src.decimation(), 1);

    for i in 1..=4 {
        src.push(ts(i), Value::Int32(i as i32)).unwrap();
    }

    assert_eq!(recorder.pushes_of("dev-Src").len(), 4);
    assert_eq!(
        recorder.pushes_of("dev-Mirror.Copy"),
        vec![(ts(2), Value::Int32(2)), (ts(4), Value::Int32(4))]
    );
    assert_eq!(*seen.lock(), vec![Value::Int32(2), Value::Int32(4)]);
    assert_eq!(copy.read(), (ts(4), Value::Int32(4)));
}

#[test]
fn unknown_source_names_fail() {
    let (root, _, copy) = mirror_tree();
    root.initialize(Recorder::new()).unwrap();

    assert!(matches!(
        copy.replicate_from("dev-Nope"),
        Err(KernelError::Wiring(WiringError::MissingInputPv(name))) if name == "dev-Nope"
    ));
    assert!(matches!(
        copy.stop_replication_from("dev-Nope"),
        Err(KernelError::Wiring(WiringError::MissingInputPv(_)))
    ));
}

// ── Subscription ────────────────────────────────────────────────────

#[test]
fn subscribe_by_name_until_unsubscribed() {
    let root = Node::new("dev");
    let src = root
        .add_child(InputPv::new("Src", ValueType::Float64))
        .unwrap()
        .upgrade()
        .unwrap();
    let (setpoint, seen) = recording_output("Setpoint", ValueType::Float64);
    let setpoint = root.add_child(setpoint).unwrap().upgrade().unwrap();

    assert!(matches!(
        setpoint.subscribe_to("dev-Src"),
        Err(KernelError::Tree(TreeError::NotInitialized(_)))
    ));

    root.initialize(Recorder::new()).unwrap();
    setpoint.subscribe_to("dev-Src").unwrap();
    src.push(ts(1), Value::Float64(1.5)).unwrap();
    assert_eq!(setpoint.read(), (ts(1), Value::Float64(1.5)));

    setpoint.unsubscribe_from("dev-Src").unwrap();
    src.push(ts(2), Value::Float64(2.5)).unwrap();
    assert_eq!(*seen.lock(), vec![Value::Float64(1.5)]);
    assert!(setpoint.subscribe_to("dev-Missing").is_err());
}

#[test]
fn failing_subscriber_does_not_block_others() {
    let src = Arc::new(InputPv::new("Src", ValueType::Int32));
    let wrong_type = Arc::new(OutputPv::new("Wrong", ValueType::Float64));
    let refusing = Arc::new(
        OutputPv::new("Refusing", ValueType::Int32).with_write(|_, _| Err("read only".into())),
    );
    let (steady, seen) = recording_output("Steady", ValueType::Int32);
    let steady = Arc::new(steady);
    src.subscribe_receiver(&wrong_type);
    src.subscribe_receiver(&refusing);
    src.subscribe_receiver(&steady);

    src.push(ts(1), Value::Int32(9)).unwrap();
    assert_eq!(*seen.lock(), vec![Value::Int32(9)]);
    assert_eq!(refusing.read().1, Value::Int32(0));
}

#[test]
fn subscriber_may_unsubscribe_and_push_during_delivery() {
    let src = Arc::new(InputPv::new("Src", ValueType::Int32));
    let source = Arc::downgrade(&src);
    let own: Arc<OnceLock<Weak<OutputPv>>> = Arc::new(OnceLock::new());
    let own_cell = Arc::clone(&own);
    let quitter_seen = Arc::new(Mutex::new(Vec::new()));
    let quitter_log = Arc::clone(&quitter_seen);

    let quitter = Arc::new(OutputPv::new("Quitter", ValueType::Int32).with_write(
        move |timestamp, value| {
            let v = value.as_i32().unwrap_or_default();
            quitter_log.lock().push(v);
            let (Some(src), Some(me)) = (source.upgrade(), own_cell.get().and_then(Weak::upgrade)) else {
                return Ok(());
            };
            src.unsubscribe_receiver(&me);
            if v < 100 {
                src.push(timestamp, Value::Int32(v + 100))
                    .map_err(|e| e.to_string())?;
            }
            Ok(())
        },
    ));
    own.set(Arc::downgrade(&quitter)).unwrap();
    let (steady, steady_seen) = recording_output("Steady", ValueType::Int32);
    let steady = Arc::new(steady);

    src.subscribe_receiver(&quitter);
    src.subscribe_receiver(&steady);

    src.push(ts(1), Value::Int32(1)).unwrap();
    assert_eq!(*quitter_seen.lock(), vec![1, 101]);
    assert_eq!(*steady_seen.lock(), vec![Value::Int32(101), Value::Int32(1)]);
    assert_eq!(src.subscriber_count(), 1);

    src.push(ts(2), Value::Int32(2)).unwrap();
    assert_eq!(*quitter_seen.lock(), vec![1, 101]);
    assert_eq!(steady_seen.lock().last(), Some(&Value::Int32(2)));
}

#[test]
fn dropped_receivers_are_pruned() {
    let src = Arc::new(InputPv::new("Src", ValueType::Int32));
    let out = Arc::new(OutputPv::new("Out", ValueType::Int32));
    src.subscribe_receiver(&out);
    drop(out);
    src.push(ts(1), Value::Int32(1)).unwrap();
    assert_eq!(src.subscriber_count(), 0);
}
