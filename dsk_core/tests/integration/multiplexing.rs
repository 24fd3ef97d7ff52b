//! Integration test: a multiplexer wired into a tree and driven by commands.

use dsk_core::prelude::*;
use std::sync::Arc;

use super::support::Recorder;

fn ts(secs: i64) -> Timestamp {
    Timestamp::from_secs_nanos(secs, 0)
}

struct Rig {
    root: Arc<Node>,
    mux: Arc<Multiplexer>,
    recorder: Arc<Recorder>,
}

/// `dev` holding a two-channel `Mux` and a `Signal` input feeding `DataIn_0`.
fn rig() -> Rig {
    let root = Node::new("dev");
    root.add_child(InputPv::new("Signal", ValueType::Int32Array)).unwrap();
    let mux = Multiplexer::new("Mux", 2, ValueType::Int32Array).unwrap();
    root.add_child(Arc::clone(mux.node())).unwrap();

    let recorder = Recorder::new();
    root.initialize(recorder.clone()).unwrap();
    Rig { root, mux, recorder }
}

impl Rig {
    fn running_with_samples(&self, samples: i32) {
        assert_eq!(self.recorder.run("dev-Mux", "switchOn", &[]).unwrap(), vec!["on"]);
        self.mux
            .samples_pv()
            .unwrap()
            .write(ts(1), Value::Int32(samples))
            .unwrap();
        assert_eq!(self.recorder.run("dev-Mux", "start", &[]).unwrap(), vec!["running"]);
    }

    fn feed(&self, index: usize, data: Vec<i32>) {
        self.mux
            .scheduler()
            .input(index)
            .unwrap()
            .write(ts(2), Value::Int32Array(data))
            .unwrap();
    }
}

#[test]
fn concatenates_leading_samples_of_each_input() {
    let rig = rig();
    rig.running_with_samples(2);
    rig.feed(0, vec![1, 2, 9, 9]);
    rig.feed(1, vec![3, 4, 9, 9]);

    rig.mux
        .scheduler()
        .trigger()
        .unwrap()
        .write(ts(3), Value::Int32(1))
        .unwrap();

    let pushes = rig.recorder.pushes_of("dev-Mux.DataOut_0");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].1, Value::Int32Array(vec![1, 2, 3, 4]));
    assert_eq!(
        rig.recorder.pushes_of("dev-Mux.SamplesPerChannel_RBV"),
        vec![(ts(1), Value::Int32(2))]
    );
}

#[test]
fn short_input_fails_without_output_or_state_change() {
    let rig = rig();
    rig.running_with_samples(3);
    rig.feed(0, vec![1, 2, 3]);
    rig.feed(1, vec![4, 5]);

    let err = rig
        .mux
        .scheduler()
        .trigger()
        .unwrap()
        .write(ts(3), Value::Int32(1))
        .unwrap_err();
    match err {
        KernelError::Pv(PvError::WriteFailed { pv, reason }) => {
            assert_eq!(pv, "dev-Mux.Trigger");
            assert!(reason.contains("dev-Mux.DataIn_1"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    assert!(rig.recorder.pushes_of("dev-Mux.DataOut_0").is_empty());
    assert_eq!(
        rig.mux.scheduler().state_machine().unwrap().state(),
        State::Running
    );
}

#[test]
fn trigger_ignored_until_running() {
    let rig = rig();
    rig.feed(0, vec![1]);
    rig.feed(1, vec![2]);
    rig.mux
        .scheduler()
        .trigger()
        .unwrap()
        .write(ts(3), Value::Int32(1))
        .unwrap();
    assert!(rig.recorder.pushes_of("dev-Mux.DataOut_0").is_empty());
    assert!(rig.recorder.run("dev-Mux", "start", &[]).is_err());
}

#[test]
fn inputs_follow_subscribed_sources() {
    let rig = rig();
    rig.running_with_samples(1);
    let data_in = rig.mux.scheduler().input(0).unwrap();
    data_in.subscribe_to("dev-Signal").unwrap();
    rig.feed(1, vec![8]);

    let signal = rig
        .root
        .child("Signal")
        .and_then(|c| c.as_input().cloned())
        .unwrap();
    signal.push(ts(4), Value::Int32Array(vec![5, 6])).unwrap();
    assert_eq!(data_in.read(), (ts(4), Value::Int32Array(vec![5, 6])));

    rig.mux
        .scheduler()
        .trigger()
        .unwrap()
        .write(ts(5), Value::Int32(1))
        .unwrap();
    let last = rig.mux.scheduler().output(0).unwrap().read().1;
    assert_eq!(last, Value::Int32Array(vec![5, 8]));
}
