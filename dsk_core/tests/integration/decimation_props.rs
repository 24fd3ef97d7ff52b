//! Property tests for decimation: every push is stored, every k-th forwarded.

use dsk_core::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

fn forwarded(factor: u32, pushes: &[i32]) -> (Vec<i32>, Option<i32>) {
    let pv = Arc::new(InputPv::new("Counter", ValueType::Int32).with_decimation(factor));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let out = Arc::new(OutputPv::new("Sink", ValueType::Int32).with_write(move |_, v| {
        sink.lock().push(v.as_i32().unwrap_or_default());
        Ok(())
    }));
    pv.subscribe_receiver(&out);

    for (i, value) in pushes.iter().enumerate() {
        pv.push(Timestamp::from_secs_nanos(i as i64, 0), Value::Int32(*value))
            .unwrap();
    }
    let last = pushes.last().map(|_| pv.read().1.as_i32().unwrap_or_default());
    let seen = seen.lock().clone();
    (seen, last)
}

proptest! {
    #[test]
    fn forwards_every_kth_push(factor in 1u32..8, pushes in prop::collection::vec(any::<i32>(), 0..64)) {
        let (seen, last) = forwarded(factor, &pushes);
        let expected: Vec<i32> = pushes
            .iter()
            .skip(factor as usize - 1)
            .step_by(factor as usize)
            .copied()
            .collect();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(last, pushes.last().copied());
    }

    #[test]
    fn factor_zero_behaves_like_one(pushes in prop::collection::vec(any::<i32>(), 1..16)) {
        let (seen, _) = forwarded(0, &pushes);
        prop_assert_eq!(seen, pushes);
    }
}
