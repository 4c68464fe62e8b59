// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
//! Scenarios exercising checkpoint callbacks and nested sub-recordings.
use adtrace::{CheckpointCallback, Real, ScopedNestedRecording, Tape};

// SinSegment
/// Re-records four applications of `sin` inside a nested sub-recording,
/// reading the segment's output adjoint off the outer tape and writing
/// its input adjoint back, rather than keeping those four operations
/// resident on the outer tape for the whole forward pass.
struct SinSegment {
    input_slot: u32,
    input_value: f64,
    output_slot: u32,
}

impl CheckpointCallback<f64> for SinSegment {
    fn reverse(&mut self, tape: &mut Tape<f64>) {
        let adj_out = tape.get_and_reset_output_adjoint(self.output_slot).unwrap();
        let mut scoped = ScopedNestedRecording::new(tape);
        let x0 = Real::<f64>::new(self.input_value);
        let mut x1 = Real::<f64>::new(0.0);
        x1.assign(x0.sin());
        let mut x2 = Real::<f64>::new(0.0);
        x2.assign(x1.sin());
        let mut x3 = Real::<f64>::new(0.0);
        x3.assign(x2.sin());
        let mut x4 = Real::<f64>::new(0.0);
        x4.assign(x3.sin());
        x4.register_output();
        x4.set_derivative(adj_out);
        scoped.compute_adjoints().unwrap();
        let d_input = x0.derivative();
        scoped.increment_adjoint(self.input_slot, d_input).unwrap();
    }
}

fn repeated_sin(x: f64, n: u32) -> f64 {
    let mut v = x;
    for _ in 0..n {
        v = v.sin();
    }
    v
}

#[test]
fn s5_repeated_sin_with_checkpointing_matches_the_straight_run() {
    let (straight, straight_peak) = {
        let mut tape: Tape<f64> = Tape::new(false);
        tape.activate().unwrap();
        let x = Real::<f64>::new(2.1);
        tape.new_recording();
        let mut y = x.clone();
        for _ in 0..20 {
            let mut next = Real::<f64>::new(0.0);
            next.assign(y.sin());
            y = next;
        }
        y.register_output();
        let peak = tape.debug_counts().num_statements;
        y.set_derivative(1.0);
        tape.compute_adjoints().unwrap();
        let d = x.derivative();
        tape.deactivate();
        (d, peak)
    };

    let (checkpointed, checkpointed_peak) = {
        let mut tape: Tape<f64> = Tape::new(false);
        tape.activate().unwrap();
        let x = Real::<f64>::new(2.1);
        tape.new_recording();
        // Every segment boundary must stay alive (hence on the tape) until
        // after `compute_adjoints`, since each `SinSegment` addresses its
        // input/output by the raw slot captured at `insert_callback` time;
        // dropping one early would let its slot be handed back out from
        // under that reference.
        let mut chain = vec![x];
        for _segment in 0..5 {
            let cur_value = chain.last().unwrap().value();
            let cur_slot = chain.last().unwrap().slot();
            let next_value = repeated_sin(cur_value, 4);
            let next = Real::<f64>::new(next_value);
            let cb_id = tape.push_callback(Box::new(SinSegment {
                input_slot: cur_slot,
                input_value: cur_value,
                output_slot: next.slot(),
            }));
            tape.insert_callback(cb_id);
            chain.push(next);
        }
        let y = chain.last().unwrap();
        let y_slot = y.slot();
        let peak = tape.debug_counts().num_statements;
        tape.set_derivative(y_slot, 1.0).unwrap();
        tape.compute_adjoints().unwrap();
        let d = chain[0].derivative();
        tape.deactivate();
        (d, peak)
    };

    assert!((straight - checkpointed).abs() < 1e-13);
    // spec S5: peak tape size at the checkpointed run is strictly less
    // than at the straight run (5 checkpoint sentinels vs. 20 recorded
    // sin statements, since each segment's own ops are only recorded
    // transiently inside its callback during the reverse sweep).
    assert!(checkpointed_peak < straight_peak);
}

// SumCallback
/// Computes `sum(xi^2)` as an external function: the forward value is
/// produced directly in Rust, not recorded elementary-op by elementary-op,
/// and this callback supplies `d(sum)/d(xi) = 2*xi` during reverse
/// propagation.
struct SumCallback {
    output_slot: u32,
    inputs: Vec<(u32, f64)>,
}

impl CheckpointCallback<f64> for SumCallback {
    fn reverse(&mut self, tape: &mut Tape<f64>) {
        let adj_sum = tape.get_and_reset_output_adjoint(self.output_slot).unwrap();
        for &(slot, xi) in &self.inputs {
            tape.increment_adjoint(slot, adj_sum * 2.0 * xi).unwrap();
        }
    }
}

#[test]
fn s6_external_summation_callback() {
    let mut tape: Tape<f64> = Tape::new(false);
    tape.activate().unwrap();
    let xs: Vec<Real<f64>> = vec![Real::<f64>::new(1.0), Real::<f64>::new(2.0), Real::<f64>::new(3.0)];
    tape.new_recording();

    let sum_sq: f64 = xs.iter().map(|x| x.value() * x.value()).sum();
    let s = Real::<f64>::new(sum_sq);
    let cb_id = tape.push_callback(Box::new(SumCallback {
        output_slot: s.slot(),
        inputs: xs.iter().map(|x| (x.slot(), x.value())).collect(),
    }));
    tape.insert_callback(cb_id);

    let mut y = Real::<f64>::new(0.0);
    y.assign(s.sqrt());
    y.register_output();
    y.set_derivative(1.0);
    tape.compute_adjoints().unwrap();

    for x in &xs {
        assert!((x.derivative() - x.value() / y.value()).abs() < 1e-12);
    }
    tape.deactivate();
}
