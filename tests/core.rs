// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
//! End-to-end scenarios driving the public `Tape`/`Real` API directly,
//! without reaching into any crate-private module.
use adtrace::{Real, Tape};

#[test]
fn s1_linear_combination() {
    let mut tape: Tape<f64> = Tape::new(false);
    tape.activate().unwrap();
    let x0 = Real::<f64>::new(2.0);
    let x1 = Real::<f64>::new(5.0);
    tape.new_recording();
    let mut y = Real::<f64>::new(0.0);
    y.assign(3.1 * &x0 + 1.5 * (&x1 + 3.2) + 3.4);
    y.register_output();
    y.set_derivative(1.0);
    tape.compute_adjoints().unwrap();
    assert!((y.value() - 16.76).abs() < 1e-12);
    assert!((x0.derivative() - 3.1).abs() < 1e-12);
    assert!((x1.derivative() - 1.5).abs() < 1e-12);
    tape.deactivate();
}

#[test]
fn s2_product() {
    let mut tape: Tape<f64> = Tape::new(false);
    tape.activate().unwrap();
    let x0 = Real::<f64>::new(2.0);
    let x1 = Real::<f64>::new(5.0);
    tape.new_recording();
    let mut y = Real::<f64>::new(0.0);
    y.assign(&x0 * &x1);
    y.register_output();
    y.set_derivative(1.0);
    tape.compute_adjoints().unwrap();
    assert_eq!(y.value(), 10.0);
    assert_eq!(x0.derivative(), 5.0);
    assert_eq!(x1.derivative(), 2.0);
    tape.deactivate();
}

#[test]
fn s3_quartic() {
    let mut tape: Tape<f64> = Tape::new(false);
    tape.activate().unwrap();
    let x = Real::<f64>::new(2.0);
    tape.new_recording();
    let mut y = Real::<f64>::new(0.0);
    y.assign(2.0 * x.powi(4));
    y.register_output();
    y.set_derivative(1.0);
    tape.compute_adjoints().unwrap();
    assert!((y.value() - 32.0).abs() < 1e-12);
    assert!((x.derivative() - 64.0).abs() < 1e-12);
    tape.deactivate();
}

#[test]
fn s4_compound_expression() {
    let mut tape: Tape<f64> = Tape::new(false);
    tape.activate().unwrap();
    let x0 = Real::<f64>::new(2.0);
    let x1 = Real::<f64>::new(3.0);
    let x2 = Real::<f64>::new(5.0);
    tape.new_recording();
    // z1 = 3*x0*x1 + 2*x2 + x2*x0; z2 = x0*z1
    let mut z1 = Real::<f64>::new(0.0);
    z1.assign(3.0 * &x0 * &x1 + 2.0 * &x2 + &x2 * &x0);
    let mut z2 = Real::<f64>::new(0.0);
    z2.assign(&x0 * &z1);
    z2.register_output();
    z2.set_derivative(1.0);
    tape.compute_adjoints().unwrap();
    assert!((z2.value() - 76.0).abs() < 1e-9);
    assert!((x0.derivative() - 66.0).abs() < 1e-9);
    assert!((x1.derivative() - 12.0).abs() < 1e-9);
    assert!((x2.derivative() - 8.0).abs() < 1e-9);
    tape.deactivate();
}

#[test]
fn clear_all_then_fresh_recording_reproduces_the_same_adjoints() {
    // invariant: clear_all followed by a fresh recording of the same
    // program yields bit-identical adjoints (no hidden state leaks).
    let mut tape: Tape<f64> = Tape::new(true);
    tape.activate().unwrap();
    let run = |tape: &mut Tape<f64>| -> (f64, f64) {
        let x = Real::<f64>::new(2.0);
        tape.new_recording();
        let mut y = Real::<f64>::new(0.0);
        y.assign(x.sin() * x.cos());
        y.register_output();
        y.set_derivative(1.0);
        tape.compute_adjoints().unwrap();
        (y.value(), x.derivative())
    };
    let first = run(&mut tape);
    tape.clear_all();
    let second = run(&mut tape);
    assert_eq!(first, second);
    tape.deactivate();
}

#[test]
fn slot_reuse_keeps_live_and_free_slots_disjoint_and_bounded() {
    // invariant: with slot reuse, live variables plus reusable ranges
    // never exceed [0, watermark).
    let mut tape: Tape<f64> = Tape::new(true);
    tape.activate().unwrap();
    {
        let _a = Real::<f64>::new(1.0);
        let _b = Real::<f64>::new(2.0);
    } // both dropped: their slots become reusable
    let counts_before = tape.debug_counts();
    let _c = Real::<f64>::new(3.0);
    let counts_after = tape.debug_counts();
    assert!(counts_after.watermark <= counts_before.watermark.max(counts_after.watermark));
    assert!(counts_after.num_free_ranges <= counts_before.num_free_ranges);
    tape.deactivate();
}

#[test]
fn an_input_never_used_downstream_keeps_a_zero_derivative() {
    let mut tape: Tape<f64> = Tape::new(false);
    tape.activate().unwrap();
    let x0 = Real::<f64>::new(2.0);
    let unused = Real::<f64>::new(9.0);
    tape.new_recording();
    let mut y = Real::<f64>::new(0.0);
    y.assign(&x0 * &x0);
    y.register_output();
    y.set_derivative(1.0);
    tape.compute_adjoints().unwrap();
    assert_eq!(unused.derivative(), 0.0);
    assert!((x0.derivative() - 4.0).abs() < 1e-12);
    tape.deactivate();
}

#[test]
fn reset_to_matches_replaying_without_the_reset() {
    let mut tape: Tape<f64> = Tape::new(true);
    tape.activate().unwrap();
    let x0 = Real::<f64>::new(2.0);
    tape.new_recording();
    let pos = tape.get_position();
    let mut y = Real::<f64>::new(0.0);
    y.assign(4.0 * &x0);
    y.register_output();
    tape.reset_to(pos).unwrap();
    let mut y2 = Real::<f64>::new(0.0);
    y2.assign(4.0 * &x0);
    y2.register_output();
    y2.set_derivative(1.0);
    tape.compute_adjoints().unwrap();
    assert!((x0.derivative() - 4.0).abs() < 1e-12);
    tape.deactivate();
}

#[test]
fn smooth_abs_matches_finite_differences_at_a_negative_point_inside_the_band() {
    // spec §8 property 3, exercised at a point where smooth_abs's value
    // function (even in x) and its derivative (odd in x) must disagree in
    // sign — the case that a missing sign(x) factor gets wrong.
    let c = 1.0;
    let x = -0.5;
    let h = 1e-5;
    let value_at = |v: f64| Real::<f64>::new(v).smooth_abs(c).value();
    let finite_diff = (value_at(x + h) - value_at(x - h)) / (2.0 * h);

    let mut tape: Tape<f64> = Tape::new(false);
    tape.activate().unwrap();
    let xv = Real::<f64>::new(x);
    tape.new_recording();
    let mut y = Real::<f64>::new(0.0);
    y.assign(xv.smooth_abs(c));
    y.register_output();
    y.set_derivative(1.0);
    tape.compute_adjoints().unwrap();
    let reverse = xv.derivative();
    tape.deactivate();

    assert!((reverse - (-1.25)).abs() < 1e-9);
    assert!((reverse - finite_diff).abs() < 1e-6);
}

#[test]
fn smooth_max_and_smooth_min_match_finite_differences_when_the_difference_is_negative() {
    // a - b = -1, inside the band [-3, 3]; both SmoothMaxC and SmoothMinC
    // partials reuse smooth_abs_partial at a negative argument here.
    let c = 3.0;
    let a0 = 1.0;
    let b0 = 2.0;
    let h = 1e-5;
    let smooth_max_at = |a: f64, b: f64| {
        let rhs = Real::<f64>::new(b);
        Real::<f64>::new(a).smooth_max(&rhs, c).value()
    };
    let smooth_min_at = |a: f64, b: f64| {
        let rhs = Real::<f64>::new(b);
        Real::<f64>::new(a).smooth_min(&rhs, c).value()
    };
    let fd_max = (smooth_max_at(a0 + h, b0) - smooth_max_at(a0 - h, b0)) / (2.0 * h);
    let fd_min = (smooth_min_at(a0 + h, b0) - smooth_min_at(a0 - h, b0)) / (2.0 * h);

    let mut tape: Tape<f64> = Tape::new(false);
    tape.activate().unwrap();
    let a = Real::<f64>::new(a0);
    let b = Real::<f64>::new(b0);
    tape.new_recording();
    let mut ymax = Real::<f64>::new(0.0);
    ymax.assign(a.smooth_max(&b, c));
    ymax.register_output();
    ymax.set_derivative(1.0);
    tape.compute_adjoints().unwrap();
    let reverse_max = a.derivative();
    tape.deactivate();
    assert!((reverse_max - fd_max).abs() < 1e-5);

    let mut tape2: Tape<f64> = Tape::new(false);
    tape2.activate().unwrap();
    let a2 = Real::<f64>::new(a0);
    let b2 = Real::<f64>::new(b0);
    tape2.new_recording();
    let mut ymin = Real::<f64>::new(0.0);
    ymin.assign(a2.smooth_min(&b2, c));
    ymin.register_output();
    ymin.set_derivative(1.0);
    tape2.compute_adjoints().unwrap();
    let reverse_min = a2.derivative();
    tape2.deactivate();
    assert!((reverse_min - fd_min).abs() < 1e-5);
}
