// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub module defines [Real], the user-facing active scalar.
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
use std::cmp::Ordering;
use std::ptr::NonNull;
//
use crate::expr::{BinaryOp, Expr, OrderedConst, ToExpr, UnaryOp};
use crate::numeric::Numeric;
use crate::tape::{active_tape_ptr, sealed::ThisThreadTape, Tape};
use crate::{Slot, INVALID_SLOT};
//
// Real
/// An active scalar: a floating-point value plus, when a tape is active
/// on the thread at the time of construction, a slot on that tape.
///
/// `Real<V>` is not `Copy` — it owns its slot and releases it on drop —
/// so plain assignment (`a = b`) is always a move: Rust's default move
/// semantics already implement the "move construction transfers the
/// slot, move assignment releases the destination's slot first" contract
/// for free, since assigning over `a` drops its old value (releasing its
/// slot) before moving `b` in. Duplicating a value onto a second,
/// independent slot is [Clone::clone], which records a unary identity
/// statement when a tape is active.
pub struct Real<V: Numeric + ThisThreadTape> {
    value: V,
    slot: Slot,
    tape: Option<NonNull<Tape<V>>>,
}
//
impl<V: Numeric + ThisThreadTape> Real<V> {
    //
    // Real::new
    /// Builds an active scalar from `value`. If a tape is active on this
    /// thread, registers it there; otherwise the value is passive.
    pub fn new(value: V) -> Self {
        match active_tape_ptr::<V>() {
            Some(ptr) => {
                // Safety: see the module-level safety note on `tape` below.
                let slot = unsafe { (*ptr.as_ptr()).register_input() };
                Self { value, slot, tape: Some(ptr) }
            }
            None => Self { value, slot: INVALID_SLOT, tape: None },
        }
    }
    //
    // Real.value
    pub fn value(&self) -> V {
        self.value
    }
    //
    // Real.slot
    pub fn slot(&self) -> Slot {
        self.slot
    }
    //
    // Real.is_active
    pub fn is_active(&self) -> bool {
        self.tape.is_some()
    }
    //
    fn with_tape<R>(&self, f: impl FnOnce(&mut Tape<V>) -> R) -> Option<R> {
        // Safety: `self.tape`, when `Some`, was obtained from
        // `active_tape_ptr` and is cleared (along with every other
        // outstanding pointer to that tape) no later than the tape's
        // `Drop`, so it is always either `None` or a live, single-thread
        // owned `Tape<V>`.
        self.tape.map(|ptr| unsafe { f(&mut *ptr.as_ptr()) })
    }
    //
    // Real.derivative
    /// The accumulated adjoint for this variable's slot; `0` if passive
    /// or if the tape's derivatives have not been initialized.
    pub fn derivative(&self) -> V {
        self.with_tape(|t| t.derivative(self.slot).unwrap_or_else(|_| V::zero())).unwrap_or_else(V::zero)
    }
    //
    // Real.set_derivative
    pub fn set_derivative(&mut self, value: V) {
        let slot = self.slot;
        self.with_tape(|t| {
            let _ = t.set_derivative(slot, value);
        });
    }
    //
    // Real.register_output
    /// Ensures this variable has a slot (registering it now if it was
    /// passive) and emits a zero-operation statement so a seed adjoint
    /// can be set on it; see spec's `register_output`.
    pub fn register_output(&mut self) {
        if self.tape.is_none() {
            if let Some(ptr) = active_tape_ptr::<V>() {
                let slot = unsafe { (*ptr.as_ptr()).register_input() };
                self.slot = slot;
                self.tape = Some(ptr);
            } else {
                return;
            }
        }
        let slot = self.slot;
        self.with_tape(|t| {
            t.register_output(slot);
        });
    }
    //
    fn release_slot(&mut self) {
        if let Some(ptr) = self.tape.take() {
            unsafe { (*ptr.as_ptr()).unregister_variable(self.slot) };
        }
        self.slot = INVALID_SLOT;
    }
    //
    // Real.assign
    /// Evaluates `expr`'s cached root value into `self.value`, and, when
    /// a tape is active, records the assignment: reuses `self`'s slot if
    /// it already belongs to the active tape, otherwise allocates a
    /// fresh one.
    pub fn assign(&mut self, expr: Expr<V>) {
        self.value = expr.value();
        match active_tape_ptr::<V>() {
            Some(ptr) => {
                if self.tape != Some(ptr) {
                    self.release_slot();
                    self.slot = unsafe { (*ptr.as_ptr()).register_variable() };
                    self.tape = Some(ptr);
                }
                let slot = self.slot;
                unsafe { (*ptr.as_ptr()).record_assignment(slot, &expr) };
            }
            None => self.release_slot(),
        }
    }
    //
    // Real.is_nan
    pub fn is_nan(&self) -> bool {
        self.value.is_nan()
    }
    pub fn is_infinite(&self) -> bool {
        self.value.is_infinite()
    }
    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
    }
    pub fn is_sign_negative(&self) -> bool {
        self.value.is_sign_negative()
    }
    pub fn signbit(&self) -> bool {
        self.value.is_sign_negative()
    }
    pub fn is_normal(&self) -> bool {
        self.value.is_normal()
    }
}
//
impl<V: Numeric + ThisThreadTape> ToExpr<V> for &Real<V> {
    fn to_expr(self) -> Expr<V> {
        match self.tape {
            Some(_) => Expr::leaf_var(self.slot, self.value),
            None => Expr::konst(self.value),
        }
    }
}
//
impl<V: Numeric + ThisThreadTape> From<V> for Real<V> {
    fn from(value: V) -> Self {
        Real::new(value)
    }
}
//
impl<V: Numeric + ThisThreadTape> Clone for Real<V> {
    // Real::clone
    /// Copy construction: allocates a fresh slot and records a unary
    /// identity statement when a tape is active, per spec §4.5.
    fn clone(&self) -> Self {
        match self.tape {
            Some(ptr) => {
                let new_slot = unsafe { (*ptr.as_ptr()).register_variable() };
                let identity = Expr::leaf_var(self.slot, self.value);
                unsafe { (*ptr.as_ptr()).record_assignment(new_slot, &identity) };
                Self { value: self.value, slot: new_slot, tape: Some(ptr) }
            }
            None => Self { value: self.value, slot: INVALID_SLOT, tape: None },
        }
    }
}
//
impl<V: Numeric + ThisThreadTape> Drop for Real<V> {
    fn drop(&mut self) {
        self.release_slot();
    }
}
//
impl<V: Numeric + ThisThreadTape> std::fmt::Debug for Real<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Real").field("value", &self.value).field("slot", &self.slot).finish()
    }
}
impl<V: Numeric + ThisThreadTape> std::fmt::Display for Real<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.value, f)
    }
}
//
impl<V: Numeric + ThisThreadTape> PartialEq for Real<V> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}
impl<V: Numeric + ThisThreadTape> PartialOrd for Real<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}
//
impl<V: Numeric + ThisThreadTape, X: ToExpr<V>> std::ops::AddAssign<X> for Real<V> {
    fn add_assign(&mut self, rhs: X) {
        let expr = Expr::binary(BinaryOp::Add, ToExpr::to_expr(&*self), rhs.to_expr());
        self.assign(expr);
    }
}
impl<V: Numeric + ThisThreadTape, X: ToExpr<V>> std::ops::SubAssign<X> for Real<V> {
    fn sub_assign(&mut self, rhs: X) {
        let expr = Expr::binary(BinaryOp::Sub, ToExpr::to_expr(&*self), rhs.to_expr());
        self.assign(expr);
    }
}
impl<V: Numeric + ThisThreadTape, X: ToExpr<V>> std::ops::MulAssign<X> for Real<V> {
    fn mul_assign(&mut self, rhs: X) {
        let expr = Expr::binary(BinaryOp::Mul, ToExpr::to_expr(&*self), rhs.to_expr());
        self.assign(expr);
    }
}
impl<V: Numeric + ThisThreadTape, X: ToExpr<V>> std::ops::DivAssign<X> for Real<V> {
    fn div_assign(&mut self, rhs: X) {
        let expr = Expr::binary(BinaryOp::Div, ToExpr::to_expr(&*self), rhs.to_expr());
        self.assign(expr);
    }
}
//
// impl_binop_for_type
/// Generates the arithmetic-operator impls for one concrete value type
/// `$V`, across every combination of `&Real<$V>`, `Expr<$V>` and `$V`
/// operands. Rust's orphan rule forbids a single generic
/// `impl<V: Numeric> Add<..> for V`, since `V` is foreign (`f32`/`f64`);
/// instantiating per concrete type is the idiomatic way around it,
/// mirroring how a C++ adjoint AD library enumerates the same
/// combinations through a preprocessor macro.
macro_rules! impl_binop_for_type { ($Trait:ident, $method:ident, $op:expr, $V:ty) => {
    impl std::ops::$Trait<&Real<$V>> for &Real<$V> {
        type Output = Expr<$V>;
        fn $method(self, rhs: &Real<$V>) -> Expr<$V> {
            Expr::binary($op, ToExpr::to_expr(self), ToExpr::to_expr(rhs))
        }
    }
    impl std::ops::$Trait<Expr<$V>> for &Real<$V> {
        type Output = Expr<$V>;
        fn $method(self, rhs: Expr<$V>) -> Expr<$V> {
            Expr::binary($op, ToExpr::to_expr(self), rhs)
        }
    }
    impl std::ops::$Trait<&Real<$V>> for Expr<$V> {
        type Output = Expr<$V>;
        fn $method(self, rhs: &Real<$V>) -> Expr<$V> {
            Expr::binary($op, self, ToExpr::to_expr(rhs))
        }
    }
    impl std::ops::$Trait<Expr<$V>> for Expr<$V> {
        type Output = Expr<$V>;
        fn $method(self, rhs: Expr<$V>) -> Expr<$V> {
            Expr::binary($op, self, rhs)
        }
    }
    impl std::ops::$Trait<&Real<$V>> for $V {
        type Output = Expr<$V>;
        fn $method(self, rhs: &Real<$V>) -> Expr<$V> {
            Expr::binary($op, Expr::konst(self), ToExpr::to_expr(rhs))
        }
    }
    impl std::ops::$Trait<$V> for &Real<$V> {
        type Output = Expr<$V>;
        fn $method(self, rhs: $V) -> Expr<$V> {
            Expr::binary($op, ToExpr::to_expr(self), Expr::konst(rhs))
        }
    }
    impl std::ops::$Trait<Expr<$V>> for $V {
        type Output = Expr<$V>;
        fn $method(self, rhs: Expr<$V>) -> Expr<$V> {
            Expr::binary($op, Expr::konst(self), rhs)
        }
    }
    impl std::ops::$Trait<$V> for Expr<$V> {
        type Output = Expr<$V>;
        fn $method(self, rhs: $V) -> Expr<$V> {
            Expr::binary($op, self, Expr::konst(rhs))
        }
    }
} }
//
macro_rules! impl_arith_ops_for_type { ($V:ty) => {
    impl_binop_for_type!(Add, add, BinaryOp::Add, $V);
    impl_binop_for_type!(Sub, sub, BinaryOp::Sub, $V);
    impl_binop_for_type!(Mul, mul, BinaryOp::Mul, $V);
    impl_binop_for_type!(Div, div, BinaryOp::Div, $V);
    //
    impl std::ops::Neg for &Real<$V> {
        type Output = Expr<$V>;
        fn neg(self) -> Expr<$V> { Expr::unary(UnaryOp::Neg, ToExpr::to_expr(self)) }
    }
    impl std::ops::Neg for Expr<$V> {
        type Output = Expr<$V>;
        fn neg(self) -> Expr<$V> { Expr::unary(UnaryOp::Neg, self) }
    }
} }
impl_arith_ops_for_type!(f32);
impl_arith_ops_for_type!(f64);
//
// unary_math
/// Generates one pure (no-parameter) math function on both [Expr] and
/// [Real]: the `Expr` method consumes `self`, the `Real` method borrows
/// and routes through [ToExpr].
macro_rules! unary_math { ($name:ident, $op:expr) => {
    impl<V: Numeric + ThisThreadTape> Expr<V> {
        pub fn $name(self) -> Expr<V> { Expr::unary($op, self) }
    }
    impl<V: Numeric + ThisThreadTape> Real<V> {
        pub fn $name(&self) -> Expr<V> { ToExpr::to_expr(self).$name() }
    }
} }
unary_math!(sqrt, UnaryOp::Sqrt);
unary_math!(ln, UnaryOp::Ln);
unary_math!(log2, UnaryOp::Log2);
unary_math!(log10, UnaryOp::Log10);
unary_math!(exp, UnaryOp::Exp);
unary_math!(exp2, UnaryOp::Exp2);
unary_math!(exp_m1, UnaryOp::ExpM1);
unary_math!(ln_1p, UnaryOp::Ln1p);
unary_math!(abs, UnaryOp::Abs);
unary_math!(sin, UnaryOp::Sin);
unary_math!(cos, UnaryOp::Cos);
unary_math!(tan, UnaryOp::Tan);
unary_math!(asin, UnaryOp::Asin);
unary_math!(acos, UnaryOp::Acos);
unary_math!(atan, UnaryOp::Atan);
unary_math!(sinh, UnaryOp::Sinh);
unary_math!(cosh, UnaryOp::Cosh);
unary_math!(tanh, UnaryOp::Tanh);
unary_math!(asinh, UnaryOp::Asinh);
unary_math!(acosh, UnaryOp::Acosh);
unary_math!(atanh, UnaryOp::Atanh);
unary_math!(cbrt, UnaryOp::Cbrt);
unary_math!(erf, UnaryOp::Erf);
unary_math!(erfc, UnaryOp::Erfc);
unary_math!(trunc, UnaryOp::Trunc);
unary_math!(round, UnaryOp::Round);
unary_math!(floor, UnaryOp::Floor);
unary_math!(ceil, UnaryOp::Ceil);
//
// binary_math
/// Generates one two-operand math function on both [Expr] and [Real],
/// accepting anything that implements [ToExpr] as the other operand.
macro_rules! binary_math { ($name:ident, $op:expr) => {
    impl<V: Numeric + ThisThreadTape> Expr<V> {
        pub fn $name(self, rhs: impl ToExpr<V>) -> Expr<V> { Expr::binary($op, self, rhs.to_expr()) }
    }
    impl<V: Numeric + ThisThreadTape> Real<V> {
        pub fn $name(&self, rhs: impl ToExpr<V>) -> Expr<V> { ToExpr::to_expr(self).$name(rhs) }
    }
} }
binary_math!(atan2, BinaryOp::Atan2);
binary_math!(hypot, BinaryOp::Hypot);
binary_math!(fmod, BinaryOp::Fmod);
binary_math!(min, BinaryOp::Min);
binary_math!(max, BinaryOp::Max);
//
impl<V: Numeric + ThisThreadTape> Expr<V> {
    // Expr.powf
    pub fn powf(self, exponent: V) -> Expr<V> {
        Expr::unary(UnaryOp::PowConst(OrderedConst::new(exponent)), self)
    }
    // Expr.powi
    /// Integer-power special case: the derivative `n*x^(n-1)` is formed
    /// by repeated multiplication rather than `log`/`exp`, preserving
    /// accuracy near zero; see spec §4.4's "Integer powers".
    pub fn powi(self, n: i32) -> Expr<V> {
        Expr::unary(UnaryOp::PowiConst(n), self)
    }
    // Expr.pow
    /// General (possibly non-constant) exponent.
    pub fn pow(self, rhs: impl ToExpr<V>) -> Expr<V> {
        Expr::binary(BinaryOp::Pow, self, rhs.to_expr())
    }
    // Expr.smooth_abs
    pub fn smooth_abs(self, c: V) -> Expr<V> {
        Expr::unary(UnaryOp::SmoothAbs(OrderedConst::new(c)), self)
    }
    // Expr.smooth_min
    pub fn smooth_min(self, rhs: impl ToExpr<V>, c: V) -> Expr<V> {
        Expr::binary(BinaryOp::SmoothMinC(OrderedConst::new(c)), self, rhs.to_expr())
    }
    // Expr.smooth_max
    pub fn smooth_max(self, rhs: impl ToExpr<V>, c: V) -> Expr<V> {
        Expr::binary(BinaryOp::SmoothMaxC(OrderedConst::new(c)), self, rhs.to_expr())
    }
}
//
impl<V: Numeric + ThisThreadTape> Real<V> {
    pub fn powf(&self, exponent: V) -> Expr<V> {
        ToExpr::to_expr(self).powf(exponent)
    }
    pub fn powi(&self, n: i32) -> Expr<V> {
        ToExpr::to_expr(self).powi(n)
    }
    pub fn pow(&self, rhs: impl ToExpr<V>) -> Expr<V> {
        ToExpr::to_expr(self).pow(rhs)
    }
    pub fn smooth_abs(&self, c: V) -> Expr<V> {
        ToExpr::to_expr(self).smooth_abs(c)
    }
    pub fn smooth_min(&self, rhs: impl ToExpr<V>, c: V) -> Expr<V> {
        ToExpr::to_expr(self).smooth_min(rhs, c)
    }
    pub fn smooth_max(&self, rhs: impl ToExpr<V>, c: V) -> Expr<V> {
        ToExpr::to_expr(self).smooth_max(rhs, c)
    }
}
//
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::Tape;
    //
    #[test]
    fn construction_has_the_input_value_and_zero_derivative() {
        let mut tape: Tape<f64> = Tape::new(false);
        tape.activate().unwrap();
        let x = Real::new(3.5);
        tape.new_recording();
        assert_eq!(x.value(), 3.5);
        assert_eq!(x.derivative(), 0.0);
        tape.deactivate();
    }
    //
    #[test]
    fn product_matches_scenario_s2() {
        let mut tape: Tape<f64> = Tape::new(false);
        tape.activate().unwrap();
        let x0 = Real::new(2.0);
        let x1 = Real::new(5.0);
        tape.new_recording();
        let mut y = Real::new(0.0);
        y.assign(&x0 * &x1);
        y.register_output();
        y.set_derivative(1.0);
        tape.compute_adjoints().unwrap();
        assert_eq!(y.value(), 10.0);
        assert_eq!(x0.derivative(), 5.0);
        assert_eq!(x1.derivative(), 2.0);
        tape.deactivate();
    }
    //
    #[test]
    fn quartic_matches_scenario_s3() {
        let mut tape: Tape<f64> = Tape::new(false);
        tape.activate().unwrap();
        let x = Real::new(2.0);
        tape.new_recording();
        let mut y = Real::new(0.0);
        y.assign(2.0 * x.powi(4));
        y.register_output();
        y.set_derivative(1.0);
        tape.compute_adjoints().unwrap();
        assert!((y.value() - 32.0).abs() < 1e-12);
        assert!((x.derivative() - 64.0).abs() < 1e-12);
        tape.deactivate();
    }
    //
    #[test]
    fn clone_allocates_a_fresh_slot_and_records_identity() {
        let mut tape: Tape<f64> = Tape::new(false);
        tape.activate().unwrap();
        let x = Real::new(2.0);
        tape.new_recording();
        let mut y = x.clone();
        assert_ne!(x.slot(), y.slot());
        y.register_output();
        y.set_derivative(1.0);
        tape.compute_adjoints().unwrap();
        assert_eq!(x.derivative(), 1.0);
        tape.deactivate();
    }
}
