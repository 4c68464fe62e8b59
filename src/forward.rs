// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub module defines [Dual], a forward-mode mirror of
//! [crate::scalar::Real] with an identical arithmetic contract but no
//! tape: each value carries its own tangent and the chain rule is applied
//! eagerly at every node, rather than recorded for a later reverse sweep.
//!
//! Listed at interface level only; it plays no part in reverse-mode
//! recording or propagation and is not exercised by the checkpoint or
//! sub-recording machinery.
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
use crate::numeric::Numeric;
//
// Dual
/// A `(value, derivative)` pair: `derivative` is `d value / d seed` for
/// whichever single input seed this seed-sweep is tracking.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dual<V> {
    value: V,
    derivative: V,
}
//
impl<V: Numeric> Dual<V> {
    //
    // Dual::constant
    /// A passive value: zero tangent.
    pub fn constant(value: V) -> Self {
        Self { value, derivative: V::zero() }
    }
    //
    // Dual::seed
    /// An independent variable seeded with tangent `1`, i.e. the input
    /// whose partial derivative this forward sweep computes.
    pub fn seed(value: V) -> Self {
        Self { value, derivative: V::one() }
    }
    //
    pub fn value(&self) -> V {
        self.value
    }
    pub fn derivative(&self) -> V {
        self.derivative
    }
    //
    // Dual.sqrt
    pub fn sqrt(self) -> Self {
        let value = self.value.sqrt();
        Self { value, derivative: self.derivative / (V::from_i32(2) * value) }
    }
    // Dual.exp
    pub fn exp(self) -> Self {
        let value = self.value.exp();
        Self { value, derivative: self.derivative * value }
    }
    // Dual.ln
    pub fn ln(self) -> Self {
        Self { value: self.value.ln(), derivative: self.derivative / self.value }
    }
    // Dual.sin
    pub fn sin(self) -> Self {
        Self { value: self.value.sin(), derivative: self.derivative * self.value.cos() }
    }
    // Dual.cos
    pub fn cos(self) -> Self {
        Self { value: self.value.cos(), derivative: -self.derivative * self.value.sin() }
    }
    // Dual.powi
    pub fn powi(self, n: i32) -> Self {
        let value = self.value.powi(n);
        let derivative = self.derivative * V::from_i32(n) * self.value.powi(n - 1);
        Self { value, derivative }
    }
}
//
impl<V: Numeric> std::ops::Add for Dual<V> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { value: self.value + rhs.value, derivative: self.derivative + rhs.derivative }
    }
}
impl<V: Numeric> std::ops::Sub for Dual<V> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { value: self.value - rhs.value, derivative: self.derivative - rhs.derivative }
    }
}
impl<V: Numeric> std::ops::Mul for Dual<V> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        // tangent-linear chain rule for a product: dy = x0*dx1 + x1*dx0
        let value = self.value * rhs.value;
        let derivative = self.value * rhs.derivative + rhs.value * self.derivative;
        Self { value, derivative }
    }
}
impl<V: Numeric> std::ops::Div for Dual<V> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let value = self.value / rhs.value;
        let derivative = (self.derivative - value * rhs.derivative) / rhs.value;
        Self { value, derivative }
    }
}
impl<V: Numeric> std::ops::Neg for Dual<V> {
    type Output = Self;
    fn neg(self) -> Self {
        Self { value: -self.value, derivative: -self.derivative }
    }
}
//
#[cfg(test)]
mod tests {
    use super::*;
    //
    #[test]
    fn quartic_matches_the_reverse_mode_scenario_s3() {
        let x = Dual::seed(2.0_f64);
        let y = Dual::constant(2.0) * x.powi(4);
        assert!((y.value() - 32.0).abs() < 1e-12);
        assert!((y.derivative() - 64.0).abs() < 1e-12);
    }
}
