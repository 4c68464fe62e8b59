// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub(crate) module defines the floating point trait the tape core
//! is generic over.
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
// Numeric
/// The set of primitive operations the tape, expression and scalar layers
/// need from a value type `V`.
///
/// `adtrace` implements this for `f32` and `f64` via
/// [impl_numeric]. A value type with the same contract (for example a
/// higher-order wrapper built from `Real<f64>` itself, per
/// [doc_generic_v]) can implement it too.
#[cfg_attr(docsrs, doc(cfg))]
pub trait Numeric:
    Copy
    + Clone
    + PartialEq
    + PartialOrd
    + std::fmt::Debug
    + std::fmt::Display
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
    + std::ops::Div<Output = Self>
    + std::ops::Neg<Output = Self>
    + 'static
{
    /// The additive identity.
    fn zero() -> Self;
    /// The multiplicative identity.
    fn one() -> Self;
    /// `true` if `self == 0`.
    fn is_zero(self) -> bool {
        self == Self::zero()
    }
    /// `self * a + b`, using a fused multiply-add where the primitive
    /// type supports one; see spec.md's "Fused-multiply-add" note in
    /// §4.4.
    fn fma(self, a: Self, b: Self) -> Self;

    fn sqrt(self) -> Self;
    fn powf(self, y: Self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn ln(self) -> Self;
    fn log(self, base: Self) -> Self;
    fn log2(self) -> Self;
    fn log10(self) -> Self;
    fn exp(self) -> Self;
    fn exp2(self) -> Self;
    fn exp_m1(self) -> Self;
    fn ln_1p(self) -> Self;
    fn abs(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn asin(self) -> Self;
    fn acos(self) -> Self;
    fn atan(self) -> Self;
    fn atan2(self, x: Self) -> Self;
    fn sinh(self) -> Self;
    fn cosh(self) -> Self;
    fn tanh(self) -> Self;
    fn asinh(self) -> Self;
    fn acosh(self) -> Self;
    fn atanh(self) -> Self;
    fn cbrt(self) -> Self;
    fn hypot(self, other: Self) -> Self;
    fn erf(self) -> Self;
    fn erfc(self) -> Self;
    fn trunc(self) -> Self;
    fn round(self) -> Self;
    fn floor(self) -> Self;
    fn ceil(self) -> Self;
    fn fract(self) -> Self;
    fn copysign(self, sign: Self) -> Self;
    fn signum(self) -> Self;
    fn rem_euclid_std(self, other: Self) -> Self;
    fn nextafter(self, toward: Self) -> Self;

    fn is_nan(self) -> bool;
    fn is_infinite(self) -> bool;
    fn is_finite(self) -> bool;
    fn is_sign_negative(self) -> bool;
    fn is_normal(self) -> bool;

    fn from_i32(v: i32) -> Self;
    /// Lossy (for `f32`) conversion from `f64`, used to reconstruct a
    /// passive constant folded into an [crate::expr::UnaryOp]/[crate::expr::BinaryOp] variant.
    fn from_f64(v: f64) -> Self;
    /// The exact counterpart of [Numeric::from_f64].
    fn to_f64(self) -> f64;
}
//
// impl_numeric
/// Implements [Numeric] for a primitive float type.
///
/// * p : is `f32` or `f64`.
macro_rules! impl_numeric { ($p:ident) => {
    impl Numeric for $p {
        fn zero() -> Self { 0 as $p }
        fn one()  -> Self { 1 as $p }
        fn fma(self, a: Self, b: Self) -> Self { self.mul_add(a, b) }
        fn sqrt(self)  -> Self { $p::sqrt(self) }
        fn powf(self, y: Self) -> Self { $p::powf(self, y) }
        fn powi(self, n: i32) -> Self { $p::powi(self, n) }
        fn ln(self) -> Self { $p::ln(self) }
        fn log(self, base: Self) -> Self { $p::log(self, base) }
        fn log2(self) -> Self { $p::log2(self) }
        fn log10(self) -> Self { $p::log10(self) }
        fn exp(self) -> Self { $p::exp(self) }
        fn exp2(self) -> Self { $p::exp2(self) }
        fn exp_m1(self) -> Self { $p::exp_m1(self) }
        fn ln_1p(self) -> Self { $p::ln_1p(self) }
        fn abs(self) -> Self { $p::abs(self) }
        fn sin(self) -> Self { $p::sin(self) }
        fn cos(self) -> Self { $p::cos(self) }
        fn tan(self) -> Self { $p::tan(self) }
        fn asin(self) -> Self { $p::asin(self) }
        fn acos(self) -> Self { $p::acos(self) }
        fn atan(self) -> Self { $p::atan(self) }
        fn atan2(self, x: Self) -> Self { $p::atan2(self, x) }
        fn sinh(self) -> Self { $p::sinh(self) }
        fn cosh(self) -> Self { $p::cosh(self) }
        fn tanh(self) -> Self { $p::tanh(self) }
        fn asinh(self) -> Self { $p::asinh(self) }
        fn acosh(self) -> Self { $p::acosh(self) }
        fn atanh(self) -> Self { $p::atanh(self) }
        fn cbrt(self) -> Self { $p::cbrt(self) }
        fn hypot(self, other: Self) -> Self { $p::hypot(self, other) }
        fn erf(self) -> Self { erf_impl(self as f64) as $p }
        fn erfc(self) -> Self { 1.0 as $p - erf_impl(self as f64) as $p }
        fn trunc(self) -> Self { $p::trunc(self) }
        fn round(self) -> Self { $p::round(self) }
        fn floor(self) -> Self { $p::floor(self) }
        fn ceil(self) -> Self { $p::ceil(self) }
        fn fract(self) -> Self { $p::fract(self) }
        fn copysign(self, sign: Self) -> Self { $p::copysign(self, sign) }
        fn signum(self) -> Self {
            if self == 0 as $p { 0 as $p } else { $p::signum(self) }
        }
        fn rem_euclid_std(self, other: Self) -> Self { self % other }
        fn nextafter(self, toward: Self) -> Self { next_after(self, toward) }
        fn is_nan(self) -> bool { $p::is_nan(self) }
        fn is_infinite(self) -> bool { $p::is_infinite(self) }
        fn is_finite(self) -> bool { $p::is_finite(self) }
        fn is_sign_negative(self) -> bool { $p::is_sign_negative(self) }
        fn is_normal(self) -> bool { $p::is_normal(self) }
        fn from_i32(v: i32) -> Self { v as $p }
        fn from_f64(v: f64) -> Self { v as $p }
        fn to_f64(self) -> f64 { self as f64 }
    }
} }
impl_numeric!(f32);
impl_numeric!(f64);
//
// erf_impl
/// Abramowitz & Stegun 7.1.26 rational approximation of the error
/// function, accurate to about `1.5e-7`. `std` has no `erf`, and pulling
/// in a crate for one function would widen the dependency surface more
/// than it is worth, so it is hand-rolled here.
fn erf_impl(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}
//
// next_after
/// The next representable value of `from` in the direction of `to`,
/// implemented on the bit pattern since `std` does not expose `nextafter`.
fn next_after<P: NextAfterBits>(from: P, to: P) -> P {
    NextAfterBits::next_after(from, to)
}
//
// NextAfterBits
trait NextAfterBits: Sized {
    fn next_after(from: Self, to: Self) -> Self;
}
macro_rules! impl_next_after_bits { ($p:ident, $u:ident) => {
    impl NextAfterBits for $p {
        fn next_after(from: Self, to: Self) -> Self {
            if from.is_nan() || to.is_nan() { return $p::NAN; }
            if from == to { return to; }
            if from == 0 as $p {
                let sign_bit: $u = if to < 0 as $p { 1 } else { 0 };
                return $p::from_bits((sign_bit << ($u::BITS - 1)) | 1);
            }
            let bits = from.to_bits();
            let increasing = (to > from) == (from > 0 as $p);
            let next_bits = if increasing { bits + 1 } else { bits - 1 };
            $p::from_bits(next_bits)
        }
    }
} }
impl_next_after_bits!(f32, u32);
impl_next_after_bits!(f64, u64);
