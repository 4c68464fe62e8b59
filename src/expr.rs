// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub(crate) module defines the compile-time-typed expression tree
//! ([Expr]) that fuses compound arithmetic before it touches the tape.
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
use crate::numeric::Numeric;
use crate::Slot;
//
// Leaf
/// A leaf of an expression: either a tape variable's slot and current
/// value, or a passive constant.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Leaf<V> {
    Var { slot: Slot, value: V },
    Const(V),
}
//
impl<V: Numeric> Leaf<V> {
    fn value(&self) -> V {
        match *self {
            Leaf::Var { value, .. } => value,
            Leaf::Const(value) => value,
        }
    }
}
//
// UnaryOp
/// Identity of a unary operator; see spec.md §4.4's operator table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    AddConst(OrderedConst),
    MulConst(OrderedConst),
    SubConstLeft(OrderedConst),  // c - x
    SubConstRight(OrderedConst), // x - c
    DivConstLeft(OrderedConst),  // c / x
    DivConstRight(OrderedConst), // x / c
    PowConst(OrderedConst),      // x ^ c  (c not necessarily integral)
    PowiConst(i32),              // x ^ n, integer exponent
    Sqrt,
    Ln,
    Log2,
    Log10,
    Exp,
    Exp2,
    ExpM1,
    Ln1p,
    Abs,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Cbrt,
    Erf,
    Erfc,
    Trunc,
    Round,
    Floor,
    Ceil,
    SmoothAbs(OrderedConst),
}
//
// BinaryOp
/// Identity of a binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Atan2,
    Hypot,
    Fmod,
    Min,
    Max,
    SmoothMinC(OrderedConst),
    SmoothMaxC(OrderedConst),
}
//
// OrderedConst
/// A wrapper that lets a constant float operand live inside a `PartialEq +
/// Eq` enum variant; equality is only used for debug formatting of the
/// expression tree, never for floating-point comparison of results, so
/// NaN's non-reflexivity is not a concern.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OrderedConst(pub(crate) ordered_float::OrderedFloat<f64>);
impl PartialEq for OrderedConst {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for OrderedConst {}
impl OrderedConst {
    pub(crate) fn new<V: Numeric>(v: V) -> Self {
        OrderedConst(ordered_float::OrderedFloat(v.to_f64()))
    }
    pub(crate) fn get<V: Numeric>(&self) -> V {
        V::from_f64(self.0.0)
    }
}
//
impl UnaryOp {
    // UnaryOp::eval
    /// Computes `v = op(a)`.
    pub(crate) fn eval<V: Numeric>(&self, a: V) -> V {
        match self {
            UnaryOp::Neg => -a,
            UnaryOp::AddConst(c) => a + c.get::<V>(),
            UnaryOp::MulConst(c) => a * c.get::<V>(),
            UnaryOp::SubConstLeft(c) => c.get::<V>() - a,
            UnaryOp::SubConstRight(c) => a - c.get::<V>(),
            UnaryOp::DivConstLeft(c) => c.get::<V>() / a,
            UnaryOp::DivConstRight(c) => a / c.get::<V>(),
            UnaryOp::PowConst(c) => a.powf(c.get::<V>()),
            UnaryOp::PowiConst(n) => a.powi(*n),
            UnaryOp::Sqrt => a.sqrt(),
            UnaryOp::Ln => a.ln(),
            UnaryOp::Log2 => a.log2(),
            UnaryOp::Log10 => a.log10(),
            UnaryOp::Exp => a.exp(),
            UnaryOp::Exp2 => a.exp2(),
            UnaryOp::ExpM1 => a.exp_m1(),
            UnaryOp::Ln1p => a.ln_1p(),
            UnaryOp::Abs => a.abs(),
            UnaryOp::Sin => a.sin(),
            UnaryOp::Cos => a.cos(),
            UnaryOp::Tan => a.tan(),
            UnaryOp::Asin => a.asin(),
            UnaryOp::Acos => a.acos(),
            UnaryOp::Atan => a.atan(),
            UnaryOp::Sinh => a.sinh(),
            UnaryOp::Cosh => a.cosh(),
            UnaryOp::Tanh => a.tanh(),
            UnaryOp::Asinh => a.asinh(),
            UnaryOp::Acosh => a.acosh(),
            UnaryOp::Atanh => a.atanh(),
            UnaryOp::Cbrt => a.cbrt(),
            UnaryOp::Erf => a.erf(),
            UnaryOp::Erfc => a.erfc(),
            UnaryOp::Trunc => a.trunc(),
            UnaryOp::Round => a.round(),
            UnaryOp::Floor => a.floor(),
            UnaryOp::Ceil => a.ceil(),
            UnaryOp::SmoothAbs(c) => smooth_abs_value(a, c.get::<V>()),
        }
    }
    //
    // UnaryOp::partial
    /// `∂v/∂a`, given the operand `a` and the already-computed value `v`;
    /// see spec.md §4.4's "Partial derivative contract".
    pub(crate) fn partial<V: Numeric>(&self, a: V, v: V) -> V {
        let zero = V::zero();
        let one = V::one();
        match self {
            UnaryOp::Neg => -one,
            UnaryOp::AddConst(_) => one,
            UnaryOp::MulConst(c) => c.get::<V>(),
            UnaryOp::SubConstLeft(_) => -one,
            UnaryOp::SubConstRight(_) => one,
            UnaryOp::DivConstLeft(_) => -v / a, // d/da [c/a] = -c/a^2 = -(c/a)/a = -v/a
            UnaryOp::DivConstRight(c) => one / c.get::<V>(),
            UnaryOp::PowConst(c) => {
                let c = c.get::<V>();
                if a.is_zero() && c == one {
                    one
                } else {
                    c * a.powf(c - one)
                }
            }
            UnaryOp::PowiConst(n) => V::from_i32(*n) * a.powi(n - 1),
            UnaryOp::Sqrt => one / (V::from_i32(2) * v),
            UnaryOp::Ln => one / a,
            UnaryOp::Log2 => one / (a * V::from_i32(2).ln()),
            UnaryOp::Log10 => one / (a * V::from_i32(10).ln()),
            UnaryOp::Exp => v,
            UnaryOp::Exp2 => v * V::from_i32(2).ln(),
            UnaryOp::ExpM1 => v + one,
            UnaryOp::Ln1p => one / (a + one),
            UnaryOp::Abs => a.signum(),
            UnaryOp::Sin => a.cos(),
            UnaryOp::Cos => -a.sin(),
            UnaryOp::Tan => one + v * v,
            UnaryOp::Asin => one / (one - a * a).sqrt(),
            UnaryOp::Acos => -one / (one - a * a).sqrt(),
            UnaryOp::Atan => one / (one + a * a),
            UnaryOp::Sinh => a.cosh(),
            UnaryOp::Cosh => a.sinh(),
            UnaryOp::Tanh => one - v * v,
            UnaryOp::Asinh => one / (a * a + one).sqrt(),
            UnaryOp::Acosh => one / (a * a - one).sqrt(),
            UnaryOp::Atanh => one / (one - a * a),
            UnaryOp::Cbrt => {
                if v.is_zero() { zero } else { one / (V::from_i32(3) * v * v) }
            }
            UnaryOp::Erf => {
                let two_over_sqrt_pi = V::from_i32(2) / pi_sqrt::<V>();
                two_over_sqrt_pi * (-a * a).exp()
            }
            UnaryOp::Erfc => {
                let two_over_sqrt_pi = V::from_i32(2) / pi_sqrt::<V>();
                -two_over_sqrt_pi * (-a * a).exp()
            }
            UnaryOp::Trunc | UnaryOp::Round | UnaryOp::Floor | UnaryOp::Ceil => zero,
            UnaryOp::SmoothAbs(c) => smooth_abs_partial(a, c.get::<V>()),
        }
    }
}
//
fn pi_sqrt<V: Numeric>() -> V {
    // sqrt(pi), built from an atan-based pi so no crate-level constant
    // needs to thread a platform f32/f64 literal through Numeric.
    let one = V::one();
    let pi = V::from_i32(4) * one.atan();
    pi.sqrt()
}
//
// smooth_abs_value
/// `smooth_abs(x, c)` per spec.md §4.4: matches `|x|` outside `[-c, c]`;
/// inside, the unique odd cubic that is C¹ at `±c` and passes through the
/// origin.
pub(crate) fn smooth_abs_value<V: Numeric>(x: V, c: V) -> V {
    let ax = x.abs();
    if ax >= c {
        ax
    } else {
        let two = V::from_i32(2);
        let mag = ax * ax * (two / c - ax / (c * c));
        mag
    }
}
//
fn smooth_abs_partial<V: Numeric>(x: V, c: V) -> V {
    let ax = x.abs();
    if ax >= c {
        x.signum()
    } else {
        // smooth_abs_value is even in x, so its derivative is odd: scale
        // the x>=0 slope 4*ax/c - 3*ax^2/c^2 by sign(x).
        x.signum() * (V::from_i32(4) * ax / c - V::from_i32(3) * ax * ax / (c * c))
    }
}
//
impl BinaryOp {
    // BinaryOp::eval
    pub(crate) fn eval<V: Numeric>(&self, a: V, b: V) -> V {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Atan2 => a.atan2(b),
            BinaryOp::Hypot => a.hypot(b),
            BinaryOp::Fmod => a.rem_euclid_std(b),
            BinaryOp::Min => if a < b { a } else { b },
            BinaryOp::Max => if a > b { a } else { b },
            BinaryOp::SmoothMaxC(c) => {
                let c = c.get::<V>();
                (a + b + smooth_abs_value(a - b, c)) / V::from_i32(2)
            }
            BinaryOp::SmoothMinC(c) => {
                let c = c.get::<V>();
                (a + b - smooth_abs_value(a - b, c)) / V::from_i32(2)
            }
        }
    }
    //
    // BinaryOp::partial
    /// `(∂v/∂a, ∂v/∂b)`, given the operands and the already-computed `v`.
    pub(crate) fn partial<V: Numeric>(&self, a: V, b: V, v: V) -> (V, V) {
        let zero = V::zero();
        let one = V::one();
        match self {
            BinaryOp::Add => (one, one),
            BinaryOp::Sub => (one, -one),
            BinaryOp::Mul => (b, a),
            BinaryOp::Div => (one / b, -v / b),
            BinaryOp::Pow => {
                let da = if a.is_zero() { zero } else { b * v / a };
                let db = if a <= zero { zero } else { v * a.ln() };
                (da, db)
            }
            BinaryOp::Atan2 => {
                let denom = a * a + b * b;
                (b / denom, -a / denom)
            }
            BinaryOp::Hypot => (a / v, b / v),
            BinaryOp::Fmod => (one, -(a / b).trunc()),
            BinaryOp::Min => {
                if a < b { (one, zero) } else if b < a { (zero, one) } else { (one / V::from_i32(2), one / V::from_i32(2)) }
            }
            BinaryOp::Max => {
                if a > b { (one, zero) } else if b > a { (zero, one) } else { (one / V::from_i32(2), one / V::from_i32(2)) }
            }
            BinaryOp::SmoothMaxC(c) => {
                let c = c.get::<V>();
                let sa = smooth_abs_partial(a - b, c);
                let half = one / V::from_i32(2);
                (half * (one + sa), half * (one - sa))
            }
            BinaryOp::SmoothMinC(c) => {
                let c = c.get::<V>();
                let sa = smooth_abs_partial(a - b, c);
                let half = one / V::from_i32(2);
                (half * (one - sa), half * (one + sa))
            }
        }
    }
}
//
// UnaryNode
pub(crate) struct UnaryNode<V> {
    pub(crate) op: UnaryOp,
    pub(crate) child: Expr<V>,
    pub(crate) value: V,
    pub(crate) num_leaves: usize,
}
//
// BinaryNode
pub(crate) struct BinaryNode<V> {
    pub(crate) op: BinaryOp,
    pub(crate) left: Expr<V>,
    pub(crate) right: Expr<V>,
    pub(crate) value: V,
    pub(crate) num_leaves: usize,
}
//
// Expr
/// A typed tree of nullary, unary and binary nodes describing a composite
/// computation; see spec.md §4.4.
///
/// `V`'s arithmetic is eagerly folded as the tree is built (each node
/// caches its value), so evaluating an `Expr` is just reading the root's
/// cached value: construction, not assignment, is where the forward
/// numeric work happens.
pub enum Expr<V> {
    Leaf(Leaf<V>),
    Unary(Box<UnaryNode<V>>),
    Binary(Box<BinaryNode<V>>),
}
//
impl<V: Numeric> Expr<V> {
    //
    // Expr::leaf_var
    pub(crate) fn leaf_var(slot: Slot, value: V) -> Self {
        Expr::Leaf(Leaf::Var { slot, value })
    }
    //
    // Expr::konst
    pub fn konst(value: V) -> Self {
        Expr::Leaf(Leaf::Const(value))
    }
    //
    // Expr.value
    /// The cached value of this sub-tree's root.
    pub fn value(&self) -> V {
        match self {
            Expr::Leaf(l) => l.value(),
            Expr::Unary(n) => n.value,
            Expr::Binary(n) => n.value,
        }
    }
    //
    // Expr.num_leaves
    /// The number of active (tape-variable) leaves reachable from this
    /// node; used to reserve tape operation capacity before the
    /// recording walk, per spec.md §4.4's "Traits" paragraph.
    pub(crate) fn num_leaves(&self) -> usize {
        match self {
            Expr::Leaf(Leaf::Var { .. }) => 1,
            Expr::Leaf(Leaf::Const(_)) => 0,
            Expr::Unary(n) => n.num_leaves,
            Expr::Binary(n) => n.num_leaves,
        }
    }
    //
    // Expr::unary
    pub(crate) fn unary(op: UnaryOp, child: Expr<V>) -> Self {
        let value = op.eval(child.value());
        let num_leaves = child.num_leaves();
        Expr::Unary(Box::new(UnaryNode { op, child, value, num_leaves }))
    }
    //
    // Expr::binary
    pub(crate) fn binary(op: BinaryOp, left: Expr<V>, right: Expr<V>) -> Self {
        let value = op.eval(left.value(), right.value());
        let num_leaves = left.num_leaves() + right.num_leaves();
        Expr::Binary(Box::new(BinaryNode { op, left, right, value, num_leaves }))
    }
    //
    // Expr.record_into
    /// Depth-first walk that appends one `(multiplier, slot)` operation
    /// per active leaf to `sink`, carrying the running chain-rule
    /// product `chain` from the root.
    ///
    /// `sink` is generic over the minimal capability the walk needs
    /// (pushing one reserved operation record) so this module does not
    /// need to know about [crate::tape::Tape]'s full shape.
    pub(crate) fn record_into(&self, chain: V, sink: &mut impl ExprSink<V>) {
        match self {
            Expr::Leaf(Leaf::Var { slot, .. }) => sink.push_op(chain, *slot),
            Expr::Leaf(Leaf::Const(_)) => {}
            Expr::Unary(n) => {
                let local = n.op.partial(n.child.value(), n.value);
                n.child.record_into(chain * local, sink);
            }
            Expr::Binary(n) => {
                let (dl, dr) = n.op.partial(n.left.value(), n.right.value(), n.value);
                if n.left.num_leaves() > 0 {
                    n.left.record_into(chain.fma(dl, V::zero()), sink);
                }
                if n.right.num_leaves() > 0 {
                    n.right.record_into(chain.fma(dr, V::zero()), sink);
                }
            }
        }
    }
}
//
// ExprSink
/// The capability [Expr::record_into] needs from whatever is recording
/// it onto a tape: append one operation record.
pub(crate) trait ExprSink<V> {
    fn push_op(&mut self, multiplier: V, input_slot: Slot);
}
//
// ToExpr
/// Converts an operand of user arithmetic (an active variable reference,
/// an already-built expression, or a passive constant) into an [Expr]
/// leaf or sub-tree, so `+`/`-`/`*`/`/` and the math functions can share
/// one generic body across all three operand kinds.
pub trait ToExpr<V: Numeric> {
    fn to_expr(self) -> Expr<V>;
}
//
impl<V: Numeric> ToExpr<V> for Expr<V> {
    fn to_expr(self) -> Expr<V> {
        self
    }
}
