// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub module defines [Tape], the reverse-mode recording and
//! propagation engine at the core of this crate.
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
use std::ptr::NonNull;
//
use crate::checkpoint::{CheckpointCallback, NullCallback};
use crate::chunk::ChunkBuf;
use crate::error::{Result, TapeError};
use crate::expr::{Expr, ExprSink};
use crate::numeric::Numeric;
use crate::{Slot, INVALID_SLOT};
//
// OpRecord
/// One elementary operand participation: `(multiplier, input_slot)`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OpRecord<V> {
    pub(crate) multiplier: V,
    pub(crate) input_slot: Slot,
}
impl<V: Numeric> Default for OpRecord<V> {
    fn default() -> Self {
        Self { multiplier: V::zero(), input_slot: INVALID_SLOT }
    }
}
//
// StmtRecord
/// One assignment: the half-open range of operations for this statement
/// is `[stmts[i-1].op_end_offset, stmts[i].op_end_offset)`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StmtRecord {
    pub(crate) op_end_offset: u32,
    pub(crate) output_slot: Slot,
}
//
// SubRecording
/// A stack frame bracketing a region of the recording; see spec §3's
/// "Sub-recording" entity and §4.3's `rec_stack`.
struct SubRecording {
    stmt_start: usize,
    op_start: usize,
    slot_watermark: Slot,
    max_derivative: Slot,
    derivatives_initialized: bool,
    checkpoints_start: usize,
}
//
// sealed::ThisThreadTape
pub(crate) mod sealed {
    //! Seals the thread-local-tape-pointer trait so only [super::impl_this_thread_tape]
    //! can implement it.
    use super::Tape;
    use std::cell::Cell;
    use std::ptr::NonNull;
    use std::thread::LocalKey;
    //
    /// A value type for which a thread-local "currently active tape"
    /// pointer slot exists. Implemented for `f32` and `f64` via
    /// [super::impl_this_thread_tape]; a user value type that wants to
    /// play the role of `V` must implement this too.
    pub trait ThisThreadTape
    where
        Self: Sized + 'static,
    {
        fn slot() -> &'static LocalKey<Cell<Option<NonNull<Tape<Self>>>>>
        where
            Self: crate::numeric::Numeric;
    }
}
//
// impl_this_thread_tape!
/// Implements [sealed::ThisThreadTape] for the value type `V`, giving it
/// its own per-thread "currently active tape" pointer cell.
macro_rules! impl_this_thread_tape { ($V:ty) => {
    impl crate::tape::sealed::ThisThreadTape for $V {
        fn slot() -> &'static std::thread::LocalKey<
            std::cell::Cell<Option<std::ptr::NonNull<crate::tape::Tape<$V>>>>
        > {
            thread_local! {
                static THIS_THREAD_TAPE: std::cell::Cell<
                    Option<std::ptr::NonNull<crate::tape::Tape<$V>>>
                > = const { std::cell::Cell::new(None) };
            }
            &THIS_THREAD_TAPE
        }
    }
} }
pub(crate) use impl_this_thread_tape;
impl_this_thread_tape!(f32);
impl_this_thread_tape!(f64);
//
// Tape
/// The tape: records operations and statements, manages nested
/// sub-recordings and checkpoint callbacks, and executes reverse
/// propagation. See spec §4.3.
///
/// A `Tape` is an ordinary, movable, single-owner value; only a raw
/// pointer to "the tape currently active on this thread" lives in
/// thread-local storage, set by [Tape::activate] and cleared by
/// [Tape::deactivate] or `Drop`. This mirrors how a C++ adjoint AD
/// library keeps a user-owned tape object alongside a thread-local
/// pointer to it, rather than owning the only tape from within the
/// thread-local cell itself.
pub struct Tape<V: Numeric + sealed::ThisThreadTape> {
    ops: ChunkBuf<OpRecord<V>>,
    stmts: ChunkBuf<StmtRecord>,
    derivs: Vec<V>,
    checkpoints: Vec<(usize, usize)>,
    callbacks: Vec<Box<dyn CheckpointCallback<V>>>,
    rec_stack: Vec<SubRecording>,
    allocator: crate::slot::SlotAllocator,
    active: bool,
}
//
// DebugCounts
/// A plain snapshot of tape sizes, exposed in place of a logging
/// dependency; see [Tape::debug_counts].
#[derive(Clone, Copy, Debug)]
pub struct DebugCounts {
    pub num_statements: usize,
    pub num_operations: usize,
    pub watermark: Slot,
    pub num_free_ranges: usize,
}
//
impl<V: Numeric + sealed::ThisThreadTape> Tape<V> {
    //
    // Tape::new
    /// Creates a deactivated tape with slot reuse set by `reuse_slots`.
    pub fn new(reuse_slots: bool) -> Self {
        let mut stmts = ChunkBuf::new();
        stmts.push(StmtRecord { op_end_offset: 0, output_slot: INVALID_SLOT });
        let base = SubRecording {
            stmt_start: 1,
            op_start: 0,
            slot_watermark: 0,
            max_derivative: 0,
            derivatives_initialized: false,
            checkpoints_start: 0,
        };
        Self {
            ops: ChunkBuf::new(),
            stmts,
            derivs: Vec::new(),
            checkpoints: Vec::new(),
            callbacks: Vec::new(),
            rec_stack: vec![base],
            allocator: crate::slot::SlotAllocator::new(reuse_slots),
            active: false,
        }
    }
    //
    fn top_frame(&self) -> &SubRecording {
        self.rec_stack.last().expect("rec_stack is never empty")
    }
    fn top_frame_mut(&mut self) -> &mut SubRecording {
        self.rec_stack.last_mut().expect("rec_stack is never empty")
    }
    //
    // Tape.activate
    /// Makes this tape the thread's active tape. Fails with
    /// [TapeError::TapeAlreadyActive] if another tape is already active
    /// for `V` on this thread.
    pub fn activate(&mut self) -> Result<()> {
        let cell = V::slot();
        if cell.with(|c| c.get().is_some()) {
            return Err(TapeError::TapeAlreadyActive);
        }
        let ptr = NonNull::from(&mut *self);
        cell.with(|c| c.set(Some(ptr)));
        self.active = true;
        Ok(())
    }
    //
    // Tape.deactivate
    /// Clears the thread-local active pointer, if it currently points to
    /// this tape.
    pub fn deactivate(&mut self) {
        if self.active {
            V::slot().with(|c| c.set(None));
            self.active = false;
        }
    }
    //
    // Tape.is_active
    pub fn is_active(&self) -> bool {
        self.active
    }
    //
    // Tape.register_variable
    pub(crate) fn register_variable(&mut self) -> Slot {
        let slot = self.allocator.register_variable();
        let wm = self.allocator.watermark();
        let frame = self.top_frame_mut();
        if wm > frame.max_derivative {
            frame.max_derivative = wm;
        }
        slot
    }
    //
    // Tape.unregister_variable
    pub(crate) fn unregister_variable(&mut self, slot: Slot) {
        self.allocator.unregister_variable(slot);
    }
    //
    // Tape.register_input
    /// Allocates a fresh slot in this tape; no statement is emitted.
    pub fn register_input(&mut self) -> Slot {
        self.register_variable()
    }
    //
    // Tape.register_output
    /// Marks `slot` as a final output, initializing the derivative vector
    /// so [Tape::set_derivative]/[Tape::derivative] can address it.
    ///
    /// If `slot` is not already the output of the most recent statement
    /// (for example a bare [Tape::register_input]'ed variable used
    /// directly as an output, with no intervening arithmetic), this also
    /// emits a zero-operation statement so reverse propagation still has
    /// a position at which to find and reset its seeded adjoint. A slot
    /// that already terminates the last statement is left alone — adding
    /// a second statement for the same slot would let reverse propagation
    /// consume the seed there instead of at the real assignment,
    /// discarding it before the recorded operations ever see it.
    pub fn register_output(&mut self, slot: Slot) -> Slot {
        self.init_derivatives_if_needed();
        let already_terminal = self.stmts.get(self.stmts.len() - 1).output_slot == slot;
        if !already_terminal {
            let stmt = StmtRecord { op_end_offset: self.ops.len() as u32, output_slot: slot };
            self.stmts.push(stmt);
        }
        slot
    }
    //
    fn init_derivatives_if_needed(&mut self) {
        let need = self.top_frame().max_derivative as usize;
        if !self.top_frame().derivatives_initialized {
            self.derivs.clear();
            self.derivs.resize(need, V::zero());
            self.top_frame_mut().derivatives_initialized = true;
        } else if self.derivs.len() < need {
            self.derivs.resize(need, V::zero());
        }
    }
    //
    // Tape.record_assignment
    /// Walks `expr` depth-first, appending one `(multiplier, slot)`
    /// operation per active leaf, then appends the statement record for
    /// `target_slot`; see spec §4.4's "Recording walk".
    pub(crate) fn record_assignment(&mut self, target_slot: Slot, expr: &Expr<V>) {
        self.ops.reserve(expr.num_leaves());
        {
            let mut sink = OpSink { ops: &mut self.ops };
            expr.record_into(V::one(), &mut sink);
        }
        let stmt = StmtRecord { op_end_offset: self.ops.len() as u32, output_slot: target_slot };
        self.stmts.push(stmt);
    }
    //
    // Tape.get_position
    pub fn get_position(&self) -> usize {
        self.stmts.len()
    }
    //
    // Tape.watermark
    pub fn watermark(&self) -> Slot {
        self.allocator.watermark()
    }
    //
    // Tape.reset_to
    /// Truncates `stmts` to `pos+1` and `ops` to `stmts[pos].op_end_offset`;
    /// drops checkpoints past `pos` and reusable ranges at or beyond the
    /// current frame's derivative bound.
    pub fn reset_to(&mut self, pos: usize) -> Result<()> {
        if pos >= self.stmts.len() {
            return Err(TapeError::OutOfRange);
        }
        let op_end = self.stmts.get(pos).op_end_offset as usize;
        self.stmts.truncate(pos + 1);
        self.ops.truncate(op_end);
        self.checkpoints.retain(|&(p, _)| p <= pos);
        let bound = self.top_frame().max_derivative;
        self.allocator.drop_free_ranges_at_or_above(bound);
        Ok(())
    }
    //
    // Tape.new_recording
    /// Marks the beginning of a differentiable region: clears `ops` and
    /// `stmts` (retaining the sentinel), discards checkpoints, pops
    /// nested frames back to the outermost, and raises the outermost
    /// frame's derivative bound to `watermark + 1`.
    pub fn new_recording(&mut self) {
        self.ops.clear();
        self.stmts.clear();
        self.stmts.push(StmtRecord { op_end_offset: 0, output_slot: INVALID_SLOT });
        self.checkpoints.clear();
        self.callbacks.clear();
        self.rec_stack.truncate(1);
        let wm = self.allocator.watermark();
        let frame = &mut self.rec_stack[0];
        frame.stmt_start = 1;
        frame.op_start = 0;
        frame.slot_watermark = wm;
        frame.max_derivative = wm + 1;
        frame.derivatives_initialized = false;
        frame.checkpoints_start = 0;
    }
    //
    // Tape.new_nested_recording
    /// Pushes a sub-recording frame; used by
    /// [crate::checkpoint::ScopedNestedRecording].
    pub fn new_nested_recording(&mut self) {
        let parent_max = self.top_frame().max_derivative;
        let parent_init = self.top_frame().derivatives_initialized;
        self.rec_stack.push(SubRecording {
            stmt_start: self.stmts.len(),
            op_start: self.ops.len(),
            slot_watermark: self.allocator.watermark(),
            max_derivative: parent_max,
            derivatives_initialized: parent_init,
            checkpoints_start: self.checkpoints.len(),
        });
    }
    //
    // Tape.end_nested_recording
    /// Pops the top frame, truncating `ops`, `stmts`, `derivs`,
    /// `checkpoints`, and the reusable-slot ranges to the boundaries it
    /// saved on entry.
    pub fn end_nested_recording(&mut self) -> Result<()> {
        if self.rec_stack.len() <= 1 {
            return Err(TapeError::OutOfRange);
        }
        let frame = self.rec_stack.pop().expect("checked len above");
        self.stmts.truncate(frame.stmt_start);
        self.ops.truncate(frame.op_start);
        self.checkpoints.truncate(frame.checkpoints_start);
        self.allocator.truncate_to(frame.slot_watermark);
        let d = frame.slot_watermark as usize;
        if self.derivs.len() > d {
            self.derivs.truncate(d);
        }
        Ok(())
    }
    //
    // Tape.clear_all
    /// Resets every buffer to its freshly-constructed state.
    pub fn clear_all(&mut self) {
        let reuse = self.allocator.reuse_enabled();
        self.ops.clear();
        self.stmts.clear();
        self.stmts.push(StmtRecord { op_end_offset: 0, output_slot: INVALID_SLOT });
        self.derivs.clear();
        self.checkpoints.clear();
        self.callbacks.clear();
        self.rec_stack.clear();
        self.rec_stack.push(SubRecording {
            stmt_start: 1,
            op_start: 0,
            slot_watermark: 0,
            max_derivative: 0,
            derivatives_initialized: false,
            checkpoints_start: 0,
        });
        self.allocator = crate::slot::SlotAllocator::new(reuse);
    }
    //
    // Tape.clear_derivatives
    /// Marks the current frame's derivative vector uninitialized; it is
    /// zero-filled lazily on next write.
    pub fn clear_derivatives(&mut self) {
        self.top_frame_mut().derivatives_initialized = false;
    }
    //
    // Tape.derivative
    pub fn derivative(&self, slot: Slot) -> Result<V> {
        if slot >= self.top_frame().max_derivative {
            return Err(TapeError::OutOfRange);
        }
        if !self.top_frame().derivatives_initialized {
            return Err(TapeError::DerivativesNotInitialized);
        }
        let idx = slot as usize;
        Ok(if idx < self.derivs.len() { self.derivs[idx] } else { V::zero() })
    }
    //
    // Tape.set_derivative
    pub fn set_derivative(&mut self, slot: Slot, value: V) -> Result<()> {
        if slot >= self.top_frame().max_derivative {
            return Err(TapeError::OutOfRange);
        }
        self.init_derivatives_if_needed();
        let idx = slot as usize;
        if idx >= self.derivs.len() {
            self.derivs.resize(idx + 1, V::zero());
        }
        self.derivs[idx] = value;
        Ok(())
    }
    //
    // Tape.increment_adjoint
    pub fn increment_adjoint(&mut self, slot: Slot, x: V) -> Result<()> {
        if slot >= self.top_frame().max_derivative {
            return Err(TapeError::OutOfRange);
        }
        self.init_derivatives_if_needed();
        let idx = slot as usize;
        if idx >= self.derivs.len() {
            return Err(TapeError::OutOfRange);
        }
        self.derivs[idx] = self.derivs[idx] + x;
        Ok(())
    }
    //
    // Tape.get_and_reset_output_adjoint
    pub fn get_and_reset_output_adjoint(&mut self, slot: Slot) -> Result<V> {
        if slot >= self.top_frame().max_derivative {
            return Err(TapeError::OutOfRange);
        }
        self.init_derivatives_if_needed();
        let idx = slot as usize;
        if idx >= self.derivs.len() {
            return Err(TapeError::OutOfRange);
        }
        let v = self.derivs[idx];
        self.derivs[idx] = V::zero();
        Ok(v)
    }
    //
    // Tape.push_callback
    /// Takes ownership of `cb`, returning the id later passed to
    /// [Tape::insert_callback].
    pub fn push_callback(&mut self, cb: Box<dyn CheckpointCallback<V>>) -> usize {
        let id = self.callbacks.len();
        self.callbacks.push(cb);
        id
    }
    //
    // Tape.pop_callback
    pub fn pop_callback(&mut self) -> Result<Box<dyn CheckpointCallback<V>>> {
        self.callbacks.pop().ok_or(TapeError::EmptyCallbackStack)
    }
    //
    // Tape.get_last_callback
    /// Returns the id of the most-recently pushed callback, without
    /// removing it.
    pub fn get_last_callback(&self) -> Result<usize> {
        if self.callbacks.is_empty() {
            Err(TapeError::EmptyCallbackStack)
        } else {
            Ok(self.callbacks.len() - 1)
        }
    }
    //
    // Tape.insert_callback
    /// Appends a checkpoint entry referencing `cb_id` at the current
    /// statement position and emits a sentinel statement.
    pub fn insert_callback(&mut self, cb_id: usize) {
        let ck = self.stmts.len();
        self.checkpoints.push((ck, cb_id));
        self.stmts.push(StmtRecord { op_end_offset: self.ops.len() as u32, output_slot: INVALID_SLOT });
    }
    //
    fn highest_checkpoint_above(&self, target: usize, end: usize) -> Option<(usize, usize)> {
        self.checkpoints.iter().rev().copied().find(|&(ck, _)| ck <= end && ck > target)
    }
    //
    fn propagate_range(&mut self, lo: usize, hi: usize) {
        if hi <= lo {
            return;
        }
        let mut i = hi;
        while i > lo {
            let output_slot = self.stmts.get(i).output_slot;
            let op_end = self.stmts.get(i).op_end_offset as usize;
            let op_start = self.stmts.get(i - 1).op_end_offset as usize;
            if output_slot != INVALID_SLOT {
                let a = self.derivs[output_slot as usize];
                if !a.is_zero() {
                    self.derivs[output_slot as usize] = V::zero();
                    for (_, slice) in self.ops.range(op_start, op_end) {
                        for op in slice {
                            let inp = op.input_slot as usize;
                            self.derivs[inp] = op.multiplier.fma(a, self.derivs[inp]);
                        }
                    }
                }
            }
            i -= 1;
        }
    }
    //
    // Tape.compute_adjoints
    /// Propagates from the last statement back to the position recorded
    /// at the start of the current sub-recording.
    pub fn compute_adjoints(&mut self) -> Result<()> {
        let target = self.top_frame().stmt_start - 1;
        self.compute_adjoints_to(target)
    }
    //
    // Tape.compute_adjoints_to
    /// Propagates from the last statement to (but not through) `pos`,
    /// handing control to any checkpoint callbacks in between, highest
    /// statement position first; see spec §4.3's reverse-propagation
    /// algorithm.
    pub fn compute_adjoints_to(&mut self, target: usize) -> Result<()> {
        if !self.top_frame().derivatives_initialized {
            return Err(TapeError::DerivativesNotInitialized);
        }
        let mut end = self.stmts.len() - 1;
        while let Some((ck, cb_id)) = self.highest_checkpoint_above(target, end) {
            self.propagate_range(ck, end);
            self.reset_to(ck - 1)?;
            let mut cb = std::mem::replace(&mut self.callbacks[cb_id], Box::new(NullCallback));
            cb.reverse(self);
            self.callbacks[cb_id] = cb;
            self.reset_to(ck - 1)?;
            end = ck - 1;
        }
        self.propagate_range(target, end);
        Ok(())
    }
    //
    // Tape.debug_counts
    /// A plain-struct snapshot of the tape's sizes, in place of a
    /// logging dependency.
    pub fn debug_counts(&self) -> DebugCounts {
        DebugCounts {
            num_statements: self.stmts.len(),
            num_operations: self.ops.len(),
            watermark: self.allocator.watermark(),
            num_free_ranges: self.allocator.free_ranges_count(),
        }
    }
}
//
impl<V: Numeric + sealed::ThisThreadTape> Drop for Tape<V> {
    fn drop(&mut self) {
        if self.active {
            V::slot().with(|c| {
                let still_us = c.get().map(|p| std::ptr::eq(p.as_ptr(), self as *mut Self)).unwrap_or(false);
                if still_us {
                    c.set(None);
                }
            });
        }
    }
}
//
// OpSink
struct OpSink<'a, V> {
    ops: &'a mut ChunkBuf<OpRecord<V>>,
}
impl<'a, V: Numeric> ExprSink<V> for OpSink<'a, V> {
    fn push_op(&mut self, multiplier: V, input_slot: Slot) {
        self.ops.push_reserved(OpRecord { multiplier, input_slot });
    }
}
//
// active_tape_ptr
/// The raw pointer currently stored in this thread's "active tape" cell
/// for `V`, if any; used by [crate::scalar::Real] to bind itself to
/// whichever tape is active at construction time.
pub(crate) fn active_tape_ptr<V>() -> Option<NonNull<Tape<V>>>
where
    V: Numeric + sealed::ThisThreadTape,
{
    V::slot().with(|c| c.get())
}
//
// with_active_tape
/// Runs `f` against the tape currently active for `V` on this thread, if
/// any. This is the thread-local lookup the active-scalar layer uses to
/// find out whether (and where) to record.
pub(crate) fn with_active_tape<V, F, R>(f: F) -> Option<R>
where
    V: Numeric + sealed::ThisThreadTape,
    F: FnOnce(&mut Tape<V>) -> R,
{
    V::slot().with(|cell| {
        let ptr = cell.get()?;
        // Safety: `ptr` was stored by `Tape::activate` and is cleared by
        // `Tape::deactivate` or `Tape`'s `Drop` before the tape goes away,
        // so while present it points at a live, exclusively-owned `Tape<V>`.
        let tape_ref: &mut Tape<V> = unsafe { &mut *ptr.as_ptr() };
        Some(f(tape_ref))
    })
}
//
#[cfg(test)]
mod tests {
    use super::*;
    //
    #[test]
    fn linear_combination_matches_scenario_s1() {
        let mut tape: Tape<f64> = Tape::new(false);
        tape.activate().unwrap();
        let s0 = tape.register_input();
        let s1 = tape.register_input();
        tape.new_recording();
        // y = 3.1*x0 + 1.5*(x1 + 3.2) + 3.4
        let x0 = Expr::leaf_var(s0, 2.0);
        let x1 = Expr::leaf_var(s1, 5.0);
        let term0 = Expr::binary(crate::expr::BinaryOp::Mul, Expr::konst(3.1), x0);
        let term1 = Expr::binary(
            crate::expr::BinaryOp::Mul,
            Expr::konst(1.5),
            Expr::binary(crate::expr::BinaryOp::Add, x1, Expr::konst(3.2)),
        );
        let y_expr = Expr::binary(
            crate::expr::BinaryOp::Add,
            Expr::binary(crate::expr::BinaryOp::Add, term0, term1),
            Expr::konst(3.4),
        );
        assert!((y_expr.value() - 16.76).abs() < 1e-12);
        let y_slot = tape.register_variable();
        tape.record_assignment(y_slot, &y_expr);
        tape.register_output(y_slot);
        tape.set_derivative(y_slot, 1.0).unwrap();
        tape.compute_adjoints().unwrap();
        assert!((tape.derivative(s0).unwrap() - 3.1).abs() < 1e-12);
        assert!((tape.derivative(s1).unwrap() - 1.5).abs() < 1e-12);
        tape.deactivate();
    }
    //
    #[test]
    fn reset_to_matches_replaying_without_the_reset() {
        let mut tape: Tape<f64> = Tape::new(true);
        tape.activate().unwrap();
        let s0 = tape.register_input();
        tape.new_recording();
        let x0 = Expr::leaf_var(s0, 2.0);
        let y_expr = Expr::unary(crate::expr::UnaryOp::MulConst(crate::expr::OrderedConst::new(4.0)), x0);
        let pos = tape.get_position();
        let y_slot = tape.register_variable();
        tape.record_assignment(y_slot, &y_expr);
        tape.register_output(y_slot);
        tape.reset_to(pos).unwrap();
        let y_slot2 = tape.register_variable();
        tape.record_assignment(y_slot2, &y_expr);
        tape.register_output(y_slot2);
        tape.set_derivative(y_slot2, 1.0).unwrap();
        tape.compute_adjoints().unwrap();
        assert!((tape.derivative(s0).unwrap() - 4.0).abs() < 1e-12);
        tape.deactivate();
    }
}
