// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub module defines the checkpoint callback interface and the
//! [ScopedNestedRecording] helper used to implement it.
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
use crate::error::Result;
use crate::numeric::Numeric;
use crate::tape::{sealed::ThisThreadTape, Tape};
use crate::Slot;
//
// CheckpointCallback
/// An object the tape invokes during reverse propagation at the
/// statement position at which it was inserted via
/// [Tape::insert_callback].
///
/// On entry to `reverse`, the tape's statement end equals the
/// checkpoint's statement position minus one, and `derivs[output_slot]`
/// still holds the adjoint accumulated from later statements — the
/// callback, not the tape, is responsible for consuming it (typically
/// via [Tape::get_and_reset_output_adjoint]). A callback reused across
/// several checkpoints (for example one per iteration of a loop) owns
/// whatever per-call state it needs — commonly a stack of saved inputs —
/// and must pop one entry per `reverse` call.
pub trait CheckpointCallback<V: Numeric + ThisThreadTape> {
    fn reverse(&mut self, tape: &mut Tape<V>);
}
//
// NullCallback
/// A placeholder swapped into the tape's callback slot for the duration
/// of a real callback's `reverse` call, so that call can take `&mut
/// Tape<V>` without aliasing the `Vec` the callback itself lives in.
pub(crate) struct NullCallback;
impl<V: Numeric + ThisThreadTape> CheckpointCallback<V> for NullCallback {
    fn reverse(&mut self, _tape: &mut Tape<V>) {}
}
//
// ScopedNestedRecording
/// RAII wrapper around [Tape::new_nested_recording] /
/// [Tape::end_nested_recording]: a checkpoint callback opens one of
/// these to re-execute its segment actively, computes the segment's
/// adjoints with [ScopedNestedRecording::compute_adjoints], and reads
/// them back into the enclosing tape with
/// [ScopedNestedRecording::increment_adjoint] before the frame is popped
/// on drop.
pub struct ScopedNestedRecording<'a, V: Numeric + ThisThreadTape> {
    tape: &'a mut Tape<V>,
}
//
impl<'a, V: Numeric + ThisThreadTape> ScopedNestedRecording<'a, V> {
    //
    // ScopedNestedRecording::new
    pub fn new(tape: &'a mut Tape<V>) -> Self {
        tape.new_nested_recording();
        Self { tape }
    }
    //
    // ScopedNestedRecording.tape
    /// The nested frame's tape, for registering inputs/outputs and
    /// recording its segment.
    pub fn tape(&mut self) -> &mut Tape<V> {
        self.tape
    }
    //
    // ScopedNestedRecording.compute_adjoints
    pub fn compute_adjoints(&mut self) -> Result<()> {
        self.tape.compute_adjoints()
    }
    //
    // ScopedNestedRecording.increment_adjoint
    /// Writes past this frame's boundary into the enclosing frame's
    /// derivative vector; since the derivative vector is shared across
    /// the whole tape (only the valid-slot bound differs per frame),
    /// this is how a callback's freshly computed adjoints cross back
    /// into the outer recording.
    pub fn increment_adjoint(&mut self, slot: Slot, x: V) -> Result<()> {
        self.tape.increment_adjoint(slot, x)
    }
}
//
impl<'a, V: Numeric + ThisThreadTape> Drop for ScopedNestedRecording<'a, V> {
    fn drop(&mut self) {
        let _ = self.tape.end_nested_recording();
    }
}
