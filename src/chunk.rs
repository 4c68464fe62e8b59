// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub(crate) module defines [ChunkBuf], the chunked append-only
//! buffer used to store the tape's operation and statement records.
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
/// Target size, in bytes, of one chunk; see spec.md §4.1's "on the order
/// of 64 KiB per chunk" guidance.
pub(crate) const CHUNK_BYTES: usize = 64 * 1024;
//
// chunk_len_for
/// Picks a power-of-two chunk length so that `chunk_len * size_of::<T>()`
/// is close to [CHUNK_BYTES], with a floor of 64 records so that small
/// types (e.g. a `u32`-sized statement record) still get reasonably
/// sized chunks instead of one record per chunk.
pub(crate) const fn chunk_len_for<T>() -> usize {
    let raw_size = std::mem::size_of::<T>();
    let size = if raw_size == 0 { 1 } else { raw_size };
    let mut len = CHUNK_BYTES / size;
    if len < 64 {
        len = 64;
    }
    len.next_power_of_two()
}
//
// ChunkBuf
/// A growable sequence of fixed-size records, stored as a vector of
/// power-of-two-length chunks.
///
/// Pushing never moves or reallocates a previously-pushed element: the
/// backing chunks are only ever appended to (growth) or dropped from the
/// tail (truncation), so indices handed out by [ChunkBuf::push] stay
/// valid for the life of the element.
pub(crate) struct ChunkBuf<T> {
    shift: u32,
    mask: usize,
    chunks: Vec<Vec<T>>,
    len: usize,
}
//
impl<T> ChunkBuf<T> {
    //
    // ChunkBuf::new
    /// Creates an empty buffer whose chunk length is chosen from
    /// [chunk_len_for].
    pub(crate) fn new() -> Self {
        let chunk_len = chunk_len_for::<T>();
        debug_assert!(chunk_len.is_power_of_two());
        Self {
            shift: chunk_len.trailing_zeros(),
            mask: chunk_len - 1,
            chunks: Vec::new(),
            len: 0,
        }
    }
    //
    fn chunk_len(&self) -> usize {
        self.mask + 1
    }
    //
    // ChunkBuf.len
    pub(crate) fn len(&self) -> usize {
        self.len
    }
    //
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
    //
    // ChunkBuf.reserve
    /// Pre-allocates enough chunk capacity to hold `additional` more
    /// records without further chunk allocation; a subsequent
    /// [ChunkBuf::push_reserved] call relies on this.
    pub(crate) fn reserve(&mut self, additional: usize)
    where
        T: Default + Clone,
    {
        let needed_len = self.len + additional;
        let needed_chunks = needed_len.div_ceil(self.chunk_len()).max(self.chunks.len());
        while self.chunks.len() < needed_chunks {
            self.chunks.push(Vec::with_capacity(self.chunk_len()));
        }
    }
    //
    // ChunkBuf.push
    /// Appends `value`, growing the chunk vector if the current last
    /// chunk is full.
    pub(crate) fn push(&mut self, value: T) -> usize {
        let chunk_idx = self.len >> self.shift;
        if chunk_idx == self.chunks.len() {
            self.chunks.push(Vec::with_capacity(self.chunk_len()));
        }
        self.chunks[chunk_idx].push(value);
        let index = self.len;
        self.len += 1;
        index
    }
    //
    // ChunkBuf.push_reserved
    /// Same as [ChunkBuf::push], documenting that the caller has already
    /// arranged capacity via [ChunkBuf::reserve]. The bounds check is the
    /// same as `push` — unlike the source library this core mirrors,
    /// Rust's `Vec` does not offer an unchecked push, so the distinction
    /// is contractual rather than a different code path.
    pub(crate) fn push_reserved(&mut self, value: T) -> usize {
        self.push(value)
    }
    //
    // ChunkBuf.get
    pub(crate) fn get(&self, index: usize) -> &T {
        &self.chunks[index >> self.shift][index & self.mask]
    }
    //
    // ChunkBuf.get_mut
    pub(crate) fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self.chunks[index >> self.shift][index & self.mask]
    }
    //
    // ChunkBuf.truncate
    /// Drops records `[n, len)`, releasing any chunk that becomes
    /// entirely empty.
    pub(crate) fn truncate(&mut self, n: usize) {
        if n >= self.len {
            return;
        }
        let keep_chunks = if n == 0 { 0 } else { ((n - 1) >> self.shift) + 1 };
        self.chunks.truncate(keep_chunks);
        if let Some(last) = self.chunks.last_mut() {
            let rem = n - ((keep_chunks - 1) << self.shift);
            last.truncate(rem);
        }
        self.len = n;
    }
    //
    // ChunkBuf.clear
    pub(crate) fn clear(&mut self) {
        self.truncate(0);
    }
    //
    // ChunkBuf.range
    /// Yields `(slice_start, slice)` pairs of the chunks overlapping
    /// `[start, end)`, each paired with the global index its first
    /// element sits at. A caller walking a contiguous range (the
    /// reverse-propagation inner loop walks one statement's op range)
    /// decomposes the index once per chunk instead of once per element,
    /// per spec.md §4.1's "Chunk iteration" note.
    pub(crate) fn range(&self, start: usize, end: usize) -> impl Iterator<Item = (usize, &[T])> {
        let chunk_len = self.chunk_len();
        self.chunks.iter().enumerate().filter_map(move |(i, chunk)| {
            let chunk_start = i * chunk_len;
            let chunk_end = chunk_start + chunk.len();
            if chunk_end <= start || chunk_start >= end {
                return None;
            }
            let lo = start.saturating_sub(chunk_start);
            let hi = (end - chunk_start).min(chunk.len());
            Some((chunk_start + lo, &chunk[lo..hi]))
        })
    }
}
