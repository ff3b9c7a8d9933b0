use {
    super::ChunkStorage,
    crate::sector::Sector,
    smallvec::SmallVec,
    std::{ops::Range, ptr::NonNull},
};

/// Forward cursor over the dense slot sequence.
///
/// Snapshots the chunk table at construction, so it stays valid after the
/// array's lock is released: chunks never move, and the table's old buffers
/// survive in the retire bin until no cursor can hold them.
///
/// O(1) advance (pointer step, chunk roll-over at the boundary) and O(1)
/// random seek. Cursors compare by linear index.
#[derive(Clone)]
pub(crate) struct LinearCursor {
    chunks: *const NonNull<u8>,
    chunk_count: usize,
    stride: usize,
    shift: u32,
    mask: usize,
    linear: usize,
    ptr: *mut u8,
}

impl LinearCursor {
    pub fn new(storage: &ChunkStorage, at: usize) -> Self {
        let mut cursor = LinearCursor {
            chunks: storage.chunks_ptr(),
            chunk_count: storage.chunk_count(),
            stride: storage.stride(),
            shift: storage.chunk_capacity().trailing_zeros(),
            mask: storage.chunk_capacity() - 1,
            linear: 0,
            ptr: std::ptr::null_mut(),
        };
        cursor.seek(at);
        cursor
    }

    pub fn linear_index(&self) -> usize {
        self.linear
    }

    /// Current slot. Only valid while the linear index is below the bound
    /// the caller iterates to.
    pub fn raw(&self) -> *mut Sector {
        debug_assert!(!self.ptr.is_null());
        self.ptr as *mut Sector
    }

    pub fn advance(&mut self) {
        self.linear += 1;
        if self.linear & self.mask == 0 {
            self.reload();
        } else if !self.ptr.is_null() {
            self.ptr = unsafe { self.ptr.add(self.stride) };
        }
    }

    pub fn seek(&mut self, linear: usize) {
        self.linear = linear;
        self.reload();
    }

    /// End of the contiguous run the cursor sits in: the chunk boundary or
    /// `bound`, whichever comes first.
    pub fn run_end(&self, bound: usize) -> usize {
        bound.min((self.linear & !self.mask) + self.mask + 1)
    }

    fn reload(&mut self) {
        let chunk = self.linear >> self.shift;
        self.ptr = if chunk < self.chunk_count {
            unsafe {
                (*self.chunks.add(chunk))
                    .as_ptr()
                    .add((self.linear & self.mask) * self.stride)
            }
        } else {
            std::ptr::null_mut()
        };
    }
}

/// Cursor restricted to a list of ascending half-open linear ranges.
///
/// Ranges are stored reversed, so the active range is the last element and
/// exhausting one is a pop: an O(1) transition. `advance_to` binary-searches
/// the remaining ranges, then seeks within the hit.
pub(crate) struct RangedCursor {
    cursor: LinearCursor,
    spans: SmallVec<[Range<usize>; 4]>,
}

impl RangedCursor {
    pub fn new(storage: &ChunkStorage, ranges: &[Range<usize>]) -> Self {
        debug_assert!(ranges.windows(2).all(|w| w[0].end <= w[1].start));
        let mut spans: SmallVec<[Range<usize>; 4]> = ranges
            .iter()
            .filter(|r| r.start < r.end)
            .cloned()
            .collect();
        spans.reverse();
        let start = spans.last().map_or(0, |s| s.start);
        RangedCursor {
            cursor: LinearCursor::new(storage, start),
            spans,
        }
    }

    pub fn done(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn linear_index(&self) -> usize {
        self.cursor.linear_index()
    }

    pub fn raw(&self) -> *mut Sector {
        debug_assert!(!self.done());
        self.cursor.raw()
    }

    /// End of the active range, for run loops. Zero when exhausted.
    pub fn span_end(&self) -> usize {
        self.spans.last().map_or(0, |s| s.end)
    }

    pub fn advance(&mut self) {
        let end = match self.spans.last() {
            Some(span) => span.end,
            None => return,
        };
        self.cursor.advance();
        if self.cursor.linear_index() >= end {
            self.spans.pop();
            if let Some(next) = self.spans.last() {
                let start = next.start;
                self.cursor.seek(start);
            }
        }
    }

    /// Hands back the current chunk-contiguous run (slot pointer and
    /// length) and jumps the cursor past it. The run never crosses a chunk
    /// boundary or a range boundary.
    pub fn take_run(&mut self) -> (*mut Sector, usize) {
        debug_assert!(!self.done());
        let end = self.cursor.run_end(self.span_end());
        let start = self.cursor.linear_index();
        let slot = self.cursor.raw();
        self.advance_to(end);
        (slot, end - start)
    }

    /// Moves forward to the first in-range index ≥ `target`.
    pub fn advance_to(&mut self, target: usize) {
        // Spans sit in descending order; those entirely below `target` form
        // a suffix of the stack.
        let keep = self.spans.partition_point(|s| s.end > target);
        self.spans.truncate(keep);
        if let Some(span) = self.spans.last() {
            let to = span.start.max(target);
            self.cursor.seek(to);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{retire::RetireBin, sector::Sector},
    };

    fn storage_with(count: usize, chunk_capacity: usize) -> ChunkStorage {
        let bin = RetireBin::new();
        let mut storage = ChunkStorage::new(16, 4, chunk_capacity);
        storage.reserve(&bin, count);
        unsafe {
            for i in 0..count {
                Sector::init(storage.slot(i), i as u32);
            }
        }
        bin.drain();
        storage
    }

    #[test]
    fn linear_cursor_rolls_over_chunks() {
        let storage = storage_with(10, 4);
        let mut cursor = LinearCursor::new(&storage, 0);
        for i in 0..10 {
            assert_eq!(cursor.linear_index(), i);
            assert_eq!(unsafe { (*cursor.raw()).id() }, i as u32);
            cursor.advance();
        }
    }

    #[test]
    fn linear_cursor_seeks_randomly() {
        let storage = storage_with(12, 4);
        let mut cursor = LinearCursor::new(&storage, 0);
        for &i in &[7usize, 2, 11, 0, 5] {
            cursor.seek(i);
            assert_eq!(unsafe { (*cursor.raw()).id() }, i as u32);
        }
    }

    #[test]
    fn run_end_stops_at_chunk_boundary() {
        let storage = storage_with(10, 4);
        let cursor = LinearCursor::new(&storage, 2);
        assert_eq!(cursor.run_end(10), 4);
        let cursor = LinearCursor::new(&storage, 9);
        assert_eq!(cursor.run_end(10), 10);
    }

    #[test]
    fn ranged_cursor_walks_ranges_in_order() {
        let storage = storage_with(16, 4);
        let mut cursor = RangedCursor::new(&storage, &[1..3, 6..7, 10..13]);
        let mut seen = Vec::new();
        while !cursor.done() {
            seen.push(unsafe { (*cursor.raw()).id() });
            cursor.advance();
        }
        assert_eq!(seen, vec![1, 2, 6, 10, 11, 12]);
    }

    #[test]
    fn ranged_cursor_skips_empty_ranges() {
        let storage = storage_with(8, 4);
        let mut cursor = RangedCursor::new(&storage, &[2..2, 3..4]);
        assert!(!cursor.done());
        assert_eq!(cursor.linear_index(), 3);
        cursor.advance();
        assert!(cursor.done());
    }

    #[test]
    fn take_run_respects_chunk_and_range_boundaries() {
        let storage = storage_with(16, 4);
        let mut cursor = RangedCursor::new(&storage, &[1..3, 3..10]);
        let mut runs = Vec::new();
        while !cursor.done() {
            let (slot, len) = cursor.take_run();
            runs.push((unsafe { (*slot).id() }, len));
        }
        // Chunk capacity 4: runs split at indices 4 and 8.
        assert_eq!(runs, vec![(1, 2), (3, 1), (4, 4), (8, 2)]);
    }

    #[test]
    fn advance_to_lands_inside_or_after() {
        let storage = storage_with(16, 4);
        let mut cursor = RangedCursor::new(&storage, &[1..3, 6..9, 12..14]);
        cursor.advance_to(2);
        assert_eq!(cursor.linear_index(), 2);
        cursor.advance_to(4);
        // 4 falls in the gap; lands at the next range's start.
        assert_eq!(cursor.linear_index(), 6);
        cursor.advance_to(13);
        assert_eq!(cursor.linear_index(), 13);
        cursor.advance_to(14);
        assert!(cursor.done());
    }
}
