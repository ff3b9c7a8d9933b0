use {
    super::Guts,
    crate::{
        sector::Sector,
        storage::{LinearCursor, RangedCursor},
    },
    std::ops::Range,
};

/// Walks every slot of the dense prefix, dead holes included.
pub(crate) struct RawSectorIter {
    cursor: LinearCursor,
    end: usize,
}

impl RawSectorIter {
    pub fn new(guts: &Guts) -> Self {
        RawSectorIter {
            cursor: LinearCursor::new(&guts.storage, 0),
            end: guts.size,
        }
    }
}

impl Iterator for RawSectorIter {
    type Item = *mut Sector;

    fn next(&mut self) -> Option<*mut Sector> {
        if self.cursor.linear_index() >= self.end {
            return None;
        }
        let slot = self.cursor.raw();
        self.cursor.advance();
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.end.saturating_sub(self.cursor.linear_index());
        (left, Some(left))
    }
}

/// Slots of the dense prefix whose alive bits intersect `mask`.
pub(crate) struct RawAliveIter {
    cursor: LinearCursor,
    end: usize,
    mask: u32,
}

impl RawAliveIter {
    pub fn new(guts: &Guts, mask: u32) -> Self {
        RawAliveIter {
            cursor: LinearCursor::new(&guts.storage, 0),
            end: guts.size,
            mask,
        }
    }
}

impl Iterator for RawAliveIter {
    type Item = *mut Sector;

    fn next(&mut self) -> Option<*mut Sector> {
        while self.cursor.linear_index() < self.end {
            let slot = self.cursor.raw();
            self.cursor.advance();
            if unsafe { &*slot }.is_alive(self.mask) {
                return Some(slot);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end.saturating_sub(self.cursor.linear_index())))
    }
}

/// Every slot inside the given linear ranges, dead holes included.
pub(crate) struct RawRangedIter {
    cursor: RangedCursor,
}

impl RawRangedIter {
    pub fn new(guts: &Guts, ranges: &[Range<usize>]) -> Self {
        debug_assert!(ranges.iter().all(|r| r.end <= guts.size));
        RawRangedIter {
            cursor: RangedCursor::new(&guts.storage, ranges),
        }
    }
}

impl Iterator for RawRangedIter {
    type Item = *mut Sector;

    fn next(&mut self) -> Option<*mut Sector> {
        if self.cursor.done() {
            return None;
        }
        let slot = self.cursor.raw();
        self.cursor.advance();
        Some(slot)
    }
}

/// Alive-filtered slots inside the given linear ranges.
pub(crate) struct RawRangedAliveIter {
    cursor: RangedCursor,
    mask: u32,
}

impl RawRangedAliveIter {
    pub fn new(guts: &Guts, ranges: &[Range<usize>], mask: u32) -> Self {
        debug_assert!(ranges.iter().all(|r| r.end <= guts.size));
        RawRangedAliveIter {
            cursor: RangedCursor::new(&guts.storage, ranges),
            mask,
        }
    }
}

impl Iterator for RawRangedAliveIter {
    type Item = *mut Sector;

    fn next(&mut self) -> Option<*mut Sector> {
        while !self.cursor.done() {
            let slot = self.cursor.raw();
            self.cursor.advance();
            if unsafe { &*slot }.is_alive(self.mask) {
                return Some(slot);
            }
        }
        None
    }
}
