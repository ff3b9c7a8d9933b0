//! Per-sector pin counters.
//!
//! A reader stamps the id it is about to dereference; writers consult the
//! counters to tell "erase in place" (victim unpinned) from "erase with
//! shift" (no pinned id at or above the victim, since shifting left would
//! move them) and to hold defragmentation until the whole array is idle.
//!
//! Counters live in geometrically sized chunks reached through atomic
//! pointers, so pinning is lock-free and a counter's address never changes
//! once its chunk exists. Chunks are only added (by writers holding the
//! array's exclusive lock), never moved or removed before drop.

use {
    crate::{entity::EntityId, sector::Sector},
    std::{ops::Deref, ptr::NonNull},
};

#[cfg(feature = "parallel")]
pub(crate) use self::parallel::PinBoard;

#[cfg(not(feature = "parallel"))]
pub(crate) use self::orthogonal::PinBoard;

#[cfg(feature = "parallel")]
mod parallel {
    use {
        crate::{entity::EntityId, util::Signal},
        std::{
            alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout},
            ptr,
            sync::atomic::{AtomicPtr, AtomicU32, Ordering},
        },
    };

    /// First chunk holds `1 << PIN_SHIFT` counters; each next chunk doubles.
    const PIN_SHIFT: u32 = 10;
    /// 23 doubling chunks cover the whole 32-bit id space.
    const PIN_CHUNKS: usize = 23;

    fn locate(id: EntityId) -> (usize, usize) {
        let j = (id >> PIN_SHIFT) + 1;
        let k = (31 - j.leading_zeros()) as usize;
        let start = (1u64 << (PIN_SHIFT as usize + k)) - (1u64 << PIN_SHIFT);
        (k, (id as u64 - start) as usize)
    }

    fn chunk_len(k: usize) -> usize {
        1 << (PIN_SHIFT as usize + k)
    }

    pub(crate) struct PinBoard {
        chunks: Box<[AtomicPtr<AtomicU32>]>,
        total: AtomicU32,
        signal: Signal,
    }

    impl PinBoard {
        pub fn new() -> Self {
            PinBoard {
                chunks: (0..PIN_CHUNKS)
                    .map(|_| AtomicPtr::new(ptr::null_mut()))
                    .collect(),
                total: AtomicU32::new(0),
                signal: Signal::new(),
            }
        }

        /// Ensures counters exist for every id below `ids`. Caller holds the
        /// array's exclusive lock, so grows never race each other.
        pub fn grow(&self, ids: usize) {
            if ids == 0 {
                return;
            }
            let (last, _) = locate((ids - 1) as EntityId);
            for k in 0..=last {
                if self.chunks[k].load(Ordering::Relaxed).is_null() {
                    let layout = Layout::array::<AtomicU32>(chunk_len(k))
                        .expect("pin chunk layout overflow");
                    let chunk = unsafe { alloc_zeroed(layout) } as *mut AtomicU32;
                    if chunk.is_null() {
                        handle_alloc_error(layout);
                    }
                    self.chunks[k].store(chunk, Ordering::Release);
                }
            }
        }

        fn counter(&self, id: EntityId) -> Option<&AtomicU32> {
            let (k, offset) = locate(id);
            let chunk = self.chunks[k].load(Ordering::Acquire);
            if chunk.is_null() {
                None
            } else {
                Some(unsafe { &*chunk.add(offset) })
            }
        }

        /// Stamps `id`. The id must be below the grown capacity: readers
        /// only pin ids they found through the sparse map, which grows in
        /// step with this table.
        pub fn pin(&self, id: EntityId) -> *const AtomicU32 {
            let cell = self
                .counter(id)
                .expect("pinned an id beyond the array's capacity");
            cell.fetch_add(1, Ordering::Acquire);
            self.total.fetch_add(1, Ordering::Acquire);
            cell as *const AtomicU32
        }

        /// Lock-free: the cell address stays valid for the board's lifetime.
        pub unsafe fn unpin(&self, cell: *const AtomicU32) {
            let was = (*cell).fetch_sub(1, Ordering::Release);
            self.total.fetch_sub(1, Ordering::Release);
            debug_assert_ne!(was, 0);
            if was == 1 {
                self.signal.notify_all();
            }
        }

        pub fn is_pinned(&self, id: EntityId) -> bool {
            self.counter(id)
                .map_or(false, |cell| cell.load(Ordering::Acquire) != 0)
        }

        pub fn total(&self) -> u32 {
            self.total.load(Ordering::Acquire)
        }

        /// True when `id` is unpinned and no larger id is pinned either, so
        /// a left shift down to `id` moves no stamped sector.
        pub fn can_move(&self, id: EntityId) -> bool {
            if self.total() == 0 {
                return true;
            }
            let (k0, offset0) = locate(id);
            for k in k0..PIN_CHUNKS {
                let chunk = self.chunks[k].load(Ordering::Acquire);
                if chunk.is_null() {
                    continue;
                }
                let from = if k == k0 { offset0 } else { 0 };
                for i in from..chunk_len(k) {
                    if unsafe { &*chunk.add(i) }.load(Ordering::Relaxed) != 0 {
                        return false;
                    }
                }
            }
            true
        }

        pub fn wait_until_movable(&self, id: EntityId) {
            self.signal.wait_until(|| self.can_move(id));
        }

        pub fn wait_until_unpinned(&self, id: EntityId) {
            self.signal.wait_until(|| !self.is_pinned(id));
        }

        pub fn wait_until_idle(&self) {
            self.signal.wait_until(|| self.total() == 0);
        }
    }

    impl Drop for PinBoard {
        fn drop(&mut self) {
            debug_assert_eq!(self.total(), 0, "array dropped with live pins");
            for (k, slot) in self.chunks.iter_mut().enumerate() {
                let chunk = *slot.get_mut();
                if !chunk.is_null() {
                    let layout = Layout::array::<AtomicU32>(chunk_len(k)).unwrap();
                    unsafe { dealloc(chunk as *mut u8, layout) };
                }
            }
        }
    }
}

#[cfg(not(feature = "parallel"))]
mod orthogonal {
    use {crate::entity::EntityId, std::sync::atomic::AtomicU32};

    /// Zero-overhead stub: a single-threaded build has no concurrent
    /// readers to protect against.
    pub(crate) struct PinBoard;

    impl PinBoard {
        pub fn new() -> Self {
            PinBoard
        }

        pub fn grow(&self, _ids: usize) {}

        pub fn pin(&self, _id: EntityId) -> *const AtomicU32 {
            std::ptr::null()
        }

        pub unsafe fn unpin(&self, _cell: *const AtomicU32) {}

        pub fn is_pinned(&self, _id: EntityId) -> bool {
            false
        }

        pub fn total(&self) -> u32 {
            0
        }

        pub fn can_move(&self, _id: EntityId) -> bool {
            true
        }

        pub fn wait_until_movable(&self, _id: EntityId) {}

        pub fn wait_until_unpinned(&self, _id: EntityId) {}

        pub fn wait_until_idle(&self) {}
    }
}

/// Raw pin held on one sector id. Unpins on drop.
pub(crate) struct SectorPin<'a> {
    board: &'a PinBoard,
    cell: *const std::sync::atomic::AtomicU32,
}

impl<'a> SectorPin<'a> {
    pub(crate) fn new(board: &'a PinBoard, id: EntityId) -> Self {
        SectorPin {
            cell: board.pin(id),
            board,
        }
    }
}

impl Drop for SectorPin<'_> {
    fn drop(&mut self) {
        unsafe { self.board.unpin(self.cell) };
    }
}

unsafe impl Send for SectorPin<'_> {}
unsafe impl Sync for SectorPin<'_> {}

/// Shared reference to one component, held under a pin.
///
/// While the guard lives, the sector carrying the component cannot be moved
/// or destroyed by any writer; the reference stays valid for exactly that
/// long.
pub struct Pinned<'a, T> {
    ptr: NonNull<T>,
    _pin: SectorPin<'a>,
}

impl<'a, T> Pinned<'a, T> {
    pub(crate) fn new(ptr: NonNull<T>, pin: SectorPin<'a>) -> Self {
        Pinned { ptr, _pin: pin }
    }
}

impl<T> Deref for Pinned<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

unsafe impl<T: Sync> Send for Pinned<'_, T> {}
unsafe impl<T: Sync> Sync for Pinned<'_, T> {}

/// Whole-sector pin: stabilizes the slot's address, id and alive bits
/// without granting payload access. Views use it to bound iteration.
pub struct PinnedSector<'a> {
    sector: NonNull<Sector>,
    _pin: SectorPin<'a>,
}

impl<'a> PinnedSector<'a> {
    pub(crate) fn new(sector: NonNull<Sector>, pin: SectorPin<'a>) -> Self {
        PinnedSector { sector, _pin: pin }
    }

    pub fn id(&self) -> EntityId {
        unsafe { self.sector.as_ref() }.id()
    }

    pub fn alive_bits(&self) -> u32 {
        unsafe { self.sector.as_ref() }.alive_bits()
    }

    pub fn is_alive(&self, mask: u32) -> bool {
        unsafe { self.sector.as_ref() }.is_alive(mask)
    }
}

unsafe impl Send for PinnedSector<'_> {}
unsafe impl Sync for PinnedSector<'_> {}
