mod iter;

pub(crate) use self::iter::{RawAliveIter, RawRangedAliveIter, RawRangedIter, RawSectorIter};

use {
    crate::{
        component::{Component, ComponentInfo},
        entity::{EntityId, INVALID_ID},
        group::ComponentGroup,
        layout::{LayoutEntry, SectorLayout},
        pin::{PinBoard, Pinned, PinnedSector, SectorPin},
        retire::{RetireBin, RetireVec},
        sector::Sector,
        storage::{ChunkStorage, DEFAULT_CHUNK_CAPACITY},
        util::{ReadGuard, Shared},
    },
    smallvec::SmallVec,
    std::{any::TypeId, any::type_name, ptr::NonNull},
};

/// Sentinel for "no slot" in the sparse map.
pub(crate) const INVALID_INDEX: u32 = u32::MAX;

/// Per-array creation options.
#[derive(Clone, Copy, Debug)]
pub struct ArrayConfig {
    /// Initial reservation in slots.
    pub capacity: usize,
    /// Slots per chunk; rounded up to a power of two.
    pub chunk_capacity: usize,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        ArrayConfig {
            capacity: 0,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
        }
    }
}

/// Lock-guarded mutable state of one array.
///
/// Invariants, restored after every mutating operation:
/// - slots `[0, size)` form the dense prefix, sector ids strictly increasing;
/// - `sparse[id]` is the linear index of the slot whose header carries `id`,
///   or `INVALID_INDEX`;
/// - `dead` counts prefix slots whose alive word is zero.
pub(crate) struct Guts {
    pub(crate) storage: ChunkStorage,
    pub(crate) sparse: RetireVec<u32>,
    pub(crate) size: usize,
    pub(crate) dead: usize,
    pending: RetireVec<EntityId>,
}

impl Guts {
    pub(crate) fn slot(&self, idx: usize) -> *mut Sector {
        debug_assert!(idx < self.storage.capacity());
        self.storage.slot(idx)
    }

    pub(crate) fn id_at(&self, idx: usize) -> EntityId {
        unsafe { (*self.slot(idx)).id() }
    }

    pub(crate) fn find(&self, id: EntityId) -> Option<usize> {
        match self.sparse.get(id as usize) {
            Some(&idx) if idx != INVALID_INDEX => Some(idx as usize),
            _ => None,
        }
    }

    /// First dense index whose sector id is not below `id`.
    pub(crate) fn lower_bound(&self, id: EntityId) -> usize {
        let mut lo = 0;
        let mut hi = self.size;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.id_at(mid) < id {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Re-points the sparse entry of the sector now sitting at `idx`. An
    /// entry nulled by an in-place erase stays null: dead holes keep their
    /// stale header id until defragmentation.
    fn fix_sparse_after_move(&mut self, idx: usize) {
        let sid = self.id_at(idx) as usize;
        if let Some(&cur) = self.sparse.get(sid) {
            if cur != INVALID_INDEX {
                self.sparse.set(sid, idx as u32);
            }
        }
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        for i in 1..self.size {
            debug_assert!(
                self.id_at(i - 1) < self.id_at(i),
                "dense prefix ids must be strictly increasing",
            );
        }
        let mut dead = 0;
        for i in 0..self.size {
            let sector = unsafe { &*self.slot(i) };
            if !sector.is_sector_alive() {
                dead += 1;
            }
            if let Some(found) = self.find(sector.id()) {
                debug_assert_eq!(found, i, "sparse entry must point at its slot");
            }
        }
        debug_assert_eq!(dead, self.dead);
    }

    #[cfg(not(debug_assertions))]
    fn check_invariants(&self) {}
}

/// The core container: fixed-stride sector slots in chunks, an id-sorted
/// dense prefix, an O(1) sparse lookup and deferred, pin-aware erasure.
///
/// Usable standalone; [`Registry`](crate::Registry) wraps one array per
/// registered component group.
pub struct SectorsArray {
    layout: SectorLayout,
    guts: Shared<Guts>,
    pins: PinBoard,
    bin: RetireBin,
}

impl SectorsArray {
    pub fn new<G: ComponentGroup>(config: ArrayConfig) -> Self {
        Self::from_infos(G::infos().as_ref(), config)
    }

    pub(crate) fn from_infos(infos: &[ComponentInfo], config: ArrayConfig) -> Self {
        let layout = SectorLayout::new(infos);
        let storage = ChunkStorage::new(layout.stride(), layout.align(), config.chunk_capacity);
        let array = SectorsArray {
            layout,
            guts: Shared::new(Guts {
                storage,
                sparse: RetireVec::new(),
                size: 0,
                dead: 0,
                pending: RetireVec::new(),
            }),
            pins: PinBoard::new(),
            bin: RetireBin::new(),
        };
        if config.capacity > 0 {
            array.reserve(config.capacity);
        }
        array
    }

    pub fn layout(&self) -> &SectorLayout {
        &self.layout
    }

    /// Count of allocated slots in the dense prefix, dead holes included.
    pub fn len(&self) -> usize {
        self.guts.read().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.guts.read().storage.capacity()
    }

    /// Dead holes awaiting [`defragment`](Self::defragment).
    pub fn dead_count(&self) -> usize {
        self.guts.read().dead
    }

    pub fn pending_erases(&self) -> usize {
        self.guts.read().pending.len()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.guts.read().find(id).is_some()
    }

    /// Position of the sector for `id` inside the dense prefix.
    pub fn find_linear_index(&self, id: EntityId) -> Option<usize> {
        self.guts.read().find(id)
    }

    /// Grows the allocator to at least `slots`, the sparse map and the pin
    /// table to match.
    pub fn reserve(&self, slots: usize) {
        let mut guts = self.guts.write();
        guts.storage.reserve(&self.bin, slots);
        guts.sparse.grow_to(&self.bin, slots, INVALID_INDEX);
        self.pins.grow(slots);
    }

    /// Constructs the `T` member of sector `id`, creating the sector at its
    /// sorted position first when absent. An existing value is destroyed and
    /// replaced.
    ///
    /// # Panics
    ///
    /// Panics when `T` is not part of this array's layout.
    pub fn insert<T: Component>(&self, id: EntityId, value: T) {
        let mut guts = self.guts.write();
        self.emplace_locked(&mut guts, id, move || value);
    }

    /// Like [`insert`](Self::insert), constructing the value only once the
    /// slot is ready.
    pub fn emplace_with<T: Component>(&self, id: EntityId, make: impl FnOnce() -> T) {
        let mut guts = self.guts.write();
        self.emplace_locked(&mut guts, id, make);
    }

    pub fn has<T: Component>(&self, id: EntityId) -> bool {
        let entry = match self.layout.entry_of(TypeId::of::<T>()) {
            Some(entry) => *entry,
            None => return false,
        };
        let guts = self.guts.read();
        match guts.find(id) {
            Some(idx) => unsafe { &*guts.slot(idx) }.is_alive(entry.alive_mask),
            None => false,
        }
    }

    /// Pinned shared access to the `T` member of sector `id`.
    ///
    /// Missing id, missing type and a cleared alive bit all answer `None`.
    pub fn get<T: Component>(&self, id: EntityId) -> Option<Pinned<'_, T>> {
        let entry = *self.layout.entry_of(TypeId::of::<T>())?;
        let guts = self.guts.read();
        let idx = guts.find(id)?;
        let slot = guts.slot(idx);
        if !unsafe { &*slot }.is_alive(entry.alive_mask) {
            return None;
        }
        // Pin before the lock drops: a writer acquiring it afterwards
        // already sees the stamp.
        let pin = SectorPin::new(&self.pins, id);
        let ptr = unsafe { NonNull::new_unchecked(Sector::payload(slot, entry.offset) as *mut T) };
        drop(guts);
        Some(Pinned::new(ptr, pin))
    }

    /// Exclusive access without pinning; the borrow checker stands in for
    /// the pin.
    pub fn get_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let entry = *self.layout.entry_of(TypeId::of::<T>())?;
        let guts = self.guts.get_mut();
        let idx = guts.find(id)?;
        let slot = guts.slot(idx);
        if !unsafe { &*slot }.is_alive(entry.alive_mask) {
            return None;
        }
        Some(unsafe { &mut *(Sector::payload(slot, entry.offset) as *mut T) })
    }

    /// Pins the whole sector for `id`, stabilizing its address and id.
    pub fn pin_sector(&self, id: EntityId) -> Option<PinnedSector<'_>> {
        let guts = self.guts.read();
        let idx = guts.find(id)?;
        let slot = guts.slot(idx);
        let pin = SectorPin::new(&self.pins, id);
        drop(guts);
        Some(PinnedSector::new(
            unsafe { NonNull::new_unchecked(slot) },
            pin,
        ))
    }

    /// Clears one alive bit and runs the destructor; the sector itself
    /// stays, as a dead hole if this was its last member. No-op for unknown
    /// ids and types outside the layout.
    pub fn destroy_member<T: Component>(&self, id: EntityId) -> bool {
        let entry = match self.layout.entry_of(TypeId::of::<T>()) {
            Some(entry) => *entry,
            None => return false,
        };
        let mut guts = self.guts.write();
        self.destroy_member_locked(&mut guts, id, &entry)
    }

    /// Removes the sector for `id`. With `shift` the tail closes the gap and
    /// the prefix stays hole-free; without it the slot becomes a dead hole
    /// for [`defragment`](Self::defragment).
    ///
    /// A pinned victim (or, when shifting, any pinned id at or above it) is
    /// queued instead and retried by
    /// [`process_pending_erases`](Self::process_pending_erases). Returns
    /// `false` when queued.
    pub fn erase_sector(&self, id: EntityId, shift: bool) -> bool {
        let mut guts = self.guts.write();
        self.erase_locked(&mut guts, id, shift)
    }

    /// Two-pointer compaction: removes every dead hole, restores a dense
    /// sorted prefix and returns trailing chunks to the allocator. Waits for
    /// the whole-array pin total to reach zero.
    pub fn defragment(&self) {
        let mut guts = self.guts.write();
        self.defragment_locked(&mut guts);
    }

    /// Retries queued erases whose ids became unpinned, then drains the
    /// retire bin and optionally defragments, both only when the array is
    /// idle (pin total zero).
    pub fn process_pending_erases(&self, with_defragment: bool) {
        let mut guts = self.guts.write();
        self.process_pending_locked(&mut guts, with_defragment);
    }

    /// Destroys every component and releases all slots. Registrations (the
    /// layout) survive. Waits for the array to be unpinned.
    pub fn clear(&self) {
        let mut guts = self.guts.write();
        self.pins.wait_until_idle();
        for slot in RawSectorIter::new(&guts) {
            let bits = unsafe { &*slot }.take_alive();
            unsafe { self.layout.drop_payload(slot, bits) };
        }
        let sparse_len = guts.sparse.len();
        for i in 0..sparse_len {
            guts.sparse.set(i, INVALID_INDEX);
        }
        guts.pending.clear();
        guts.size = 0;
        guts.dead = 0;
        guts.storage.shrink(0);
    }

    // Lock-held iteration. The guard stays held for the whole sweep, so the
    // handed-out references cannot outlive a stable prefix.

    /// Calls `f` with the id and liveness of every slot in the dense
    /// prefix, dead holes included.
    pub fn for_each_sector(&self, mut f: impl FnMut(EntityId, bool)) {
        let guts = self.guts.read();
        for slot in RawSectorIter::new(&guts) {
            let sector = unsafe { &*slot };
            f(sector.id(), sector.is_sector_alive());
        }
    }

    /// Calls `f` with every alive `T` in dense-prefix (ascending id) order.
    pub fn for_each_alive<T: Component>(&self, mut f: impl FnMut(EntityId, &T)) {
        let entry = match self.layout.entry_of(TypeId::of::<T>()) {
            Some(entry) => *entry,
            None => return,
        };
        let guts = self.guts.read();
        for slot in RawAliveIter::new(&guts, entry.alive_mask) {
            let sector = unsafe { &*slot };
            let value = unsafe { &*(Sector::payload(slot, entry.offset) as *const T) };
            f(sector.id(), value);
        }
    }

    /// Ranged variant of [`for_each_sector`](Self::for_each_sector):
    /// restricted to the given entity id ranges.
    pub fn for_each_sector_in(
        &self,
        id_ranges: &[std::ops::Range<EntityId>],
        mut f: impl FnMut(EntityId, bool),
    ) {
        let guts = self.guts.read();
        let spans = Self::spans_for(&guts, id_ranges);
        for slot in RawRangedIter::new(&guts, &spans) {
            let sector = unsafe { &*slot };
            f(sector.id(), sector.is_sector_alive());
        }
    }

    /// Ranged variant of [`for_each_alive`](Self::for_each_alive).
    pub fn for_each_alive_in<T: Component>(
        &self,
        id_ranges: &[std::ops::Range<EntityId>],
        mut f: impl FnMut(EntityId, &T),
    ) {
        let entry = match self.layout.entry_of(TypeId::of::<T>()) {
            Some(entry) => *entry,
            None => return,
        };
        let guts = self.guts.read();
        let spans = Self::spans_for(&guts, id_ranges);
        for slot in RawRangedAliveIter::new(&guts, &spans, entry.alive_mask) {
            let sector = unsafe { &*slot };
            let value = unsafe { &*(Sector::payload(slot, entry.offset) as *const T) };
            f(sector.id(), value);
        }
    }

    fn spans_for(
        guts: &Guts,
        id_ranges: &[std::ops::Range<EntityId>],
    ) -> SmallVec<[std::ops::Range<usize>; 4]> {
        id_ranges
            .iter()
            .map(|r| guts.lower_bound(r.start)..guts.lower_bound(r.end))
            .filter(|s| s.start < s.end)
            .collect()
    }

    // Caller-locked internals.

    pub(crate) fn acquire_locked(&self, guts: &mut Guts, id: EntityId) -> *mut Sector {
        debug_assert_ne!(id, INVALID_ID);
        let idx = id as usize;
        if idx >= guts.sparse.len() {
            guts.sparse.grow_to(&self.bin, idx + 1, INVALID_INDEX);
            self.pins.grow(idx + 1);
        }
        if let Some(found) = guts.find(id) {
            return guts.slot(found);
        }

        let pos = guts.lower_bound(id);
        if pos < guts.size && guts.id_at(pos) == id {
            // Revive the dead hole an in-place erase left for this id.
            guts.sparse.set(idx, pos as u32);
            return guts.slot(pos);
        }

        guts.storage.reserve(&self.bin, guts.size + 1);
        if pos < guts.size {
            // The tail shifts one slot right; every moved id is above `id`,
            // so wait until none of them is stamped.
            self.pins.wait_until_movable(id);
            unsafe { guts.storage.move_slots(pos + 1, pos, guts.size - pos) };
            for i in pos + 1..=guts.size {
                guts.fix_sparse_after_move(i);
            }
        }

        let slot = guts.slot(pos);
        unsafe { Sector::init(slot, id) };
        guts.sparse.set(idx, pos as u32);
        guts.size += 1;
        guts.dead += 1;
        guts.check_invariants();
        slot
    }

    pub(crate) fn emplace_locked<T: Component>(
        &self,
        guts: &mut Guts,
        id: EntityId,
        make: impl FnOnce() -> T,
    ) {
        let entry = match self.layout.entry_of(TypeId::of::<T>()) {
            Some(entry) => *entry,
            None => panic!(
                "component type `{}` is not part of this array's layout",
                type_name::<T>(),
            ),
        };
        let value = make();
        let slot = self.acquire_locked(guts, id);
        let sector = unsafe { &*slot };
        let payload = unsafe { Sector::payload(slot, entry.offset) } as *mut T;
        if sector.is_alive(entry.alive_mask) {
            unsafe {
                if entry.needs_drop {
                    std::ptr::drop_in_place(payload);
                }
                std::ptr::write(payload, value);
            }
        } else {
            unsafe { std::ptr::write(payload, value) };
            if !sector.is_sector_alive() {
                guts.dead -= 1;
            }
            sector.set_alive(entry.alive_mask);
        }
    }

    pub(crate) fn destroy_member_locked(
        &self,
        guts: &mut Guts,
        id: EntityId,
        entry: &LayoutEntry,
    ) -> bool {
        let idx = match guts.find(id) {
            Some(idx) => idx,
            None => return false,
        };
        let slot = guts.slot(idx);
        let sector = unsafe { &*slot };
        if !sector.is_alive(entry.alive_mask) {
            return false;
        }
        // Clear before dropping: no alive bit ever covers a dead value.
        sector.clear_alive(entry.alive_mask);
        if entry.needs_drop {
            unsafe { (entry.drop_in_place)(Sector::payload(slot, entry.offset)) };
        }
        if !sector.is_sector_alive() {
            guts.dead += 1;
        }
        true
    }

    pub(crate) fn erase_locked(&self, guts: &mut Guts, id: EntityId, shift: bool) -> bool {
        let idx = match guts.find(id) {
            Some(idx) => idx,
            None => return true,
        };
        let movable = if shift {
            self.pins.can_move(id)
        } else {
            !self.pins.is_pinned(id)
        };
        if !movable {
            guts.pending.push(&self.bin, id);
            return false;
        }

        let slot = guts.slot(idx);
        let bits = unsafe { &*slot }.take_alive();
        unsafe { self.layout.drop_payload(slot, bits) };
        guts.sparse.set(id as usize, INVALID_INDEX);

        if shift {
            let tail = guts.size - idx - 1;
            unsafe { guts.storage.move_slots(idx, idx + 1, tail) };
            guts.size -= 1;
            for i in idx..guts.size {
                guts.fix_sparse_after_move(i);
            }
            if bits == 0 {
                guts.dead -= 1;
            }
        } else if bits != 0 {
            guts.dead += 1;
        }
        guts.check_invariants();
        true
    }

    pub(crate) fn defragment_locked(&self, guts: &mut Guts) {
        if guts.dead == 0 {
            return;
        }
        self.pins.wait_until_idle();

        let size = guts.size;
        let mut write = 0;
        let mut read = 0;
        while read < size {
            if unsafe { &*guts.slot(read) }.is_sector_alive() {
                let run_start = read;
                while read < size && unsafe { &*guts.slot(read) }.is_sector_alive() {
                    read += 1;
                }
                if write != run_start {
                    unsafe { guts.storage.move_slots(write, run_start, read - run_start) };
                    for i in write..write + (read - run_start) {
                        guts.fix_sparse_after_move(i);
                    }
                }
                write += read - run_start;
            } else {
                // A dead hole: null its sparse entry unless an in-place
                // erase already did.
                let sid = unsafe { &*guts.slot(read) }.id() as usize;
                if guts.sparse.get(sid) == Some(&(read as u32)) {
                    guts.sparse.set(sid, INVALID_INDEX);
                }
                read += 1;
            }
        }

        let reclaimed = guts.size - write;
        guts.size = write;
        guts.dead = 0;
        guts.storage.shrink(write);
        guts.check_invariants();
        log::trace!(
            "defragmented sectors array: reclaimed {} slots, {} remain",
            reclaimed,
            write,
        );
    }

    pub(crate) fn process_pending_locked(&self, guts: &mut Guts, with_defragment: bool) {
        if guts.pending.len() != 0 {
            let mut retry: SmallVec<[EntityId; 16]> = SmallVec::new();
            while let Some(id) = guts.pending.pop() {
                retry.push(id);
            }
            let retried = retry.len();
            for id in retry {
                self.erase_locked(guts, id, false);
            }
            log::trace!(
                "pending erases: retried {}, {} still pinned",
                retried,
                guts.pending.len(),
            );
        }
        if self.pins.total() == 0 {
            self.bin.drain();
            if with_defragment {
                self.defragment_locked(guts);
            }
        }
    }

    /// Batch in-place erase for [`Registry::destroy_entities`]. Expects the
    /// input sorted and deduplicated; ids beyond the sparse capacity are
    /// trimmed.
    pub(crate) fn erase_many(&self, sorted_ids: &[EntityId]) {
        let mut guts = self.guts.write();
        let cap = guts.sparse.len();
        let cut = sorted_ids.partition_point(|&id| (id as usize) < cap);
        let ids = &sorted_ids[..cut];
        if let Some(&first) = ids.iter().find(|&&id| guts.find(id).is_some()) {
            self.pins.wait_until_unpinned(first);
        }
        for &id in ids {
            self.erase_locked(&mut guts, id, false);
        }
    }

    pub(crate) fn read_guts(&self) -> ReadGuard<'_, Guts> {
        self.guts.read()
    }

    pub(crate) fn pin_board(&self) -> &PinBoard {
        &self.pins
    }
}

impl Drop for SectorsArray {
    fn drop(&mut self) {
        let layout = &self.layout;
        let guts = self.guts.get_mut();
        if !layout.is_trivial() {
            for idx in 0..guts.size {
                let slot = guts.storage.slot(idx);
                let bits = unsafe { &*slot }.alive_bits();
                unsafe { layout.drop_payload(slot, bits) };
            }
        }
    }
}
