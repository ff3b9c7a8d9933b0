use {
    crate::{
        array::SectorsArray,
        component::Component,
        entity::EntityId,
        pin::{PinnedSector, SectorPin},
        registry::Registry,
        sector::Sector,
        storage::{LinearCursor, RangedCursor},
    },
    smallvec::{smallvec, SmallVec},
    std::{any::TypeId, marker::PhantomData, ops::Range, ptr, ptr::NonNull},
};

/// Query shape of a view: one main driver type, or a tuple whose head is
/// the main driver and whose tail projects secondaries.
///
/// Main components come out as plain references; secondaries as `Option`s,
/// `None` when the entity lacks that component. Implemented for `&T` and
/// tuples of references up to five types.
pub trait ViewQuery<'a>: Sized {
    /// Yielded by iteration: `(id, &Main, Option<&Secondary>…)`.
    type Item;
    /// Yielded by [`View::each`]: `(id, &Main, &Secondary…)`, all present.
    type EachItem;

    #[doc(hidden)]
    fn types() -> SmallVec<[TypeId; 4]>;

    #[doc(hidden)]
    unsafe fn item(
        id: EntityId,
        main: *mut u8,
        main_slot: *mut Sector,
        core: &mut ViewCore<'a>,
    ) -> Self::Item;

    #[doc(hidden)]
    unsafe fn each_item(
        id: EntityId,
        main: *mut u8,
        main_slot: *mut Sector,
        core: &mut ViewCore<'a>,
    ) -> Option<Self::EachItem>;
}

enum Secondary<'a> {
    /// Type not registered anywhere; always misses.
    Missing,
    /// Same array as the main type: read at the main slot's offset.
    Grouped { offset: u32, mask: u32 },
    /// Foreign array: a lazy cursor catches up to the main id. Sound
    /// because the dense prefix keeps ids strictly increasing.
    Foreign {
        offset: u32,
        mask: u32,
        cursor: LinearCursor,
        end: usize,
        _bound: Option<PinnedSector<'a>>,
    },
}

impl Secondary<'_> {
    unsafe fn resolve(&mut self, id: EntityId, main_slot: *mut Sector) -> *const u8 {
        match self {
            Secondary::Missing => ptr::null(),
            Secondary::Grouped { offset, mask } => {
                if (*main_slot).is_alive(*mask) {
                    Sector::payload(main_slot, *offset)
                } else {
                    ptr::null()
                }
            }
            Secondary::Foreign {
                offset,
                mask,
                cursor,
                end,
                ..
            } => {
                while cursor.linear_index() < *end {
                    let slot = cursor.raw();
                    let sector = &*slot;
                    if sector.id() < id {
                        cursor.advance();
                        continue;
                    }
                    if sector.id() == id && sector.is_alive(*mask) {
                        return Sector::payload(slot, *offset);
                    }
                    return ptr::null();
                }
                ptr::null()
            }
        }
    }
}

/// Iteration state shared by every query arity.
#[doc(hidden)]
pub struct ViewCore<'a> {
    array: &'a SectorsArray,
    main_offset: u32,
    main_mask: u32,
    stride: usize,
    cursor: RangedCursor,
    secondaries: SmallVec<[Secondary<'a>; 4]>,
    /// Stamp on the sector currently yielded; replaced on every advance.
    item_pin: Option<SectorPin<'a>>,
    /// Keeps the bound sector in place for the view's whole lifetime.
    _bound: Option<PinnedSector<'a>>,
    /// No dead holes existed at the snapshot, so `each` may sweep whole
    /// runs instead of walking the cursor slot by slot. Individual alive
    /// bits are still checked: an alive sector need not carry the main
    /// member.
    plain: bool,
}

impl<'a> ViewCore<'a> {
    fn build(
        registry: &'a Registry,
        types: &[TypeId],
        id_ranges: Option<&[Range<EntityId>]>,
    ) -> Option<Self> {
        let main_array = registry.array_by_type(types[0])?;
        let main_entry = *main_array.layout().entry_of(types[0])?;

        let guts = main_array.read_guts();
        let size = guts.size;
        let mut spans: SmallVec<[Range<usize>; 4]> = match id_ranges {
            None => smallvec![0..size],
            Some(ranges) => ranges
                .iter()
                .map(|r| guts.lower_bound(r.start)..guts.lower_bound(r.end))
                .collect(),
        };
        spans.retain(|s| s.start < s.end);
        // Bound the iteration at a stable size: the sector closing the last
        // span cannot move or vanish while the view lives.
        let bound = spans.last().map(|span| {
            let idx = span.end - 1;
            let slot = guts.slot(idx);
            let pin = SectorPin::new(main_array.pin_board(), guts.id_at(idx));
            PinnedSector::new(unsafe { NonNull::new_unchecked(slot) }, pin)
        });
        let cursor = RangedCursor::new(&guts.storage, &spans);
        let plain = guts.dead == 0;
        drop(guts);

        let mut secondaries: SmallVec<[Secondary<'a>; 4]> = SmallVec::new();
        for &type_id in &types[1..] {
            let state = match registry.array_by_type(type_id) {
                None => Secondary::Missing,
                Some(array) if ptr::eq(array, main_array) => {
                    let entry = main_array.layout().entry_of(type_id)?;
                    Secondary::Grouped {
                        offset: entry.offset,
                        mask: entry.alive_mask,
                    }
                }
                Some(array) => {
                    let entry = *array.layout().entry_of(type_id)?;
                    let guts = array.read_guts();
                    let end = guts.size;
                    let bound = if end > 0 {
                        let slot = guts.slot(end - 1);
                        let pin = SectorPin::new(array.pin_board(), guts.id_at(end - 1));
                        Some(PinnedSector::new(
                            unsafe { NonNull::new_unchecked(slot) },
                            pin,
                        ))
                    } else {
                        None
                    };
                    Secondary::Foreign {
                        offset: entry.offset,
                        mask: entry.alive_mask,
                        cursor: LinearCursor::new(&guts.storage, 0),
                        end,
                        _bound: bound,
                    }
                }
            };
            secondaries.push(state);
        }

        Some(ViewCore {
            stride: main_array.layout().stride(),
            array: main_array,
            main_offset: main_entry.offset,
            main_mask: main_entry.alive_mask,
            cursor,
            secondaries,
            item_pin: None,
            _bound: bound,
            plain,
        })
    }

    /// Next slot with the main bit set, stamped for the duration of the
    /// item.
    fn next_main(&mut self) -> Option<(*mut Sector, EntityId)> {
        self.item_pin = None;
        loop {
            if self.cursor.done() {
                return None;
            }
            let slot = self.cursor.raw();
            let sector = unsafe { &*slot };
            self.cursor.advance();
            if sector.is_alive(self.main_mask) {
                let id = sector.id();
                self.item_pin = Some(SectorPin::new(self.array.pin_board(), id));
                // Re-check after stamping: an in-place erase may have fired
                // between the test and the pin.
                if sector.is_alive(self.main_mask) {
                    return Some((slot, id));
                }
                self.item_pin = None;
            }
        }
    }

    pub(crate) unsafe fn resolve_secondary(
        &mut self,
        index: usize,
        id: EntityId,
        main_slot: *mut Sector,
    ) -> *const u8 {
        self.secondaries[index].resolve(id, main_slot)
    }
}

/// Configured iterator factory over one main component type with optional
/// secondary projections and optional id-range filtering.
///
/// Create with [`Registry::view`] or [`Registry::view_ranged`]; iterate it
/// directly, or drive the fast path with [`each`](View::each).
pub struct View<'a, Q: ViewQuery<'a>> {
    core: Option<ViewCore<'a>>,
    marker: PhantomData<Q>,
}

impl<'a, Q: ViewQuery<'a>> View<'a, Q> {
    pub(crate) fn over(
        registry: &'a Registry,
        id_ranges: Option<&[Range<EntityId>]>,
    ) -> Self {
        let types = Q::types();
        View {
            core: ViewCore::build(registry, &types, id_ranges),
            marker: PhantomData,
        }
    }

    /// True when iteration yields nothing: the main type is unregistered or
    /// no slot falls inside the view's ranges.
    pub fn is_empty(&self) -> bool {
        match &self.core {
            None => true,
            Some(core) => core.cursor.done(),
        }
    }

    /// Calls `f` once per entity carrying every queried component.
    ///
    /// When the snapshot had no dead holes, this sweeps whole
    /// chunk-contiguous runs without cursor bookkeeping. Every slot is
    /// still gated on the main type's alive bit, since a grouped sector
    /// can be alive through another member alone; grouped secondaries
    /// apply their own masks, so the callback fires only under the AND of
    /// all masks.
    pub fn each(mut self, mut f: impl FnMut(Q::EachItem)) {
        let mut core = match self.core.take() {
            Some(core) => core,
            None => return,
        };
        if core.plain {
            let stride = core.stride;
            let main_offset = core.main_offset;
            let main_mask = core.main_mask;
            while !core.cursor.done() {
                let (mut slot, len) = core.cursor.take_run();
                for _ in 0..len {
                    unsafe {
                        let sector = &*slot;
                        if sector.is_alive(main_mask) {
                            let id = sector.id();
                            let main = Sector::payload(slot, main_offset);
                            if let Some(item) = Q::each_item(id, main, slot, &mut core) {
                                f(item);
                            }
                        }
                        slot = (slot as *mut u8).add(stride) as *mut Sector;
                    }
                }
            }
        } else {
            while let Some((slot, id)) = core.next_main() {
                let main = unsafe { Sector::payload(slot, core.main_offset) };
                if let Some(item) = unsafe { Q::each_item(id, main, slot, &mut core) } {
                    f(item);
                }
            }
        }
    }
}

impl<'a, Q: ViewQuery<'a>> Iterator for View<'a, Q> {
    type Item = Q::Item;

    fn next(&mut self) -> Option<Q::Item> {
        let core = self.core.as_mut()?;
        let (slot, id) = core.next_main()?;
        let main = unsafe { Sector::payload(slot, core.main_offset) };
        Some(unsafe { Q::item(id, main, slot, core) })
    }
}

impl<'a, A: Component> ViewQuery<'a> for &'a A {
    type Item = (EntityId, &'a A);
    type EachItem = (EntityId, &'a A);

    fn types() -> SmallVec<[TypeId; 4]> {
        smallvec![TypeId::of::<A>()]
    }

    unsafe fn item(
        id: EntityId,
        main: *mut u8,
        _main_slot: *mut Sector,
        _core: &mut ViewCore<'a>,
    ) -> Self::Item {
        (id, &*(main as *const A))
    }

    unsafe fn each_item(
        id: EntityId,
        main: *mut u8,
        main_slot: *mut Sector,
        core: &mut ViewCore<'a>,
    ) -> Option<Self::EachItem> {
        Some(Self::item(id, main, main_slot, core))
    }
}

macro_rules! tuple_view_queries {
    ($($b:ident => $index:tt),+) => {
        impl<'a, A: Component $(, $b: Component)+> ViewQuery<'a> for (&'a A, $(&'a $b,)+) {
            type Item = (EntityId, &'a A, $(Option<&'a $b>,)+);
            type EachItem = (EntityId, &'a A, $(&'a $b,)+);

            fn types() -> SmallVec<[TypeId; 4]> {
                let mut types: SmallVec<[TypeId; 4]> = smallvec![TypeId::of::<A>()];
                $(types.push(TypeId::of::<$b>());)+
                types
            }

            unsafe fn item(
                id: EntityId,
                main: *mut u8,
                main_slot: *mut Sector,
                core: &mut ViewCore<'a>,
            ) -> Self::Item {
                (
                    id,
                    &*(main as *const A),
                    $({
                        let ptr = core.resolve_secondary($index, id, main_slot);
                        if ptr.is_null() {
                            None
                        } else {
                            Some(&*(ptr as *const $b))
                        }
                    },)+
                )
            }

            unsafe fn each_item(
                id: EntityId,
                main: *mut u8,
                main_slot: *mut Sector,
                core: &mut ViewCore<'a>,
            ) -> Option<Self::EachItem> {
                Some((
                    id,
                    &*(main as *const A),
                    $({
                        let ptr = core.resolve_secondary($index, id, main_slot);
                        if ptr.is_null() {
                            return None;
                        }
                        &*(ptr as *const $b)
                    },)+
                ))
            }
        }
    };
}

tuple_view_queries!(B => 0);
tuple_view_queries!(B => 0, C => 1);
tuple_view_queries!(B => 0, C => 1, D => 2);
tuple_view_queries!(B => 0, C => 1, D => 2, E => 3);
