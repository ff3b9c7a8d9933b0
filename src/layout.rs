use {
    crate::{component::ComponentInfo, sector::Sector},
    smallvec::SmallVec,
    std::{any::TypeId, mem},
};

/// Hard cap on component types per layout: the sector alive word is 32 bits.
pub const MAX_COMPONENTS: usize = 32;

#[derive(Clone, Copy)]
pub(crate) struct LayoutEntry {
    pub type_id: TypeId,
    pub name: &'static str,
    /// Byte offset of the payload inside a slot, after the sector header.
    pub offset: u32,
    pub alive_mask: u32,
    pub needs_drop: bool,
    pub drop_in_place: unsafe fn(*mut u8),
}

/// Immutable per-array description of the sector layout: component offsets,
/// alive masks and drop thunks, computed once at array creation.
///
/// Components sit in declaration order after the 8-byte sector header, each
/// at its natural alignment; the stride is a multiple of the strictest
/// alignment in the set.
pub struct SectorLayout {
    entries: SmallVec<[LayoutEntry; 8]>,
    stride: usize,
    align: usize,
    is_trivial: bool,
}

impl SectorLayout {
    /// # Panics
    ///
    /// Panics when the set holds more than [`MAX_COMPONENTS`] types or
    /// repeats a type.
    pub fn new(infos: &[ComponentInfo]) -> Self {
        assert!(
            infos.len() <= MAX_COMPONENTS,
            "a sector layout holds at most {} component types, got {}",
            MAX_COMPONENTS,
            infos.len(),
        );
        for (i, info) in infos.iter().enumerate() {
            assert!(
                infos[..i].iter().all(|other| other.type_id() != info.type_id()),
                "component type `{}` repeats in the layout",
                info.name(),
            );
        }

        let mut align = mem::align_of::<Sector>();
        let mut offset = mem::size_of::<Sector>();
        let mut is_trivial = true;

        let entries = infos
            .iter()
            .enumerate()
            .map(|(index, info)| {
                let a = info.layout().align();
                align = align.max(a);
                offset = (offset + a - 1) & !(a - 1);
                is_trivial &= !info.needs_drop();
                let entry = LayoutEntry {
                    type_id: info.type_id(),
                    name: info.name(),
                    offset: offset as u32,
                    alive_mask: 1 << index,
                    needs_drop: info.needs_drop(),
                    drop_in_place: info.drop_in_place(),
                };
                offset += info.layout().size();
                entry
            })
            .collect();

        let stride = (offset + align - 1) & !(align - 1);

        SectorLayout {
            entries,
            stride,
            align,
            is_trivial,
        }
    }

    /// Slot size in bytes; every payload offset is below it.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// True when no component in the set carries drop glue.
    pub fn is_trivial(&self) -> bool {
        self.is_trivial
    }

    pub fn component_count(&self) -> usize {
        self.entries.len()
    }

    /// Mask with every layout bit set.
    pub fn all_mask(&self) -> u32 {
        if self.entries.len() == 32 {
            u32::MAX
        } else {
            (1u32 << self.entries.len()) - 1
        }
    }

    pub fn has(&self, type_id: TypeId) -> bool {
        self.entry_of(type_id).is_some()
    }

    pub(crate) fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub(crate) fn entry_of(&self, type_id: TypeId) -> Option<&LayoutEntry> {
        self.entries.iter().find(|e| e.type_id == type_id)
    }

    /// Runs drop glue for every component named in `bits`. Leaves the slot's
    /// alive word untouched; callers clear it first.
    pub(crate) unsafe fn drop_payload(&self, slot: *mut Sector, bits: u32) {
        if bits == 0 || self.is_trivial {
            return;
        }
        for entry in &self.entries {
            if bits & entry.alive_mask != 0 && entry.needs_drop {
                (entry.drop_in_place)(Sector::payload(slot, entry.offset));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::any::TypeId};

    #[test]
    fn offsets_are_aligned_and_ordered() {
        let layout = SectorLayout::new(&[
            ComponentInfo::of::<u8>(),
            ComponentInfo::of::<u64>(),
            ComponentInfo::of::<u16>(),
        ]);

        let u8_entry = layout.entry_of(TypeId::of::<u8>()).unwrap();
        let u64_entry = layout.entry_of(TypeId::of::<u64>()).unwrap();
        let u16_entry = layout.entry_of(TypeId::of::<u16>()).unwrap();

        assert_eq!(u8_entry.offset, 8);
        assert_eq!(u64_entry.offset % 8, 0);
        assert!(u64_entry.offset > u8_entry.offset);
        assert!(u16_entry.offset > u64_entry.offset);

        assert_eq!(layout.align(), 8);
        assert_eq!(layout.stride() % 8, 0);
        assert!(layout.stride() as u32 >= u16_entry.offset + 2);
    }

    #[test]
    fn masks_are_declaration_indexed() {
        let layout =
            SectorLayout::new(&[ComponentInfo::of::<u32>(), ComponentInfo::of::<String>()]);
        assert_eq!(layout.entry_of(TypeId::of::<u32>()).unwrap().alive_mask, 1);
        assert_eq!(
            layout.entry_of(TypeId::of::<String>()).unwrap().alive_mask,
            2
        );
        assert_eq!(layout.all_mask(), 3);
        assert!(!layout.is_trivial());
    }

    #[test]
    fn header_only_layout_has_header_stride() {
        let layout = SectorLayout::new(&[ComponentInfo::of::<u32>()]);
        assert_eq!(layout.stride(), 12);
    }

    #[test]
    #[should_panic]
    fn repeated_type_is_rejected() {
        SectorLayout::new(&[ComponentInfo::of::<u32>(), ComponentInfo::of::<u32>()]);
    }
}
