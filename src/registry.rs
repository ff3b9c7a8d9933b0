use {
    crate::{
        array::{ArrayConfig, SectorsArray},
        component::{component_id_of, Component, ComponentInfo},
        entity::{EntityId, EntityRanges},
        group::ComponentGroup,
        pin::Pinned,
        util::Shared,
        view::{View, ViewQuery},
    },
    std::{any::TypeId, ops::Range},
};

#[derive(Default)]
struct ArrayMap {
    /// Component id → index into `list`. Several ids alias one array when
    /// their types were registered as a group.
    by_component: Vec<Option<u32>>,
    list: Vec<Box<SectorsArray>>,
}

impl ArrayMap {
    fn index_of(&self, type_id: TypeId) -> Option<u32> {
        let cid = component_id_of(type_id);
        self.by_component.get(cid.index()).copied().flatten()
    }

    fn bind(&mut self, type_id: TypeId, index: u32) {
        let cid = component_id_of(type_id);
        if cid.index() >= self.by_component.len() {
            self.by_component.resize(cid.index() + 1, None);
        }
        self.by_component[cid.index()] = Some(index);
    }
}

/// Top-level façade: owns the entity id set and one sectors array per
/// registered component group.
///
/// Component types used without prior [`register_array`] get an implicit
/// single-type array on first insertion. With the `parallel` feature every
/// operation takes `&self` and is safe to call from many threads under the
/// pin discipline; without it the registry is single-threaded and the
/// locks compile away.
pub struct Registry {
    entities: Shared<EntityRanges>,
    arrays: Shared<ArrayMap>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            entities: Shared::new(EntityRanges::new()),
            arrays: Shared::new(ArrayMap::default()),
        }
    }

    // Entities.

    /// Allocates the next free entity id.
    pub fn take_entity(&self) -> EntityId {
        self.entities.write().take()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.read().contains(id)
    }

    /// Ordered snapshot of the live entity ids.
    pub fn entities(&self) -> Vec<EntityId> {
        self.entities.read().iter().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    // Arrays and components.

    /// Creates one sectors array storing the group `G`, so its component
    /// types share a slot per entity.
    ///
    /// Registering a set that is already mapped to one array is a no-op.
    ///
    /// # Panics
    ///
    /// Panics when the set partially overlaps existing registrations.
    pub fn register_array<G: ComponentGroup>(&self, config: ArrayConfig) {
        let infos = G::infos();
        self.register_infos(infos.as_ref(), config);
    }

    fn register_infos(&self, infos: &[ComponentInfo], config: ArrayConfig) {
        let mut map = self.arrays.write();
        let existing: Vec<Option<u32>> =
            infos.iter().map(|i| map.index_of(i.type_id())).collect();

        if existing.iter().all(Option::is_none) {
            let index = map.list.len() as u32;
            map.list
                .push(Box::new(SectorsArray::from_infos(infos, config)));
            for info in infos {
                map.bind(info.type_id(), index);
            }
            log::debug!(
                "registered sectors array #{} for [{}]",
                index,
                infos
                    .iter()
                    .map(ComponentInfo::name)
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        } else if existing[0].is_none() || existing.iter().any(|&e| e != existing[0]) {
            panic!("component group partially overlaps an existing registration");
        }
    }

    /// Constructs the `T` component of entity `id`, overwriting in place if
    /// present. Registers an implicit single-type array for `T` on first
    /// use.
    pub fn add_component<T: Component>(&self, id: EntityId, value: T) {
        self.array_for_insert::<T>().insert(id, value)
    }

    /// Like [`add_component`](Self::add_component), constructing the value
    /// only once the slot is ready.
    pub fn emplace_component<T: Component>(&self, id: EntityId, make: impl FnOnce() -> T) {
        self.array_for_insert::<T>().emplace_with(id, make)
    }

    pub fn has_component<T: Component>(&self, id: EntityId) -> bool {
        self.array_by_type(TypeId::of::<T>())
            .map_or(false, |array| array.has::<T>(id))
    }

    /// Pinned shared access to the `T` component of entity `id`. While the
    /// guard lives, no writer moves or destroys the sector behind it.
    pub fn get_component<T: Component>(&self, id: EntityId) -> Option<Pinned<'_, T>> {
        self.array_by_type(TypeId::of::<T>())?.get(id)
    }

    /// Exclusive access without pinning.
    pub fn get_component_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let map = self.arrays.get_mut();
        let index = map.index_of(TypeId::of::<T>())?;
        map.list[index as usize].get_mut(id)
    }

    /// Destroys the `T` component of entity `id` in place; the sector
    /// stays. No-op for missing ids and unregistered types.
    pub fn destroy_component<T: Component>(&self, id: EntityId) {
        if let Some(array) = self.array_by_type(TypeId::of::<T>()) {
            array.destroy_member::<T>(id);
        }
    }

    /// Frees the id and destroys its sector in every array, in place;
    /// `defragment` reclaims the holes. Pinned victims go to the owning
    /// array's pending list.
    pub fn destroy_entity(&self, id: EntityId) {
        self.entities.write().erase(id);
        let map = self.arrays.read();
        for array in map.list.iter() {
            array.erase_sector(id, false);
        }
    }

    /// Batch destruction: per array the victims are erased under one write
    /// lock, waiting on pins for the first present victim; ids beyond an
    /// array's capacity are trimmed. The id set shrinks last.
    pub fn destroy_entities(&self, ids: &[EntityId]) {
        if ids.is_empty() {
            return;
        }
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        log::trace!("destroying {} entities", sorted.len());

        {
            let map = self.arrays.read();
            for array in map.list.iter() {
                array.erase_many(&sorted);
            }
        }
        let mut entities = self.entities.write();
        for &id in &sorted {
            entities.erase(id);
        }
    }

    // Views.

    /// Alive-filtered iteration driven by the query's first type.
    pub fn view<'a, Q: ViewQuery<'a>>(&'a self) -> View<'a, Q> {
        View::over(self, None)
    }

    /// Like [`view`](Self::view), restricted to the given entity id ranges.
    pub fn view_ranged<'a, Q: ViewQuery<'a>>(
        &'a self,
        id_ranges: &[Range<EntityId>],
    ) -> View<'a, Q> {
        View::over(self, Some(id_ranges))
    }

    // Maintenance.

    /// Maintenance tick: every array retries its pending erases, drains its
    /// retire bin and, when asked, defragments.
    pub fn update(&self, with_defragment: bool) {
        let map = self.arrays.read();
        for array in map.list.iter() {
            array.process_pending_erases(with_defragment);
        }
    }

    /// Compacts every array. Waits for each array's pins to drain.
    pub fn defragment(&self) {
        let map = self.arrays.read();
        for array in map.list.iter() {
            array.defragment();
        }
    }

    /// Destroys all entities and components. Registered arrays survive with
    /// their layouts.
    pub fn clear(&self) {
        self.entities.write().clear();
        let map = self.arrays.read();
        for array in map.list.iter() {
            array.clear();
        }
    }

    /// Count of registered arrays (grouped types share one).
    pub fn array_count(&self) -> usize {
        self.arrays.read().list.len()
    }

    pub(crate) fn array_by_type(&self, type_id: TypeId) -> Option<&SectorsArray> {
        let map = self.arrays.read();
        let index = map.index_of(type_id)?;
        let array: &SectorsArray = &map.list[index as usize];
        // Arrays are boxed and never removed for the registry's lifetime,
        // so the reference outlives the map guard.
        Some(unsafe { &*(array as *const SectorsArray) })
    }

    fn array_for_insert<T: Component>(&self) -> &SectorsArray {
        if let Some(array) = self.array_by_type(TypeId::of::<T>()) {
            return array;
        }
        self.register_infos(&[ComponentInfo::of::<T>()], ArrayConfig::default());
        self.array_by_type(TypeId::of::<T>())
            .expect("implicit registration just bound this type")
    }
}
