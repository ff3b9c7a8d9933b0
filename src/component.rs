use {
    crate::util::NoOpHasher,
    lazy_static::lazy_static,
    std::{
        alloc::Layout,
        any::{type_name, TypeId},
        collections::HashMap,
        hash::BuildHasherDefault,
        mem,
        sync::{Mutex, PoisonError},
    },
};

/// Marker for types storable as sector components.
pub trait Component: Send + Sync + 'static {}

impl<T> Component for T where T: Send + Sync + 'static {}

/// Dense process-local component identifier.
///
/// Assigned from a monotonic counter the first time a type is observed.
/// Only stable within one process; never persist it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(u32);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

lazy_static! {
    static ref COMPONENT_IDS: Mutex<HashMap<TypeId, u32, BuildHasherDefault<NoOpHasher>>> =
        Mutex::new(HashMap::default());
}

/// Returns the dense id of component type `T`, assigning one on first use.
pub fn component_id<T: Component>() -> ComponentId {
    component_id_of(TypeId::of::<T>())
}

pub(crate) fn component_id_of(type_id: TypeId) -> ComponentId {
    let mut map = COMPONENT_IDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let next = map.len() as u32;
    ComponentId(*map.entry(type_id).or_insert(next))
}

/// Type-erased description of one component type.
///
/// Relocation is a bitwise move for every Rust type, so the only thunk a
/// sector layout needs is `drop_in_place`.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    type_id: TypeId,
    layout: Layout,
    name: &'static str,
    needs_drop: bool,
    drop_in_place: unsafe fn(*mut u8),
}

impl ComponentInfo {
    pub fn of<T: Component>() -> Self {
        ComponentInfo {
            type_id: TypeId::of::<T>(),
            layout: Layout::new::<T>(),
            name: type_name::<T>(),
            needs_drop: mem::needs_drop::<T>(),
            drop_in_place: erased_drop_in_place::<T>,
        }
    }

    pub fn is<T: Component>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn needs_drop(&self) -> bool {
        self.needs_drop
    }

    pub(crate) fn drop_in_place(&self) -> unsafe fn(*mut u8) {
        self.drop_in_place
    }
}

unsafe fn erased_drop_in_place<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_stable() {
        let a = component_id::<u8>();
        let b = component_id::<u16>();
        assert_ne!(a, b);
        assert_eq!(a, component_id::<u8>());
        assert_eq!(b, component_id::<u16>());
    }

    #[test]
    fn info_reports_drop_glue() {
        assert!(!ComponentInfo::of::<u64>().needs_drop());
        assert!(ComponentInfo::of::<String>().needs_drop());
    }
}
