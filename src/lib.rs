//!
//! Sector-packed ECS storage: fixed-stride slots in chunks, an id-sorted
//! dense prefix with O(1) sparse lookup, grouped component layouts and,
//! behind the `parallel` feature, concurrent access through a pin/retire
//! discipline instead of coarse locking.
//!

mod array;
mod component;
mod entity;
mod group;
mod layout;
mod pin;
mod registry;
mod retire;
mod sector;
mod storage;
mod util;
mod view;

#[doc(hidden)]
pub use self::view::ViewCore;

pub use self::{
    array::{ArrayConfig, SectorsArray},
    component::{component_id, Component, ComponentId, ComponentInfo},
    entity::{EntityId, EntityRanges, INVALID_ID},
    group::ComponentGroup,
    layout::{SectorLayout, MAX_COMPONENTS},
    pin::{Pinned, PinnedSector},
    registry::Registry,
    retire::RetireBin,
    sector::Sector,
    storage::DEFAULT_CHUNK_CAPACITY,
    view::{View, ViewQuery},
};
