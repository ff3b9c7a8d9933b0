mod hash;
mod sync;

pub(crate) use self::{hash::*, sync::*};
