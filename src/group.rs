use crate::component::{Component, ComponentInfo};

/// Set of component types sharing one sectors array.
///
/// Implemented for tuples of up to eight component types. Declaration order
/// is preserved: it fixes each component's payload offset and alive bit.
pub trait ComponentGroup: 'static {
    type Infos: AsRef<[ComponentInfo]>;

    fn infos() -> Self::Infos;
}

macro_rules! count_types {
    () => { 0 };
    ($head:ident $(, $tail:ident)*) => { 1 + count_types!($($tail),*) };
}

macro_rules! tuple_groups {
    ($($a:ident),*) => {
        impl<$($a),*> ComponentGroup for ($($a,)*)
        where
            $($a: Component,)*
        {
            type Infos = [ComponentInfo; count_types!($($a),*)];

            fn infos() -> Self::Infos {
                [$(ComponentInfo::of::<$a>()),*]
            }
        }
    };
}

tuple_groups!(A);
tuple_groups!(A, B);
tuple_groups!(A, B, C);
tuple_groups!(A, B, C, D);
tuple_groups!(A, B, C, D, E);
tuple_groups!(A, B, C, D, E, F);
tuple_groups!(A, B, C, D, E, F, G);
tuple_groups!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_order_is_preserved() {
        let infos = <(u32, String, u8)>::infos();
        assert!(infos[0].is::<u32>());
        assert!(infos[1].is::<String>());
        assert!(infos[2].is::<u8>());
    }
}
