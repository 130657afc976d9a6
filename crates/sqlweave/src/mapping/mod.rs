//! Entity mapping catalog: entity ↔ table and member ↔ column metadata.

mod catalog;
mod converter;
mod entity;
mod member;
mod reflect;

pub use catalog::{Catalog, PayloadMapping};
pub use converter::{EnumOrdinal, JsonText, ValueConverter};
pub use entity::{EntityMap, EntityMapBuilder};
pub use member::{MemberMap, Navigation, NavigationKind};
pub use reflect::{MemberHints, MemberInfo, Payload, Reflect};
