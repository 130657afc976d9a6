//! Derive macros for sqlweave
//!
//! Provides `#[derive(Entity)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod attrs;
mod common;
mod entity;

/// Derive `Reflect` and `Payload` for a struct with named fields.
///
/// # Example
///
/// ```ignore
/// use sqlweave::Entity;
///
/// #[derive(Entity)]
/// #[orm(table = "orders", rename_all = "snake_case")]
/// struct Order {
///     #[orm(id, auto_increment)]
///     id: i64,
///     customer_id: i64,
///     total: f64,
///     #[orm(navigation = "Customer", foreign_key = "customer_id")]
///     customer: Option<Customer>,
///     #[orm(ignore)]
///     cached_label: String,
/// }
/// ```
///
/// # Struct attributes
///
/// - `#[orm(table = "name")]` - Table name (defaults to the entity name)
/// - `#[orm(schema = "name")]` - Schema qualifier
/// - `#[orm(name = "Name")]` - Catalog name (defaults to the struct name)
/// - `#[orm(rename_all = "snake_case")]` - Derive column names from field names;
///   one of `snake_case`, `camelCase`, `PascalCase`, `SCREAMING_SNAKE_CASE`, `kebab-case`
///
/// # Field attributes
///
/// - `#[orm(id)]` / `#[orm(key)]` - Part of the entity key
/// - `#[orm(auto_increment)]` - Value is generated by the database
/// - `#[orm(ignore)]` - Not mapped to a column
/// - `#[orm(column = "name")]` - Column name override
/// - `#[orm(navigation = "Target", foreign_key = "member")]` - Relationship to
///   another entity; a `Vec<_>` field is a to-many relationship
///
/// Mapped fields must implement `sqlweave::value::SqlType`.
#[proc_macro_derive(Entity, attributes(orm))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    entity::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
