//! Derive macros for pgtrigger
//!
//! Provides `#[derive(Entity)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod entity;

/// Derive the `Entity` descriptor for a struct.
///
/// # Example
///
/// ```ignore
/// use pgtrigger::Entity;
///
/// #[derive(Entity)]
/// #[entity(app = "library", table = "library_book")]
/// struct Book {
///     #[entity(id)]
///     id: i64,
///     title: String,
///     #[entity(fk)]
///     author: i64,
///     #[entity(auto)]
///     updated_at: String,
/// }
/// ```
///
/// # Attributes
///
/// Struct level:
/// - `table = "name"` - table name (default: snake_case struct name)
/// - `app = "name"` - label prefix, giving URIs like `library.Book:protect`
/// - `database = "alias"` - pin the entity to a database alias
///
/// Field level:
/// - `id` - primary key (default: a field named `id`)
/// - `column = "name"` - column name (default: the field name, `{field}_id` for `fk`)
/// - `fk` - foreign key; `df`/`ndf` lookups compare its key column
/// - `auto` - maintained on every write; dropped by `Change::exclude_auto`
/// - `skip` - not a database field
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    entity::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
