//! Procedural macros for dbaccess
//!
//! - `#[derive(DbEntity)]` - table metadata and row mapping for an entity
//! - `#[derive(DbExtended)]` - projection of a base entity plus its joins

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod entity;
mod extended;

/// Implement `dbaccess::orm::DbEntity` for a struct with named fields.
///
/// # Usage
///
/// ```ignore
/// #[derive(DbEntity)]
/// #[db_entity(table = "role", translated, audited)]
/// pub struct Role {
///     pub id: Uuid,
///     pub name: String,
///     pub code: String,
///     pub provider_id: Option<Uuid>,
/// }
/// ```
///
/// # Struct attributes (`#[db_entity(...)]`)
///
/// - `table = "..."` - table name, defaults to the lowercased type name
/// - `schema = "..."` - schema override, defaults to the configured base schema
/// - `translated` - a translation table with the same key exists
/// - `audited` - audit triggers and history tables exist
///
/// # Field attributes (`#[db(...)]`)
///
/// - `primary_key` - marks the key column, defaults to the field named `id`
/// - `rename = "..."` - column name when it differs from the field name
/// - `skip` - not a column; filled with `Default::default()` when reading
///
/// Field types must implement `dbaccess::orm::SqlType` and `serde::Deserialize`
/// (list joins decode elements from JSON objects keyed by column name).
#[proc_macro_derive(DbEntity, attributes(db_entity, db))]
pub fn derive_db_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    entity::expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Implement `dbaccess::orm::ExtendedEntity` for a projection struct.
///
/// # Usage
///
/// ```ignore
/// #[derive(DbExtended)]
/// pub struct AreaExtended {
///     #[db(base)]
///     pub area: Area,
///     pub group: Option<AreaGroup>,
///     #[db(list)]
///     pub packages: Vec<Package>,
/// }
/// ```
///
/// Exactly one field carries `#[db(base)]`. Every other field is a join,
/// named after the join alias:
///
/// - `Option<J>` - optional scalar join, `None` when nothing matched
/// - `J` - required scalar join
/// - `#[db(list)] Vec<J>` - list join decoded from a JSON array
#[proc_macro_derive(DbExtended, attributes(db))]
pub fn derive_db_extended(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    extended::expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Named fields of a struct, or an error pointing at the input.
fn named_fields(
    input: &DeriveInput,
) -> syn::Result<&syn::punctuated::Punctuated<syn::Field, syn::Token![,]>> {
    match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(fields) => Ok(&fields.named),
            _ => Err(syn::Error::new_spanned(
                &input.ident,
                "only structs with named fields are supported",
            )),
        },
        _ => Err(syn::Error::new_spanned(
            &input.ident,
            "only structs are supported",
        )),
    }
}

/// The `T` of `Wrapper<T>` when `ty` is a path ending in `wrapper`.
fn generic_argument<'a>(ty: &'a syn::Type, wrapper: &str) -> Option<&'a syn::Type> {
    let syn::Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) if args.args.len() == 1 => Some(inner),
        _ => None,
    }
}
