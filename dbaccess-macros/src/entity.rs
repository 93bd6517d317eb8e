use convert_case::{Case, Casing};
use proc_macro2::TokenStream;
use quote::quote;
use syn::ext::IdentExt;
use syn::{DeriveInput, LitStr};

use crate::named_fields;

#[derive(Default)]
struct EntityAttrs {
    table: Option<String>,
    schema: Option<String>,
    translated: bool,
    audited: bool,
}

impl EntityAttrs {
    fn parse(input: &DeriveInput) -> syn::Result<Self> {
        let mut attrs = Self::default();
        for attr in input.attrs.iter().filter(|a| a.path().is_ident("db_entity")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("table") {
                    attrs.table = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("schema") {
                    attrs.schema = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("translated") {
                    attrs.translated = true;
                } else if meta.path.is_ident("audited") {
                    attrs.audited = true;
                } else {
                    return Err(meta.error("expected `table`, `schema`, `translated` or `audited`"));
                }
                Ok(())
            })?;
        }
        Ok(attrs)
    }
}

struct Column {
    field: syn::Ident,
    ty: syn::Type,
    name: String,
    primary_key: bool,
    skip: bool,
}

impl Column {
    fn parse(field: &syn::Field) -> syn::Result<Self> {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let mut column = Self {
            name: ident.unraw().to_string(),
            field: ident,
            ty: field.ty.clone(),
            primary_key: false,
            skip: false,
        };

        for attr in field.attrs.iter().filter(|a| a.path().is_ident("db")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("primary_key") {
                    column.primary_key = true;
                } else if meta.path.is_ident("rename") {
                    column.name = meta.value()?.parse::<LitStr>()?.value();
                } else if meta.path.is_ident("skip") {
                    column.skip = true;
                } else {
                    return Err(meta.error("expected `primary_key`, `rename` or `skip`"));
                }
                Ok(())
            })?;
        }
        Ok(column)
    }
}

pub(crate) fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let attrs = EntityAttrs::parse(&input)?;
    let fields = named_fields(&input)?;

    let columns = fields
        .iter()
        .map(Column::parse)
        .collect::<syn::Result<Vec<_>>>()?;

    let mut keys = columns.iter().filter(|c| c.primary_key && !c.skip);
    let primary_key = match (keys.next(), keys.next()) {
        (Some(key), None) => key,
        (Some(_), Some(second)) => {
            return Err(syn::Error::new_spanned(
                &second.field,
                "only one field can be the primary key",
            ))
        }
        (None, _) => columns
            .iter()
            .find(|c| c.name == "id" && !c.skip)
            .ok_or_else(|| {
                syn::Error::new_spanned(
                    &input.ident,
                    "no primary key: add a field named `id` or mark one with #[db(primary_key)]",
                )
            })?,
    };

    let ident = &input.ident;
    let type_name = ident.unraw().to_string();
    let table = attrs
        .table
        .clone()
        .unwrap_or_else(|| type_name.to_case(Case::Flat));
    let foreign_key = format!("{}_id", type_name.to_case(Case::Snake));
    let schema = match &attrs.schema {
        Some(s) => quote! { ::core::option::Option::Some(#s) },
        None => quote! { ::core::option::Option::None },
    };
    let translated = attrs.translated;
    let audited = attrs.audited;
    let pk_name = &primary_key.name;
    let pk_field = &primary_key.field;

    let stored: Vec<&Column> = columns.iter().filter(|c| !c.skip).collect();

    let column_defs = stored.iter().map(|c| {
        let name = &c.name;
        let ty = &c.ty;
        let is_pk = c.field == primary_key.field;
        quote! {
            ::dbaccess::orm::ColumnDef {
                name: #name,
                kind: <#ty as ::dbaccess::orm::SqlType>::KIND,
                nullable: <#ty as ::dbaccess::orm::SqlType>::NULLABLE,
                is_primary_key: #is_pk,
            }
        }
    });

    let values = stored.iter().map(|c| {
        let name = &c.name;
        let field = &c.field;
        quote! {
            (#name, ::dbaccess::orm::SqlValue::from(::core::clone::Clone::clone(&self.#field)))
        }
    });

    let readers = columns.iter().map(|c| {
        let field = &c.field;
        if c.skip {
            return quote! { #field: ::core::default::Default::default() };
        }
        let name = &c.name;
        quote! {
            #field: ::dbaccess::__private::sqlx::Row::try_get(
                row,
                ::std::format!("{}{}", prefix, #name).as_str(),
            )?
        }
    });

    let json_readers = columns.iter().map(|c| {
        let field = &c.field;
        if c.skip {
            return quote! { #field: ::core::default::Default::default() };
        }
        let name = &c.name;
        let ty = &c.ty;
        quote! {
            #field: ::dbaccess::__private::serde_json::from_value::<#ty>(
                object
                    .get(#name)
                    .cloned()
                    .unwrap_or(::dbaccess::__private::serde_json::Value::Null),
            )
            .map_err(|e| ::dbaccess::__private::sqlx::Error::ColumnDecode {
                index: ::std::string::String::from(#name),
                source: ::std::boxed::Box::new(e),
            })?
        }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::dbaccess::orm::DbEntity for #ident #ty_generics #where_clause {
            const NAME: &'static str = #type_name;
            const TABLE: &'static str = #table;
            const SCHEMA: ::core::option::Option<&'static str> = #schema;
            const PRIMARY_KEY: &'static str = #pk_name;
            const FOREIGN_KEY: &'static str = #foreign_key;
            const TRANSLATED: bool = #translated;
            const AUDITED: bool = #audited;

            fn columns() -> &'static [::dbaccess::orm::ColumnDef] {
                const COLUMNS: &[::dbaccess::orm::ColumnDef] = &[#(#column_defs),*];
                COLUMNS
            }

            fn id(&self) -> ::dbaccess::__private::uuid::Uuid {
                self.#pk_field
            }

            fn values(&self) -> ::std::vec::Vec<(&'static str, ::dbaccess::orm::SqlValue)> {
                ::std::vec![#(#values),*]
            }

            fn from_json(
                object: &::dbaccess::__private::serde_json::Map<
                    ::std::string::String,
                    ::dbaccess::__private::serde_json::Value,
                >,
            ) -> ::core::result::Result<Self, ::dbaccess::__private::sqlx::Error> {
                ::core::result::Result::Ok(Self {
                    #(#json_readers),*
                })
            }

            fn from_row_prefixed(
                row: &::dbaccess::__private::sqlx::postgres::PgRow,
                prefix: &str,
            ) -> ::core::result::Result<Self, ::dbaccess::__private::sqlx::Error> {
                ::core::result::Result::Ok(Self {
                    #(#readers),*
                })
            }
        }
    })
}
