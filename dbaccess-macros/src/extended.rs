use proc_macro2::TokenStream;
use quote::quote;
use syn::ext::IdentExt;
use syn::DeriveInput;

use crate::{generic_argument, named_fields};

enum FieldRole {
    Base,
    Scalar { optional: bool },
    List,
}

struct ProjectionField {
    field: syn::Ident,
    alias: String,
    /// Entity type: the base, the joined entity, or the list element
    entity: syn::Type,
    role: FieldRole,
}

impl ProjectionField {
    fn parse(field: &syn::Field) -> syn::Result<Self> {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;

        let mut base = false;
        let mut list = false;
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("db")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("base") {
                    base = true;
                } else if meta.path.is_ident("list") {
                    list = true;
                } else {
                    return Err(meta.error("expected `base` or `list`"));
                }
                Ok(())
            })?;
        }

        let (entity, role) = match (base, list) {
            (true, true) => {
                return Err(syn::Error::new_spanned(
                    &ident,
                    "a field cannot be both `base` and `list`",
                ))
            }
            (true, false) => (field.ty.clone(), FieldRole::Base),
            (false, true) => {
                let element = generic_argument(&field.ty, "Vec").ok_or_else(|| {
                    syn::Error::new_spanned(&field.ty, "#[db(list)] fields must be `Vec<T>`")
                })?;
                (element.clone(), FieldRole::List)
            }
            (false, false) => {
                if generic_argument(&field.ty, "Vec").is_some() {
                    return Err(syn::Error::new_spanned(
                        &field.ty,
                        "list joins need #[db(list)]",
                    ));
                }
                match generic_argument(&field.ty, "Option") {
                    Some(inner) => (inner.clone(), FieldRole::Scalar { optional: true }),
                    None => (field.ty.clone(), FieldRole::Scalar { optional: false }),
                }
            }
        };

        Ok(Self {
            alias: ident.unraw().to_string(),
            field: ident,
            entity,
            role,
        })
    }
}

pub(crate) fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let fields = named_fields(&input)?
        .iter()
        .map(ProjectionField::parse)
        .collect::<syn::Result<Vec<_>>>()?;

    let mut bases = fields.iter().filter(|f| matches!(f.role, FieldRole::Base));
    let base = match (bases.next(), bases.next()) {
        (Some(base), None) => base,
        (Some(_), Some(second)) => {
            return Err(syn::Error::new_spanned(
                &second.field,
                "only one field can be #[db(base)]",
            ))
        }
        (None, _) => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "mark the base entity field with #[db(base)]",
            ))
        }
    };
    let base_ty = &base.entity;

    let scalar_joins = fields
        .iter()
        .filter(|f| matches!(f.role, FieldRole::Scalar { .. }))
        .map(|f| f.alias.as_str());
    let list_joins = fields
        .iter()
        .filter(|f| matches!(f.role, FieldRole::List))
        .map(|f| f.alias.as_str());

    let readers = fields.iter().map(|f| {
        let field = &f.field;
        let entity = &f.entity;
        match f.role {
            FieldRole::Base => quote! {
                #field: <#entity as ::dbaccess::orm::DbEntity>::from_row(row)?
            },
            FieldRole::Scalar { optional } => {
                let alias = &f.alias;
                let prefix = quote! {
                    ::std::format!("{}{}", #alias, ::dbaccess::orm::JOIN_COLUMN_SEPARATOR).as_str()
                };
                if optional {
                    quote! {
                        #field: <#entity as ::dbaccess::orm::DbEntity>::try_from_row_prefixed(row, #prefix)?
                    }
                } else {
                    quote! {
                        #field: <#entity as ::dbaccess::orm::DbEntity>::from_row_prefixed(row, #prefix)?
                    }
                }
            }
            FieldRole::List => {
                let alias = &f.alias;
                quote! {
                    #field: ::dbaccess::orm::decode_list::<#entity>(row, #alias)?
                }
            }
        }
    });

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::dbaccess::orm::ExtendedEntity for #ident #ty_generics #where_clause {
            type Base = #base_ty;

            const SCALAR_JOINS: &'static [&'static str] = &[#(#scalar_joins),*];
            const LIST_JOINS: &'static [&'static str] = &[#(#list_joins),*];

            fn from_row(
                row: &::dbaccess::__private::sqlx::postgres::PgRow,
            ) -> ::core::result::Result<Self, ::dbaccess::__private::sqlx::Error> {
                ::core::result::Result::Ok(Self {
                    #(#readers),*
                })
            }
        }
    })
}
