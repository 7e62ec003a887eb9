//! Entity derive macro implementation

mod attrs;

use attrs::{parse_entity_attrs, parse_field_attrs};
use heck::ToSnakeCase;
use proc_macro2::TokenStream;
use quote::quote;
use syn::ext::IdentExt;
use syn::{Data, DeriveInput, Fields, Result};

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let struct_name = name.unraw().to_string();
    let entity_attrs = parse_entity_attrs(&input)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Entity can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Entity can only be derived for structs",
            ));
        }
    };

    let table = entity_attrs
        .table
        .unwrap_or_else(|| struct_name.to_snake_case());
    let label = match &entity_attrs.app {
        Some(app) => format!("{app}.{struct_name}"),
        None => struct_name.clone(),
    };

    let mut primary_key: Option<String> = None;
    let mut field_exprs = Vec::new();

    for field in fields {
        let attrs = parse_field_attrs(field)?;
        if attrs.skip {
            continue;
        }
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let field_name = ident.unraw().to_string();
        let column = attrs.column.clone().unwrap_or_else(|| {
            if attrs.is_fk {
                format!("{field_name}_id")
            } else {
                field_name.clone()
            }
        });

        if attrs.is_id {
            if primary_key.is_some() {
                return Err(syn::Error::new_spanned(
                    field,
                    "Entity allows only one #[entity(id)] field",
                ));
            }
            primary_key = Some(column.clone());
        }

        let ctor = if attrs.is_fk {
            quote! { ::pgtrigger::FieldMeta::foreign_key(#field_name) }
        } else {
            quote! { ::pgtrigger::FieldMeta::new(#field_name) }
        };
        let auto = attrs.is_auto.then(|| quote! { .auto() });
        field_exprs.push(quote! {
            .field(#ctor.column(#column) #auto)
        });
    }

    let primary_key = primary_key.unwrap_or_else(|| "id".to_string());
    let database = entity_attrs
        .database
        .as_ref()
        .map(|db| quote! { .database(#db) });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::pgtrigger::Entity for #name #ty_generics #where_clause {
            fn meta() -> ::pgtrigger::EntityMeta {
                ::pgtrigger::EntityMeta::new(#label, #table)
                    .primary_key(#primary_key)
                    #(#field_exprs)*
                    #database
            }
        }
    })
}
