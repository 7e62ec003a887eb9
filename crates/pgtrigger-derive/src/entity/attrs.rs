//! Attribute parsing for the Entity derive macro.

use syn::{DeriveInput, LitStr, Result};

/// Struct-level `#[entity(...)]` options.
#[derive(Default)]
pub(super) struct EntityAttrs {
    pub table: Option<String>,
    pub app: Option<String>,
    pub database: Option<String>,
}

/// Field-level `#[entity(...)]` options.
#[derive(Default)]
pub(super) struct FieldAttrs {
    pub is_id: bool,
    pub column: Option<String>,
    pub is_fk: bool,
    pub is_auto: bool,
    pub skip: bool,
}

pub(super) fn parse_entity_attrs(input: &DeriveInput) -> Result<EntityAttrs> {
    let mut out = EntityAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let slot = if meta.path.is_ident("table") {
                &mut out.table
            } else if meta.path.is_ident("app") {
                &mut out.app
            } else if meta.path.is_ident("database") {
                &mut out.database
            } else {
                return Err(meta.error("expected `table`, `app` or `database`"));
            };
            let value: LitStr = meta.value()?.parse()?;
            if value.value().is_empty() {
                return Err(syn::Error::new_spanned(&value, "value must not be empty"));
            }
            *slot = Some(value.value());
            Ok(())
        })?;
    }
    Ok(out)
}

pub(super) fn parse_field_attrs(field: &syn::Field) -> Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                out.is_id = true;
            } else if meta.path.is_ident("fk") {
                out.is_fk = true;
            } else if meta.path.is_ident("auto") {
                out.is_auto = true;
            } else if meta.path.is_ident("skip") {
                out.skip = true;
            } else if meta.path.is_ident("column") {
                let value: LitStr = meta.value()?.parse()?;
                out.column = Some(value.value());
            } else {
                return Err(meta.error("expected `id`, `column`, `fk`, `auto` or `skip`"));
            }
            Ok(())
        })?;
    }
    if out.skip && (out.is_id || out.is_fk || out.is_auto || out.column.is_some()) {
        return Err(syn::Error::new_spanned(
            field,
            "`skip` cannot be combined with other entity attributes",
        ));
    }
    Ok(out)
}
