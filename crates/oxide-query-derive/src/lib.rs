//! Derive macro mapping Rust structs onto query entities.
//!
//! This crate provides the `#[derive(Entity)]` macro, which implements
//! `oxide_query_core::entity::Entity` and `FieldValue` for a struct so that
//! it can be registered as a mapping and read back from query results.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Expr, Fields, Ident, Lit, Meta, Type};

/// Derives `Entity` and `FieldValue` for a struct with named fields.
///
/// # Attributes
///
/// - `#[entity(name = "Name")]` - Logical entity name (optional, defaults to
///   the struct name)
/// - `#[entity(table = "table_name")]` - Table name (optional, defaults to
///   snake_case of the struct name)
///
/// # Field Attributes
///
/// - `#[column(primary_key)]` - Part of the primary key
/// - `#[column(generated)]` - Assigned by the database on insert
/// - `#[column(read_only)]` - Never written by updates
/// - `#[column(name = "column_name")]` - Column name (optional, defaults to
///   the field name)
/// - `#[association(related = "Entity", keys = "a, b", related_keys = "c, d")]`
///   - A relationship to another entity; add `many` for a collection
///
/// Member names are the field names.
#[proc_macro_derive(Entity, attributes(entity, column, association))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_entity_impl(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn derive_entity_impl(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let entity_attrs = parse_entity_attrs(&input.attrs, struct_name)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Entity derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Entity derive only supports structs",
            ));
        }
    };

    let mut members: Vec<MemberInfo> = Vec::new();
    for field in fields {
        let Some(field_name) = field.ident.clone() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };
        let kind = match parse_association_attrs(&field.attrs)? {
            Some(association) => MemberKind::Association(association),
            None => MemberKind::Column(parse_column_attrs(&field.attrs)?),
        };
        members.push(MemberInfo {
            field_name,
            field_type: field.ty.clone(),
            kind,
        });
    }

    if !members
        .iter()
        .any(|m| matches!(&m.kind, MemberKind::Column(c) if c.primary_key))
    {
        return Err(syn::Error::new_spanned(
            &input,
            "Entity derive needs at least one #[column(primary_key)] field",
        ));
    }

    let entity_name = &entity_attrs.name;
    let table_name = &entity_attrs.table;

    let member_defs: Vec<TokenStream2> = members
        .iter()
        .map(|m| {
            let member_name = m.field_name.to_string();
            let field_type = &m.field_type;
            match &m.kind {
                MemberKind::Column(c) => {
                    let column_name = c.name.clone().unwrap_or_else(|| member_name.clone());
                    let primary_key = c.primary_key.then(|| quote! { .primary_key() });
                    let generated = c.generated.then(|| quote! { .generated() });
                    let read_only = c.read_only.then(|| quote! { .read_only() });
                    quote! {
                        .member(
                            ::oxide_query_core::mapping::MemberDef::column(
                                #member_name,
                                <#field_type as ::oxide_query_core::entity::FieldValue>::field_type(),
                            )
                            .named(#column_name)
                            #primary_key
                            #generated
                            #read_only
                        )
                    }
                }
                MemberKind::Association(a) => {
                    let related = &a.related;
                    let keys = &a.keys;
                    let related_keys = &a.related_keys;
                    let many = a.many;
                    quote! {
                        .member(::oxide_query_core::mapping::MemberDef::association(
                            #member_name,
                            #related,
                            &[#(#keys),*],
                            &[#(#related_keys),*],
                            #many,
                        ))
                    }
                }
            }
        })
        .collect();

    let to_fields: Vec<TokenStream2> = members
        .iter()
        .map(|m| {
            let member_name = m.field_name.to_string();
            let field_name = &m.field_name;
            quote! {
                .with(
                    #member_name,
                    ::oxide_query_core::entity::FieldValue::to_value(&self.#field_name),
                )
            }
        })
        .collect();

    let from_fields: Vec<TokenStream2> = members
        .iter()
        .map(|m| {
            let member_name = m.field_name.to_string();
            let field_name = &m.field_name;
            quote! {
                #field_name: ::oxide_query_core::entity::read_field(object, #member_name)?
            }
        })
        .collect();

    let expanded = quote! {
        impl ::oxide_query_core::entity::Entity for #struct_name {
            const NAME: &'static str = #entity_name;

            fn entity_def() -> ::oxide_query_core::mapping::EntityDef {
                ::oxide_query_core::mapping::EntityDef::new(#entity_name, #table_name)
                    #(#member_defs)*
            }

            fn to_object(&self) -> ::oxide_query_core::value::Object {
                ::oxide_query_core::value::Object::new(#entity_name)
                    #(#to_fields)*
            }

            fn from_object(
                object: &::oxide_query_core::value::Object,
            ) -> ::oxide_query_core::error::Result<Self> {
                Ok(Self {
                    #(#from_fields),*
                })
            }
        }

        impl ::oxide_query_core::entity::FieldValue for #struct_name {
            fn field_type() -> ::oxide_query_core::ast::Type {
                ::oxide_query_core::ast::Type::Entity(#entity_name.to_string())
            }

            fn to_value(&self) -> ::oxide_query_core::value::Value {
                ::oxide_query_core::value::Value::Object(
                    ::oxide_query_core::entity::Entity::to_object(self),
                )
            }

            fn from_value(
                value: &::oxide_query_core::value::Value,
            ) -> ::oxide_query_core::error::Result<Self> {
                ::oxide_query_core::entity::entity_from_value(value)
            }
        }
    };

    Ok(expanded)
}

struct MemberInfo {
    field_name: Ident,
    field_type: Type,
    kind: MemberKind,
}

enum MemberKind {
    Column(ColumnAttrs),
    Association(AssociationAttrs),
}

struct EntityAttrs {
    name: String,
    table: String,
}

#[derive(Default)]
struct ColumnAttrs {
    name: Option<String>,
    primary_key: bool,
    generated: bool,
    read_only: bool,
}

struct AssociationAttrs {
    related: String,
    keys: Vec<String>,
    related_keys: Vec<String>,
    many: bool,
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<String> {
    let value: Expr = meta.value()?.parse()?;
    if let Expr::Lit(lit) = &value {
        if let Lit::Str(s) = &lit.lit {
            return Ok(s.value());
        }
    }
    Err(syn::Error::new_spanned(value, "expected a string literal"))
}

fn key_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_entity_attrs(attrs: &[Attribute], struct_name: &Ident) -> syn::Result<EntityAttrs> {
    let mut name = None;
    let mut table = None;
    for attr in attrs {
        if attr.path().is_ident("entity") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    name = Some(string_value(&meta)?);
                } else if meta.path.is_ident("table") {
                    table = Some(string_value(&meta)?);
                } else {
                    return Err(meta.error("unknown entity attribute"));
                }
                Ok(())
            })?;
        }
    }
    Ok(EntityAttrs {
        name: name.unwrap_or_else(|| struct_name.to_string()),
        // Default to snake_case of struct name
        table: table.unwrap_or_else(|| to_snake_case(&struct_name.to_string())),
    })
}

fn parse_column_attrs(attrs: &[Attribute]) -> syn::Result<ColumnAttrs> {
    let mut result = ColumnAttrs::default();

    for attr in attrs {
        if attr.path().is_ident("column") {
            // Handle empty attribute like #[column]
            if matches!(attr.meta, Meta::Path(_)) {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("primary_key") {
                    result.primary_key = true;
                } else if meta.path.is_ident("generated") {
                    result.generated = true;
                } else if meta.path.is_ident("read_only") {
                    result.read_only = true;
                } else if meta.path.is_ident("name") {
                    result.name = Some(string_value(&meta)?);
                } else {
                    return Err(meta.error("unknown column attribute"));
                }
                Ok(())
            })?;
        }
    }

    Ok(result)
}

fn parse_association_attrs(attrs: &[Attribute]) -> syn::Result<Option<AssociationAttrs>> {
    let Some(attr) = attrs.iter().find(|a| a.path().is_ident("association")) else {
        return Ok(None);
    };
    let mut related = None;
    let mut keys = Vec::new();
    let mut related_keys = Vec::new();
    let mut many = false;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("related") {
            related = Some(string_value(&meta)?);
        } else if meta.path.is_ident("keys") {
            keys = key_list(&string_value(&meta)?);
        } else if meta.path.is_ident("related_keys") {
            related_keys = key_list(&string_value(&meta)?);
        } else if meta.path.is_ident("many") {
            many = true;
        } else {
            return Err(meta.error("unknown association attribute"));
        }
        Ok(())
    })?;
    let Some(related) = related else {
        return Err(syn::Error::new_spanned(attr, "association needs `related = \"Entity\"`"));
    };
    if keys.is_empty() || keys.len() != related_keys.len() {
        return Err(syn::Error::new_spanned(
            attr,
            "association needs `keys` and `related_keys` of the same length",
        ));
    }
    Ok(Some(AssociationAttrs {
        related,
        keys,
        related_keys,
        many,
    }))
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
