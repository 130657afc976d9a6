//! `#[derive(Entity)]`: reflect a struct's members and expose its values.

use crate::attrs::{EntityAttrs, FieldAttrs};
use crate::common::syn_types::{option_inner, vec_inner};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Result};

fn opt_str(value: Option<&str>) -> TokenStream {
    match value {
        Some(v) => quote! { ::std::option::Option::Some(#v) },
        None => quote! { ::std::option::Option::None },
    }
}

fn opt_string(value: Option<&str>) -> TokenStream {
    match value {
        Some(v) => quote! { ::std::option::Option::Some(::std::string::String::from(#v)) },
        None => quote! { ::std::option::Option::None },
    }
}

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let ident = &input.ident;
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

    let entity = EntityAttrs::from_attrs(&input.attrs)?;
    let type_name = entity.name.clone().unwrap_or_else(|| ident.to_string());
    let table_name = opt_str(entity.table.as_deref());
    let schema_name = opt_str(entity.schema.as_deref());

    let mut member_infos = Vec::new();
    let mut payload_names = Vec::new();
    let mut value_arms = Vec::new();

    for field in fields {
        let Some(field_ident) = field.ident.as_ref() else {
            continue;
        };
        let attrs = FieldAttrs::from_attrs(&field.attrs)?;
        let name = field_ident.to_string();
        let name = name.strip_prefix("r#").unwrap_or(&name).to_string();
        let ty = &field.ty;

        let column = attrs
            .column
            .clone()
            .or_else(|| entity.rename_all.map(|rule| rule.apply(&name)));
        let column = opt_string(column.as_deref());
        let key = attrs.key;
        let auto_increment = attrs.auto_increment;
        let ignore = attrs.ignore;

        let info = if let Some(target) = &attrs.navigation {
            let to_many = vec_inner(ty).is_some();
            let foreign_key = opt_string(attrs.foreign_key.as_deref());
            let value_type = if to_many {
                quote! {
                    ::sqlweave::value::ValueType::Array(::std::boxed::Box::new(
                        ::sqlweave::value::ValueType::Object(::std::string::String::from(#target)),
                    ))
                }
            } else {
                quote! { ::sqlweave::value::ValueType::Object(::std::string::String::from(#target)) }
            };
            let nullable = option_inner(ty).is_some();
            quote! {
                ::sqlweave::mapping::MemberInfo {
                    name: ::std::string::String::from(#name),
                    value_type: #value_type,
                    nullable: #nullable,
                    is_enum: false,
                    hints: ::sqlweave::mapping::MemberHints {
                        key: false,
                        auto_increment: false,
                        ignore: #ignore,
                        column: #column,
                        navigation: ::std::option::Option::Some(::std::string::String::from(#target)),
                        to_many: #to_many,
                        foreign_key: #foreign_key,
                    },
                }
            }
        } else if ignore {
            quote! {
                ::sqlweave::mapping::MemberInfo {
                    name: ::std::string::String::from(#name),
                    value_type: ::sqlweave::value::ValueType::Unknown,
                    nullable: true,
                    is_enum: false,
                    hints: ::sqlweave::mapping::MemberHints {
                        ignore: true,
                        ..::std::default::Default::default()
                    },
                }
            }
        } else {
            payload_names.push(name.clone());
            value_arms.push(quote! {
                #name => ::std::option::Option::Some(
                    <#ty as ::sqlweave::value::SqlType>::to_value(&self.#field_ident)
                ),
            });
            quote! {
                ::sqlweave::mapping::MemberInfo {
                    name: ::std::string::String::from(#name),
                    value_type: <#ty as ::sqlweave::value::SqlType>::value_type(),
                    nullable: <#ty as ::sqlweave::value::SqlType>::nullable(),
                    is_enum: <#ty as ::sqlweave::value::SqlType>::is_enum(),
                    hints: ::sqlweave::mapping::MemberHints {
                        key: #key,
                        auto_increment: #auto_increment,
                        ignore: false,
                        column: #column,
                        navigation: ::std::option::Option::None,
                        to_many: false,
                        foreign_key: ::std::option::Option::None,
                    },
                }
            }
        };
        member_infos.push(info);
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::sqlweave::mapping::Reflect for #ident #ty_generics #where_clause {
            fn type_name() -> &'static str {
                #type_name
            }

            fn table_name() -> ::std::option::Option<&'static str> {
                #table_name
            }

            fn schema_name() -> ::std::option::Option<&'static str> {
                #schema_name
            }

            fn members() -> ::std::vec::Vec<::sqlweave::mapping::MemberInfo> {
                ::std::vec![#(#member_infos),*]
            }
        }

        impl #impl_generics ::sqlweave::mapping::Payload for #ident #ty_generics #where_clause {
            fn member_names(&self) -> ::std::vec::Vec<::std::string::String> {
                ::std::vec![#(::std::string::String::from(#payload_names)),*]
            }

            fn value(&self, member: &str) -> ::std::option::Option<::sqlweave::value::Value> {
                match member {
                    #(#value_arms)*
                    _ => ::std::option::Option::None,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_expand_reflects_members() {
        let input: DeriveInput = parse_quote! {
            #[orm(table = "orders")]
            struct Order {
                #[orm(id, auto_increment)]
                id: i64,
                total: f64,
                #[orm(navigation = "OrderLine", foreign_key = "order_id")]
                lines: Vec<OrderLine>,
                #[orm(ignore)]
                label: String,
            }
        };
        let out = expand(input).unwrap().to_string();
        assert!(out.contains("Reflect for Order"));
        assert!(out.contains("Payload for Order"));
        assert!(out.contains("\"OrderLine\""));
    }

    #[test]
    fn test_tuple_struct_is_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Pair(i64, i64);
        };
        assert!(expand(input).is_err());
    }

    #[test]
    fn test_enum_is_rejected() {
        let input: DeriveInput = parse_quote! {
            enum Status { Open, Closed }
        };
        assert!(expand(input).is_err());
    }
}
