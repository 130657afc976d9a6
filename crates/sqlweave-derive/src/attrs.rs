//! Attribute parsing for the Entity derive macro.
//!
//! Handles struct-level and field-level `#[orm(...)]` attributes. Both accept
//! a comma-separated list of bare flags and `key = "value"` pairs.

use heck::{ToKebabCase, ToLowerCamelCase, ToShoutySnakeCase, ToSnakeCase, ToUpperCamelCase};
use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Error, LitStr, Result};

/// One `flag` or `key = "value"` item.
struct Item {
    key: syn::Ident,
    value: Option<LitStr>,
}

struct ItemList(Vec<Item>);

impl Parse for ItemList {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut items = Vec::new();
        while !input.is_empty() {
            let key: syn::Ident = input.parse()?;
            let value = if input.peek(syn::Token![=]) {
                let _: syn::Token![=] = input.parse()?;
                Some(input.parse()?)
            } else {
                None
            };
            items.push(Item { key, value });
            if input.is_empty() {
                break;
            }
            let _: syn::Token![,] = input.parse()?;
        }
        Ok(ItemList(items))
    }
}

fn items(attrs: &[Attribute]) -> Result<Vec<Item>> {
    let mut out = Vec::new();
    for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
        out.extend(attr.parse_args::<ItemList>()?.0);
    }
    Ok(out)
}

fn required(item: Item) -> Result<(syn::Ident, LitStr)> {
    match item.value {
        Some(v) => Ok((item.key, v)),
        None => Err(Error::new_spanned(&item.key, format!("`{}` requires a value", item.key))),
    }
}

/// Column naming rule from `rename_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenameRule {
    Snake,
    LowerCamel,
    UpperCamel,
    ScreamingSnake,
    Kebab,
}

impl RenameRule {
    fn parse(lit: &LitStr) -> Result<Self> {
        match lit.value().as_str() {
            "snake_case" => Ok(Self::Snake),
            "camelCase" => Ok(Self::LowerCamel),
            "PascalCase" => Ok(Self::UpperCamel),
            "SCREAMING_SNAKE_CASE" => Ok(Self::ScreamingSnake),
            "kebab-case" => Ok(Self::Kebab),
            other => Err(Error::new(lit.span(), format!("unknown rename_all rule `{other}`"))),
        }
    }

    pub(crate) fn apply(self, name: &str) -> String {
        match self {
            Self::Snake => name.to_snake_case(),
            Self::LowerCamel => name.to_lower_camel_case(),
            Self::UpperCamel => name.to_upper_camel_case(),
            Self::ScreamingSnake => name.to_shouty_snake_case(),
            Self::Kebab => name.to_kebab_case(),
        }
    }
}

/// Struct-level attributes.
#[derive(Default)]
pub(crate) struct EntityAttrs {
    pub name: Option<String>,
    pub table: Option<String>,
    pub schema: Option<String>,
    pub rename_all: Option<RenameRule>,
}

impl EntityAttrs {
    pub(crate) fn from_attrs(attrs: &[Attribute]) -> Result<Self> {
        let mut out = Self::default();
        for item in items(attrs)? {
            let (key, value) = required(item)?;
            match key.to_string().as_str() {
                "name" => out.name = Some(value.value()),
                "table" => out.table = Some(value.value()),
                "schema" => out.schema = Some(value.value()),
                "rename_all" => out.rename_all = Some(RenameRule::parse(&value)?),
                other => {
                    return Err(Error::new_spanned(key, format!("unknown entity attribute `{other}`")));
                }
            }
        }
        Ok(out)
    }
}

/// Field-level attributes.
#[derive(Default)]
pub(crate) struct FieldAttrs {
    pub key: bool,
    pub auto_increment: bool,
    pub ignore: bool,
    pub column: Option<String>,
    pub navigation: Option<String>,
    pub foreign_key: Option<String>,
}

impl FieldAttrs {
    pub(crate) fn from_attrs(attrs: &[Attribute]) -> Result<Self> {
        let mut out = Self::default();
        for item in items(attrs)? {
            let name = item.key.to_string();
            match name.as_str() {
                "id" | "key" => out.key = true,
                "auto_increment" => out.auto_increment = true,
                "ignore" => out.ignore = true,
                "column" => out.column = Some(required(item)?.1.value()),
                "navigation" => out.navigation = Some(required(item)?.1.value()),
                "foreign_key" => out.foreign_key = Some(required(item)?.1.value()),
                other => {
                    return Err(Error::new_spanned(
                        &item.key,
                        format!("unknown field attribute `{other}`"),
                    ));
                }
            }
        }
        if out.foreign_key.is_some() && out.navigation.is_none() {
            return Err(Error::new(
                proc_macro2::Span::call_site(),
                "`foreign_key` requires `navigation`",
            ));
        }
        Ok(out)
    }
}
