//! Reader fields: the projection tree handed to a result materializer.

use crate::mapping::ValueConverter;
use crate::value::ValueType;
use std::collections::HashSet;
use std::sync::Arc;

/// A deferred relationship-wiring instruction, run after sub-objects exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeWiring {
    /// Assign the joined target object to `member`.
    Reference { member: String, target: String },
    /// Load `target` rows whose `foreign_key` column matches the parent's
    /// `principal_key` output column and assign them to `member` as a list.
    Collection {
        member: String,
        target: String,
        foreign_key: String,
        principal_key: String,
    },
}

/// One node of the projection tree.
#[derive(Debug, Clone)]
pub struct ReaderField {
    /// Member of the source the value came from, when it is a plain member.
    pub source_member: Option<String>,
    /// Member of the output object the value is assigned to.
    pub target_member: String,
    /// Projected SQL expression. Empty for object nodes.
    pub sql: String,
    /// Output column name. Empty for object nodes.
    pub column_alias: String,
    /// Zero-based position in the select list. `None` for object nodes.
    pub ordinal: Option<usize>,
    pub value_type: ValueType,
    pub converter: Option<Arc<dyn ValueConverter>>,
    pub children: Vec<ReaderField>,
    pub include: Option<IncludeWiring>,
}

impl ReaderField {
    pub fn scalar(target_member: impl Into<String>, sql: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            source_member: None,
            target_member: target_member.into(),
            sql: sql.into(),
            column_alias: String::new(),
            ordinal: None,
            value_type,
            converter: None,
            children: Vec::new(),
            include: None,
        }
    }

    pub fn object(target_member: impl Into<String>, value_type: ValueType, children: Vec<ReaderField>) -> Self {
        Self {
            children,
            ..Self::scalar(target_member, String::new(), value_type)
        }
    }

    pub fn is_object(&self) -> bool {
        self.ordinal.is_none() && self.sql.is_empty()
    }

    /// Leaf fields in select-list order.
    pub fn leaves(fields: &[ReaderField]) -> Vec<&ReaderField> {
        let mut out = Vec::new();
        fn walk<'a>(fields: &'a [ReaderField], out: &mut Vec<&'a ReaderField>) {
            for f in fields {
                if f.is_object() {
                    walk(&f.children, out);
                } else {
                    out.push(f);
                }
            }
        }
        walk(fields, &mut out);
        out
    }

    /// Find a top-level field by target member, falling back to source member.
    pub fn find<'a>(fields: &'a [ReaderField], member: &str) -> Option<&'a ReaderField> {
        fields
            .iter()
            .find(|f| f.target_member == member)
            .or_else(|| {
                fields
                    .iter()
                    .find(|f| f.source_member.as_deref() == Some(member))
            })
    }

    /// Assign output aliases (`parent_child` for nested members) and ordinals.
    ///
    /// A colliding alias gets a numeric suffix (`customer_id_2`).
    pub(crate) fn number(fields: &mut [ReaderField]) {
        fn walk(fields: &mut [ReaderField], prefix: &str, next: &mut usize, taken: &mut HashSet<String>) {
            for f in fields {
                let alias = if prefix.is_empty() {
                    f.target_member.clone()
                } else {
                    format!("{prefix}_{}", f.target_member)
                };
                if f.is_object() {
                    walk(&mut f.children, &alias, next, taken);
                    continue;
                }
                let mut unique = alias.clone();
                let mut n = 2;
                while !taken.insert(unique.clone()) {
                    unique = format!("{alias}_{n}");
                    n += 1;
                }
                f.column_alias = unique;
                f.ordinal = Some(*next);
                *next += 1;
            }
        }
        let mut next = 0;
        let mut taken = HashSet::new();
        walk(fields, "", &mut next, &mut taken);
    }

    /// Rewrite leaf SQL to reference a derived table's output columns.
    pub(crate) fn rebase(fields: &[ReaderField], alias: &str, dialect: crate::dialect::Dialect) -> Vec<ReaderField> {
        fields
            .iter()
            .map(|f| {
                let mut f = f.clone();
                if f.is_object() {
                    f.children = Self::rebase(&f.children, alias, dialect);
                } else {
                    f.sql = format!("{alias}.{}", dialect.ident(&f.column_alias));
                }
                f
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_members_get_parent_prefixed_aliases() {
        let mut fields = vec![
            ReaderField::scalar("id", "t0.id", ValueType::I64),
            ReaderField::object(
                "customer",
                ValueType::Object("Customer".into()),
                vec![
                    ReaderField::scalar("id", "t1.id", ValueType::I64),
                    ReaderField::scalar("name", "t1.name", ValueType::Text),
                ],
            ),
        ];
        ReaderField::number(&mut fields);
        let leaves: Vec<_> = ReaderField::leaves(&fields)
            .into_iter()
            .map(|f| (f.column_alias.clone(), f.ordinal))
            .collect();
        assert_eq!(
            leaves,
            vec![
                ("id".to_string(), Some(0)),
                ("customer_id".to_string(), Some(1)),
                ("customer_name".to_string(), Some(2)),
            ]
        );
    }

    #[test]
    fn colliding_aliases_get_a_suffix() {
        let mut fields = vec![
            ReaderField::scalar("customer_id", "t0.customer_id", ValueType::I64),
            ReaderField::object(
                "customer",
                ValueType::Object("Customer".into()),
                vec![ReaderField::scalar("id", "t1.id", ValueType::I64)],
            ),
        ];
        ReaderField::number(&mut fields);
        let aliases: Vec<_> = ReaderField::leaves(&fields)
            .into_iter()
            .map(|f| f.column_alias.clone())
            .collect();
        assert_eq!(aliases, vec!["customer_id", "customer_id_2"]);
    }
}
