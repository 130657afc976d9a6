//! Automatic mapping through `#[derive(Entity)]`.

mod support;

use chrono::{NaiveDate, NaiveDateTime};
use sqlweave::prelude::*;
use sqlweave::NavigationKind;
use support::RecordingTransport;

#[derive(Debug, Clone, Entity)]
#[orm(table = "events")]
struct Event {
    #[orm(id, auto_increment)]
    id: i64,
    name: String,
    created_at: NaiveDateTime,
    note: Option<String>,
    #[orm(ignore)]
    scratch: String,
}

#[derive(Debug, Clone, Entity)]
#[orm(name = "Customer", table = "customers", rename_all = "PascalCase")]
struct CustomerRow {
    #[orm(key)]
    customer_id: i64,
    display_name: String,
    #[orm(column = "mail")]
    email: Option<String>,
    #[orm(navigation = "Invoice", foreign_key = "customer_id")]
    invoices: Vec<Invoice>,
}

#[derive(Debug, Clone, Entity)]
#[orm(table = "invoices")]
struct Invoice {
    #[orm(id)]
    id: i64,
    customer_id: i64,
    amount: f64,
}

/// A write payload carrying a subset of `Event`'s members.
#[derive(Debug, Clone, Entity)]
struct NewEvent {
    name: String,
    created_at: NaiveDateTime,
}

fn launch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

#[test]
fn reflected_members_become_columns() {
    let map = EntityMap::reflect::<Event>().unwrap();
    assert_eq!(map.name(), "Event");
    assert_eq!(map.table(), "events");
    assert_eq!(map.key_fields(), &["id".to_string()]);
    assert_eq!(map.auto_increment(), Some("id"));
    let columns: Vec<&str> = map.columns().map(|m| m.column.as_str()).collect();
    assert_eq!(columns, vec!["id", "name", "created_at", "note"]);
    assert!(map.member("note").unwrap().nullable);
    assert!(map.member("scratch").unwrap().ignored);
}

#[test]
fn rename_rules_and_overrides() {
    let map = EntityMap::reflect::<CustomerRow>().unwrap();
    assert_eq!(map.name(), "Customer");
    assert_eq!(map.member("customer_id").unwrap().column, "CustomerId");
    assert_eq!(map.member("display_name").unwrap().column, "DisplayName");
    assert_eq!(map.member("email").unwrap().column, "mail");

    let invoices = map.member("invoices").unwrap();
    let nav = invoices.navigation.as_ref().unwrap();
    assert_eq!(nav.kind, NavigationKind::ToMany);
    assert_eq!(nav.target, "Invoice");
    assert_eq!(nav.foreign_key, "customer_id");
    assert!(!invoices.is_column());
}

#[test]
fn catalog_maps_on_first_use_and_keeps_the_mapping() {
    let catalog = Catalog::new();
    let first = catalog.map_for::<Event>().unwrap();
    let second = catalog.map_for::<Event>().unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(catalog.len(), 1);
}

#[test]
fn finalize_twice_changes_nothing() {
    let mut map = EntityMap::reflect::<Invoice>().unwrap();
    let before: Vec<String> = map.columns().map(|m| m.column.clone()).collect();
    map.finalize().unwrap();
    map.finalize().unwrap();
    let after: Vec<String> = map.columns().map(|m| m.column.clone()).collect();
    assert_eq!(before, after);
    assert_eq!(map.key_fields(), &["id".to_string()]);
}

#[test]
fn payload_skips_ignored_members() {
    let event = Event {
        id: 0,
        name: "launch".into(),
        created_at: launch(),
        note: None,
        scratch: "x".into(),
    };
    assert_eq!(event.member_names(), vec!["id", "name", "created_at", "note"]);
    assert_eq!(event.value("note"), Some(Value::Null));
    assert_eq!(event.value("scratch"), None);
}

#[tokio::test]
async fn derived_payload_inserts_and_returns_the_key() {
    let catalog = Catalog::new();
    let events = catalog.map_for::<Event>().unwrap();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres)
        .with_result(vec![Record::new().with("id", 41_i64)]);

    let mut insert = Insert::into(events);
    insert
        .values(&NewEvent {
            name: "launch".into(),
            created_at: launch(),
        })
        .returning(lambda(["e"], param("e").field("id")));
    let returned = insert
        .fetch_returning(&transport, &ctx, &CommandOptions::new())
        .await
        .unwrap();

    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].get("id"), Some(&Value::I64(41)));
    assert_eq!(
        transport.statements(),
        vec!["INSERT INTO events (name, created_at) VALUES ($1, $2) RETURNING id"]
    );
}

#[test]
fn payload_member_missing_from_entity_fails() {
    #[derive(Entity)]
    struct Stray {
        nickname: String,
    }

    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut insert = Insert::into(catalog.map_for::<Event>().unwrap());
    insert.values(&Stray {
        nickname: "x".into(),
    });
    let err = insert.build(&ctx).unwrap_err();
    assert!(matches!(err, OrmError::MissingMember { .. }));
}
