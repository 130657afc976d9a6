//! Bulk copy and staged bulk updates.

mod support;

use sqlweave::prelude::*;
use std::sync::Arc;
use support::{Call, RecordingTransport};

fn products(catalog: &Catalog) -> Arc<EntityMap> {
    catalog
        .register(
            EntityMap::builder("Product")
                .table("products")
                .member("sku", ValueType::Text)
                .member("price", ValueType::F64)
                .member("stock", ValueType::I32)
                .key("sku")
                .build()
                .unwrap(),
        )
        .unwrap()
}

fn price(sku: &str, price: f64) -> Record {
    Record::new().with("sku", sku).with("price", price)
}

#[tokio::test]
async fn bulk_update_creates_loads_merges_and_drops() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres);
    let options = CommandOptions::new().batch_size(2);

    let report = Update::table(products(&catalog))
        .bulk_update(
            &transport,
            &ctx,
            &options,
            vec![price("a", 1.0), price("b", 2.0), price("c", 3.0)],
        )
        .await
        .unwrap();
    assert_eq!(report.flushes, vec![2, 1]);
    assert_eq!(report.affected, 1);

    let calls = transport.calls();
    assert_eq!(calls.len(), 5);
    let create = calls[0].sql().unwrap();
    assert!(create.starts_with("CREATE TEMPORARY TABLE sqlweave_stage_"));
    let Call::Copy { table, columns, rows } = &calls[1] else {
        panic!("expected a copy, got {:?}", calls[1]);
    };
    assert!(table.starts_with("sqlweave_stage_"));
    assert_eq!(columns, &vec!["sku".to_string(), "price".to_string()]);
    assert_eq!(*rows, 2);
    assert!(matches!(calls[2], Call::Copy { rows: 1, .. }));
    let merge = calls[3].sql().unwrap();
    assert!(merge.starts_with("UPDATE products AS t SET price = s.price FROM sqlweave_stage_"));
    assert!(merge.ends_with(" AS s WHERE t.sku = s.sku"));
    assert_eq!(calls[4].sql().unwrap(), format!("DROP TABLE {table}"));
}

#[tokio::test]
async fn staging_table_is_dropped_when_the_copy_fails() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::SqlServer).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::SqlServer).failing_copy();

    let err = Update::table(products(&catalog))
        .bulk_update(&transport, &ctx, &CommandOptions::new(), vec![price("a", 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Other(_)));

    let statements = transport.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("CREATE TABLE #sqlweave_stage_"));
    assert!(statements[1].starts_with("DROP TABLE #sqlweave_stage_"));
}

#[tokio::test]
async fn bulk_update_rejects_empty_input() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres);

    let err = Update::table(products(&catalog))
        .bulk_update(&transport, &ctx, &CommandOptions::new(), Vec::<Record>::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidOperation(_)));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn bulk_update_rejects_builder_segments() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres);

    let mut update = Update::table(products(&catalog));
    update.set_value("stock", 0);
    let err = update
        .bulk_update(&transport, &ctx, &CommandOptions::new(), vec![price("a", 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidOperation(_)));
}

#[tokio::test]
async fn bulk_insert_copies_in_chunks() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres);
    let options = CommandOptions::new().batch_size(4);

    let rows: Vec<Record> = (0..10)
        .map(|i| {
            Record::new()
                .with("sku", format!("sku-{i}"))
                .with("price", 1.0)
                .with("stock", i)
        })
        .collect();
    let mut insert = Insert::into(products(&catalog));
    insert.values_many(rows).bulk_copy();
    let report = insert.execute(&transport, &ctx, &options).await.unwrap();

    assert_eq!(report.flushes, vec![4, 4, 2]);
    assert_eq!(report.affected, 10);
    let copies: Vec<usize> = transport
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::Copy { table, rows, .. } if table == "products" => Some(*rows),
            _ => None,
        })
        .collect();
    assert_eq!(copies, vec![4, 4, 2]);
}

#[tokio::test]
async fn bulk_copy_cannot_return_values() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres);

    let mut insert = Insert::into(products(&catalog));
    insert
        .values(&price("a", 1.0))
        .bulk_copy()
        .returning(lambda(["p"], param("p").field("sku")));
    let err = insert
        .execute(&transport, &ctx, &CommandOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidOperation(_)));
}
