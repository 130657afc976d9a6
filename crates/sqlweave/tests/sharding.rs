//! Shard routing for writes and fan-out for reads.

mod support;

use sqlweave::prelude::*;
use std::sync::Arc;
use support::{Call, RecordingTransport};

fn logs(catalog: &Catalog) -> Arc<EntityMap> {
    catalog
        .register(
            EntityMap::builder("Log")
                .table("logs")
                .member("id", ValueType::I64)
                .member("day", ValueType::Text)
                .member("message", ValueType::Text)
                .key("id")
                .sharding(ShardingStrategy::by_member("logs_{key}", "day"))
                .build()
                .unwrap(),
        )
        .unwrap()
}

fn entry(id: i64, day: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("day", day)
        .with("message", "hello")
}

#[tokio::test]
async fn insert_routes_rows_in_order_of_first_appearance() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres);

    let mut insert = Insert::into(logs(&catalog));
    insert.values_many([entry(1, "tue"), entry(2, "mon"), entry(3, "tue")]);
    let report = insert
        .execute(&transport, &ctx, &CommandOptions::new())
        .await
        .unwrap();

    assert_eq!(report.flushes, vec![2, 1]);
    assert_eq!(
        transport.statements(),
        vec![
            "INSERT INTO logs_tue (id, day, message) VALUES ($1, $2, $3), ($4, $5, $6)",
            "INSERT INTO logs_mon (id, day, message) VALUES ($1, $2, $3)",
        ]
    );
}

#[tokio::test]
async fn row_without_shard_key_is_rejected() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres);

    let mut insert = Insert::into(logs(&catalog));
    insert.values(&Record::new().with("id", 1_i64).with("message", "x"));
    let err = insert
        .execute(&transport, &ctx, &CommandOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidOperation(_)));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn query_fans_out_over_discovered_tables() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres)
        .with_tables(["logs_mon", "audit", "logs_tue", "logs_mon"])
        .with_result(vec![entry(1, "mon"), entry(2, "tue")]);

    let mut q = Query::from(logs(&catalog));
    q.filter(lambda(["l"], param("l").field("message").ne(value("noise"))));
    let rows = q.fetch(&transport, &ctx).await.unwrap();
    assert_eq!(rows.len(), 2);

    let calls = transport.calls();
    assert_eq!(
        calls[0],
        Call::Discover {
            pattern: "logs_%".to_string()
        }
    );
    let select = |table: &str| {
        format!("SELECT t0.id, t0.day, t0.message FROM {table} t0 WHERE t0.message <> $1")
    };
    assert_eq!(
        calls[1],
        Call::Query {
            sql: format!("{} UNION ALL {}", select("logs_mon"), select("logs_tue")),
            params: vec![Value::Text("noise".into())],
        }
    );
}

#[tokio::test]
async fn query_over_no_shard_tables_returns_nothing() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres).with_tables(["audit"]);

    let rows = Query::from(logs(&catalog)).fetch(&transport, &ctx).await.unwrap();
    assert!(rows.is_empty());
    assert!(transport.statements().is_empty());
}

#[tokio::test]
async fn delete_runs_against_every_shard() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::MySql).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::MySql).with_tables(["logs_mon", "logs_tue"]);

    let mut delete = Delete::from(logs(&catalog));
    delete.filter(lambda(["l"], param("l").field("id").lt(value(100_i64))));
    let affected = delete.execute(&transport, &ctx).await.unwrap();

    assert_eq!(affected, 2);
    assert_eq!(
        transport.statements(),
        vec![
            "DELETE FROM logs_mon WHERE id < ?",
            "DELETE FROM logs_tue WHERE id < ?",
        ]
    );
}

#[tokio::test]
async fn update_without_filter_never_reaches_the_database() {
    let catalog = Catalog::new();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let transport = RecordingTransport::new(Dialect::Postgres).with_tables(["logs_mon"]);

    let mut update = Update::table(logs(&catalog));
    update.set_value("message", "redacted");
    let err = update.execute(&transport, &ctx).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidOperation(_)));
    assert!(transport.statements().is_empty());
}
