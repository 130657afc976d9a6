//! Benchmark statement compilation across dialects.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use sqlweave::prelude::*;
use std::sync::Arc;

fn catalog() -> (Catalog, Arc<EntityMap>) {
    let catalog = Catalog::new();
    let orders = catalog
        .register(
            EntityMap::builder("Order")
                .table("orders")
                .member("id", ValueType::I64)
                .member("customer_id", ValueType::I64)
                .member("total", ValueType::F64)
                .member("status", ValueType::Text)
                .key("id")
                .auto_increment("id")
                .build()
                .unwrap(),
        )
        .unwrap();
    (catalog, orders)
}

fn bench_query(c: &mut Criterion) {
    let (catalog, orders) = catalog();
    let mut group = c.benchmark_group("compile/query");

    for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite, Dialect::SqlServer] {
        let ctx = BuildContext::new(dialect).with_catalog(&catalog);
        let mut q = Query::from(Arc::clone(&orders));
        q.filter(lambda(
            ["o"],
            param("o")
                .field("total")
                .gt(value(100.0))
                .and(param("o").field("status").ne(value("void"))),
        ))
        .order_by_desc(lambda(["o"], param("o").field("total")))
        .skip(20)
        .take(10);

        group.bench_with_input(BenchmarkId::from_parameter(dialect), &q, |b, q| {
            b.iter(|| black_box(q.build(&ctx).unwrap()));
        });
    }

    group.finish();
}

fn bench_multi_row_insert(c: &mut Criterion) {
    let (catalog, orders) = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut group = c.benchmark_group("compile/insert_rows");

    for n in [1, 10, 100, 1000] {
        let rows: Vec<Record> = (0..n)
            .map(|i| {
                Record::new()
                    .with("customer_id", i as i64)
                    .with("total", 9.5)
                    .with("status", "new")
            })
            .collect();
        let mut insert = Insert::into(Arc::clone(&orders));
        insert.values_many(rows);

        group.bench_with_input(BenchmarkId::from_parameter(n), &insert, |b, insert| {
            b.iter(|| black_box(insert.build(&ctx).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_query, bench_multi_row_insert);
criterion_main!(benches);
