use super::*;
use crate::compiler::{BuildContext, IncludeWiring};
use crate::dialect::Dialect;
use crate::error::OrmError;
use crate::expr::{lambda, new_object, param, value};
use crate::mapping::{Catalog, EntityMap};
use crate::value::{Record, Value, ValueType};
use chrono::NaiveDate;
use std::sync::Arc;

fn catalog() -> Catalog {
    let catalog = Catalog::new();
    catalog
        .register(
            EntityMap::builder("Customer")
                .table("customers")
                .member("id", ValueType::I64)
                .member("name", ValueType::Text)
                .key("id")
                .build()
                .unwrap(),
        )
        .unwrap();
    catalog
        .register(
            EntityMap::builder("Order")
                .table("orders")
                .member("id", ValueType::I64)
                .member("customer_id", ValueType::I64)
                .member("total", ValueType::F64)
                .member("status", ValueType::Text)
                .member("placed", ValueType::DateTime)
                .member("customer", ValueType::Object("Customer".into()))
                .key("id")
                .references("customer", "Customer", "customer_id")
                .build()
                .unwrap(),
        )
        .unwrap();
    catalog
        .register(
            EntityMap::builder("Event")
                .table("t")
                .member("Id", ValueType::I64)
                .member("Name", ValueType::Text)
                .member("CreatedAt", ValueType::DateTime)
                .key("Id")
                .auto_increment("Id")
                .build()
                .unwrap(),
        )
        .unwrap();
    catalog
}

const ORDER_COLUMNS: &str = "t0.id, t0.customer_id, t0.total, t0.status, t0.placed";

fn single(stmt: Option<crate::compiler::CompiledStatement>) -> crate::compiler::CompiledStatement {
    stmt.expect("statement")
}

fn event_row() -> Record {
    let created = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    Record::new().with("Name", "launch").with("CreatedAt", Value::DateTime(created))
}

// ==================== Query ====================

#[test]
fn test_filter_order_take() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut q = Query::from(catalog.entity("Order").unwrap());
    q.filter(lambda(["o"], param("o").field("total").gt(value(100.0))))
        .order_by_desc(lambda(["o"], param("o").field("placed")))
        .take(10);
    let stmt = single(q.build(&ctx).unwrap());
    assert_eq!(
        stmt.sql,
        format!("SELECT {ORDER_COLUMNS} FROM orders t0 WHERE t0.total > $1 ORDER BY t0.placed DESC LIMIT 10")
    );
    assert_eq!(stmt.param_values(), vec![Value::F64(100.0)]);
    assert_eq!(stmt.fields.len(), 5);
}

#[test]
fn test_sql_server_paging_needs_an_order() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::SqlServer).with_catalog(&catalog);
    let mut q = Query::from(catalog.entity("Customer").unwrap());
    q.skip(5).take(10);
    assert_eq!(
        single(q.build(&ctx).unwrap()).sql,
        "SELECT t0.id, t0.name FROM customers t0 ORDER BY (SELECT NULL) OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY"
    );
}

#[test]
fn test_filter_after_take_wraps() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut q = Query::from(catalog.entity("Customer").unwrap());
    q.take(5)
        .filter(lambda(["c"], param("c").field("name").eq(value("ann"))));
    assert_eq!(
        single(q.build(&ctx).unwrap()).sql,
        "SELECT q1.id, q1.name FROM (SELECT t0.id, t0.name FROM customers t0 LIMIT 5) q1 WHERE q1.name = $1"
    );
}

#[test]
fn test_ordered_union_wraps_the_combined_result() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let customers = catalog.entity("Customer").unwrap();
    let mut high = Query::from(Arc::clone(&customers));
    high.filter(lambda(["c"], param("c").field("id").gt(value(100_i64))));
    let mut q = Query::from(customers);
    q.filter(lambda(["c"], param("c").field("id").lt(value(10_i64))))
        .union_all(high)
        .order_by(lambda(["c"], param("c").field("name")));
    let stmt = single(q.build(&ctx).unwrap());
    assert_eq!(
        stmt.sql,
        "SELECT q2.id, q2.name FROM (\
         SELECT t0.id, t0.name FROM customers t0 WHERE t0.id < $1 \
         UNION ALL SELECT t1.id, t1.name FROM customers t1 WHERE t1.id > $2\
         ) q2 ORDER BY q2.name"
    );
    assert_eq!(stmt.param_values(), vec![Value::I64(10), Value::I64(100)]);
}

#[test]
fn test_union_operand_with_its_own_union_is_wrapped() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let customers = catalog.entity("Customer").unwrap();
    let mut b = Query::from(Arc::clone(&customers));
    b.filter(lambda(["c"], param("c").field("id").gt(value(5_i64))));
    let mut c = Query::from(Arc::clone(&customers));
    c.filter(lambda(["c"], param("c").field("id").gt(value(50_i64))));
    b.union(c);
    let mut q = Query::from(customers);
    q.union_all(b);
    assert_eq!(
        single(q.build(&ctx).unwrap()).sql,
        "SELECT t0.id, t0.name FROM customers t0 UNION ALL SELECT * FROM (\
         SELECT t1.id, t1.name FROM customers t1 WHERE t1.id > $1 \
         UNION SELECT t2.id, t2.name FROM customers t2 WHERE t2.id > $2\
         ) u0"
    );
}

#[test]
fn test_union_with_fanned_out_operand_is_wrapped() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres)
        .with_catalog(&catalog)
        .with_shard_tables("Order", ["orders_a", "orders_b"]);
    let mut orders = Query::from(catalog.entity("Order").unwrap());
    orders.select(lambda(["o"], param("o").field("id")));
    let mut q = Query::from(catalog.entity("Customer").unwrap());
    q.select(lambda(["c"], param("c").field("id"))).union(orders);
    assert_eq!(
        single(q.build(&ctx).unwrap()).sql,
        "SELECT t0.id FROM customers t0 UNION SELECT * FROM (\
         SELECT t1.id FROM orders_a t1 UNION ALL SELECT t1.id FROM orders_b t1\
         ) u0"
    );
}

#[test]
fn test_multi_shard_query_fans_out_and_wraps_paging() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres)
        .with_catalog(&catalog)
        .with_shard_tables("Order", ["orders_2023", "orders_2024"]);
    let mut q = Query::from(catalog.entity("Order").unwrap());
    q.filter(lambda(["o"], param("o").field("total").gt(value(5.0))))
        .order_by(lambda(["o"], param("o").field("id")))
        .take(3);
    let stmt = single(q.build(&ctx).unwrap());
    let branch = |table: &str| format!("SELECT {ORDER_COLUMNS} FROM {table} t0 WHERE t0.total > $1");
    assert_eq!(
        stmt.sql,
        format!(
            "SELECT q1.id, q1.customer_id, q1.total, q1.status, q1.placed FROM ({} UNION ALL {}) q1 \
             ORDER BY q1.id LIMIT 3",
            branch("orders_2023"),
            branch("orders_2024")
        )
    );
    assert_eq!(stmt.params.len(), 1);
}

#[test]
fn test_single_shard_table_needs_no_union() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres)
        .with_catalog(&catalog)
        .with_shard_tables("Order", ["orders_2024"]);
    let mut q = Query::from(catalog.entity("Order").unwrap());
    q.take(1);
    assert_eq!(
        single(q.build(&ctx).unwrap()).sql,
        format!("SELECT {ORDER_COLUMNS} FROM orders_2024 t0 LIMIT 1")
    );
}

#[test]
fn test_sharded_query_without_tables_builds_nothing() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres)
        .with_catalog(&catalog)
        .with_shard_tables("Order", Vec::<String>::new());
    let q = Query::from(catalog.entity("Order").unwrap());
    assert!(q.build(&ctx).unwrap().is_none());
}

#[test]
fn test_overflowing_constant_fails_to_build() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut q = Query::from(catalog.entity("Order").unwrap());
    q.filter(lambda(["o"], param("o").field("id").gt(value(i64::MIN).negate())));
    let err = q.build(&ctx).unwrap_err();
    assert!(matches!(err, OrmError::Conversion(_)));
}

#[test]
fn test_group_by_having_select() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut q = Query::from(catalog.entity("Order").unwrap());
    q.group_by(lambda(["o"], param("o").field("customer_id")))
        .having(lambda(["g"], param("g").aggregate("count", None).gt(value(1_i64))))
        .select(lambda(
            ["g"],
            new_object(
                None,
                [
                    ("customer_id", param("g").field("key")),
                    (
                        "total",
                        param("g").aggregate("sum", Some(lambda(["o"], param("o").field("total")))),
                    ),
                ],
            ),
        ));
    let stmt = single(q.build(&ctx).unwrap());
    assert_eq!(
        stmt.sql,
        "SELECT t0.customer_id, SUM(t0.total) AS total FROM orders t0 \
         GROUP BY t0.customer_id HAVING COUNT(*) > $1"
    );
    assert_eq!(stmt.field("total").map(|f| f.value_type.clone()), Some(ValueType::F64));
}

#[test]
fn test_having_requires_group_by() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut q = Query::from(catalog.entity("Order").unwrap());
    q.having(lambda(["g"], param("g").aggregate("count", None).gt(value(1_i64))));
    assert!(matches!(q.build(&ctx), Err(OrmError::InvalidOperation(_))));
}

#[test]
fn test_explicit_join_and_projection() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut q = Query::from(catalog.entity("Order").unwrap());
    q.join(
        catalog.entity("Customer").unwrap(),
        lambda(["o", "c"], param("o").field("customer_id").eq(param("c").field("id"))),
    )
    .select(lambda(
        ["o", "c"],
        new_object(
            None,
            [("id", param("o").field("id")), ("customer", param("c").field("name"))],
        ),
    ));
    assert_eq!(
        single(q.build(&ctx).unwrap()).sql,
        "SELECT t0.id, t1.name AS customer FROM orders t0 INNER JOIN customers t1 ON t0.customer_id = t1.id"
    );
}

#[test]
fn test_include_reference_joins_and_wires() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut q = Query::from(catalog.entity("Order").unwrap());
    q.include(lambda(["o"], param("o").field("customer")));
    let stmt = single(q.build(&ctx).unwrap());
    assert_eq!(
        stmt.sql,
        format!(
            "SELECT {ORDER_COLUMNS}, t1.id AS customer_id_2, t1.name AS customer_name \
             FROM orders t0 LEFT JOIN customers t1 ON t1.id = t0.customer_id"
        )
    );
    let include = stmt.fields.iter().find_map(|f| f.include.clone());
    assert_eq!(
        include,
        Some(IncludeWiring::Reference {
            member: "customer".into(),
            target: "Customer".into()
        })
    );
}

#[test]
fn test_cte_source() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut big = Query::from(catalog.entity("Order").unwrap());
    big.filter(lambda(["o"], param("o").field("total").gt(value(100.0))))
        .select(lambda(
            ["o"],
            new_object(
                None,
                [("id", param("o").field("id")), ("total", param("o").field("total"))],
            ),
        ));
    let mut q = Query::from_cte("big");
    q.with_cte("big", big)
        .order_by(lambda(["b"], param("b").field("total")));
    assert_eq!(
        single(q.build(&ctx).unwrap()).sql,
        "WITH big AS (SELECT t0.id, t0.total FROM orders t0 WHERE t0.total > $1) \
         SELECT q1.id, q1.total FROM big q1 ORDER BY q1.total"
    );
}

#[test]
fn test_undeclared_cte_is_rejected() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let q = Query::from_cte("missing");
    assert!(matches!(q.build(&ctx), Err(OrmError::InvalidOperation(_))));
}

// ==================== Insert ====================

#[test]
fn test_insert_returning_key() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut insert = Insert::into(catalog.entity("Event").unwrap());
    insert
        .values(&event_row())
        .returning(lambda(["e"], param("e").field("Id")));
    let stmts = insert.build(&ctx).unwrap();
    assert_eq!(stmts.len(), 1);
    assert_eq!(
        stmts[0].sql,
        "INSERT INTO t (Name, CreatedAt) VALUES ($1, $2) RETURNING Id"
    );
    assert_eq!(stmts[0].params.len(), 2);
    assert_eq!(stmts[0].fields.len(), 1);
    assert_eq!(stmts[0].fields[0].source_member.as_deref(), Some("Id"));
}

#[test]
fn test_insert_output_on_sql_server() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::SqlServer).with_catalog(&catalog);
    let mut insert = Insert::into(catalog.entity("Event").unwrap());
    insert
        .values(&event_row())
        .returning(lambda(["e"], param("e").field("Id")));
    assert_eq!(
        insert.build(&ctx).unwrap()[0].sql,
        "INSERT INTO t (Name, CreatedAt) OUTPUT INSERTED.Id VALUES (@p0, @p1)"
    );
}

#[test]
fn test_returning_is_rejected_on_mysql() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::MySql).with_catalog(&catalog);
    let mut insert = Insert::into(catalog.entity("Event").unwrap());
    insert.values(&event_row()).returning_all();
    assert!(matches!(insert.build(&ctx), Err(OrmError::InvalidOperation(_))));
}

#[test]
fn test_multi_row_insert() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::MySql).with_catalog(&catalog);
    let rows = vec![
        Record::new().with("id", 1_i64).with("name", "a"),
        Record::new().with("id", 2_i64).with("name", "b"),
    ];
    let mut insert = Insert::into(catalog.entity("Customer").unwrap());
    insert.values_many(rows);
    let stmt = &insert.build(&ctx).unwrap()[0];
    assert_eq!(stmt.sql, "INSERT INTO customers (id, name) VALUES (?, ?), (?, ?)");
    assert_eq!(stmt.params.len(), 4);
}

#[test]
fn test_rows_with_different_members_are_rejected() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut insert = Insert::into(catalog.entity("Customer").unwrap());
    insert.values_many([
        Record::new().with("id", 1_i64).with("name", "ann"),
        Record::new().with("id", 2_i64),
    ]);
    assert!(matches!(insert.build(&ctx), Err(OrmError::InvalidOperation(_))));
}

#[test]
fn test_upsert_update_from_excluded() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut insert = Insert::into(catalog.entity("Customer").unwrap());
    insert
        .values(&Record::new().with("id", 1_i64).with("name", "ann"))
        .on_conflict(ConflictTarget::Keys(vec![]))
        .do_update(lambda(
            ["c", "x"],
            new_object(
                None,
                [("name", param("c").field("name").add(param("x").field("name")))],
            ),
        ));
    assert_eq!(
        insert.build(&ctx).unwrap()[0].sql,
        "INSERT INTO customers (id, name) VALUES ($1, $2) \
         ON CONFLICT (id) DO UPDATE SET name = (customers.name || EXCLUDED.name)"
    );
}

#[test]
fn test_upsert_forms_per_dialect() {
    let catalog = catalog();
    let customers = catalog.entity("Customer").unwrap();
    let row = Record::new().with("id", 1_i64).with("name", "ann");

    let mysql = BuildContext::new(Dialect::MySql).with_catalog(&catalog);
    let mut insert = Insert::into(Arc::clone(&customers));
    insert
        .values(&row)
        .on_conflict(ConflictTarget::Keys(vec![]))
        .do_nothing();
    assert_eq!(
        insert.build(&mysql).unwrap()[0].sql,
        "INSERT INTO customers (id, name) VALUES (?, ?) ON DUPLICATE KEY UPDATE id = id"
    );

    let pg = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut insert = Insert::into(Arc::clone(&customers));
    insert
        .values(&row)
        .on_conflict(ConflictTarget::Constraint("customers_pkey".into()))
        .do_update_columns(["name"]);
    assert_eq!(
        insert.build(&pg).unwrap()[0].sql,
        "INSERT INTO customers (id, name) VALUES ($1, $2) \
         ON CONFLICT ON CONSTRAINT customers_pkey DO UPDATE SET name = EXCLUDED.name"
    );

    let mssql = BuildContext::new(Dialect::SqlServer).with_catalog(&catalog);
    assert!(matches!(insert.build(&mssql), Err(OrmError::InvalidOperation(_))));
}

#[test]
fn test_upsert_before_values_is_rejected() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut insert = Insert::into(catalog.entity("Customer").unwrap());
    insert.on_conflict(ConflictTarget::Keys(vec![])).do_nothing();
    insert.values(&Record::new().with("id", 1_i64).with("name", "ann"));
    assert!(matches!(insert.build(&ctx), Err(OrmError::InvalidOperation(_))));
}

#[test]
fn test_insert_partitions_by_shard_key() {
    let catalog = Catalog::new();
    let logs = catalog
        .register(
            EntityMap::builder("Log")
                .table("logs")
                .member("id", ValueType::I64)
                .member("day", ValueType::Text)
                .key("id")
                .sharding(crate::shard::ShardingStrategy::by_member("logs_{key}", "day"))
                .build()
                .unwrap(),
        )
        .unwrap();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut insert = Insert::into(logs);
    insert.values_many([
        Record::new().with("id", 1_i64).with("day", "mon"),
        Record::new().with("id", 2_i64).with("day", "tue"),
        Record::new().with("id", 3_i64).with("day", "mon"),
    ]);
    let sql: Vec<_> = insert.build(&ctx).unwrap().into_iter().map(|s| s.sql).collect();
    assert_eq!(
        sql,
        vec![
            "INSERT INTO logs_mon (id, day) VALUES ($1, $2), ($3, $4)",
            "INSERT INTO logs_tue (id, day) VALUES ($1, $2)",
        ]
    );
}

// ==================== Update ====================

#[test]
fn test_update_without_filter_fails_before_sql() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut update = Update::table(catalog.entity("Order").unwrap());
    update.set_value("status", "shipped");
    assert!(matches!(update.build(&ctx), Err(OrmError::InvalidOperation(_))));
}

#[test]
fn test_update_where_binds_the_literal() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
    let mut update = Update::table(catalog.entity("Order").unwrap());
    update
        .set(
            lambda(["o"], param("o").field("total")),
            lambda(["o"], param("o").field("total").mul(value(2.0))),
        )
        .filter(lambda(["o"], param("o").field("id").eq(value(7_i64))));
    let stmts = update.build(&ctx).unwrap();
    assert_eq!(stmts[0].sql, "UPDATE orders SET total = (total * $1) WHERE id = $2");
    let where_params: Vec<_> = stmts[0].params.iter().skip(1).map(|p| p.value.clone()).collect();
    assert_eq!(where_params, vec![Value::I64(7)]);
}

#[test]
fn test_update_returning_suffix() {
    let catalog = catalog();
    let ctx = BuildContext::new(Dialect::Sqlite).with_catalog(&catalog);
    let mut update = Update::table(catalog.entity("Order").unwrap());
    update
        .set_value("status", "paid")
        .filter(lambda(["o"], param("o").field("id").eq(value(1_i64))))
        .returning(lambda(["o"], param("o").field("total")));
    assert_eq!(
        update.build(&ctx).unwrap()[0].sql,
        "UPDATE orders SET status = @p0 WHERE id = @p1 RETURNING total"
    );
}
