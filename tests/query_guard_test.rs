// ABOUTME: Integration tests for read-only enforcement across all dialects
// ABOUTME: Built statements, injected fragments, catalog queries and literal escaping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::init_test_logging;
use vmc_connector::errors::ErrorCode;
use vmc_connector::query_engine::dialect::{MySql, Postgres};
use vmc_connector::query_engine::guard::ensure_read_only;
use vmc_connector::query_engine::{build_select, DatabaseEngine, Dialect, QuerySpec, TableRef};

fn assert_rejected(sql: &str, engine: DatabaseEngine) {
    let err = ensure_read_only(sql, engine.dialect())
        .expect_err(&format!("{engine} should reject: {sql}"));
    assert_eq!(err.code, ErrorCode::SecurityViolation, "{sql}");
}

#[test]
fn test_built_mysql_select_passes() {
    init_test_logging();
    let sql = build_select(&MySql, &QuerySpec::table("orders").with_limit(10)).unwrap();
    assert_eq!(sql, "SELECT * FROM `orders` LIMIT 10");
    assert!(ensure_read_only(&sql, &MySql).is_ok());
}

#[test]
fn test_injected_table_name_is_rejected_for_every_engine() {
    init_test_logging();
    let spec = QuerySpec::table("users; DROP TABLE users");
    for engine in DatabaseEngine::ALL {
        let sql = build_select(engine.dialect(), &spec).unwrap();
        assert_rejected(&sql, engine);
    }
}

#[test]
fn test_injected_where_clause_is_rejected() {
    let spec = QuerySpec::table("orders").with_where("1 = 1; DELETE FROM orders");
    for engine in DatabaseEngine::ALL {
        let sql = build_select(engine.dialect(), &spec).unwrap();
        assert_rejected(&sql, engine);
    }
}

#[test]
fn test_write_and_admin_statements_are_rejected() {
    let statements = [
        "UPDATE orders SET total = 0",
        "DELETE FROM orders",
        "INSERT INTO orders (id) VALUES (1)",
        "DROP TABLE orders",
        "TRUNCATE orders",
        "SELECT * INTO backup FROM orders",
        "SELECT 1; SELECT 2",
        "EXEC sp_who",
        "SELECT * FROM orders WHERE id = xp_cmdshell",
        "PRAGMA writable_schema = ON",
        "ATTACH DATABASE 'x.db' AS x",
        "SELECT * FROM orders INTO OUTFILE '/tmp/x'",
    ];
    for sql in statements {
        for engine in DatabaseEngine::ALL {
            assert_rejected(sql, engine);
        }
    }
}

#[test]
fn test_reads_with_keywords_in_literals_pass() {
    let spec = QuerySpec::table("audit")
        .with_columns(["id", "note"])
        .with_where("note = 'please DROP the ''old'' table; DELETE later'")
        .with_order_by("id");
    let sql = build_select(&Postgres, &spec).unwrap();
    assert!(ensure_read_only(&sql, &Postgres).is_ok());
}

#[test]
fn test_ctes_and_subqueries_pass() {
    let sql = "WITH recent AS (SELECT id FROM orders WHERE total > 10) \
               SELECT o.id FROM orders o WHERE o.id IN (SELECT id FROM recent)";
    assert!(ensure_read_only(sql, &Postgres).is_ok());
}

#[test]
fn test_identifiers_containing_keywords_pass() {
    let spec = QuerySpec::table("deletions").with_columns(["updated_at", "created_by", "settings"]);
    for engine in DatabaseEngine::ALL {
        let sql = build_select(engine.dialect(), &spec).unwrap();
        assert!(ensure_read_only(&sql, engine.dialect()).is_ok(), "{sql}");
    }
}

#[test]
fn test_every_catalog_query_passes_the_guard() {
    init_test_logging();
    let table = TableRef::parse("sales.orders").unwrap();
    for engine in DatabaseEngine::ALL {
        let dialect = engine.dialect();
        for sql in [
            dialect.databases_query(),
            dialect.tables_query(),
            dialect.columns_query(None),
            dialect.columns_query(Some(&table)),
        ] {
            assert!(
                ensure_read_only(&sql, dialect).is_ok(),
                "{engine} catalog query rejected: {sql}"
            );
        }
    }
}

#[test]
fn test_catalog_table_filter_is_escaped_as_literal() {
    let hostile = TableRef::parse("x'; DROP TABLE y; --").unwrap();
    let sql = Postgres.columns_query(Some(&hostile));
    assert!(sql.contains("'x''; DROP TABLE y; --'"));
    assert!(ensure_read_only(&sql, &Postgres).is_ok());
}

#[test]
fn test_quoted_context_keywords_and_replace_function_pass() {
    let spec = QuerySpec::table("audit")
        .with_columns(["comment", "set", "lock"])
        .with_where("REPLACE(note, 'x', 'y') = 'z'");
    for engine in DatabaseEngine::ALL {
        let sql = build_select(engine.dialect(), &spec).unwrap();
        assert!(ensure_read_only(&sql, engine.dialect()).is_ok(), "{sql}");
    }
}

#[test]
fn test_session_setting_function_is_rejected() {
    assert_rejected(
        "SELECT set_config('default_transaction_read_only', 'off', false)",
        DatabaseEngine::Postgresql,
    );
    let spec = QuerySpec::table("orders").with_where("setval('orders_id_seq', 1) > 0");
    let sql = build_select(&Postgres, &spec).unwrap();
    assert_rejected(&sql, DatabaseEngine::Postgresql);
}
