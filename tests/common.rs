// ABOUTME: Shared test utilities and fakes for integration tests
// ABOUTME: Provides logging setup, fixtures, and fake transport, control plane, sink and executor
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]
//! Shared test utilities for `vmc_connector`

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::VecDeque;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;
use vmc_connector::control_plane::{ControlPlane, KeyValidationResponse};
use vmc_connector::crypto::{generate_api_key, MachineKey};
use vmc_connector::errors::{AppError, AppResult};
use vmc_connector::offline_queue::OfflineQueue;
use vmc_connector::orchestrator::ResponseSink;
use vmc_connector::query_engine::{
    ColumnInfo, DatabaseConfig, QueryExecutor, QueryResult, QuerySpec,
};
use vmc_connector::tunnel::{
    Command, CommandPayload, CommandResponse, HeartbeatPayload, Operation, TransportFrame,
    TransportLink, TunnelTransport,
};

static INIT_LOGGER: Once = Once::new();

/// Quiet test logging; set `TEST_LOG=DEBUG` for more
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            Ok("WARN" | "ERROR") | _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Key derived for a fixed fake machine identity
pub fn test_machine_key() -> MachineKey {
    MachineKey::derive("integration-test-machine").unwrap()
}

/// Well-formed key for a fresh tenant
pub fn test_api_key() -> String {
    generate_api_key(Uuid::new_v4())
}

pub fn tunnel_url() -> Url {
    Url::parse("ws://control-plane.test/connector/tunnel").unwrap()
}

/// Offline queue in a fresh database under `dir`
pub async fn open_queue(dir: &Path) -> OfflineQueue {
    let url = format!("sqlite:{}", dir.join("offline-queue.db").display());
    OfflineQueue::open(&url).await.unwrap()
}

/// `SQLite` database with `customers` (3 rows) and `orders` (`order_count` rows)
pub async fn create_sqlite_fixture(dir: &Path, order_count: u32) -> PathBuf {
    let path = dir.join("fixture.db");
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query(
        r"
        CREATE TABLE customers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            balance REAL
        )
        ",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        r"
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER NOT NULL,
            total REAL,
            note TEXT
        )
        ",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        r"
        INSERT INTO customers (id, name, email, balance) VALUES
            (1, 'Ada', 'ada@example.com', 10.5),
            (2, 'Grace', NULL, 0.0),
            (3, 'O''Brien', 'ob@example.com', 99.25)
        ",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        r"
        WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < ?1)
        INSERT INTO orders (id, customer_id, total, note)
        SELECT n, (n % 3) + 1, n * 1.5, 'order ' || n FROM seq
        ",
    )
    .bind(order_count)
    .execute(&pool)
    .await
    .unwrap();

    pool.close().await;
    path
}

pub fn sqlite_config(path: &Path) -> DatabaseConfig {
    DatabaseConfig::sqlite(path.display().to_string())
}

pub fn command(id: &str, operation: Operation, payload: CommandPayload) -> Command {
    Command {
        command_id: id.to_owned(),
        execution_id: format!("exec-{id}"),
        activity_id: format!("activity-{id}"),
        operation,
        payload,
    }
}

pub fn query_command(id: &str, connection_id: Option<Uuid>, spec: QuerySpec) -> Command {
    command(
        id,
        Operation::Query,
        CommandPayload {
            connection_id: connection_id.map(|c| c.to_string()),
            query: Some(spec),
            ..CommandPayload::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Minimal HTTP stub
// ---------------------------------------------------------------------------

/// Serve `body` to every request on a local port; returns the base URL
pub async fn serve_http(content_type: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0_u8; 4096];
                let mut request = Vec::new();
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}/")
}

/// URL of a local port with nothing listening
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}

// ---------------------------------------------------------------------------
// Fake tunnel transport
// ---------------------------------------------------------------------------

/// Control-plane side of a fake link
pub struct RemoteEnd {
    pub to_agent: mpsc::Sender<TransportFrame>,
    pub from_agent: mpsc::Receiver<String>,
}

impl RemoteEnd {
    pub async fn send_event(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        self.to_agent
            .send(TransportFrame::Message(frame))
            .await
            .unwrap();
    }

    pub async fn next_envelope(&mut self) -> Value {
        let text = self.from_agent.recv().await.unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

/// Transport whose opens succeed or fail from a script
pub struct FakeTransport {
    script: Mutex<VecDeque<bool>>,
    default_ok: bool,
    opens: AtomicUsize,
    keys: Mutex<Vec<String>>,
    remotes: Mutex<VecDeque<RemoteEnd>>,
}

impl FakeTransport {
    /// Every open succeeds
    pub fn accepting() -> Arc<Self> {
        Self::scripted(Vec::new(), true)
    }

    /// Opens follow `outcomes`, then `then`
    pub fn scripted(outcomes: Vec<bool>, then: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            default_ok: then,
            opens: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
            remotes: Mutex::new(VecDeque::new()),
        })
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn presented_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    /// Oldest link not yet taken by the test
    pub fn take_remote(&self) -> RemoteEnd {
        self.remotes.lock().unwrap().pop_front().unwrap()
    }
}

#[async_trait]
impl TunnelTransport for FakeTransport {
    async fn open(&self, _url: &Url, api_key: &str) -> AppResult<TransportLink> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(api_key.to_owned());
        let ok = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_ok);
        if !ok {
            return Err(AppError::connection("connection refused"));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        self.remotes.lock().unwrap().push_back(RemoteEnd {
            to_agent: inbound_tx,
            from_agent: outbound_rx,
        });
        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Fake control plane
// ---------------------------------------------------------------------------

pub struct FakeControlPlane {
    response: KeyValidationResponse,
    validations: AtomicUsize,
    heartbeats: Mutex<Vec<(String, HeartbeatPayload)>>,
    fail_heartbeats: AtomicBool,
}

impl FakeControlPlane {
    pub fn accepting(connector_id: &str) -> Arc<Self> {
        Self::with_response(KeyValidationResponse {
            valid: true,
            tenant_id: Some("tenant-1".to_owned()),
            connector_id: Some(connector_id.to_owned()),
            message: None,
        })
    }

    pub fn rejecting(message: &str) -> Arc<Self> {
        Self::with_response(KeyValidationResponse {
            valid: false,
            message: Some(message.to_owned()),
            ..KeyValidationResponse::default()
        })
    }

    pub fn with_response(response: KeyValidationResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            validations: AtomicUsize::new(0),
            heartbeats: Mutex::new(Vec::new()),
            fail_heartbeats: AtomicBool::new(false),
        })
    }

    pub fn set_fail_heartbeats(&self, fail: bool) {
        self.fail_heartbeats.store(fail, Ordering::SeqCst);
    }

    pub fn validation_count(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> Vec<(String, HeartbeatPayload)> {
        self.heartbeats.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn validate_api_key(&self, _api_key: &str) -> AppResult<KeyValidationResponse> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    async fn send_heartbeat(
        &self,
        connector_id: &str,
        _api_key: &str,
        payload: &HeartbeatPayload,
    ) -> AppResult<()> {
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(AppError::external_service("Control plane", "503"));
        }
        self.heartbeats
            .lock()
            .unwrap()
            .push((connector_id.to_owned(), payload.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recording response sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<CommandResponse>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<CommandResponse> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn send_command_response(&self, response: &CommandResponse) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::delivery("Tunnel is not connected"));
        }
        self.sent.lock().unwrap().push(response.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Counting query executor
// ---------------------------------------------------------------------------

pub struct CountingExecutor {
    calls: AtomicUsize,
    failure: Option<AppError>,
    seen: Mutex<Vec<DatabaseConfig>>,
}

impl CountingExecutor {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failure: None,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: AppError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failure: Some(error),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_configs(&self) -> Vec<DatabaseConfig> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, config: &DatabaseConfig) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(config.clone());
        self.failure.clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn execute_query(
        &self,
        config: &DatabaseConfig,
        spec: &QuerySpec,
    ) -> AppResult<QueryResult> {
        self.record(config)?;
        let mut row = Map::new();
        row.insert("id".to_owned(), json!(1));
        Ok(QueryResult {
            columns: vec!["id".to_owned()],
            rows: vec![row],
            row_count: 1,
            execution_time_ms: 0,
            sql: format!("SELECT * FROM \"{}\"", spec.table),
        })
    }

    async fn get_databases(&self, config: &DatabaseConfig) -> AppResult<Vec<String>> {
        self.record(config)?;
        Ok(vec!["main".to_owned()])
    }

    async fn get_tables(
        &self,
        config: &DatabaseConfig,
        database: Option<&str>,
    ) -> AppResult<Vec<String>> {
        self.record(config)?;
        Ok(vec![database.unwrap_or("default").to_owned()])
    }

    async fn get_columns(
        &self,
        config: &DatabaseConfig,
        table: &str,
    ) -> AppResult<Vec<ColumnInfo>> {
        self.record(config)?;
        Ok(vec![ColumnInfo {
            name: format!("{table}_id"),
            data_type: "INTEGER".to_owned(),
            nullable: false,
            primary_key: true,
        }])
    }
}
