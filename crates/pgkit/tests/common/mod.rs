//! Scripted backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgkit::backend::command_tag;
use pgkit::listener::{ListenerConnection, ListenerConnector};
use pgkit::{
    Backend, BackendConnection, Client, ClientConfig, Dialect, EventBus, ExecutionResult,
    FieldInfo, InstanceRegistry, Notification, PgKitError, Result, Row, Schema, Value,
};
use tokio::sync::mpsc;

/// Backend that replays queued results and records every statement.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ExecutionResult>>>,
    pub queries: Arc<Mutex<Vec<String>>>,
    query_times: Mutex<Vec<tokio::time::Instant>>,
    pub init_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    init_failures: AtomicUsize,
    init_delay: Mutex<Option<Duration>>,
    listener: Mutex<Option<Arc<FakeListenerConnector>>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: Result<ExecutionResult>) {
        self.script.lock().push_back(result);
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        self.push(Ok(rows_result(rows)));
    }

    pub fn push_error(&self, err: PgKitError) {
        self.push(Err(err));
    }

    pub fn fail_next_inits(&self, count: usize) {
        self.init_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_init_delay(&self, delay: Duration) {
        *self.init_delay.lock() = Some(delay);
    }

    pub fn attach_listener(&self, connector: Arc<FakeListenerConnector>) {
        *self.listener.lock() = Some(connector);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    /// Time between consecutive pooled queries.
    pub fn query_gaps(&self) -> Vec<Duration> {
        self.query_times
            .lock()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn is_pooled(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.init_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.init_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.init_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PgKitError::connection_with_code("connect failed", "ECONNREFUSED"));
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<ExecutionResult> {
        self.queries.lock().push(sql.to_string());
        self.query_times.lock().push(tokio::time::Instant::now());
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(mut result)) => {
                result.command = command_tag(sql);
                Ok(result)
            }
            Some(Err(e)) => Err(e.with_sql(sql)),
            None => Ok(ExecutionResult::empty(sql)),
        }
    }

    async fn acquire(&self) -> Result<Box<dyn BackendConnection>> {
        Ok(Box::new(RecordingConnection {
            queries: self.queries.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn listener_connector(&self) -> Option<Arc<dyn ListenerConnector>> {
        self.listener
            .lock()
            .clone()
            .map(|c| c as Arc<dyn ListenerConnector>)
    }
}

struct RecordingConnection {
    queries: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl BackendConnection for RecordingConnection {
    async fn query(&mut self, sql: &str) -> Result<ExecutionResult> {
        self.queries.lock().push(sql.to_string());
        Ok(ExecutionResult::empty(sql))
    }
}

/// Result carrying `rows` with fields taken from the first row.
pub fn rows_result(rows: Vec<Row>) -> ExecutionResult {
    let mut fields: Vec<FieldInfo> = rows
        .first()
        .map(|row| {
            row.keys()
                .map(|name| FieldInfo {
                    name: name.clone(),
                    data_type_id: 25,
                })
                .collect()
        })
        .unwrap_or_default();
    fields.sort_by(|a, b| a.name.cmp(&b.name));

    ExecutionResult {
        row_count: Some(rows.len() as u64),
        rows,
        command: String::new(),
        fields,
    }
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Client over `backend` with a private registry.
pub fn client_with(
    backend: Arc<ScriptedBackend>,
    dialect: Dialect,
    schema: Schema,
    config: ClientConfig,
) -> (Client, Arc<InstanceRegistry>) {
    let registry = Arc::new(InstanceRegistry::new());
    let client = Client::with_backend(
        schema,
        dialect,
        config,
        backend,
        EventBus::new(),
        registry.clone(),
    );
    (client, registry)
}

// ============================================================================
// Listener fakes
// ============================================================================

/// Connector whose connections are fed through [`FakeListenerConnector::push`].
#[derive(Default)]
pub struct FakeListenerConnector {
    pub commands: Arc<Mutex<Vec<String>>>,
    feed: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl FakeListenerConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, channel: &str, payload: &str) {
        if let Some(feed) = self.feed.lock().as_ref() {
            let _ = feed.send(Notification {
                channel: channel.to_string(),
                payload: payload.to_string(),
                process_id: 1,
            });
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl ListenerConnector for FakeListenerConnector {
    async fn connect(&self) -> Result<Box<dyn ListenerConnection>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.feed.lock() = Some(sender);
        Ok(Box::new(FakeListenerConnection {
            commands: self.commands.clone(),
            feed: receiver,
        }))
    }
}

struct FakeListenerConnection {
    commands: Arc<Mutex<Vec<String>>>,
    feed: mpsc::UnboundedReceiver<Notification>,
}

#[async_trait]
impl ListenerConnection for FakeListenerConnection {
    async fn listen(&mut self, channel: &str) -> Result<()> {
        self.commands.lock().push(format!("LISTEN {}", channel));
        Ok(())
    }

    async fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.commands.lock().push(format!("UNLISTEN {}", channel));
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Notification>> {
        Ok(self.feed.recv().await)
    }
}
