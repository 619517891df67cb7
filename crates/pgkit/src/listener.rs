//! LISTEN/NOTIFY subscriptions over a dedicated connection.
//!
//! A background task owns the connection and processes commands from an
//! mpsc queue, so LISTEN/UNLISTEN are serialized with notification
//! delivery. Lost connections are re-established with exponential backoff
//! and every subscribed channel is re-LISTENed.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::events::{ClientEvent, EventBus};
use crate::{PgKitError, Result};

// ============================================================================
// Connection seam
// ============================================================================

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
    /// Backend process that sent the notification
    pub process_id: u32,
}

/// A dedicated connection able to LISTEN.
///
/// `recv` must be cancel-safe: it is raced against the command queue.
#[async_trait]
pub trait ListenerConnection: Send {
    async fn listen(&mut self, channel: &str) -> Result<()>;

    async fn unlisten(&mut self, channel: &str) -> Result<()>;

    /// Next notification; `Ok(None)` means the connection was lost.
    async fn recv(&mut self) -> Result<Option<Notification>>;
}

/// Opens listener connections.
#[async_trait]
pub trait ListenerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ListenerConnection>>;
}

/// Callback invoked for each notification on a channel.
pub type NotificationCallback = Arc<dyn Fn(&Notification) + Send + Sync>;

// ============================================================================
// Configuration & state
// ============================================================================

/// Reconnect backoff for the listener connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Connection state of the listener task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Active,
    Reconnecting,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenerState::Disconnected => "disconnected",
            ListenerState::Connecting => "connecting",
            ListenerState::Active => "active",
            ListenerState::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Shared registry
// ============================================================================

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Listen { channel: String, reply: Reply },
    Unlisten { channel: String, reply: Reply },
    Shutdown { reply: oneshot::Sender<()> },
}

#[derive(Default)]
struct ChannelSubscribers {
    handles: HashMap<u64, Vec<NotificationCallback>>,
}

struct Shared {
    connector: Arc<dyn ListenerConnector>,
    policy: ReconnectPolicy,
    events: EventBus,
    channels: Mutex<HashMap<String, ChannelSubscribers>>,
    state: Mutex<ListenerState>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    /// Serializes subscribe/unsubscribe so a channel only appears in
    /// `channels` once its LISTEN has succeeded.
    subscribe_gate: tokio::sync::Mutex<()>,
    next_handle: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ListenerState) {
        *self.state.lock() = state;
    }

    fn callbacks_for(&self, channel: &str) -> Vec<NotificationCallback> {
        self.channels
            .lock()
            .get(channel)
            .map(|subs| subs.handles.values().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Listener
// ============================================================================

/// LISTEN/NOTIFY multiplexer. Cheap to clone.
#[derive(Clone)]
pub struct Listener {
    shared: Arc<Shared>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("state", &self.state())
            .field("channels", &self.channels())
            .finish()
    }
}

impl Listener {
    pub fn new(connector: Arc<dyn ListenerConnector>, events: EventBus) -> Self {
        Self::with_policy(connector, events, ReconnectPolicy::default())
    }

    pub fn with_policy(
        connector: Arc<dyn ListenerConnector>,
        events: EventBus,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                policy,
                events,
                channels: Mutex::new(HashMap::new()),
                state: Mutex::new(ListenerState::Disconnected),
                commands: Mutex::new(None),
                subscribe_gate: tokio::sync::Mutex::new(()),
                next_handle: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.lock()
    }

    /// Channels with at least one live subscription.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.shared.channels.lock().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Subscribe to `channel`, issuing LISTEN on the first subscription.
    ///
    /// A subscriber arriving while the first LISTEN is in flight waits for
    /// it, and issues its own LISTEN if that one failed.
    ///
    /// # Errors
    ///
    /// Fails when the listener is closed or the LISTEN could not be issued.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(PgKitError::connection("Listener is closed"));
        }
        if channel.is_empty() {
            return Err(PgKitError::Configuration("Channel name cannot be empty".to_string()));
        }

        let _gate = self.shared.subscribe_gate.lock().await;
        let listening = self.shared.channels.lock().contains_key(channel);
        if !listening {
            self.send(|reply| Command::Listen {
                channel: channel.to_string(),
                reply,
            })
            .await?;
            debug!(channel, "Subscribed to channel");
        }

        let id = self.shared.next_handle.fetch_add(1, Ordering::SeqCst);
        {
            let mut channels = self.shared.channels.lock();
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(PgKitError::connection("Listener is closed"));
            }
            channels
                .entry(channel.to_string())
                .or_default()
                .handles
                .insert(id, Vec::new());
        }

        Ok(Subscription {
            shared: self.shared.clone(),
            channel: channel.to_string(),
            id,
            closed: AtomicBool::new(false),
        })
    }

    /// Stop the background task and drop every subscription.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sender = self.shared.commands.lock().take();
        if let Some(sender) = sender {
            let (reply, done) = oneshot::channel();
            if sender.send(Command::Shutdown { reply }).is_ok() {
                let _ = done.await;
            }
        }
        self.shared.channels.lock().clear();
        self.shared.set_state(ListenerState::Disconnected);
    }

    async fn send(&self, build: impl FnOnce(Reply) -> Command) -> Result<()> {
        send_command(&self.shared, build).await
    }
}

fn remove_handle(shared: &Shared, channel: &str, id: u64) -> bool {
    let mut channels = shared.channels.lock();
    let Some(subs) = channels.get_mut(channel) else {
        return false;
    };
    subs.handles.remove(&id);
    if subs.handles.is_empty() {
        channels.remove(channel);
        return true;
    }
    false
}

async fn send_command(shared: &Arc<Shared>, build: impl FnOnce(Reply) -> Command) -> Result<()> {
    let sender = {
        let mut guard = shared.commands.lock();
        if shared.closed.load(Ordering::SeqCst) {
            return Err(PgKitError::connection("Listener is closed"));
        }
        guard
            .get_or_insert_with(|| spawn_worker(shared.clone()))
            .clone()
    };

    let (reply, response) = oneshot::channel();
    sender
        .send(build(reply))
        .map_err(|_| PgKitError::connection("Listener task has stopped"))?;
    response
        .await
        .map_err(|_| PgKitError::connection("Listener task has stopped"))?
}

fn spawn_worker(shared: Arc<Shared>) -> mpsc::UnboundedSender<Command> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let worker = Worker {
        shared,
        commands: receiver,
        conn: None,
        listening: BTreeSet::new(),
    };
    tokio::spawn(worker.run());
    sender
}

// ============================================================================
// Subscription handle
// ============================================================================

/// Handle for one subscription to a channel.
pub struct Subscription {
    shared: Arc<Shared>,
    channel: String,
    id: u64,
    closed: AtomicBool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Register a callback for notifications on this channel.
    pub fn on_notification<F>(&self, callback: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut channels = self.shared.channels.lock();
        if let Some(handles) = channels
            .get_mut(&self.channel)
            .and_then(|subs| subs.handles.get_mut(&self.id))
        {
            handles.push(Arc::new(callback));
        }
    }

    /// Drop this subscription; UNLISTEN when it was the last one on the channel.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _gate = self.shared.subscribe_gate.lock().await;
        if !remove_handle(&self.shared, &self.channel, self.id) {
            return Ok(());
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        debug!(channel = %self.channel, "Last subscriber left, unlistening");
        send_command(&self.shared, |reply| Command::Unlisten {
            channel: self.channel.clone(),
            reply,
        })
        .await
    }
}

// ============================================================================
// Worker
// ============================================================================

enum Step {
    Command(Option<Command>),
    Received(Result<Option<Notification>>),
}

struct Worker {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    conn: Option<Box<dyn ListenerConnection>>,
    listening: BTreeSet<String>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let step = match self.conn.as_mut() {
                Some(conn) => tokio::select! {
                    cmd = self.commands.recv() => Step::Command(cmd),
                    received = conn.recv() => Step::Received(received),
                },
                None => Step::Command(self.commands.recv().await),
            };

            match step {
                Step::Command(None) => break,
                Step::Command(Some(Command::Shutdown { reply })) => {
                    self.conn = None;
                    self.shared.set_state(ListenerState::Disconnected);
                    let _ = reply.send(());
                    break;
                }
                Step::Command(Some(Command::Listen { channel, reply })) => {
                    let result = self.listen(&channel).await;
                    let _ = reply.send(result);
                }
                Step::Command(Some(Command::Unlisten { channel, reply })) => {
                    let result = self.unlisten(&channel).await;
                    let _ = reply.send(result);
                }
                Step::Received(Ok(Some(notification))) => self.dispatch(notification),
                Step::Received(Ok(None)) => {
                    self.connection_lost("connection closed".to_string()).await;
                }
                Step::Received(Err(e)) => self.connection_lost(e.to_string()).await,
            }
        }
        debug!("Listener task stopped");
    }

    async fn listen(&mut self, channel: &str) -> Result<()> {
        if self.conn.is_none() {
            self.shared.set_state(ListenerState::Connecting);
            match open_connection(self.shared.connector.clone(), self.tracked()).await {
                Ok(conn) => self.activate(conn),
                Err(e) => {
                    self.shared.set_state(ListenerState::Disconnected);
                    return Err(e);
                }
            }
        }

        let Some(conn) = self.conn.as_mut() else {
            return Err(PgKitError::connection("Listener is not connected"));
        };
        match conn.listen(channel).await {
            Ok(()) => {
                self.listening.insert(channel.to_string());
                Ok(())
            }
            Err(e) => {
                if e.is_connection_error() {
                    self.conn = None;
                    self.shared.set_state(ListenerState::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.listening.remove(channel);
        match self.conn.as_mut() {
            Some(conn) => conn.unlisten(channel).await,
            None => Ok(()),
        }
    }

    fn tracked(&self) -> Vec<String> {
        self.listening.iter().cloned().collect()
    }

    fn activate(&mut self, conn: Box<dyn ListenerConnection>) {
        self.conn = Some(conn);
        self.shared.set_state(ListenerState::Active);
        self.shared.events.emit(ClientEvent::ListenerConnect);
    }

    fn dispatch(&self, notification: Notification) {
        let callbacks = self.shared.callbacks_for(&notification.channel);
        debug!(
            channel = %notification.channel,
            callbacks = callbacks.len(),
            "Dispatching notification"
        );
        for callback in &callbacks {
            callback(&notification);
        }
        self.shared
            .events
            .emit(ClientEvent::Notification(notification));
    }

    async fn connection_lost(&mut self, reason: String) {
        self.conn = None;
        warn!(reason = %reason, "Listener connection lost");
        self.shared.events.emit(ClientEvent::ListenerError {
            message: format!("Listener connection lost: {}", reason),
        });
        self.reconnect().await;
    }

    async fn reconnect(&mut self) {
        self.shared.set_state(ListenerState::Reconnecting);
        let policy = self.shared.policy;

        for attempt in 0..policy.max_attempts {
            tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            if self.shared.closed.load(Ordering::SeqCst) {
                break;
            }
            match open_connection(self.shared.connector.clone(), self.tracked()).await {
                Ok(conn) => {
                    info!(
                        attempt = attempt + 1,
                        channels = self.listening.len(),
                        "Listener reconnected"
                    );
                    self.activate(conn);
                    return;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Listener reconnect failed");
                }
            }
        }

        self.shared.set_state(ListenerState::Disconnected);
        self.shared.events.emit(ClientEvent::ListenerError {
            message: format!(
                "Listener failed to reconnect after {} attempts",
                policy.max_attempts
            ),
        });
    }
}

/// Connect and LISTEN on every channel in `channels`.
///
/// Takes owned arguments so the worker is not borrowed across the connect.
async fn open_connection(
    connector: Arc<dyn ListenerConnector>,
    channels: Vec<String>,
) -> Result<Box<dyn ListenerConnection>> {
    let mut conn = connector.connect().await?;
    for channel in &channels {
        conn.listen(channel).await?;
    }
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Scripted connector: each connection reads from a fresh queue and a
    /// `None` pushed into the queue simulates a dropped connection.
    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        fail_connects: AtomicUsize,
        connect_delay: Mutex<Option<Duration>>,
        log: Arc<Mutex<Vec<String>>>,
        feed: Arc<Mutex<Option<mpsc::UnboundedSender<Option<Notification>>>>>,
    }

    impl FakeConnector {
        fn push(&self, channel: &str, payload: &str) {
            if let Some(feed) = self.feed.lock().as_ref() {
                let _ = feed.send(Some(Notification {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                    process_id: 7,
                }));
            }
        }

        fn drop_connection(&self) {
            if let Some(feed) = self.feed.lock().as_ref() {
                let _ = feed.send(None);
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    struct FakeConnection {
        log: Arc<Mutex<Vec<String>>>,
        feed: mpsc::UnboundedReceiver<Option<Notification>>,
    }

    #[async_trait]
    impl ListenerConnection for FakeConnection {
        async fn listen(&mut self, channel: &str) -> Result<()> {
            self.log.lock().push(format!("LISTEN {}", channel));
            Ok(())
        }

        async fn unlisten(&mut self, channel: &str) -> Result<()> {
            self.log.lock().push(format!("UNLISTEN {}", channel));
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Notification>> {
            match self.feed.recv().await {
                Some(Some(notification)) => Ok(Some(notification)),
                _ => Ok(None),
            }
        }
    }

    #[async_trait]
    impl ListenerConnector for FakeConnector {
        async fn connect(&self) -> Result<Box<dyn ListenerConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let delay = *self.connect_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_connects.load(Ordering::SeqCst) > 0 {
                self.fail_connects.fetch_sub(1, Ordering::SeqCst);
                return Err(PgKitError::connection_with_code("refused", "ECONNREFUSED"));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *self.feed.lock() = Some(tx);
            Ok(Box::new(FakeConnection {
                log: self.log.clone(),
                feed: rx,
            }))
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts: 5,
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_reconnect_backoff() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_listen_once_per_channel() {
        let connector = Arc::new(FakeConnector::default());
        let listener = Listener::with_policy(connector.clone(), EventBus::new(), fast_policy());

        let a = listener.subscribe("jobs").await.unwrap();
        let b = listener.subscribe("jobs").await.unwrap();
        assert_eq!(listener.state(), ListenerState::Active);
        assert_eq!(connector.log(), vec!["LISTEN jobs".to_string()]);

        a.close().await.unwrap();
        assert_eq!(connector.log().len(), 1);
        b.close().await.unwrap();
        assert_eq!(connector.log().last().map(String::as_str), Some("UNLISTEN jobs"));
        assert!(listener.channels().is_empty());

        listener.close().await;
    }

    #[tokio::test]
    async fn test_notifications_reach_every_callback() {
        let connector = Arc::new(FakeConnector::default());
        let listener = Listener::with_policy(connector.clone(), EventBus::new(), fast_policy());

        let hits = Arc::new(AtomicUsize::new(0));
        let a = listener.subscribe("jobs").await.unwrap();
        let b = listener.subscribe("jobs").await.unwrap();
        for sub in [&a, &b] {
            let hits = hits.clone();
            sub.on_notification(move |n| {
                assert_eq!(n.payload, "42");
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        connector.push("jobs", "42");
        connector.push("other", "ignored");
        wait_for(|| hits.load(Ordering::SeqCst) == 2).await;

        listener.close().await;
    }

    #[tokio::test]
    async fn test_reconnect_relistens_all_channels() {
        let connector = Arc::new(FakeConnector::default());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let listener = Listener::with_policy(connector.clone(), events, fast_policy());

        let _a = listener.subscribe("alpha").await.unwrap();
        let _b = listener.subscribe("beta").await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ClientEvent::ListenerConnect));

        connector.fail_connects.store(1, Ordering::SeqCst);
        connector.drop_connection();

        assert!(matches!(rx.recv().await.unwrap(), ClientEvent::ListenerError { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ClientEvent::ListenerConnect));
        assert_eq!(listener.state(), ListenerState::Active);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);

        let log = connector.log();
        assert_eq!(log.iter().filter(|l| *l == "LISTEN alpha").count(), 2);
        assert_eq!(log.iter().filter(|l| *l == "LISTEN beta").count(), 2);

        listener.close().await;
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let connector = Arc::new(FakeConnector::default());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let listener = Listener::with_policy(connector.clone(), events, fast_policy());

        let _sub = listener.subscribe("jobs").await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ClientEvent::ListenerConnect));

        connector.fail_connects.store(100, Ordering::SeqCst);
        connector.drop_connection();

        assert!(matches!(rx.recv().await.unwrap(), ClientEvent::ListenerError { .. }));
        match rx.recv().await.unwrap() {
            ClientEvent::ListenerError { message } => assert!(message.contains("5 attempts")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(listener.state(), ListenerState::Disconnected);

        listener.close().await;
    }

    #[tokio::test]
    async fn test_subscribe_after_close_fails() {
        let listener = Listener::new(Arc::new(FakeConnector::default()), EventBus::new());
        listener.close().await;
        assert!(listener.subscribe("jobs").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_listen_does_not_leave_channel() {
        let connector = Arc::new(FakeConnector::default());
        connector.fail_connects.store(1, Ordering::SeqCst);
        let listener = Listener::with_policy(connector.clone(), EventBus::new(), fast_policy());

        assert!(listener.subscribe("jobs").await.is_err());
        assert!(listener.channels().is_empty());
        assert_eq!(listener.state(), ListenerState::Disconnected);

        assert!(listener.subscribe("jobs").await.is_ok());
        listener.close().await;
    }

    #[tokio::test]
    async fn test_waiting_subscriber_listens_after_failed_first_listen() {
        let connector = Arc::new(FakeConnector::default());
        *connector.connect_delay.lock() = Some(Duration::from_millis(50));
        connector.fail_connects.store(1, Ordering::SeqCst);
        let listener = Listener::with_policy(connector.clone(), EventBus::new(), fast_policy());

        let (first, second) = tokio::join!(listener.subscribe("jobs"), listener.subscribe("jobs"));
        assert!(first.is_err());
        let second = second.unwrap();

        assert_eq!(listener.channels(), vec!["jobs".to_string()]);
        assert_eq!(listener.state(), ListenerState::Active);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(connector.log(), vec!["LISTEN jobs".to_string()]);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        second.on_notification(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        connector.push("jobs", "1");
        wait_for(|| hits.load(Ordering::SeqCst) == 1).await;

        listener.close().await;
    }
}
