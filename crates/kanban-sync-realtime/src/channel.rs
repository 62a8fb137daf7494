//! Realtime channel manager.
//!
//! One background task per session owns the broker connection. It reconnects
//! with a fixed delay after any failure and keeps the set of requested topics
//! across reconnects, so a subscription made while disconnected is applied as
//! soon as a connection exists. Dependents read the connection state through a
//! `watch` channel to choose between push and polling.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kanban_sync_core::{SyncConfig, SyncError, SyncResult};
use kanban_sync_domain::BoardId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::transport::{BrokerConnection, BrokerFrame, BrokerTransport, ConnectOptions};

const TOPIC_PREFIX: &str = "/topic/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn board(board_id: BoardId) -> Self {
        Self(format!("board/{}", board_id))
    }

    pub fn import_job(board_id: BoardId, job_id: &str) -> Self {
        Self(format!("board/{}/import/{}", board_id, job_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wire destination, e.g. `/topic/board/7`.
    pub fn destination(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.0)
    }

    pub fn from_destination(destination: &str) -> Option<Self> {
        destination
            .strip_prefix(TOPIC_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| Self(name.to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

enum Command {
    Subscribe {
        id: u64,
        topic: Topic,
        tx: mpsc::Sender<String>,
        missed: Arc<AtomicU64>,
        established: oneshot::Sender<()>,
    },
    Unsubscribe {
        id: u64,
    },
}

struct Listener {
    id: u64,
    tx: mpsc::Sender<String>,
    /// Messages dropped because `tx` was full, until the subscriber takes the count.
    missed: Arc<AtomicU64>,
    /// Fired once the topic is subscribed on a live connection.
    established: Option<oneshot::Sender<()>>,
}

impl Listener {
    fn new(
        id: u64,
        tx: mpsc::Sender<String>,
        missed: Arc<AtomicU64>,
        established: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id,
            tx,
            missed,
            established: Some(established),
        }
    }

    fn acknowledge(&mut self) {
        if let Some(established) = self.established.take() {
            let _ = established.send(());
        }
    }
}

enum Served {
    Disconnected,
    Shutdown,
}

/// Requested topics and their local listeners. Survives reconnects.
#[derive(Default)]
struct Registry {
    topics: BTreeMap<Topic, Vec<Listener>>,
}

impl Registry {
    fn add(&mut self, topic: Topic, listener: Listener) -> bool {
        let listeners = self.topics.entry(topic).or_default();
        let is_new = listeners.is_empty();
        listeners.push(listener);
        is_new
    }

    /// Returns the topic when its last listener was removed.
    fn remove(&mut self, id: u64) -> Option<Topic> {
        let topic = self
            .topics
            .iter()
            .find(|(_, listeners)| listeners.iter().any(|l| l.id == id))
            .map(|(topic, _)| topic.clone())?;
        let listeners = self.topics.get_mut(&topic)?;
        listeners.retain(|l| l.id != id);
        if listeners.is_empty() {
            self.topics.remove(&topic);
            Some(topic)
        } else {
            None
        }
    }

    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                id,
                topic,
                tx,
                missed,
                established,
            } => {
                debug!(%topic, "Queued subscription until connected");
                self.add(topic, Listener::new(id, tx, missed, established));
            }
            Command::Unsubscribe { id } => {
                self.remove(id);
            }
        }
    }

    async fn apply_online(
        &mut self,
        command: Command,
        connection: &mut Box<dyn BrokerConnection>,
    ) -> SyncResult<()> {
        match command {
            Command::Subscribe {
                id,
                topic,
                tx,
                missed,
                established,
            } => {
                let destination = topic.destination();
                if self.add(topic.clone(), Listener::new(id, tx, missed, established)) {
                    connection.subscribe(&destination).await?;
                    info!(%topic, "Subscribed");
                }
                self.acknowledge(&topic);
            }
            Command::Unsubscribe { id } => {
                if let Some(topic) = self.remove(id) {
                    connection.unsubscribe(&topic.destination()).await?;
                    info!(%topic, "Unsubscribed");
                }
            }
        }
        Ok(())
    }

    fn acknowledge(&mut self, topic: &Topic) {
        if let Some(listeners) = self.topics.get_mut(topic) {
            listeners.iter_mut().for_each(Listener::acknowledge);
        }
    }

    fn deliver(&mut self, frame: BrokerFrame) {
        let Some(topic) = Topic::from_destination(&frame.destination) else {
            warn!(destination = %frame.destination, "Dropping frame with unrecognized destination");
            return;
        };
        let Some(listeners) = self.topics.get_mut(&topic) else {
            debug!(%topic, "Dropping frame for topic without listeners");
            return;
        };
        listeners.retain(|listener| match listener.tx.try_send(frame.body.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                listener.missed.fetch_add(1, Ordering::SeqCst);
                warn!(%topic, "Subscriber is not keeping up, dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    async fn serve(
        &mut self,
        connection: &mut Box<dyn BrokerConnection>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        state: &watch::Sender<ConnectionState>,
        heartbeat: Duration,
    ) -> Served {
        let topics: Vec<Topic> = self.topics.keys().cloned().collect();
        for topic in &topics {
            if let Err(e) = connection.subscribe(&topic.destination()).await {
                warn!(%topic, error = %e, "Resubscribe failed");
                return Served::Disconnected;
            }
            self.acknowledge(topic);
        }
        state.send_replace(ConnectionState::Connected);
        if !topics.is_empty() {
            info!(count = topics.len(), "Restored subscriptions");
        }

        // A zero period would panic inside `interval`.
        let mut ticker = tokio::time::interval(heartbeat.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                frame = connection.next_frame() => match frame {
                    Some(frame) => self.deliver(frame),
                    None => return Served::Disconnected,
                },
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.apply_online(command, connection).await {
                            warn!(error = %e, "Broker rejected subscription change");
                            return Served::Disconnected;
                        }
                    }
                    None => return Served::Shutdown,
                },
                _ = ticker.tick() => {
                    if let Err(e) = connection.heartbeat().await {
                        warn!(error = %e, "Heartbeat failed");
                        return Served::Disconnected;
                    }
                }
            }
        }
    }
}

async fn run(
    transport: Arc<dyn BrokerTransport>,
    options: ConnectOptions,
    reconnect_delay: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
) {
    let mut registry = Registry::default();
    loop {
        state.send_replace(ConnectionState::Connecting);
        match transport.connect(&options).await {
            Ok(mut connection) => {
                info!(url = %options.url, "Connected to broker");
                match registry
                    .serve(&mut connection, &mut commands, &state, options.heartbeat)
                    .await
                {
                    Served::Disconnected => warn!(url = %options.url, "Broker connection lost"),
                    Served::Shutdown => {
                        state.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                }
            }
            Err(e) => warn!(url = %options.url, error = %e, "Broker connection failed"),
        }
        state.send_replace(ConnectionState::Disconnected);

        let retry = tokio::time::sleep(reconnect_delay);
        tokio::pin!(retry);
        loop {
            tokio::select! {
                _ = &mut retry => break,
                command = commands.recv() => match command {
                    Some(command) => registry.apply_offline(command),
                    None => return,
                },
            }
        }
        debug!(delay_ms = reconnect_delay.as_millis() as u64, "Reconnecting");
    }
}

pub struct ChannelManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl ChannelManager {
    /// Spawns the connection task. Must be called inside a tokio runtime.
    pub fn start(
        transport: Arc<dyn BrokerTransport>,
        options: ConnectOptions,
        reconnect_delay: Duration,
        buffer: usize,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let handle = tokio::spawn(run(transport, options, reconnect_delay, rx, state_tx));
        Self {
            commands,
            state,
            task: Mutex::new(Some(handle)),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub fn from_config(
        transport: Arc<dyn BrokerTransport>,
        config: &SyncConfig,
        bearer: Option<String>,
    ) -> Self {
        let options = ConnectOptions {
            url: config.broker_url.clone(),
            heartbeat: config.heartbeat(),
            bearer,
        };
        Self::start(
            transport,
            options,
            config.reconnect_delay(),
            config.subscriber_buffer,
        )
    }

    /// Registers interest in `topic`. Applied immediately when connected,
    /// otherwise queued until the next successful connect.
    pub fn subscribe(&self, topic: Topic) -> SyncResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let missed = Arc::new(AtomicU64::new(0));
        let (established_tx, established_rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                id,
                topic: topic.clone(),
                tx,
                missed: missed.clone(),
                established: established_tx,
            })
            .map_err(|_| SyncError::ChannelClosed)?;
        Ok(Subscription {
            id,
            topic,
            rx,
            missed,
            established: Some(established_rx),
            is_established: false,
            commands: self.commands.clone(),
            active: true,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut state = self.state.clone();
        let connected = matches!(
            tokio::time::timeout(timeout, state.wait_for(|s| s.is_connected())).await,
            Ok(Ok(_))
        );
        connected
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|handle| !handle.is_finished()),
            Err(_) => false,
        }
    }

    /// Stops the connection task. Safe to call any number of times.
    pub fn shutdown(&self) {
        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            info!("Stopped realtime channel");
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A local listener on one topic. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    topic: Topic,
    rx: mpsc::Receiver<String>,
    missed: Arc<AtomicU64>,
    established: Option<oneshot::Receiver<()>>,
    is_established: bool,
    commands: mpsc::UnboundedSender<Command>,
    active: bool,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Next raw message body. `None` after unsubscribe or channel shutdown.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Number of messages dropped since the last call because this
    /// subscription's buffer was full. Resets the count.
    pub fn take_missed(&self) -> u64 {
        self.missed.swap(0, Ordering::SeqCst)
    }

    /// Drops everything already buffered. Returns how many messages were discarded.
    pub fn discard_buffered(&mut self) -> usize {
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// Waits until the broker has accepted this topic on a live connection.
    pub async fn wait_established(&mut self, timeout: Duration) -> bool {
        if self.is_established {
            return true;
        }
        let Some(established) = self.established.as_mut() else {
            return false;
        };
        match tokio::time::timeout(timeout, established).await {
            Ok(Ok(())) => {
                self.established = None;
                self.is_established = true;
                true
            }
            Ok(Err(_)) => {
                self.established = None;
                false
            }
            Err(_) => false,
        }
    }

    /// Idempotent; also safe after the channel has shut down.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.rx.close();
        if self.commands.send(Command::Unsubscribe { id: self.id }).is_err() {
            debug!(topic = %self.topic, "Channel already stopped");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;

    const DELAY: Duration = Duration::from_secs(5);

    fn manager(broker: &InMemoryBroker) -> ChannelManager {
        ChannelManager::start(
            Arc::new(broker.clone()),
            ConnectOptions {
                url: "memory://broker".to_string(),
                heartbeat: Duration::from_secs(4),
                bearer: None,
            },
            DELAY,
            16,
        )
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::board(7).as_str(), "board/7");
        assert_eq!(Topic::board(7).destination(), "/topic/board/7");
        assert_eq!(
            Topic::import_job(7, "job-1").destination(),
            "/topic/board/7/import/job-1"
        );
        assert_eq!(
            Topic::from_destination("/topic/board/7"),
            Some(Topic::board(7))
        );
        assert_eq!(Topic::from_destination("/queue/board/7"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_before_connect_is_applied_on_connect() {
        let broker = InMemoryBroker::new();
        broker.set_online(false).await;
        let channels = manager(&broker);

        let mut subscription = channels.subscribe(Topic::board(1)).unwrap();
        assert!(!subscription.wait_established(Duration::from_secs(1)).await);
        assert!(!channels.state().is_connected());

        broker.set_online(true).await;
        assert!(subscription.wait_established(Duration::from_secs(10)).await);
        assert!(channels.state().is_connected());

        assert_eq!(broker.publish("/topic/board/1", "event").await, 1);
        assert_eq!(subscription.recv().await.as_deref(), Some("event"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_fixed_delay() {
        let broker = InMemoryBroker::new();
        broker.set_online(false).await;
        let _channels = manager(&broker);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(broker.connect_attempts().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_restores_subscriptions() {
        let broker = InMemoryBroker::new();
        let channels = manager(&broker);
        let mut subscription = channels.subscribe(Topic::board(1)).unwrap();
        assert!(subscription.wait_established(Duration::from_secs(1)).await);

        let mut state = channels.watch_state();
        broker.set_online(false).await;
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();

        broker.set_online(true).await;
        assert!(channels.wait_until_connected(Duration::from_secs(10)).await);

        assert_eq!(broker.publish("/topic/board/1", "after").await, 1);
        assert_eq!(subscription.recv().await.as_deref(), Some("after"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_is_idempotent() {
        let broker = InMemoryBroker::new();
        let channels = manager(&broker);
        let mut first = channels.subscribe(Topic::board(1)).unwrap();
        let mut second = channels.subscribe(Topic::board(1)).unwrap();
        assert!(first.wait_established(Duration::from_secs(1)).await);
        assert!(second.wait_established(Duration::from_secs(1)).await);

        first.unsubscribe();
        first.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(broker.subscriber_count("/topic/board/1").await, 1);
        assert!(first.recv().await.is_none());

        second.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(broker.subscriber_count("/topic/board/1").await, 0);

        channels.shutdown();
        channels.shutdown();
        second.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!channels.is_running());
        assert!(matches!(
            channels.subscribe(Topic::board(2)),
            Err(SyncError::ChannelClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_reports_missed_messages() {
        let broker = InMemoryBroker::new();
        let channels = ChannelManager::start(
            Arc::new(broker.clone()),
            ConnectOptions {
                url: "memory://broker".to_string(),
                heartbeat: Duration::from_secs(4),
                bearer: None,
            },
            DELAY,
            2,
        );
        let mut subscription = channels.subscribe(Topic::board(1)).unwrap();
        assert!(subscription.wait_established(Duration::from_secs(1)).await);

        for n in 0..5 {
            broker.publish("/topic/board/1", format!("e{}", n)).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(subscription.take_missed(), 3);
        assert_eq!(subscription.take_missed(), 0);
        assert_eq!(subscription.discard_buffered(), 2);

        broker.publish("/topic/board/1", "e5").await;
        assert_eq!(subscription.recv().await.as_deref(), Some("e5"));
        assert_eq!(subscription.take_missed(), 0);
    }
}
