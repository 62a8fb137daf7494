//! Progress tracking for background board imports.
//!
//! A job moves `PENDING -> IN_PROGRESS -> COMPLETED | FAILED`. Once a terminal
//! state has been seen no further status request is made. Progress comes from
//! the job's push topic when the realtime channel can carry it, otherwise from
//! fixed-interval polling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kanban_sync_core::SyncResult;
use kanban_sync_domain::BoardId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel::{ChannelManager, ConnectionState, Subscription, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportJobState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ImportJobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportJobState::Completed | ImportJobState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    /// Keep existing cards and add or update from the file.
    Merge,
    /// Replace the board's cards with the file contents.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    pub row_number: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatus {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub board_id: Option<BoardId>,
    pub state: ImportJobState,
    #[serde(default)]
    pub total_rows: u32,
    #[serde(default)]
    pub processed_rows: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub progress_percent: Option<u8>,
    /// Per-row failures of a partially failed import.
    #[serde(default)]
    pub errors: Vec<ImportRowError>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ImportJobStatus {
    pub fn new(job_id: impl Into<String>, state: ImportJobState) -> Self {
        Self {
            job_id: job_id.into(),
            board_id: None,
            state,
            total_rows: 0,
            processed_rows: 0,
            success_count: 0,
            failure_count: 0,
            progress_percent: None,
            errors: Vec::new(),
            message: None,
        }
    }

    /// Reported percentage, or one derived from the row counters.
    pub fn progress(&self) -> u8 {
        if let Some(percent) = self.progress_percent {
            return percent.min(100);
        }
        if self.total_rows == 0 {
            return if self.state == ImportJobState::Completed {
                100
            } else {
                0
            };
        }
        let percent = u64::from(self.processed_rows) * 100 / u64::from(self.total_rows);
        percent.min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStart {
    pub job_id: String,
    pub state: ImportJobState,
}

/// REST endpoints of the import job service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImportJobApi: Send + Sync {
    async fn start(
        &self,
        board_id: BoardId,
        mode: ImportMode,
        file_name: String,
        contents: Vec<u8>,
    ) -> SyncResult<ImportJobStart>;

    async fn status(&self, job_id: String) -> SyncResult<ImportJobStatus>;
}

/// Status fetcher that stops asking once the job is finished.
pub struct ImportJobPoller {
    api: Arc<dyn ImportJobApi>,
    job_id: String,
    latest: Option<ImportJobStatus>,
}

impl ImportJobPoller {
    pub fn new(api: Arc<dyn ImportJobApi>, job_id: impl Into<String>) -> Self {
        Self {
            api,
            job_id: job_id.into(),
            latest: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn latest(&self) -> Option<&ImportJobStatus> {
        self.latest.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.latest
            .as_ref()
            .is_some_and(|status| status.state.is_terminal())
    }

    /// Fetches the job status, unless a terminal state was already observed.
    /// A failed fetch is logged and leaves the last known status in place.
    pub async fn poll(&mut self) -> Option<&ImportJobStatus> {
        if self.is_finished() {
            return self.latest.as_ref();
        }
        match self.api.status(self.job_id.clone()).await {
            Ok(status) => {
                self.absorb(status);
            }
            Err(e) => warn!(job_id = %self.job_id, error = %e, "Import status fetch failed"),
        }
        self.latest.as_ref()
    }

    /// Records a status update. Returns false when it was ignored because the
    /// job had already finished.
    pub fn absorb(&mut self, status: ImportJobStatus) -> bool {
        if self.is_finished() {
            debug!(job_id = %self.job_id, state = ?status.state, "Ignoring update for finished import");
            return false;
        }
        if status.state.is_terminal() {
            info!(
                job_id = %self.job_id,
                state = ?status.state,
                succeeded = status.success_count,
                failed = status.failure_count,
                "Import finished"
            );
        }
        self.latest = Some(status);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    Push,
    Poll,
}

/// Follows one import job in a background task until it finishes or is cancelled.
pub struct ImportTracker {
    job_id: String,
    mode: TrackingMode,
    updates: watch::Receiver<Option<ImportJobStatus>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ImportTracker {
    /// Uses the push topic when `channels` is connected and the subscription
    /// is accepted within `subscribe_timeout`; polls every `poll_interval` otherwise.
    /// A push-tracked job polls while the channel is down and fetches once more
    /// when it comes back.
    pub async fn start(
        api: Arc<dyn ImportJobApi>,
        channels: Option<&ChannelManager>,
        board_id: BoardId,
        job_id: String,
        poll_interval: Duration,
        subscribe_timeout: Duration,
    ) -> Self {
        let poller = ImportJobPoller::new(api, job_id.clone());
        let push = match channels {
            Some(channels) if channels.state().is_connected() => {
                push_subscription(channels, board_id, &job_id, subscribe_timeout)
                    .await
                    .map(|subscription| (subscription, channels.watch_state()))
            }
            _ => None,
        };

        let (tx, updates) = watch::channel(None);
        let (mode, handle) = match push {
            Some((subscription, connection)) => (
                TrackingMode::Push,
                tokio::spawn(follow_push(poller, subscription, connection, poll_interval, tx)),
            ),
            None => (
                TrackingMode::Poll,
                tokio::spawn(follow_poll(poller, poll_interval, tx)),
            ),
        };
        info!(board_id, job_id = %job_id, ?mode, "Tracking import job");

        Self {
            job_id,
            mode,
            updates,
            task: Mutex::new(Some(handle)),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Strategy chosen at start.
    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn latest(&self) -> Option<ImportJobStatus> {
        self.updates.borrow().clone()
    }

    pub fn updates(&self) -> watch::Receiver<Option<ImportJobStatus>> {
        self.updates.clone()
    }

    /// Resolves with the terminal status, or with the last known status if
    /// tracking stopped first.
    pub async fn wait_finished(&self) -> Option<ImportJobStatus> {
        let mut updates = self.updates.clone();
        let finished = updates
            .wait_for(|status| status.as_ref().is_some_and(|s| s.state.is_terminal()))
            .await
            .map(|status| status.clone());
        match finished {
            Ok(status) => status,
            Err(_) => self.latest(),
        }
    }

    /// Stops tracking. Safe to call repeatedly and after the job finished.
    pub fn cancel(&self) {
        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if !handle.is_finished() {
                debug!(job_id = %self.job_id, "Cancelled import tracking");
            }
            handle.abort();
        }
    }
}

impl Drop for ImportTracker {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn push_subscription(
    channels: &ChannelManager,
    board_id: BoardId,
    job_id: &str,
    timeout: Duration,
) -> Option<Subscription> {
    let mut subscription = match channels.subscribe(Topic::import_job(board_id, job_id)) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(job_id, error = %e, "Import topic unavailable, polling instead");
            return None;
        }
    };
    if subscription.wait_established(timeout).await {
        Some(subscription)
    } else {
        warn!(job_id, "Import topic not confirmed in time, polling instead");
        None
    }
}

fn poll_ticker(interval: Duration) -> Interval {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn publish(tx: &watch::Sender<Option<ImportJobStatus>>, latest: Option<&ImportJobStatus>) {
    if let Some(latest) = latest {
        tx.send_replace(Some(latest.clone()));
    }
}

async fn follow_push(
    mut poller: ImportJobPoller,
    mut subscription: Subscription,
    mut connection: watch::Receiver<ConnectionState>,
    interval: Duration,
    tx: watch::Sender<Option<ImportJobStatus>>,
) {
    // Progress made before the subscription existed is only visible by fetching.
    publish(&tx, poller.poll().await);

    // Set while the channel is down; polling covers the gap.
    let mut outage: Option<Interval> = None;
    // The connection changed while pushing, possibly a reconnect we never saw as down.
    let mut resync = false;
    let mut channel_gone = false;

    while !poller.is_finished() && !channel_gone {
        let connected = connection.borrow_and_update().is_connected();
        if !connected {
            resync = false;
            if outage.is_none() {
                warn!(job_id = %poller.job_id(), "Realtime channel down, polling import status");
                outage = Some(poll_ticker(interval));
            }
        } else if outage.take().is_some() || std::mem::take(&mut resync) {
            info!(job_id = %poller.job_id(), "Realtime channel connected, resuming push updates");
            // Updates pushed while disconnected were never delivered.
            publish(&tx, poller.poll().await);
            continue;
        }

        match outage.as_mut() {
            Some(ticker) => tokio::select! {
                _ = ticker.tick() => publish(&tx, poller.poll().await),
                changed = connection.changed() => channel_gone = changed.is_err(),
            },
            None => tokio::select! {
                body = subscription.recv() => match body {
                    Some(body) => match serde_json::from_str::<ImportJobStatus>(&body) {
                        Ok(status) => {
                            if poller.absorb(status) {
                                publish(&tx, poller.latest());
                            }
                        }
                        Err(e) => warn!(job_id = %poller.job_id(), error = %e, "Dropping import progress message"),
                    },
                    None => channel_gone = true,
                },
                changed = connection.changed() => match changed {
                    Ok(()) => resync = true,
                    Err(_) => channel_gone = true,
                },
            },
        }
    }
    subscription.unsubscribe();

    if !poller.is_finished() {
        debug!(job_id = %poller.job_id(), "Realtime channel stopped, polling import status");
        follow_poll(poller, interval, tx).await;
    }
}

async fn follow_poll(
    mut poller: ImportJobPoller,
    interval: Duration,
    tx: watch::Sender<Option<ImportJobStatus>>,
) {
    let mut ticker = poll_ticker(interval);
    loop {
        ticker.tick().await;
        publish(&tx, poller.poll().await);
        if poller.is_finished() {
            break;
        }
    }
}
