//! Background mail polling.
//!
//! One supervisor task owns a dynamic set of per-user poll workers. On a
//! fixed interval (or on demand) it resyncs that set against the accounts
//! currently connected in the store: new connections get a worker, removed
//! connections get theirs stopped. Each worker polls its mailbox for
//! unread messages, dedups recently seen ids, and feeds the rest through
//! the ingestion pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::PROVIDER_GOOGLE;
use crate::store::SqliteStore;

use super::dedup::RecentIds;
use super::pipeline::{EmailContent, Ingestor};

/// Default interval between worker-set resyncs
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Default interval between unread polls within one worker
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Per-worker dedup cache capacity
const DEDUP_CAP: usize = 1000;

/// What a poll worker needs to distinguish about mail-source failures
#[derive(Debug, Error)]
pub enum MailError {
    /// No usable connection; quiet until the user connects
    #[error("account not connected")]
    NotConnected,

    /// Stored authorization needs the user to reconnect
    #[error("authorization expired, account must be reconnected")]
    Reauthorize,

    /// Anything worth retrying on the next poll
    #[error("{0}")]
    Transient(String),
}

/// Pull-style mailbox the supervisor polls on a user's behalf
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_unread(&self, user_id: Uuid) -> Result<Vec<EmailContent>, MailError>;

    async fn mark_read(&self, user_id: Uuid, remote_id: &str) -> Result<(), MailError>;
}

enum SupervisorCmd {
    Resync,
    Status(oneshot::Sender<SupervisorStatus>),
}

/// Snapshot of the active worker set
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    /// Users with a live poll worker, sorted
    pub active_users: Vec<Uuid>,
}

#[derive(Debug, Error)]
#[error("mail supervisor is not running")]
pub struct SupervisorDown;

/// Handle to a running supervisor task
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<SupervisorCmd>,
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Re-check connected accounts now instead of at the next tick.
    pub async fn resync_now(&self) -> Result<(), SupervisorDown> {
        self.cmd_tx
            .send(SupervisorCmd::Resync)
            .await
            .map_err(|_| SupervisorDown)
    }

    pub async fn status(&self) -> Result<SupervisorStatus, SupervisorDown> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(SupervisorCmd::Status(tx))
            .await
            .map_err(|_| SupervisorDown)?;
        rx.await.map_err(|_| SupervisorDown)
    }

    /// Stop the supervisor and every worker, waiting for them to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Owns the worker set; consumed by [`PollSupervisor::start`]
pub struct PollSupervisor {
    store: Arc<SqliteStore>,
    mail: Arc<dyn MailSource>,
    ingestor: Arc<Ingestor>,
    resync_interval: Duration,
    poll_interval: Duration,
}

impl PollSupervisor {
    pub fn new(store: Arc<SqliteStore>, mail: Arc<dyn MailSource>, ingestor: Arc<Ingestor>) -> Self {
        Self {
            store,
            mail,
            ingestor,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_intervals(mut self, resync: Duration, poll: Duration) -> Self {
        self.resync_interval = resync;
        self.poll_interval = poll;
        self
    }

    /// Spawn the supervisor task. The first resync happens immediately, so
    /// accounts connected before startup begin polling right away.
    pub fn start(self) -> SupervisorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(cmd_rx, stop_rx));
        SupervisorHandle {
            cmd_tx,
            stop_tx,
            task,
        }
    }

    async fn run(
        self,
        mut cmd_rx: mpsc::Receiver<SupervisorCmd>,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        info!("mail poll supervisor started");
        let mut workers: HashMap<Uuid, WorkerHandle> = HashMap::new();

        let mut tick = tokio::time::interval(self.resync_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => self.resync(&mut workers).await,
                cmd = cmd_rx.recv() => match cmd {
                    Some(SupervisorCmd::Resync) => self.resync(&mut workers).await,
                    Some(SupervisorCmd::Status(reply)) => {
                        let mut active_users: Vec<Uuid> = workers.keys().copied().collect();
                        active_users.sort();
                        let _ = reply.send(SupervisorStatus { active_users });
                    }
                    None => break,
                },
                _ = stop_rx.recv() => break,
            }
        }

        for (user_id, worker) in workers.drain() {
            debug!(%user_id, "stopping mail worker");
            worker.stop().await;
        }
        info!("mail poll supervisor stopped");
    }

    /// Reconcile the worker set with currently-connected accounts.
    async fn resync(&self, workers: &mut HashMap<Uuid, WorkerHandle>) {
        let connected: HashSet<Uuid> = match self.store.users_with_connection(PROVIDER_GOOGLE) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                error!("could not list connected accounts: {e}");
                return;
            }
        };

        let stale: Vec<Uuid> = workers
            .keys()
            .filter(|id| !connected.contains(id))
            .copied()
            .collect();
        for user_id in stale {
            if let Some(worker) = workers.remove(&user_id) {
                info!(%user_id, "mail connection gone, stopping worker");
                worker.stop().await;
            }
        }

        for user_id in connected {
            if !workers.contains_key(&user_id) {
                info!(%user_id, "starting mail worker");
                workers.insert(user_id, self.spawn_worker(user_id));
            }
        }
    }

    fn spawn_worker(&self, user_id: Uuid) -> WorkerHandle {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let worker = MailWorker {
            user_id,
            mail: self.mail.clone(),
            ingestor: self.ingestor.clone(),
            poll_interval: self.poll_interval,
            seen: RecentIds::new(DEDUP_CAP),
        };
        let task = tokio::spawn(worker.run(stop_rx));
        WorkerHandle { stop_tx, task }
    }
}

struct WorkerHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

struct MailWorker {
    user_id: Uuid,
    mail: Arc<dyn MailSource>,
    ingestor: Arc<Ingestor>,
    poll_interval: Duration,
    seen: RecentIds,
}

impl MailWorker {
    async fn run(mut self, mut stop_rx: mpsc::Receiver<()>) {
        info!(user_id = %self.user_id, "mail worker started");
        loop {
            self.poll_once().await;
            tokio::select! {
                _ = stop_rx.recv() => {
                    info!(user_id = %self.user_id, "mail worker stopped");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn poll_once(&mut self) {
        let emails = match self.mail.fetch_unread(self.user_id).await {
            Ok(emails) => emails,
            Err(MailError::NotConnected | MailError::Reauthorize) => {
                // nothing to do until the user reconnects; the next resync
                // retires this worker if the connection is gone for good
                debug!(user_id = %self.user_id, "mail connection unavailable");
                return;
            }
            Err(e) => {
                error!(user_id = %self.user_id, "unread poll failed: {e}");
                return;
            }
        };

        for email in emails {
            if self.seen.contains(&email.remote_id) {
                continue;
            }
            match self.ingestor.ingest_email(self.user_id, &email).await {
                Ok(Some(ingested)) => {
                    self.seen.insert(&email.remote_id);
                    if let Err(e) = self.mail.mark_read(self.user_id, &email.remote_id).await {
                        warn!(user_id = %self.user_id, "could not mark message read: {e}");
                    }
                    debug!(item_id = %ingested.item.id, "ingested email");
                }
                // no usable body: leave it unread and untracked
                Ok(None) => {}
                Err(e) => {
                    error!(user_id = %self.user_id, "failed to ingest email: {e}");
                }
            }
        }
    }
}
