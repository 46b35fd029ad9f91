//! The background synchronizer that drains the offline queue.

use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::transport::{ConflictInfo, DeliveryOutcome, SubmissionRequest, SubmissionTransport};
use offsign_core::{EventBus, LocalSessionManager, QueuedSubmission, SyncEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue-level state of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass in flight.
    Idle,
    /// A pass is draining its queue snapshot.
    Syncing,
}

/// Why a sync pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The user set explicit offline mode.
    ExplicitOffline,
    /// The connectivity signal says offline.
    Offline,
    /// Another pass is already in flight.
    PassInFlight,
}

/// Result of one invocation of [`SyncManager::sync_now`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Set when the pass was skipped by a guard.
    pub skipped: Option<SkipReason>,
    /// Submissions delivered (including merge-retry deliveries).
    pub delivered: usize,
    /// Submissions discarded because the remote was newer.
    pub conflicts_dropped: usize,
    /// Conflicts resolved by merge and delivered.
    pub conflicts_merged: usize,
    /// Failures that stay queued for the next sweep.
    pub failed_retryable: usize,
    /// Submissions that crossed the retry ceiling during this pass.
    pub failed_terminal: usize,
    /// Wall-clock duration of the pass.
    pub duration: Duration,
}

impl SyncReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            delivered: 0,
            conflicts_dropped: 0,
            conflicts_merged: 0,
            failed_retryable: 0,
            failed_terminal: 0,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the pass actually processed its snapshot.
    #[must_use]
    pub fn ran(&self) -> bool {
        self.skipped.is_none()
    }
}

/// Running totals across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that processed a snapshot.
    pub passes_completed: u64,
    /// Total submissions delivered.
    pub submissions_delivered: u64,
    /// Total conflicts resolved (dropped or merged).
    pub conflicts_resolved: u64,
    /// Total failures recorded.
    pub failures_recorded: u64,
    /// Completion time of the most recent pass.
    pub last_sync_time: Option<Instant>,
    /// Most recent pass-level error.
    pub last_error: Option<String>,
}

/// Connectivity-aware background process that drains the offline queue
/// against the remote endpoint.
///
/// # Concurrency model
///
/// All work is cooperative async tasks; [`Self::sync_now`] enforces mutual
/// exclusion, so at most one pass is in flight and calls during a pass are
/// no-ops. There is no cancellation of an in-flight pass: [`Self::stop`]
/// only prevents future passes from being scheduled.
///
/// # Scheduling
///
/// Retry timing is sweep-based: a fixed-interval timer re-invokes the pass
/// whenever the queue is non-empty, the device is online, and no pass is
/// running. The exponential backoff computed per failure is recorded for
/// diagnostics only - it never delays the sweep.
pub struct SyncManager<T: SubmissionTransport> {
    config: SyncConfig,
    sessions: Arc<LocalSessionManager>,
    transport: Arc<T>,
    events: Arc<EventBus>,
    online_rx: watch::Receiver<bool>,
    state: RwLock<SyncState>,
    syncing: AtomicBool,
    stats: RwLock<SyncStats>,
    debounce_generation: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Resets the pass guard when a pass ends, however it ends.
struct PassGuard<'a> {
    syncing: &'a AtomicBool,
    state: &'a RwLock<SyncState>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self.state.write() = SyncState::Idle;
        self.syncing.store(false, Ordering::SeqCst);
    }
}

impl<T: SubmissionTransport + 'static> SyncManager<T> {
    /// Creates a manager wired to the given collaborators.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        sessions: Arc<LocalSessionManager>,
        transport: Arc<T>,
        events: Arc<EventBus>,
        connectivity: &Connectivity,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            sessions,
            transport,
            events,
            online_rx: connectivity.subscribe(),
            state: RwLock::new(SyncState::Idle),
            syncing: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            debounce_generation: AtomicU64::new(0),
            shutdown_tx,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the queue-level state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Returns a copy of the running totals.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn is_online(&self) -> bool {
        *self.online_rx.borrow()
    }

    /// Starts the background tasks: the periodic sweep and the
    /// connectivity listener. Triggers an immediate attempt if the device
    /// is online and the user has not set explicit offline mode.
    ///
    /// Calling `start` twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock();

        let sweeper = Arc::clone(self);
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            sweeper.run_sweep(shutdown).await;
        }));

        let listener = Arc::clone(self);
        let shutdown = self.shutdown_tx.subscribe();
        let online_rx = self.online_rx.clone();
        tasks.push(tokio::spawn(async move {
            listener.run_connectivity(online_rx, shutdown).await;
        }));

        let starter = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = starter.sync_now().await {
                warn!(error = %e, "initial sync attempt failed");
            }
        }));
    }

    /// Stops scheduling future passes. An in-flight pass runs to
    /// completion over its snapshot.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Debounced reaction to a local signature write: a burst of writes
    /// coalesces into one sync attempt after the configured delay.
    pub fn notify_new_signature(self: &Arc<Self>) {
        let generation = self.debounce_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(manager.config.debounce).await;
            if manager.debounce_generation.load(Ordering::SeqCst) == generation {
                if let Err(e) = manager.sync_now().await {
                    warn!(error = %e, "debounced sync attempt failed");
                }
            }
        });
    }

    /// Sets the user's explicit offline flag. While set, no automatic
    /// syncing happens regardless of actual connectivity. Clearing it
    /// while online triggers exactly one immediate attempt.
    pub async fn set_offline_mode(self: &Arc<Self>, offline: bool) -> SyncResult<()> {
        self.sessions.set_offline_mode(offline)?;
        info!(offline, "explicit offline mode changed");

        if !offline && self.is_online() {
            if let Err(e) = self.sync_now().await {
                warn!(error = %e, "sync attempt after leaving offline mode failed");
            }
        }
        Ok(())
    }

    /// Queues the session's current signatures for delivery and schedules
    /// a debounced attempt. Called when signing completes locally.
    pub fn queue_completed_session(
        self: &Arc<Self>,
        session_id: &str,
        signing_key: &str,
    ) -> SyncResult<()> {
        let session = self
            .sessions
            .get_session(session_id)?
            .ok_or_else(|| offsign_core::CoreError::session_not_found(session_id))?;

        let submission = QueuedSubmission::new(
            session_id,
            session.recipient_id.clone(),
            session.signatures.clone(),
            signing_key,
        );
        self.sessions.queue_for_sync(&submission)?;
        self.notify_new_signature();
        Ok(())
    }

    /// Runs one sync pass over a snapshot of the queue.
    ///
    /// Guards make this a no-op when explicit offline mode is set, the
    /// device is offline, or a pass is already in flight. Items queued
    /// after the snapshot join the next pass. Delivery is sequential to
    /// bound load on the endpoint and preserve per-recipient ordering.
    pub async fn sync_now(&self) -> SyncResult<SyncReport> {
        if self.sessions.offline_mode()? {
            debug!("sync skipped: explicit offline mode");
            return Ok(SyncReport::skipped(SkipReason::ExplicitOffline));
        }
        if !self.is_online() {
            debug!("sync skipped: offline");
            return Ok(SyncReport::skipped(SkipReason::Offline));
        }
        if self.syncing.swap(true, Ordering::SeqCst) {
            debug!("sync skipped: pass already in flight");
            return Ok(SyncReport::skipped(SkipReason::PassInFlight));
        }

        let _guard = PassGuard {
            syncing: &self.syncing,
            state: &self.state,
        };
        *self.state.write() = SyncState::Syncing;

        let start = Instant::now();
        let snapshot = match self.eligible_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.events.emit(SyncEvent::SyncFailed {
                    error: e.to_string(),
                });
                self.stats.write().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let total = snapshot.len();
        self.events.emit(SyncEvent::SyncStarted { pending: total });

        let mut report = SyncReport {
            skipped: None,
            delivered: 0,
            conflicts_dropped: 0,
            conflicts_merged: 0,
            failed_retryable: 0,
            failed_terminal: 0,
            duration: Duration::ZERO,
        };

        for (index, item) in snapshot.iter().enumerate() {
            match self.deliver(item).await {
                Ok(outcome) => {
                    match outcome {
                        ItemOutcome::Delivered => report.delivered += 1,
                        ItemOutcome::ConflictDropped => report.conflicts_dropped += 1,
                        ItemOutcome::ConflictMerged => {
                            report.conflicts_merged += 1;
                            report.delivered += 1;
                        }
                        ItemOutcome::Retryable => report.failed_retryable += 1,
                        ItemOutcome::Terminal => report.failed_terminal += 1,
                    }
                    self.events.emit(SyncEvent::SyncProgress {
                        completed: index + 1,
                        total,
                    });
                }
                Err(e) => {
                    // Local bookkeeping failed; abort the pass. Signature
                    // data itself is untouched.
                    self.events.emit(SyncEvent::SyncFailed {
                        error: e.to_string(),
                    });
                    self.stats.write().last_error = Some(e.to_string());
                    return Err(e);
                }
            }
        }

        report.duration = start.elapsed();
        self.events.emit(SyncEvent::SyncCompleted {
            synced: report.delivered,
            duration: report.duration,
        });

        {
            let mut stats = self.stats.write();
            stats.passes_completed += 1;
            stats.submissions_delivered += report.delivered as u64;
            stats.conflicts_resolved +=
                (report.conflicts_dropped + report.conflicts_merged) as u64;
            stats.failures_recorded +=
                (report.failed_retryable + report.failed_terminal) as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }

        Ok(report)
    }

    /// Snapshots the queue, excluding terminal items. Their records stay in
    /// the store and remain visible through status queries.
    fn eligible_snapshot(&self) -> SyncResult<Vec<QueuedSubmission>> {
        let ceiling = self.config.retry.max_attempts;
        Ok(self
            .sessions
            .queued_submissions()?
            .into_iter()
            .filter(|item| item.retry_count < ceiling)
            .collect())
    }

    /// One delivery attempt, classified.
    async fn deliver(&self, item: &QueuedSubmission) -> SyncResult<ItemOutcome> {
        let request = SubmissionRequest::from_submission(item);
        match self.transport.submit(&request).await {
            Ok(DeliveryOutcome::Accepted) => {
                self.sessions
                    .mark_delivered(&item.session_id, &item.recipient_id)?;
                debug!(
                    session_id = item.session_id,
                    recipient_id = item.recipient_id,
                    "submission delivered"
                );
                Ok(ItemOutcome::Delivered)
            }
            Ok(DeliveryOutcome::Conflict(info)) => self.resolve_conflict(item, info).await,
            Err(e @ SyncError::Core(_)) => Err(e),
            Err(e) => self.record_failure(item, &e),
        }
    }

    /// Conflict resolution: remote wins outright when its timestamp is
    /// newer; otherwise merge (local entries win per field id - field ids
    /// are assumed unique per recipient, not re-validated here) and retry
    /// the delivery exactly once.
    async fn resolve_conflict(
        &self,
        item: &QueuedSubmission,
        info: ConflictInfo,
    ) -> SyncResult<ItemOutcome> {
        if info.server_timestamp > item.client_timestamp {
            info!(
                session_id = item.session_id,
                recipient_id = item.recipient_id,
                server_timestamp = info.server_timestamp,
                client_timestamp = item.client_timestamp,
                "remote state is newer, discarding local submission"
            );
            self.sessions
                .discard_submission(&item.session_id, &item.recipient_id)?;
            return Ok(ItemOutcome::ConflictDropped);
        }

        let mut merged = info.signatures;
        for (field_id, payload) in &item.signatures {
            merged.insert(field_id.clone(), payload.clone());
        }

        // Persist the merged map locally and keep the queue entry
        // consistent with what gets retried.
        self.sessions.save_signatures(&item.session_id, &merged)?;
        let mut retry = item.clone();
        retry.signatures = merged;
        self.sessions.queue_for_sync(&retry)?;

        let request = SubmissionRequest::from_submission(&retry);
        match self.transport.submit(&request).await {
            Ok(DeliveryOutcome::Accepted) => {
                self.sessions
                    .mark_delivered(&retry.session_id, &retry.recipient_id)?;
                info!(
                    session_id = retry.session_id,
                    recipient_id = retry.recipient_id,
                    "conflict resolved by merge"
                );
                Ok(ItemOutcome::ConflictMerged)
            }
            Ok(DeliveryOutcome::Conflict(_)) => self.record_failure(
                &retry,
                &SyncError::network_retryable("conflict persisted after merge"),
            ),
            Err(e @ SyncError::Core(_)) => Err(e),
            Err(e) => self.record_failure(&retry, &e),
        }
    }

    /// Records a failed attempt. The computed backoff is diagnostic only;
    /// the next sweep retries on its fixed cadence.
    fn record_failure(&self, item: &QueuedSubmission, error: &SyncError) -> SyncResult<ItemOutcome> {
        let attempts = self.sessions.record_delivery_failure(
            &item.session_id,
            &item.recipient_id,
            &error.to_string(),
        )?;

        if attempts >= self.config.retry.max_attempts {
            warn!(
                session_id = item.session_id,
                recipient_id = item.recipient_id,
                attempts,
                "retry ceiling exceeded, submission is terminal until cleared"
            );
            return Ok(ItemOutcome::Terminal);
        }

        let backoff = self.config.retry.delay_for_attempt(attempts);
        debug!(
            session_id = item.session_id,
            recipient_id = item.recipient_id,
            attempts,
            backoff_ms = backoff.as_millis() as u64,
            retryable = error.is_retryable(),
            "delivery failed, next sweep will retry"
        );
        Ok(ItemOutcome::Retryable)
    }

    async fn run_sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick duplicates start()'s initial attempt.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if self.should_sweep() {
                if let Err(e) = self.sync_now().await {
                    warn!(error = %e, "sweep pass failed");
                }
            }
        }
    }

    fn should_sweep(&self) -> bool {
        if self.state() != SyncState::Idle || !self.is_online() {
            return false;
        }
        if self.sessions.offline_mode().unwrap_or(false) {
            return false;
        }
        self.eligible_snapshot().map(|s| !s.is_empty()).unwrap_or(false)
    }

    async fn run_connectivity(
        self: Arc<Self>,
        mut online_rx: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow();
                    self.events.emit(SyncEvent::OnlineStatusChanged { online });
                    if online {
                        if let Err(e) = self.sync_now().await {
                            warn!(error = %e, "sync attempt on reconnect failed");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

/// Final classification of one delivery within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Delivered,
    ConflictDropped,
    ConflictMerged,
    Retryable,
    Terminal,
}
