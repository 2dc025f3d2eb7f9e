//! Message-routing pipeline.
//!
//! The broker is the single path every message in the system takes: session
//! input, system notifications, and bot replies all enter through
//! [`BrokerHandle::submit`] and fan out through three bounded queues.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!  submit() ────────▶│   inbound    │ (bounded, blocking - backpressure)
//!                    └──────┬───────┘
//!                           ▼
//!                    ┌──────────────┐   User      ─▶ outbound + analytics
//!                    │    router    │   Command   ─▶ analytics
//!                    └──┬────────┬──┘   System/   ─▶ outbound
//!                       ▼        ▼      Statistics
//!              ┌──────────┐  ┌───────────┐
//!              │ outbound │  │ analytics │ (bounded, lossy under pressure)
//!              └────┬─────┘  └─────┬─────┘
//!                   ▼              ▼
//!            broadcast to    StatsAggregator /
//!            subscribers     CommandDispatcher ──▶ submit() (bot reply)
//! ```
//!
//! Chat delivery is favored over analytics freshness: the outbound enqueue
//! applies backpressure while the analytics enqueue drops with a warning
//! when full (both policies are configuration, not law).
//!
//! Alongside the three queue workers the broker owns the periodic sweeper
//! (registry idle sweep + stats prune) and the periodic report task.

mod handle;

pub use handle::{BrokerError, BrokerHandle};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use netchat_core::{ChatMessage, MessageKind, Username};

use crate::commands::CommandDispatcher;
use crate::config::{OverflowPolicy, ServerConfig};
use crate::registry::RegistryHandle;
use crate::stats::StatsAggregator;

/// How long `shutdown` waits for each worker before aborting it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Lifecycle state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BrokerState {
    /// Workers running, submissions accepted.
    Running = 0,
    /// Shutdown begun: submissions rejected, workers draining.
    Draining = 1,
    /// All workers exited or aborted.
    Stopped = 2,
}

/// Shared lifecycle cell, observed by the handle and every worker.
#[derive(Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(BrokerState::Running as u8)))
    }

    pub(crate) fn get(&self) -> BrokerState {
        match self.0.load(Ordering::Acquire) {
            0 => BrokerState::Running,
            1 => BrokerState::Draining,
            _ => BrokerState::Stopped,
        }
    }

    fn set(&self, state: BrokerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transitions Running -> Draining. Returns false if shutdown already
    /// began elsewhere.
    fn begin_draining(&self) -> bool {
        self.0
            .compare_exchange(
                BrokerState::Running as u8,
                BrokerState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// The routing pipeline and owner of its worker tasks.
pub struct Broker {
    handle: BrokerHandle,
    state: StateCell,
    cancel: CancellationToken,

    /// Worker handles, taken exactly once by `shutdown`
    workers: Mutex<Option<Vec<(&'static str, JoinHandle<()>)>>>,
}

impl Broker {
    /// Starts the pipeline: router, outbound sender, analytics consumer
    /// (unless disabled), idle sweeper, and report task.
    pub fn start(
        config: &ServerConfig,
        registry: RegistryHandle,
        stats: Arc<StatsAggregator>,
        dispatcher: Arc<CommandDispatcher>,
        shutdown: &CancellationToken,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);

        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (delivery_tx, _) = broadcast::channel(capacity);

        let state = StateCell::new();
        let cancel = shutdown.child_token();

        let handle = BrokerHandle::new(inbound_tx, delivery_tx.clone(), state.clone(), capacity);

        let mut workers: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        // Analytics queue and consumer only exist when the path is enabled.
        let analytics_tx = if config.analytics_enabled {
            let (analytics_tx, analytics_rx) = mpsc::channel(capacity);
            workers.push((
                "analytics",
                tokio::spawn(analytics_loop(
                    cancel.clone(),
                    analytics_rx,
                    Arc::clone(&stats),
                    dispatcher,
                    handle.clone(),
                )),
            ));
            Some(analytics_tx)
        } else {
            info!("analytics path disabled by configuration");
            None
        };

        workers.push((
            "router",
            tokio::spawn(router_loop(
                cancel.clone(),
                inbound_rx,
                outbound_tx,
                analytics_tx,
                config.outbound_overflow,
                config.analytics_overflow,
            )),
        ));

        workers.push((
            "outbound",
            tokio::spawn(outbound_loop(cancel.clone(), outbound_rx, delivery_tx)),
        ));

        workers.push((
            "sweeper",
            tokio::spawn(sweeper_loop(
                cancel.clone(),
                config.sweep_interval(),
                config.idle_timeout(),
                config.stats_retention(),
                registry,
                Arc::clone(&stats),
            )),
        ));

        if config.analytics_enabled {
            workers.push((
                "reporter",
                tokio::spawn(report_loop(
                    cancel.clone(),
                    config.report_interval(),
                    stats,
                    handle.clone(),
                )),
            ));
        }

        info!(
            queue_capacity = capacity,
            analytics = config.analytics_enabled,
            "message broker started"
        );

        Self {
            handle,
            state,
            cancel,
            workers: Mutex::new(Some(workers)),
        }
    }

    /// Returns a cheap-to-clone handle for submitting and subscribing.
    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BrokerState {
        self.state.get()
    }

    /// Stops the pipeline.
    ///
    /// New submissions are rejected immediately; workers get
    /// [`SHUTDOWN_GRACE`] each to observe the signal and drain, after which
    /// they are aborted. Idempotent: a second call finds the worker handles
    /// already taken and returns without touching anything.
    pub async fn shutdown(&self) {
        if !self.state.begin_draining() {
            debug!("broker shutdown already in progress or complete");
        }
        self.cancel.cancel();

        let workers = {
            let mut guard = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };

        let Some(workers) = workers else {
            return;
        };

        info!("broker draining");

        for (name, mut worker) in workers {
            match timeout(SHUTDOWN_GRACE, &mut worker).await {
                Ok(_) => debug!(worker = name, "worker stopped"),
                Err(_) => {
                    warn!(
                        worker = name,
                        grace_secs = SHUTDOWN_GRACE.as_secs(),
                        "worker did not stop within grace period, aborting"
                    );
                    worker.abort();
                }
            }
        }

        self.state.set(BrokerState::Stopped);
        info!("broker stopped");
    }
}

// ============================================================================
// Worker loops
// ============================================================================

/// Router: classifies inbound messages by kind and forwards them.
async fn router_loop(
    cancel: CancellationToken,
    mut inbound_rx: mpsc::Receiver<ChatMessage>,
    outbound_tx: mpsc::Sender<ChatMessage>,
    analytics_tx: Option<mpsc::Sender<ChatMessage>>,
    outbound_policy: OverflowPolicy,
    analytics_policy: OverflowPolicy,
) {
    debug!("router worker started");

    loop {
        let msg = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            received = inbound_rx.recv() => match received {
                Some(msg) => msg,
                None => break,
            },
        };

        match msg.kind {
            MessageKind::User => {
                // Broadcast copy first; analytics freshness is sacrificed
                // before chat responsiveness.
                if !forward(&outbound_tx, msg.clone(), outbound_policy, "outbound").await {
                    break;
                }
                if let Some(analytics_tx) = &analytics_tx {
                    forward(analytics_tx, msg, analytics_policy, "analytics").await;
                }
            }
            MessageKind::Command => match &analytics_tx {
                Some(analytics_tx) => {
                    forward(analytics_tx, msg, analytics_policy, "analytics").await;
                }
                None => {
                    // Commands have nowhere to go without the analytics
                    // path; answer directly on the outbound queue.
                    let reply =
                        ChatMessage::statistics("Analytics are disabled on this server.");
                    if !forward(&outbound_tx, reply, outbound_policy, "outbound").await {
                        break;
                    }
                }
            },
            MessageKind::System | MessageKind::Statistics => {
                if !forward(&outbound_tx, msg, outbound_policy, "outbound").await {
                    break;
                }
            }
        }
    }

    // Shutdown may leave unrouted messages behind; they were accepted before
    // the stop signal, so account for them visibly.
    let mut discarded = 0usize;
    while inbound_rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        warn!(discarded, "router discarded inbound backlog on shutdown");
    }

    debug!("router worker stopped");
}

/// Forwards a message onto a queue under the configured overflow policy.
///
/// Returns `false` when the queue is closed and the caller should stop.
async fn forward(
    tx: &mpsc::Sender<ChatMessage>,
    msg: ChatMessage,
    policy: OverflowPolicy,
    queue: &'static str,
) -> bool {
    match policy {
        OverflowPolicy::Block => {
            if tx.send(msg).await.is_err() {
                debug!(queue, "queue closed");
                return false;
            }
        }
        OverflowPolicy::Drop => match tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    queue,
                    kind = %msg.kind,
                    sender = %msg.sender,
                    "queue full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(queue, "queue closed");
                return false;
            }
        },
    }
    true
}

/// Outbound sender: publishes every outbound message to the delivery
/// broadcast channel the server layer subscribes to.
async fn outbound_loop(
    cancel: CancellationToken,
    mut outbound_rx: mpsc::Receiver<ChatMessage>,
    delivery_tx: broadcast::Sender<ChatMessage>,
) {
    debug!("outbound worker started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            received = outbound_rx.recv() => match received {
                Some(msg) => deliver(&delivery_tx, msg),
                None => break,
            },
        }
    }

    // Outbound delivery drains on shutdown: these messages were already
    // routed, losing them would drop visible chat.
    let mut drained = 0usize;
    while let Ok(msg) = outbound_rx.try_recv() {
        deliver(&delivery_tx, msg);
        drained += 1;
    }
    if drained > 0 {
        debug!(drained, "outbound worker drained backlog on shutdown");
    }

    debug!("outbound worker stopped");
}

/// Hands one message to the delivery channel.
///
/// A failed send means no subscriber is listening; that is logged and never
/// stops the loop.
fn deliver(delivery_tx: &broadcast::Sender<ChatMessage>, msg: ChatMessage) {
    if delivery_tx.send(msg).is_err() {
        debug!("no delivery subscribers, message not broadcast");
    }
}

/// Analytics consumer: feeds the aggregator and dispatches commands.
async fn analytics_loop(
    cancel: CancellationToken,
    mut analytics_rx: mpsc::Receiver<ChatMessage>,
    stats: Arc<StatsAggregator>,
    dispatcher: Arc<CommandDispatcher>,
    broker: BrokerHandle,
) {
    debug!("analytics worker started");

    loop {
        let msg = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            received = analytics_rx.recv() => match received {
                Some(msg) => msg,
                None => break,
            },
        };

        match msg.kind {
            MessageKind::User => {
                stats.record_user_message(&msg.sender, &msg.text);
            }
            MessageKind::Command => {
                let reply = dispatcher.dispatch(&msg.sender, &msg.text);

                // Bot replies re-enter through the same ingress as every
                // other message.
                if let Err(e) = broker.submit(ChatMessage::statistics(reply)).await {
                    debug!(error = %e, "dropping bot reply, broker is stopping");
                }
            }
            other => {
                // The router never sends these here.
                error!(kind = %other, "unexpected message kind on analytics queue");
            }
        }
    }

    // Analytics is best-effort: backlog is explicitly droppable on shutdown.
    let mut dropped = 0usize;
    while analytics_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(dropped, "analytics worker discarded backlog on shutdown");
    }

    debug!("analytics worker stopped");
}

/// Periodic sweeper: evicts idle sessions and prunes stale stats.
async fn sweeper_loop(
    cancel: CancellationToken,
    sweep_interval: Duration,
    idle_timeout: Duration,
    stats_retention: Duration,
    registry: RegistryHandle,
    stats: Arc<StatsAggregator>,
) {
    let mut ticker = interval(sweep_interval);
    ticker.tick().await; // first tick completes immediately

    debug!(
        interval_secs = sweep_interval.as_secs(),
        idle_timeout_secs = idle_timeout.as_secs(),
        "sweeper started"
    );

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                registry.sweep_idle(idle_timeout).await;

                let active: std::collections::HashSet<Username> =
                    registry.snapshot_active().await.into_iter().collect();
                stats.prune_inactive(stats_retention, |name| active.contains(name));
            }
        }
    }

    debug!("sweeper stopped");
}

/// Periodic report task: broadcasts aggregate statistics as a bot message.
async fn report_loop(
    cancel: CancellationToken,
    report_interval: Duration,
    stats: Arc<StatsAggregator>,
    broker: BrokerHandle,
) {
    let mut ticker = interval(report_interval);
    ticker.tick().await; // first tick completes immediately

    debug!(
        interval_secs = report_interval.as_secs(),
        "report task started"
    );

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                // Nothing to report on a silent server
                if stats.total_messages() == 0 {
                    continue;
                }

                let report = format!("Periodic report:\n{}", stats.generate_report());
                if broker.submit(ChatMessage::statistics(report)).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("report task stopped");
}
