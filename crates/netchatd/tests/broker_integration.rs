//! Integration tests for the routing pipeline.
//!
//! These tests run the full broker - router, outbound sender, analytics
//! consumer - against a real registry and aggregator, driving it through
//! the same `BrokerHandle` the server layer uses.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - the panic-free policy applies
//! to production code, which these assertions exercise.

use std::sync::Arc;
use std::time::Duration;

use netchat_core::{ChatMessage, MessageKind, Username, BOT_NAME};
use netchatd::broker::{Broker, BrokerError, BrokerState};
use netchatd::commands::CommandDispatcher;
use netchatd::config::ServerConfig;
use netchatd::registry::{spawn_registry, RegistryHandle};
use netchatd::stats::StatsAggregator;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

struct TestPipeline {
    broker: Broker,
    stats: Arc<StatsAggregator>,
    #[allow(dead_code)]
    registry: RegistryHandle,
    #[allow(dead_code)]
    cancel: CancellationToken,
}

impl TestPipeline {
    fn start(config: ServerConfig) -> Self {
        let cancel = CancellationToken::new();
        let registry = spawn_registry(config.max_sessions, config.rate_limit, config.rate_window());
        let stats = Arc::new(StatsAggregator::new());
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&stats)));

        let broker = Broker::start(
            &config,
            registry.clone(),
            Arc::clone(&stats),
            dispatcher,
            &cancel,
        );

        Self {
            broker,
            stats,
            registry,
            cancel,
        }
    }

    fn start_default() -> Self {
        Self::start(quiet_config())
    }
}

/// Default config with the periodic tasks pushed out of the test window.
fn quiet_config() -> ServerConfig {
    ServerConfig {
        sweep_interval_secs: 3600,
        report_interval_secs: 3600,
        ..ServerConfig::default()
    }
}

fn alice() -> Username {
    Username::new("alice")
}

/// Receives messages until one matches, panicking on timeout.
async fn recv_matching(
    rx: &mut broadcast::Receiver<ChatMessage>,
    what: &str,
    predicate: impl Fn(&ChatMessage) -> bool,
) -> ChatMessage {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = timeout(remaining, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .expect("delivery channel open");
        if predicate(&msg) {
            return msg;
        }
    }
}

/// Polls until the condition holds, panicking on timeout.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Round Trip
// ============================================================================

#[tokio::test]
async fn test_user_message_round_trip() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();
    let mut delivery = handle.subscribe();

    handle
        .submit(ChatMessage::user(alice(), "hello world"))
        .await
        .expect("submit should succeed");

    // The broadcast copy arrives with identical sender and text
    let msg = recv_matching(&mut delivery, "broadcast copy", |m| {
        m.kind == MessageKind::User
    })
    .await;
    assert_eq!(msg.sender.as_str(), "alice");
    assert_eq!(msg.text, "hello world");

    // The analytics copy increments the sender's count by exactly one
    wait_until("stats to reflect the message", || {
        pipeline.stats.snapshot_user_counts().get(&alice()) == Some(&1)
    })
    .await;
}

#[tokio::test]
async fn test_repeated_words_accumulate() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();

    handle
        .submit(ChatMessage::user(alice(), "hello world"))
        .await
        .expect("submit");
    handle
        .submit(ChatMessage::user(alice(), "hello again"))
        .await
        .expect("submit");

    wait_until("both messages recorded", || {
        pipeline.stats.snapshot_user_counts().get(&alice()) == Some(&2)
    })
    .await;

    assert_eq!(
        pipeline.stats.snapshot_word_frequency().get("hello"),
        Some(&2)
    );
}

// ============================================================================
// Routing Table
// ============================================================================

#[tokio::test]
async fn test_system_message_skips_analytics() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();
    let mut delivery = handle.subscribe();

    handle
        .submit(ChatMessage::system("maintenance at midnight"))
        .await
        .expect("submit");

    let msg = recv_matching(&mut delivery, "system broadcast", |m| {
        m.kind == MessageKind::System
    })
    .await;
    assert_eq!(msg.text, "maintenance at midnight");

    // Give the analytics worker a moment: nothing should be recorded
    sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.stats.total_messages(), 0);
}

#[tokio::test]
async fn test_command_produces_bot_reply() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();
    let mut delivery = handle.subscribe();

    handle
        .submit(ChatMessage::command(alice(), "/help"))
        .await
        .expect("submit");

    // The command itself never reaches broadcast; its reply does,
    // resubmitted through the same ingress as a statistics message.
    let reply = recv_matching(&mut delivery, "bot reply", |m| {
        m.kind == MessageKind::Statistics
    })
    .await;
    assert_eq!(reply.sender.as_str(), BOT_NAME);
    assert!(reply.text.contains("Available commands"));
}

#[tokio::test]
async fn test_command_reply_reflects_stats() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();
    let mut delivery = handle.subscribe();

    handle
        .submit(ChatMessage::user(alice(), "counting this message"))
        .await
        .expect("submit");
    wait_until("message recorded", || pipeline.stats.total_messages() == 1).await;

    handle
        .submit(ChatMessage::command(alice(), "/stats"))
        .await
        .expect("submit");

    let reply = recv_matching(&mut delivery, "stats reply", |m| {
        m.kind == MessageKind::Statistics
    })
    .await;
    assert!(reply.text.contains("Stats for alice"));
    assert!(reply.text.contains("messages: 1"));
}

#[tokio::test]
async fn test_unknown_target_stats_is_diagnostic() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();
    let mut delivery = handle.subscribe();

    handle
        .submit(ChatMessage::command(alice(), "/stats nobody"))
        .await
        .expect("submit");

    let reply = recv_matching(&mut delivery, "diagnostic reply", |m| {
        m.kind == MessageKind::Statistics
    })
    .await;
    assert!(reply.text.contains("'nobody' not found"));
}

// ============================================================================
// Analytics Disabled
// ============================================================================

#[tokio::test]
async fn test_analytics_disabled_skips_recording() {
    let config = ServerConfig {
        analytics_enabled: false,
        ..quiet_config()
    };
    let pipeline = TestPipeline::start(config);
    let handle = pipeline.broker.handle();
    let mut delivery = handle.subscribe();

    handle
        .submit(ChatMessage::user(alice(), "nobody is counting"))
        .await
        .expect("submit");

    // Chat delivery still works
    let msg = recv_matching(&mut delivery, "broadcast copy", |m| {
        m.kind == MessageKind::User
    })
    .await;
    assert_eq!(msg.text, "nobody is counting");

    sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.stats.total_messages(), 0);
}

#[tokio::test]
async fn test_analytics_disabled_answers_commands() {
    let config = ServerConfig {
        analytics_enabled: false,
        ..quiet_config()
    };
    let pipeline = TestPipeline::start(config);
    let handle = pipeline.broker.handle();
    let mut delivery = handle.subscribe();

    handle
        .submit(ChatMessage::command(alice(), "/stats"))
        .await
        .expect("submit");

    let reply = recv_matching(&mut delivery, "canned reply", |m| {
        m.kind == MessageKind::Statistics
    })
    .await;
    assert!(reply.text.contains("Analytics are disabled"));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_count_exactly() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();

    let senders: u64 = 8;
    let per_sender: u64 = 25;

    let tasks: Vec<_> = (0..senders)
        .map(|i| {
            let handle = handle.clone();
            tokio::spawn(async move {
                let name = Username::new(format!("sender-{i}"));
                for n in 0..per_sender {
                    handle
                        .submit(ChatMessage::user(name.clone(), format!("message {n}")))
                        .await
                        .expect("submit should succeed");
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("sender task");
    }

    let expected = senders * per_sender;
    wait_until("all messages recorded", || {
        pipeline.stats.total_messages() >= expected
    })
    .await;

    // No lost or duplicated increments
    sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.stats.total_messages(), expected);

    let counts = pipeline.stats.snapshot_user_counts();
    for i in 0..senders {
        let name = Username::new(format!("sender-{i}"));
        assert_eq!(counts.get(&name), Some(&per_sender));
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();

    assert!(handle.is_running());
    pipeline.broker.shutdown().await;

    assert!(!handle.is_running());
    let result = handle.submit(ChatMessage::user(alice(), "too late")).await;
    assert!(matches!(result, Err(BrokerError::Stopped)));
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let pipeline = TestPipeline::start_default();

    pipeline.broker.shutdown().await;
    assert_eq!(pipeline.broker.state(), BrokerState::Stopped);

    // Second call: same end state, no panic, no double release
    pipeline.broker.shutdown().await;
    assert_eq!(pipeline.broker.state(), BrokerState::Stopped);
}

#[tokio::test]
async fn test_occupancy_query() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();

    let (queued, capacity) = handle.inbound_occupancy();
    assert_eq!(capacity, ServerConfig::default().queue_capacity);
    assert!(queued <= capacity);
}

#[tokio::test]
async fn test_messages_drain_before_shutdown_completes() {
    let pipeline = TestPipeline::start_default();
    let handle = pipeline.broker.handle();
    let mut delivery = handle.subscribe();

    handle
        .submit(ChatMessage::user(alice(), "last words"))
        .await
        .expect("submit");

    // The broadcast copy is observable before shutdown discards anything
    let msg = recv_matching(&mut delivery, "broadcast copy", |m| {
        m.kind == MessageKind::User
    })
    .await;
    assert_eq!(msg.text, "last words");

    pipeline.broker.shutdown().await;
    assert_eq!(pipeline.broker.state(), BrokerState::Stopped);
}
