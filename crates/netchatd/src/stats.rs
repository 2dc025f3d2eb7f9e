//! Concurrent chat statistics.
//!
//! The aggregator is the single owner of all usage counters: global totals,
//! per-user statistics, and the global word-frequency table. It is
//! internally synchronized - every operation takes `&self` and callers never
//! wrap it in their own locks.
//!
//! Per-identity counters are atomics inside map entries, so concurrent
//! writers for different users only contend on the map's read lock; the map
//! write lock is taken solely to insert a new entry. Snapshot reads may be
//! stale relative to in-flight updates but are never torn.

use chrono::{Local, Utc};
use netchat_core::Username;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

/// Words at or below this length are counted but excluded from the
/// unique-word sets and the frequency table.
const MIN_TRACKED_WORD_CHARS: usize = 2;

/// Length of the trailing message-rate window in milliseconds.
const MINUTE_WINDOW_MS: i64 = 60_000;

/// Per-user usage counters.
///
/// Created lazily on the first processed message from an identity. All
/// fields are independently synchronized so updates for one user never
/// block another.
#[derive(Debug)]
struct UserStats {
    message_count: AtomicU64,
    word_count: AtomicU64,
    unique_words: RwLock<HashSet<String>>,
    last_seen_ms: AtomicI64,
}

impl UserStats {
    fn new() -> Self {
        Self {
            message_count: AtomicU64::new(0),
            word_count: AtomicU64::new(0),
            unique_words: RwLock::new(HashSet::new()),
            last_seen_ms: AtomicI64::new(now_ms()),
        }
    }
}

/// Thread-safe statistics aggregator.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    total_messages: AtomicU64,
    total_words: AtomicU64,

    /// Messages counted since the last minute-window reset
    minute_count: AtomicU64,
    minute_reset_ms: AtomicI64,

    users: RwLock<HashMap<Username, Arc<UserStats>>>,

    /// Global word -> occurrence count. Only ever incremented, never pruned;
    /// bounded in practice by vocabulary size.
    word_frequency: RwLock<HashMap<String, AtomicU64>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            minute_reset_ms: AtomicI64::new(now_ms()),
            ..Self::default()
        }
    }

    /// Records a processed user message. The only mutating entry point.
    ///
    /// Bumps global and per-user counters, and feeds every token longer
    /// than two characters into the user's unique-word set and the global
    /// frequency table.
    pub fn record_user_message(&self, username: &Username, text: &str) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.bump_minute_counter();

        let tokens = tokenize(text);
        self.total_words
            .fetch_add(tokens.len() as u64, Ordering::Relaxed);

        let user = self.user_entry(username);
        user.message_count.fetch_add(1, Ordering::Relaxed);
        user.word_count
            .fetch_add(tokens.len() as u64, Ordering::Relaxed);
        user.last_seen_ms.store(now_ms(), Ordering::Release);

        for token in tokens {
            if token.chars().count() <= MIN_TRACKED_WORD_CHARS {
                continue;
            }
            write_lock(&user.unique_words).insert(token.clone());
            self.bump_word(token);
        }
    }

    /// Point-in-time copy of per-user message counts.
    pub fn snapshot_user_counts(&self) -> HashMap<Username, u64> {
        read_lock(&self.users)
            .iter()
            .map(|(name, stats)| (name.clone(), stats.message_count.load(Ordering::Relaxed)))
            .collect()
    }

    /// Point-in-time copy of the global word-frequency table.
    pub fn snapshot_word_frequency(&self) -> HashMap<String, u64> {
        read_lock(&self.word_frequency)
            .iter()
            .map(|(word, count)| (word.clone(), count.load(Ordering::Relaxed)))
            .collect()
    }

    /// Total messages recorded since startup.
    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    /// Total words recorded since startup.
    pub fn total_words(&self) -> u64 {
        self.total_words.load(Ordering::Relaxed)
    }

    /// Number of identities with recorded statistics.
    pub fn tracked_user_count(&self) -> usize {
        read_lock(&self.users).len()
    }

    /// Messages recorded in the trailing minute window.
    ///
    /// Reads zero once the window has lapsed without traffic; the stored
    /// counter itself only resets on the write path.
    pub fn messages_last_minute(&self) -> u64 {
        let last_reset = self.minute_reset_ms.load(Ordering::Acquire);
        if now_ms() - last_reset > MINUTE_WINDOW_MS {
            0
        } else {
            self.minute_count.load(Ordering::Relaxed)
        }
    }

    /// Composes the periodic statistics report.
    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        let _ = writeln!(report, "Time: {}", Local::now().format("%H:%M:%S"));
        let _ = writeln!(report, "Total messages: {}", self.total_messages());
        let _ = writeln!(
            report,
            "Messages in the last minute: {}",
            self.messages_last_minute()
        );
        let _ = writeln!(report, "Active users: {}", self.tracked_user_count());

        let mut users: Vec<(Username, u64, u64)> = read_lock(&self.users)
            .iter()
            .map(|(name, stats)| {
                (
                    name.clone(),
                    stats.message_count.load(Ordering::Relaxed),
                    stats.word_count.load(Ordering::Relaxed),
                )
            })
            .collect();
        users.sort_by(|a, b| b.1.cmp(&a.1));

        let _ = writeln!(report, "\nTop 3 users:");
        for (name, messages, words) in users.iter().take(3) {
            let _ = writeln!(report, "  {name}: {messages} messages, {words} words");
        }

        let mut words: Vec<(String, u64)> = self.snapshot_word_frequency().into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1));

        let _ = writeln!(report, "\nTop words:");
        for (word, count) in words.iter().take(5) {
            let _ = writeln!(report, "  \"{word}\" - {count}");
        }

        report
    }

    /// Removes per-user entries idle past `threshold` whose identity is not
    /// currently registered. Stats stay alive for connected-but-quiet users.
    pub fn prune_inactive(&self, threshold: Duration, is_registered: impl Fn(&Username) -> bool) {
        let cutoff = now_ms() - threshold.as_millis() as i64;
        let mut users = write_lock(&self.users);
        let before = users.len();

        users.retain(|name, stats| {
            stats.last_seen_ms.load(Ordering::Acquire) >= cutoff || is_registered(name)
        });

        let removed = before - users.len();
        if removed > 0 {
            debug!(removed, remaining = users.len(), "pruned inactive user stats");
        }
    }

    /// Computes the rank of an identity by message count.
    ///
    /// Returns `None` for identities with no recorded messages. Ties are not
    /// broken: users with equal counts share the same position by
    /// construction of the strict greater-than comparison.
    pub fn rank_of(&self, username: &Username) -> Option<Rank> {
        let counts = self.snapshot_user_counts();
        let own = *counts.get(username)?;

        let total = counts.len();
        let position = 1 + counts.values().filter(|&&count| count > own).count();
        let percentile = (position * 100 / total) as u32;

        Some(Rank {
            position,
            total,
            percentile,
        })
    }

    fn bump_minute_counter(&self) {
        let now = now_ms();
        let last_reset = self.minute_reset_ms.load(Ordering::Acquire);

        if now - last_reset > MINUTE_WINDOW_MS {
            // One contender wins the reset; the rest fall through to the
            // ordinary increment of the fresh window.
            if self
                .minute_reset_ms
                .compare_exchange(last_reset, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.minute_count.store(1, Ordering::Release);
                return;
            }
        }

        self.minute_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fetches the stats entry for an identity, creating it on first use.
    fn user_entry(&self, username: &Username) -> Arc<UserStats> {
        if let Some(stats) = read_lock(&self.users).get(username) {
            return Arc::clone(stats);
        }

        let mut users = write_lock(&self.users);
        Arc::clone(
            users
                .entry(username.clone())
                .or_insert_with(|| Arc::new(UserStats::new())),
        )
    }

    /// Atomic increment-or-insert on the global frequency table.
    ///
    /// The read-lock fast path covers every repeat occurrence; the write
    /// lock is only taken the first time a word is seen.
    fn bump_word(&self, word: String) {
        if let Some(count) = read_lock(&self.word_frequency).get(&word) {
            count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut table = write_lock(&self.word_frequency);
        table
            .entry(word)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Rank of an identity among all identities with recorded messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rank {
    /// 1 + number of identities with a strictly greater count
    pub position: usize,

    /// Total identities with recorded messages
    pub total: usize,

    /// `position / total * 100`, integer arithmetic
    pub percentile: u32,
}

impl Rank {
    /// Human-readable tier label.
    pub fn label(&self) -> &'static str {
        if self.position == 1 {
            "#1 overall"
        } else if self.percentile <= 10 {
            "top 10%"
        } else if self.percentile <= 25 {
            "top 25%"
        } else if self.percentile <= 50 {
            "top 50%"
        } else {
            "newcomer"
        }
    }
}

/// Activity tier label for a message count.
pub fn activity_tier(message_count: u64) -> &'static str {
    if message_count > 100 {
        "very active"
    } else if message_count > 50 {
        "active"
    } else if message_count > 10 {
        "regular"
    } else {
        "newcomer"
    }
}

/// Splits text into lower-cased tokens.
///
/// Characters outside Latin letters, Cyrillic letters and ASCII digits are
/// treated as separators.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if is_word_char(c) { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('а'..='я').contains(&c) || c == 'ё'
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Poison-tolerant read lock: a writer that panicked mid-update can only
/// have left counter values behind, never a broken invariant.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
