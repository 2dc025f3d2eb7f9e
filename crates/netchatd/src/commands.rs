//! Bot command handling.
//!
//! The dispatcher maps a parsed command name to a reply built from the
//! aggregator's current state. It always produces reply text - any internal
//! failure is caught at the dispatch boundary and converted into a generic
//! diagnostic, so one bad command can never take down the analytics worker.

use crate::stats::{activity_tier, StatsAggregator};
use chrono::Local;
use netchat_core::Username;
use netchat_protocol::{parse_command, CommandParseError};
use std::fmt::Write as _;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Width of the proportion bar in `/stats` replies.
const SHARE_BAR_WIDTH: usize = 10;

/// Reply for command names nobody registered.
const UNKNOWN_COMMAND: &str = "Unknown command. Type /help for the list of commands.";

/// Reply when a handler fails internally.
const GENERIC_FAILURE: &str = "Command failed, please try again.";

const HELP_TEXT: &str = "Available commands:\n\
    /help - show this message\n\
    /stats [name] - user statistics\n\
    /top - most popular words\n\
    /users - list users with recorded messages (alias: /online)\n\
    /me - your personal statistics\n\
    /time - current server time\n\
    /uptime - server uptime\n\
    \n\
    Type a message without a leading slash to send it to the chat.";

/// Maps command messages to bot replies.
pub struct CommandDispatcher {
    stats: Arc<StatsAggregator>,
    started_at: Instant,
}

impl CommandDispatcher {
    pub fn new(stats: Arc<StatsAggregator>) -> Self {
        Self {
            stats,
            started_at: Instant::now(),
        }
    }

    /// Produces the reply for a raw command line.
    ///
    /// Never fails and never panics: handler panics are caught and turned
    /// into a generic diagnostic.
    pub fn dispatch(&self, sender: &Username, raw: &str) -> String {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch_inner(sender, raw)));

        match outcome {
            Ok(reply) => reply,
            Err(_) => {
                error!(sender = %sender, command = raw, "command handler panicked");
                GENERIC_FAILURE.to_string()
            }
        }
    }

    fn dispatch_inner(&self, sender: &Username, raw: &str) -> String {
        let parsed = match parse_command(raw) {
            Ok(parsed) => parsed,
            Err(CommandParseError::ArgumentTooLong { max, .. }) => {
                return format!("Command argument is too long (max {max} characters).");
            }
        };

        debug!(sender = %sender, command = %parsed.name, "dispatching command");

        match parsed.name.as_str() {
            "stats" => self.handle_stats(sender, &parsed.args),
            "top" => self.handle_top(),
            "users" | "online" => self.handle_users(),
            "me" => self.handle_stats(sender, ""),
            "help" => HELP_TEXT.to_string(),
            "time" => format!("Server time: {}", Local::now().format("%H:%M:%S")),
            "uptime" => format!(
                "Server uptime: {}",
                format_uptime(self.started_at.elapsed().as_secs())
            ),
            _ => UNKNOWN_COMMAND.to_string(),
        }
    }

    /// `/stats [name]` - statistics for the target user (default: sender).
    fn handle_stats(&self, sender: &Username, args: &str) -> String {
        let target = if args.is_empty() {
            sender.clone()
        } else {
            Username::new(args)
        };

        let counts = self.stats.snapshot_user_counts();
        let Some(&messages) = counts.get(&target) else {
            return format!("User '{target}' not found or has not sent any messages.");
        };

        let rank_label = self
            .stats
            .rank_of(&target)
            .map(|rank| rank.label())
            .unwrap_or("newcomer");

        let mut reply = String::new();
        let _ = writeln!(reply, "Stats for {target}:");
        let _ = writeln!(reply, "  messages: {messages}");
        let _ = writeln!(reply, "  activity: {}", activity_tier(messages));
        let _ = writeln!(reply, "  rank: {rank_label}");
        let _ = write!(
            reply,
            "  share: {}",
            render_share_bar(messages, self.stats.total_messages())
        );
        reply
    }

    /// `/top` - global word-frequency leaderboard.
    fn handle_top(&self) -> String {
        let mut words: Vec<(String, u64)> =
            self.stats.snapshot_word_frequency().into_iter().collect();

        if words.is_empty() {
            return "No word statistics yet.".to_string();
        }

        words.sort_by(|a, b| b.1.cmp(&a.1));

        let mut reply = String::from("Top 10 words:");
        for (i, (word, count)) in words.iter().take(10).enumerate() {
            let _ = write!(reply, "\n  {}. \"{word}\" - {count}", i + 1);
        }
        reply
    }

    /// `/users` - all identities with a recorded count, most active first.
    fn handle_users(&self) -> String {
        let mut counts: Vec<(Username, u64)> =
            self.stats.snapshot_user_counts().into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));

        let mut reply = format!("Users online ({}):", counts.len());
        for (name, messages) in &counts {
            let _ = write!(
                reply,
                "\n  [{}] {name}: {messages} messages",
                activity_tier(*messages)
            );
        }
        let _ = write!(
            reply,
            "\n\nTotal messages in chat: {}",
            self.stats.total_messages()
        );
        reply
    }
}

/// Renders the share of `part` in `total` as an ASCII bar with percentage.
fn render_share_bar(part: u64, total: u64) -> String {
    let percent = if total == 0 { 0 } else { part * 100 / total };
    let filled = (percent as usize * SHARE_BAR_WIDTH / 100).min(SHARE_BAR_WIDTH);

    let mut bar = String::with_capacity(SHARE_BAR_WIDTH + 8);
    bar.push('[');
    for i in 0..SHARE_BAR_WIDTH {
        bar.push(if i < filled { '#' } else { '.' });
    }
    bar.push(']');
    let _ = write!(bar, " {percent}%");
    bar
}

fn format_uptime(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher_with_messages() -> (CommandDispatcher, Username) {
        let stats = Arc::new(StatsAggregator::new());
        let alice = Username::new("alice");
        let bob = Username::new("bob");

        for _ in 0..3 {
            stats.record_user_message(&alice, "hello wonderful world");
        }
        stats.record_user_message(&bob, "hello there");

        (CommandDispatcher::new(stats), alice)
    }

    #[test]
    fn test_stats_unknown_user_is_diagnostic() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let reply = dispatcher.dispatch(&alice, "/stats nobody");
        assert_eq!(
            reply,
            "User 'nobody' not found or has not sent any messages."
        );
    }

    #[test]
    fn test_stats_defaults_to_sender() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let reply = dispatcher.dispatch(&alice, "/stats");
        assert!(reply.contains("Stats for alice:"));
        assert!(reply.contains("messages: 3"));
        assert!(reply.contains("rank: #1 overall"));
        assert!(reply.contains("share: ["));
    }

    #[test]
    fn test_stats_for_named_target() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let reply = dispatcher.dispatch(&alice, "/stats bob");
        assert!(reply.contains("Stats for bob:"));
        assert!(reply.contains("messages: 1"));
    }

    #[test]
    fn test_me_is_alias_for_own_stats() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let me = dispatcher.dispatch(&alice, "/me");
        let stats = dispatcher.dispatch(&alice, "/stats");
        assert_eq!(me, stats);
    }

    #[test]
    fn test_top_lists_words_by_frequency() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let reply = dispatcher.dispatch(&alice, "/top");
        assert!(reply.starts_with("Top 10 words:"));
        // "hello" appears 4 times, more than any other word
        assert!(reply.contains("1. \"hello\" - 4"));
    }

    #[test]
    fn test_top_with_no_data() {
        let dispatcher = CommandDispatcher::new(Arc::new(StatsAggregator::new()));
        let reply = dispatcher.dispatch(&Username::new("alice"), "/top");
        assert_eq!(reply, "No word statistics yet.");
    }

    #[test]
    fn test_users_sorted_descending() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let reply = dispatcher.dispatch(&alice, "/users");

        assert!(reply.starts_with("Users online (2):"));
        let alice_pos = reply.find("alice").expect("alice listed");
        let bob_pos = reply.find("bob").expect("bob listed");
        assert!(alice_pos < bob_pos, "most active user listed first");
        assert!(reply.contains("Total messages in chat: 4"));
    }

    #[test]
    fn test_online_is_alias_for_users() {
        let (dispatcher, alice) = dispatcher_with_messages();
        assert_eq!(
            dispatcher.dispatch(&alice, "/users"),
            dispatcher.dispatch(&alice, "/online")
        );
    }

    #[test]
    fn test_help_lists_commands() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let reply = dispatcher.dispatch(&alice, "/help");
        for command in ["/help", "/stats", "/top", "/users", "/me", "/time", "/uptime"] {
            assert!(reply.contains(command), "help should mention {command}");
        }
    }

    #[test]
    fn test_command_names_are_case_insensitive() {
        let (dispatcher, alice) = dispatcher_with_messages();
        assert_eq!(
            dispatcher.dispatch(&alice, "/HELP"),
            dispatcher.dispatch(&alice, "/help")
        );
    }

    #[test]
    fn test_unknown_command() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let reply = dispatcher.dispatch(&alice, "/frobnicate");
        assert_eq!(reply, UNKNOWN_COMMAND);
    }

    #[test]
    fn test_oversized_argument_is_diagnostic() {
        let (dispatcher, alice) = dispatcher_with_messages();
        let arg = "x".repeat(netchat_protocol::MAX_COMMAND_ARG_LEN + 1);
        let reply = dispatcher.dispatch(&alice, &format!("/stats {arg}"));
        assert!(reply.contains("argument is too long"));
    }

    #[test]
    fn test_time_and_uptime_replies() {
        let (dispatcher, alice) = dispatcher_with_messages();
        assert!(dispatcher.dispatch(&alice, "/time").starts_with("Server time: "));
        assert!(dispatcher
            .dispatch(&alice, "/uptime")
            .starts_with("Server uptime: 00:00:"));
    }

    #[test]
    fn test_share_bar_rendering() {
        assert_eq!(render_share_bar(1, 2), "[#####.....] 50%");
        assert_eq!(render_share_bar(0, 5), "[..........] 0%");
        assert_eq!(render_share_bar(5, 5), "[##########] 100%");
        // Total of zero cannot divide
        assert_eq!(render_share_bar(0, 0), "[..........] 0%");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "00:00:00");
        assert_eq!(format_uptime(61), "00:01:01");
        assert_eq!(format_uptime(3661), "01:01:01");
        assert_eq!(format_uptime(100 * 3600), "100:00:00");
    }
}
