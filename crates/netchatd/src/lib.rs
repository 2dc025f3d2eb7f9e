//! NetChat Daemon - message broker, session registry and analytics bot
//!
//! This crate provides the server side of NetChat:
//! - `broker` - the message-routing pipeline (bounded queues + workers)
//! - `registry` - session registry actor (activity tracking, idle eviction)
//! - `stats` - concurrent usage statistics and report generation
//! - `commands` - bot command dispatch
//! - `limiter` - per-user fixed-window rate limiting
//! - `server` - TCP listener and per-connection handlers
//! - `monitor` - process resource monitoring
//! - `config` - TOML configuration with defaults
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       netchatd daemon                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────┐  submit   ┌────────────────────────────┐  │
//! │  │  ChatServer  │──────────▶│          Broker            │  │
//! │  │ (TCP accept) │           │ inbound ─▶ router ─▶ ...   │  │
//! │  └──────┬───────┘           └──────┬──────────────┬──────┘  │
//! │         │ per connection          │ broadcast    │ analytics│
//! │         ▼                         ▼              ▼          │
//! │  ┌──────────────┐         ┌──────────────┐ ┌─────────────┐  │
//! │  │ Connection   │◀────────│  delivery    │ │ StatsAggr + │  │
//! │  │ Handler      │  lines  │  fan-out     │ │ Dispatcher  │  │
//! │  └──────┬───────┘         └──────────────┘ └─────────────┘  │
//! │         │ register/admit/touch                              │
//! │         ▼                                                   │
//! │  ┌──────────────┐                                           │
//! │  │RegistryActor │ (session state owner)                     │
//! │  └──────────────┘                                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod broker;
pub mod commands;
pub mod config;
pub mod limiter;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod stats;
