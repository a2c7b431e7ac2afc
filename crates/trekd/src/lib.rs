//! Chat Trek Daemon - Participant registry, message router and bots
//!
//! This crate provides the core infrastructure for the chat room:
//! - `registry` - Name → participant and name → stats under one lock
//! - `router` - Broadcast and private dispatch, membership, dispatch tap
//! - `participant` - Connection-backed, scripted bot and stall variants
//! - `naming` - Unique display-name allocation
//! - `server` - TCP server speaking line-delimited JSON
//! - `admin` - HTTP inspection and eviction surface
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       trekd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐            ┌─────────────────────┐     │
//! │  │   ChatServer    │            │  admin (axum)       │     │
//! │  │     (TCP)       │            │  /debug/chat/*      │     │
//! │  └────────┬────────┘            └──────────┬──────────┘     │
//! │           │ per client                     │                │
//! │           ▼                                ▼                │
//! │  ┌─────────────────┐  dispatch  ┌─────────────────────┐     │
//! │  │ConnectionHandler│───────────▶│       Router        │     │
//! │  └─────────────────┘            └──────────┬──────────┘     │
//! │  ┌─────────────────┐  dispatch             │                │
//! │  │ ScriptedBot /   │──────────────────────▶│                │
//! │  │ StallBot        │                       ▼                │
//! │  └─────────────────┘            ┌─────────────────────┐     │
//! │                                 │      Registry       │     │
//! │                                 │  (one RwLock)       │     │
//! │                                 └─────────────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Delivery failures are values, never panics

pub mod admin;
pub mod config;
pub mod flavor;
pub mod naming;
pub mod participant;
pub mod registry;
pub mod router;
pub mod server;
