//! sigrelay daemon - path registry and supervised WebSocket relay
//!
//! This crate provides the core infrastructure for the relay daemon:
//! - `registry` - Path registry actor, creates paths on first use
//! - `path` - Two slot cells per path with takeover and rendezvous
//! - `session` - Keep-alive and relay tasks under one supervisor
//! - `server` - TCP/WebSocket listener and per-connection admission
//! - `ws` - tokio-tungstenite implementation of [`connection::Connection`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      sigrelayd daemon                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │ SignalingServer │────▶│      RegistryActor          │    │
//! │  │  (TCP + WS)     │     │  (name -> Arc<Path>)        │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │                   │
//! │           │ per connection              │ shared paths      │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   supervise()   │────▶│   Path: slot 0 | slot 1     │    │
//! │  │ keep-alive+relay│     │   (watch cells)             │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate does not call `.unwrap()` or `.expect()`.
//! Channel closure and transport failures surface as error values and end
//! in a close code.

pub mod client;
pub mod config;
pub mod connection;
pub mod path;
pub mod registry;
pub mod server;
pub mod session;
pub mod ws;
