//! Chirp protocol server.
//!
//! A session speaks newline-delimited commands over TCP: each request is
//! one line, each response a signed decimal result line optionally followed
//! by a payload. The crate splits along that shape: [`wire`] parses and
//! renders, [`dispatch`] authorizes and executes, [`session`] moves bytes,
//! and [`server`] wires the pieces to a listener.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod server;
pub mod session;
pub mod stats;
pub mod wire;

pub use config::ServerConfig;
pub use server::{Server, ServerState};
