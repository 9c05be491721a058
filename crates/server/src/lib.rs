//! lnetd server.
//!
//! Accepts TCP connections from Lustre clients and peers, runs the
//! acceptor + HELLO negotiation, then frames and dispatches LNet messages.
//! The shipped handler set answers the LNet PING used for liveness
//! discovery.
//!
//! All state is per-connection and ephemeral; the only process-wide state
//! is the host byte order, the local address catalog used for PING
//! replies, and the command registry populated at startup.

pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use client::{CommandHandler, CommandRegistry, LNetClient};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::{shutdown_signal, LNetServer};
