//! Peer directory client.
//!
//! Keeps one WebSocket connection to the broker alive, registers this
//! endpoint's role and panel set on every (re)connect, and turns broker
//! traffic into a stream of [`DirectoryEvent`]s. Reconnects with backoff.

mod client;
mod connection;
mod translator;
mod types;


pub use client::DirectoryClient;
pub use types::{DirectoryCommand, DirectoryEvent, Signal};
