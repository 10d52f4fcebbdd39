//! Network module - WebSocket connection to the sync server

mod client;
mod replica;

pub use client::*;
pub use replica::*;
