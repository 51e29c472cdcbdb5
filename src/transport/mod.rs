//! Transport module - the shared-memory handoff with the agent process.
//!
//! Provides:
//! - Peer location (agent window lookup)
//! - Per-user access descriptor for the shared region
//! - The single-shot exchange channel

mod exchange;
mod locator;
mod security;

pub use exchange::ExchangeChannel;
pub use locator::{find_peer, PeerHandle};
pub use security::{access_descriptor_for_current_user, AccessDescriptor};
