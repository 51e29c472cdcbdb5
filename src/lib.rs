//! # pageant-client
//!
//! Socket-like client for PuTTY's Pageant SSH agent on Windows.
//!
//! SSH agent clients speak a stream of length-prefixed messages over a
//! Unix socket. Pageant instead takes one message at a time through a
//! shared memory region and a `WM_COPYDATA` notification to its window.
//! This crate hides that difference behind [`PageantSocket`].
//!
//! ## Architecture
//!
//! - **Protocol**: frame accumulation and the reply queue
//! - **Transport**: agent lookup, per-user region security, the exchange
//! - **Native**: the OS capability trait, with a Win32 binding and a fake
//!
//! ## Example
//!
//! ```ignore
//! use pageant_client::PageantSocket;
//!
//! fn main() -> pageant_client::Result<()> {
//!     let mut socket = PageantSocket::open(None)?;
//!     socket.send(&[0, 0, 0, 1, 11])?;
//!     let reply = socket.read(None);
//!     println!("{} byte reply", reply.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod native;
pub mod protocol;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

mod socket;

pub use config::SocketConfig;
pub use error::{PageantError, Result};
pub use socket::{pageant_available, PageantSocket, SocketBuilder};
