//! Request Identities - list the keys held by a running Pageant.
//!
//! This example demonstrates:
//! - Opening a socket to the running agent
//! - Sending one agent request and reading its reply
//! - Walking the reply as a frame stream
//!
//! # Running
//!
//! ```text
//! RUST_LOG=pageant_client=debug cargo run --example request_identities
//! ```

/// SSH2_AGENTC_REQUEST_IDENTITIES
const REQUEST_IDENTITIES: [u8; 5] = [0, 0, 0, 1, 11];
/// SSH2_AGENT_IDENTITIES_ANSWER
const IDENTITIES_ANSWER: u8 = 12;

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use pageant_client::protocol::FrameBuffer;
    use pageant_client::PageantSocket;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pageant_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !PageantSocket::is_running() {
        tracing::warn!("Pageant is not running");
        return Ok(());
    }

    let mut socket = PageantSocket::open(None)?;
    socket.send(&REQUEST_IDENTITIES)?;

    let mut replies = FrameBuffer::new();
    replies.extend(&socket.read(None));

    while let Some(frame) = replies.next_frame()? {
        let payload = frame.payload();
        match payload.first() {
            Some(&IDENTITIES_ANSWER) if payload.len() >= 5 => {
                let count = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
                tracing::info!(keys = count, "identities answer");
            }
            Some(&kind) => tracing::info!(kind, len = payload.len(), "unexpected reply"),
            None => tracing::info!("empty reply"),
        }
    }

    socket.close();
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    let _ = (REQUEST_IDENTITIES, IDENTITIES_ANSWER);
    eprintln!("Pageant is only available on Windows");
}
