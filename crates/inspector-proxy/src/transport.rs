//! Transport - outbound half of a peer socket
//!
//! Writers never touch the WebSocket directly. They push frames into an
//! unbounded channel drained by the socket's writer task, so a slow peer
//! never blocks a relay loop and tests can read frames off the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{ProxyError, Result};

/// Frame queued for a peer socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

/// Anything a connection can push CDP text into
pub trait MessageSink: Send + Sync {
    /// Queue text for the peer. Fails once the sink is closed.
    fn send_text(&self, text: String) -> Result<()>;

    /// Close the sink. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Cloneable handle to a peer socket's outbound queue
#[derive(Clone, Debug)]
pub struct Transport {
    tx: mpsc::UnboundedSender<Frame>,
    open: Arc<AtomicBool>,
}

impl Transport {
    /// Create a transport and the receiver its writer task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (transport, rx)
    }
}

impl MessageSink for Transport {
    fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(ProxyError::ConnectionClosed);
        }
        if self.tx.send(Frame::Text(text)).is_err() {
            // Writer task is gone, the socket with it
            self.open.store(false, Ordering::SeqCst);
            return Err(ProxyError::ConnectionClosed);
        }
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Frame::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}
