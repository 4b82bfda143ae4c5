//! Custom Message Handler - per-connection interception seam
//!
//! A handler sees every CDP message on its connection before the relay does.
//! It either claims the message (`Handled`, relay stops) or lets it through
//! (`NotHandled`, relay forwards the original text untouched).
//!
//! A handler that claims a request owns the reply. The proxy never
//! synthesizes one; a claimed request nobody answers hangs in the debugger.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cdp::CDPMessage;
use crate::device::{DeviceInfo, Page};
use crate::error::{ProxyError, Result};
use crate::transport::MessageSink;

/// Error type handlers may fail with. Never fatal to the relay.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Verdict on a single message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Fully consumed, do not relay
    Handled,
    /// Relay unchanged
    #[default]
    NotHandled,
}

impl HandlerOutcome {
    pub fn is_handled(self) -> bool {
        matches!(self, HandlerOutcome::Handled)
    }
}

impl From<bool> for HandlerOutcome {
    fn from(handled: bool) -> Self {
        if handled {
            HandlerOutcome::Handled
        } else {
            HandlerOutcome::NotHandled
        }
    }
}

/// Interceptor bound to exactly one connection.
///
/// Both methods must be safe to call with messages the handler does not care
/// about and answer `NotHandled` for them. Messages from one side arrive in
/// transport order; the two sides may interleave arbitrarily.
#[async_trait]
pub trait CustomMessageHandler: Send + Sync {
    /// Called before a device message is relayed to the debugger
    async fn handle_device_message(
        &self,
        message: &CDPMessage,
    ) -> std::result::Result<HandlerOutcome, HandlerError>;

    /// Called before a debugger message is relayed to the device
    async fn handle_debugger_message(
        &self,
        message: &CDPMessage,
    ) -> std::result::Result<HandlerOutcome, HandlerError>;
}

/// Builds the handler for a new connection, or `None` for a pure relay.
/// Invoked exactly once per attach.
pub type CreateCustomMessageHandlerFn = Arc<
    dyn Fn(&CustomMessageHandlerConnection) -> Option<Box<dyn CustomMessageHandler>>
        + Send
        + Sync,
>;

/// Send capability for one side of a connection.
///
/// Dead as soon as the connection detaches, even if the underlying socket
/// lives on.
#[derive(Clone)]
pub struct MessageSender {
    sink: Arc<dyn MessageSink>,
    alive: Arc<AtomicBool>,
}

impl MessageSender {
    pub(crate) fn new(sink: Arc<dyn MessageSink>, alive: Arc<AtomicBool>) -> Self {
        Self { sink, alive }
    }

    pub fn send_message(&self, message: &CDPMessage) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ProxyError::ConnectionClosed);
        }
        self.sink.send_text(message.to_json()?)
    }

    pub fn is_open(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.sink.is_open()
    }
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Device as seen by a handler
#[derive(Debug, Clone)]
pub struct ExposedDeviceInfo {
    info: DeviceInfo,
    sender: MessageSender,
}

impl ExposedDeviceInfo {
    pub(crate) fn new(info: DeviceInfo, sender: MessageSender) -> Self {
        Self { info, sender }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn app_id(&self) -> &str {
        &self.info.app_id
    }

    /// Send a message to the device page
    pub fn send_message(&self, message: &CDPMessage) -> Result<()> {
        self.sender.send_message(message)
    }
}

/// Debugger frontend as seen by a handler
#[derive(Debug, Clone)]
pub struct ExposedDebuggerInfo {
    user_agent: Option<String>,
    sender: MessageSender,
}

impl ExposedDebuggerInfo {
    pub(crate) fn new(user_agent: Option<String>, sender: MessageSender) -> Self {
        Self { user_agent, sender }
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Send a message to the debugger frontend
    pub fn send_message(&self, message: &CDPMessage) -> Result<()> {
        self.sender.send_message(message)
    }
}

/// Read-only view of a connection handed to handler factories.
///
/// Handlers may clone it and keep it; identity cannot be changed through it,
/// only messages sent.
#[derive(Debug, Clone)]
pub struct CustomMessageHandlerConnection {
    page: Page,
    device_info: ExposedDeviceInfo,
    debugger_info: ExposedDebuggerInfo,
}

impl CustomMessageHandlerConnection {
    pub(crate) fn new(
        page: Page,
        device_info: ExposedDeviceInfo,
        debugger_info: ExposedDebuggerInfo,
    ) -> Self {
        Self {
            page,
            device_info,
            debugger_info,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn device_info(&self) -> &ExposedDeviceInfo {
        &self.device_info
    }

    pub fn debugger_info(&self) -> &ExposedDebuggerInfo {
        &self.debugger_info
    }
}
