//! Connection - one debugger frontend paired with one device page
//!
//! The relay treats messages as opaque text. It parses them only to give the
//! optional handler something to look at, then forwards the original frame,
//! so anything the handler does not claim arrives byte-for-byte.
//!
//! Each direction is drained by its own task, strictly in order: the next
//! message waits until the previous one (handler await included) is done.
//! The two directions do not wait on each other.

use futures_util::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cdp::CDPMessage;
use crate::device::{DeviceId, Page, PageSink};
use crate::error::Result;
use crate::handler::{
    CreateCustomMessageHandlerFn, CustomMessageHandler, CustomMessageHandlerConnection,
    ExposedDebuggerInfo, ExposedDeviceInfo, HandlerOutcome, MessageSender,
};
use crate::registry::{Registry, ResolvedPage};
use crate::transport::{MessageSink, Transport};

/// Which way a message is travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    DeviceToDebugger,
    DebuggerToDevice,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::DeviceToDebugger => f.write_str("device"),
            Direction::DebuggerToDevice => f.write_str("debugger"),
        }
    }
}

/// The debugger side as handed over by the socket layer
pub struct DebuggerPeer {
    pub user_agent: Option<String>,
    pub transport: Transport,
}

pub struct Connection {
    id: Uuid,
    device_id: DeviceId,
    page: Page,

    /// Cleared exactly once, by `detach`
    alive: Arc<AtomicBool>,

    device: Arc<dyn MessageSink>,
    debugger: Arc<dyn MessageSink>,

    /// Taken on detach; in-flight calls keep their own Arc until they finish
    handler: RwLock<Option<Arc<dyn CustomMessageHandler>>>,

    closed: watch::Sender<bool>,
    device_gone: watch::Receiver<bool>,
}

impl Connection {
    /// Pair a debugger with a page.
    ///
    /// The page must exist at this moment. The handler factory, if any, runs
    /// once here with a read-only view of the new connection.
    pub fn attach(
        registry: &Registry,
        device_id: &str,
        page_id: &str,
        debugger: DebuggerPeer,
        factory: Option<&CreateCustomMessageHandlerFn>,
    ) -> Result<Self> {
        let target = registry.resolve(device_id, page_id)?;
        Self::open(target, debugger, factory)
    }

    /// Attach against a page already resolved from the registry
    pub(crate) fn open(
        target: ResolvedPage,
        debugger: DebuggerPeer,
        factory: Option<&CreateCustomMessageHandlerFn>,
    ) -> Result<Self> {
        let ResolvedPage {
            info,
            page,
            transport: device_transport,
            device_gone,
        } = target;
        let device_id = info.id.clone();

        let page_sink = PageSink::new(device_transport, page.id.clone());
        page_sink.connect()?;

        let device: Arc<dyn MessageSink> = Arc::new(page_sink);
        let debugger_sink: Arc<dyn MessageSink> = Arc::new(debugger.transport);
        let alive = Arc::new(AtomicBool::new(true));

        let view = CustomMessageHandlerConnection::new(
            page.clone(),
            ExposedDeviceInfo::new(info, MessageSender::new(device.clone(), alive.clone())),
            ExposedDebuggerInfo::new(
                debugger.user_agent,
                MessageSender::new(debugger_sink.clone(), alive.clone()),
            ),
        );
        let handler: Option<Arc<dyn CustomMessageHandler>> =
            factory.and_then(|create| create(&view)).map(Arc::from);

        let id = Uuid::now_v7();
        tracing::info!(
            connection = %id,
            device = %device_id,
            page = %page.id,
            custom_handler = handler.is_some(),
            "Debugger attached"
        );

        let (closed, _) = watch::channel(false);
        Ok(Self {
            id,
            device_id,
            page,
            alive,
            device,
            debugger: debugger_sink,
            handler: RwLock::new(handler),
            closed,
            device_gone,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Raw frame from the device page, headed for the debugger
    pub async fn on_device_message(&self, raw: &str) {
        self.relay(Direction::DeviceToDebugger, raw).await;
    }

    /// Raw frame from the debugger, headed for the device page
    pub async fn on_debugger_message(&self, raw: &str) {
        self.relay(Direction::DebuggerToDevice, raw).await;
    }

    /// Tear the connection down. Idempotent.
    ///
    /// Both send capabilities die here, so a handler holding on to them can
    /// no longer reach either side.
    pub async fn detach(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.device.close();
        self.debugger.close();
        self.handler.write().await.take();
        self.closed.send_replace(true);
        tracing::info!(
            connection = %self.id,
            device = %self.device_id,
            page = %self.page.id,
            "Debugger detached"
        );
    }

    /// Drive both directions until either side goes away.
    ///
    /// The returned task finishes once the connection is detached and both
    /// pumps have stopped.
    pub fn run(
        self: Arc<Self>,
        device_rx: mpsc::UnboundedReceiver<String>,
        debugger_rx: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        let device_task =
            tokio::spawn(self.clone().pump(Direction::DeviceToDebugger, device_rx));
        let debugger_task = tokio::spawn(self.pump(Direction::DebuggerToDevice, debugger_rx));
        tokio::spawn(async move {
            let _ = tokio::join!(device_task, debugger_task);
        })
    }

    async fn pump(
        self: Arc<Self>,
        direction: Direction,
        mut inbound: mpsc::UnboundedReceiver<String>,
    ) {
        let mut closed = self.closed.subscribe();
        let mut device_gone = self.device_gone.clone();

        loop {
            tokio::select! {
                biased;
                // The watch::Ref guards are not Send; drop them inside the arm
                _ = closed.wait_for(|closed| *closed).map(|_| ()) => break,
                _ = device_gone.wait_for(|gone| *gone).map(|_| ()) => {
                    tracing::debug!(connection = %self.id, "Device went away");
                    break;
                }
                raw = inbound.recv() => match raw {
                    Some(raw) => self.relay(direction, &raw).await,
                    None => {
                        tracing::debug!(connection = %self.id, "{} stream ended", direction);
                        break;
                    }
                },
            }
        }

        self.detach().await;
    }

    async fn relay(&self, direction: Direction, raw: &str) {
        if !self.is_alive() {
            return;
        }

        let message = match CDPMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    connection = %self.id,
                    "Dropping malformed {} message: {}",
                    direction,
                    e
                );
                return;
            }
        };

        if self.offer(direction, &message).await.is_handled() {
            return;
        }

        // The handler may have outlived a detach
        if !self.is_alive() {
            return;
        }

        let target = match direction {
            Direction::DeviceToDebugger => &self.debugger,
            Direction::DebuggerToDevice => &self.device,
        };
        if let Err(e) = target.send_text(raw.to_string()) {
            tracing::debug!(connection = %self.id, "Peer closed mid-send: {}", e);
            self.detach().await;
        }
    }

    /// Ask the handler about one message. Errors and panics count as
    /// `NotHandled`.
    async fn offer(&self, direction: Direction, message: &CDPMessage) -> HandlerOutcome {
        let Some(handler) = self.handler.read().await.clone() else {
            return HandlerOutcome::NotHandled;
        };

        let call = async {
            match direction {
                Direction::DeviceToDebugger => handler.handle_device_message(message).await,
                Direction::DebuggerToDevice => handler.handle_debugger_message(message).await,
            }
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(
                    connection = %self.id,
                    method = message.method().unwrap_or("<response>"),
                    "Custom message handler failed on {} message: {}",
                    direction,
                    e
                );
                HandlerOutcome::NotHandled
            }
            Err(_) => {
                tracing::error!(
                    connection = %self.id,
                    method = message.method().unwrap_or("<response>"),
                    "Custom message handler panicked on {} message",
                    direction
                );
                HandlerOutcome::NotHandled
            }
        }
    }
}
