//! Inspector Proxy - CDP relay between on-device JS runtimes and debuggers
//!
//! Devices connect once and expose pages. A debugger frontend attaches to a
//! page and from then on CDP traffic flows both ways through a
//! [`Connection`], untouched unless a per-connection
//! [`CustomMessageHandler`] claims it first.
//!
//! ```text
//! device socket ──► Registry ◄── attach ── debugger socket
//!        │                          │
//!        └──► Connection ◄──────────┘
//!               handler? ─► Handled: stop
//!                        └► NotHandled: forward raw frame
//! ```

pub mod cdp;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod transport;

pub use cdp::{CDPMessage, CDPRequest, CDPResponse};
pub use config::ProxyConfig;
pub use connection::{Connection, DebuggerPeer};
pub use device::{DeviceInfo, Page};
pub use error::{ProxyError, Result};
pub use handler::{
    CreateCustomMessageHandlerFn, CustomMessageHandler, CustomMessageHandlerConnection,
    HandlerOutcome,
};
pub use proxy::InspectorProxy;
pub use registry::{ReconnectPolicy, Registry};
pub use transport::Transport;
