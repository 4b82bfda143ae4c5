//! Device-side wire protocol
//!
//! A device multiplexes all of its pages over one socket. CDP traffic for a
//! page travels as a JSON string inside a `wrappedEvent` envelope:
//!
//! ```text
//! proxy  -> device   {"event":"getPages"}
//!                    {"event":"connect","payload":{"pageId":"1"}}
//!                    {"event":"wrappedEvent","payload":{"pageId":"1","wrappedEvent":"{...}"}}
//!                    {"event":"disconnect","payload":{"pageId":"1"}}
//! device -> proxy    {"event":"getPages","payload":[{"id":"1","title":"main",...}]}
//!                    {"event":"wrappedEvent","payload":{...}}
//!                    {"event":"disconnect","payload":{"pageId":"1"}}
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ProxyError, Result};
use crate::transport::{MessageSink, Transport};

pub type DeviceId = String;
pub type PageId = String;

/// Identity of a connected device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub app_id: String,
}

/// Capability flags a page advertises
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageCapabilities {
    pub native_page_reloads: bool,
    pub native_source_code_fetching: bool,
    pub prefers_fusebox_frontend: bool,
}

/// One inspectable JS context on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub title: String,
    #[serde(default)]
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm: Option<String>,
    #[serde(default)]
    pub capabilities: PageCapabilities,
}

impl Page {
    pub fn new(id: impl Into<PageId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            app: String::new(),
            vm: None,
            capabilities: PageCapabilities::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRef {
    pub page_id: PageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedEvent {
    pub page_id: PageId,
    pub wrapped_event: String,
}

/// Envelope sent by the proxy to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ProxyToDevice {
    GetPages,
    Connect(PageRef),
    Disconnect(PageRef),
    WrappedEvent(WrappedEvent),
}

/// Envelope received from a device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum DeviceToProxy {
    GetPages(Vec<Page>),
    WrappedEvent(WrappedEvent),
    Disconnect(PageRef),
}

impl DeviceToProxy {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Push an envelope down a device socket
pub fn send_envelope(transport: &Transport, envelope: &ProxyToDevice) -> Result<()> {
    let text = serde_json::to_string(envelope)?;
    transport.send_text(text)
}

/// Device side of a connection: one page on a shared device socket.
///
/// Closing the sink tells the device the page lost its debugger; the device
/// socket itself stays up for the other pages.
pub struct PageSink {
    transport: Transport,
    page_id: PageId,
    open: AtomicBool,
}

impl PageSink {
    pub fn new(transport: Transport, page_id: PageId) -> Self {
        Self {
            transport,
            page_id,
            open: AtomicBool::new(true),
        }
    }

    /// Announce a new debugger for this page
    pub fn connect(&self) -> Result<()> {
        send_envelope(
            &self.transport,
            &ProxyToDevice::Connect(PageRef {
                page_id: self.page_id.clone(),
            }),
        )
    }
}

impl MessageSink for PageSink {
    fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(ProxyError::ConnectionClosed);
        }
        send_envelope(
            &self.transport,
            &ProxyToDevice::WrappedEvent(WrappedEvent {
                page_id: self.page_id.clone(),
                wrapped_event: text,
            }),
        )
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) && self.transport.is_open() {
            let _ = send_envelope(
                &self.transport,
                &ProxyToDevice::Disconnect(PageRef {
                    page_id: self.page_id.clone(),
                }),
            );
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.transport.is_open()
    }
}
