//! Inspector Proxy - registry, handler factory and live connections in one place
//!
//! One debugger per page. A second debugger on the same page replaces the
//! first, the way a reopened DevTools window takes over.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use crate::connection::{Connection, DebuggerPeer};
use crate::device::{DeviceId, DeviceInfo, PageId};
use crate::error::Result;
use crate::handler::CreateCustomMessageHandlerFn;
use crate::registry::{DeviceHandle, Registry};
use crate::transport::Transport;

type PageKey = (DeviceId, PageId);

struct ConnectionSlot {
    connection: Arc<Connection>,
    /// Feeds the connection's device-side pump
    device_tx: mpsc::UnboundedSender<String>,
}

pub struct InspectorProxy {
    registry: Arc<Registry>,
    handler_factory: Option<CreateCustomMessageHandlerFn>,
    connections: DashMap<PageKey, ConnectionSlot>,
}

impl InspectorProxy {
    pub fn new(
        registry: Arc<Registry>,
        handler_factory: Option<CreateCustomMessageHandlerFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            handler_factory,
            connections: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn register_device(&self, info: DeviceInfo, transport: Transport) -> Result<DeviceHandle> {
        self.registry.register_device(info, transport)
    }

    /// Socket for `handle` went away. Its connections stop on the registry's
    /// teardown signal.
    pub fn disconnect_device(&self, handle: &DeviceHandle) {
        self.registry.release(handle);
    }

    /// Attach a debugger to a page and start relaying.
    ///
    /// `debugger_rx` carries raw frames read from the debugger socket; when
    /// it closes, the connection detaches.
    pub async fn attach_debugger(
        self: &Arc<Self>,
        device_id: &str,
        page_id: &str,
        debugger: DebuggerPeer,
        debugger_rx: mpsc::UnboundedReceiver<String>,
    ) -> Result<Arc<Connection>> {
        // Resolve before touching an existing session; a page list update
        // after this point cannot fail the attach
        let target = self.registry.resolve(device_id, page_id)?;

        let key: PageKey = (device_id.to_string(), page_id.to_string());
        if let Some((_, previous)) = self.connections.remove(&key) {
            tracing::info!(
                device = %device_id,
                page = %page_id,
                "New debugger replaces connection {}",
                previous.connection.id()
            );
            previous.connection.detach().await;
        }

        let connection = Arc::new(Connection::open(
            target,
            debugger,
            self.handler_factory.as_ref(),
        )?);

        let (device_tx, device_rx) = mpsc::unbounded_channel();
        self.connections.insert(
            key.clone(),
            ConnectionSlot {
                connection: connection.clone(),
                device_tx,
            },
        );

        let task = connection.clone().run(device_rx, debugger_rx);
        let proxy: Weak<Self> = Arc::downgrade(self);
        let id = connection.id();
        tokio::spawn(async move {
            let _ = task.await;
            if let Some(proxy) = proxy.upgrade() {
                proxy
                    .connections
                    .remove_if(&key, |_, slot| slot.connection.id() == id);
            }
        });

        Ok(connection)
    }

    /// Hand a CDP frame from a device page to its debugger, if one is attached
    pub fn route_device_message(&self, device_id: &str, page_id: &str, raw: String) -> bool {
        let key: PageKey = (device_id.to_string(), page_id.to_string());
        match self.connections.get(&key) {
            Some(slot) => slot.device_tx.send(raw).is_ok(),
            None => {
                tracing::debug!(
                    device = %device_id,
                    page = %page_id,
                    "No debugger attached, dropping device message"
                );
                false
            }
        }
    }

    /// Device reported that a page lost its runtime
    pub async fn detach_page(&self, device_id: &str, page_id: &str) {
        let key: PageKey = (device_id.to_string(), page_id.to_string());
        if let Some((_, slot)) = self.connections.remove(&key) {
            slot.connection.detach().await;
        }
    }

    pub fn connection(&self, device_id: &str, page_id: &str) -> Option<Arc<Connection>> {
        let key: PageKey = (device_id.to_string(), page_id.to_string());
        self.connections
            .get(&key)
            .map(|slot| slot.connection.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Detach every debugger and unregister every device
    pub async fn shutdown(&self) {
        let connections: Vec<_> = self
            .connections
            .iter()
            .map(|slot| slot.connection.clone())
            .collect();
        self.connections.clear();
        for connection in connections {
            connection.detach().await;
        }
        self.registry.shutdown();
        tracing::info!("Inspector proxy shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Page;
    use crate::error::ProxyError;
    use crate::handlers;
    use crate::transport::Frame;
    use std::time::Duration;

    fn proxy_with_device() -> (
        Arc<InspectorProxy>,
        DeviceHandle,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let proxy = InspectorProxy::new(
            Arc::new(Registry::default()),
            handlers::build_factory(vec!["Overlay.setPausedInDebuggerMessage".to_string()], true),
        );
        let (transport, device_rx) = Transport::channel();
        let handle = proxy
            .register_device(
                DeviceInfo {
                    id: "1a9372c".to_string(),
                    name: "Pixel 7".to_string(),
                    app_id: "com.example.app".to_string(),
                },
                transport,
            )
            .unwrap();
        proxy
            .registry()
            .update_pages("1a9372c", vec![Page::new("-1", "main")])
            .unwrap();
        (proxy, handle, device_rx)
    }

    async fn attach(
        proxy: &Arc<InspectorProxy>,
        page_id: &str,
    ) -> Result<(
        Arc<Connection>,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<Frame>,
    )> {
        let (transport, debugger_frames) = Transport::channel();
        let (debugger_tx, debugger_rx) = mpsc::unbounded_channel();
        let connection = proxy
            .attach_debugger(
                "1a9372c",
                page_id,
                DebuggerPeer {
                    user_agent: None,
                    transport,
                },
                debugger_rx,
            )
            .await?;
        Ok((connection, debugger_tx, debugger_frames))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_routes_device_messages_to_debugger() {
        let (proxy, _handle, _device_rx) = proxy_with_device();
        assert!(!proxy.route_device_message("1a9372c", "-1", "{}".to_string()));

        let (_connection, _debugger_tx, mut frames) = attach(&proxy, "-1").await.unwrap();
        assert!(proxy.route_device_message(
            "1a9372c",
            "-1",
            r#"{"method":"Debugger.resumed"}"#.to_string()
        ));
        settle().await;

        assert_eq!(
            frames.try_recv().unwrap(),
            Frame::Text(r#"{"method":"Debugger.resumed"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_page_leaves_existing_session() {
        let (proxy, _handle, _device_rx) = proxy_with_device();
        let (first, _tx, _frames) = attach(&proxy, "-1").await.unwrap();

        let result = attach(&proxy, "missing").await;
        assert!(matches!(result, Err(ProxyError::PageNotFound { .. })));
        assert!(first.is_alive());
        assert_eq!(proxy.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_second_debugger_replaces_first() {
        let (proxy, _handle, _device_rx) = proxy_with_device();
        let (first, _tx1, mut first_frames) = attach(&proxy, "-1").await.unwrap();
        let (second, _tx2, _frames2) = attach(&proxy, "-1").await.unwrap();

        assert!(!first.is_alive());
        assert!(second.is_alive());
        assert_eq!(first_frames.try_recv().unwrap(), Frame::Close);
        settle().await;

        // The old supervisor must not remove the new slot
        assert_eq!(proxy.connection_count(), 1);
        assert_eq!(
            proxy.connection("1a9372c", "-1").unwrap().id(),
            second.id()
        );
    }

    #[tokio::test]
    async fn test_replacement_disconnects_old_before_connecting_new() {
        let (proxy, _handle, mut device_rx) = proxy_with_device();
        let (_first, _tx1, _frames1) = attach(&proxy, "-1").await.unwrap();
        let (second, _tx2, _frames2) = attach(&proxy, "-1").await.unwrap();

        let events: Vec<String> = std::iter::from_fn(|| match device_rx.try_recv().ok()? {
            Frame::Text(text) => {
                let envelope: serde_json::Value = serde_json::from_str(&text).unwrap();
                Some(envelope["event"].as_str().unwrap().to_string())
            }
            Frame::Close => None,
        })
        .collect();
        assert_eq!(events, vec!["connect", "disconnect", "connect"]);
        assert!(second.is_alive());
    }

    #[tokio::test]
    async fn test_debugger_hangup_frees_slot() {
        let (proxy, _handle, _device_rx) = proxy_with_device();
        let (connection, debugger_tx, _frames) = attach(&proxy, "-1").await.unwrap();

        drop(debugger_tx);
        settle().await;

        assert!(!connection.is_alive());
        assert_eq!(proxy.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_device_disconnect_tears_down_connections() {
        let (proxy, handle, _device_rx) = proxy_with_device();
        let (connection, _debugger_tx, mut frames) = attach(&proxy, "-1").await.unwrap();

        proxy.disconnect_device(&handle);
        settle().await;

        assert!(!connection.is_alive());
        assert_eq!(frames.try_recv().unwrap(), Frame::Close);
        assert_eq!(proxy.connection_count(), 0);
        assert!(proxy.registry().is_empty());
    }

    #[tokio::test]
    async fn test_paused_overlay_stubbed_end_to_end() {
        let (proxy, _handle, mut device_rx) = proxy_with_device();
        let (_connection, debugger_tx, mut frames) = attach(&proxy, "-1").await.unwrap();

        debugger_tx
            .send(r#"{"id":11,"method":"Overlay.setPausedInDebuggerMessage"}"#.to_string())
            .unwrap();
        settle().await;

        assert_eq!(
            frames.try_recv().unwrap(),
            Frame::Text(r#"{"id":11,"result":{}}"#.to_string())
        );
        // Only the connect envelope reached the device
        let mut events = Vec::new();
        while let Ok(Frame::Text(text)) = device_rx.try_recv() {
            let envelope: serde_json::Value = serde_json::from_str(&text).unwrap();
            events.push(envelope["event"].as_str().unwrap().to_string());
        }
        assert_eq!(events, vec!["connect"]);
    }

    #[tokio::test]
    async fn test_shutdown_detaches_everything() {
        let (proxy, _handle, _device_rx) = proxy_with_device();
        let (connection, _tx, _frames) = attach(&proxy, "-1").await.unwrap();

        proxy.shutdown().await;

        assert!(!connection.is_alive());
        assert_eq!(proxy.connection_count(), 0);
        assert!(proxy.registry().is_empty());
    }
}
