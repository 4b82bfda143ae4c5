//! Connection Registry - which devices are connected, which pages they expose
//!
//! The only state shared between connections. Every mutation happens under
//! the DashMap shard lock for that device, so readers see either the old or
//! the new page list, never a mix.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::device::{DeviceId, DeviceInfo, Page};
use crate::error::{ProxyError, Result};
use crate::transport::{MessageSink, Transport};

/// What to do when a device id registers while already connected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Fail the new registration with `DuplicateDevice`
    Reject,
    /// Evict the old device and its connections, keep the new one
    #[default]
    Replace,
}

/// Returned by `register_device`; identifies one registration of a device id
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    pub device_id: DeviceId,
    pub session: Uuid,
    shutdown: watch::Receiver<bool>,
}

impl DeviceHandle {
    /// Resolves once this registration is unregistered or replaced
    pub async fn closed(&mut self) {
        let _ = self.shutdown.wait_for(|gone| *gone).await;
    }
}

/// Everything an attach needs, read from one registry entry
pub(crate) struct ResolvedPage {
    pub info: DeviceInfo,
    pub page: Page,
    pub transport: Transport,
    pub device_gone: watch::Receiver<bool>,
}

/// Listing entry for one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub name: String,
    pub app_id: String,
    pub pages: Vec<Page>,
}

struct DeviceEntry {
    info: DeviceInfo,
    session: Uuid,
    transport: Transport,
    pages: Arc<Vec<Page>>,
    shutdown: watch::Sender<bool>,
}

impl DeviceEntry {
    fn tear_down(&self) {
        let _ = self.shutdown.send(true);
        self.transport.close();
    }
}

pub struct Registry {
    devices: DashMap<DeviceId, DeviceEntry>,
    policy: ReconnectPolicy,
}

impl Registry {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            devices: DashMap::new(),
            policy,
        }
    }

    pub fn register_device(&self, info: DeviceInfo, transport: Transport) -> Result<DeviceHandle> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let session = Uuid::now_v7();
        let device_id = info.id.clone();
        let entry = DeviceEntry {
            info,
            session,
            transport,
            pages: Arc::new(Vec::new()),
            shutdown,
        };

        match self.devices.entry(device_id.clone()) {
            Entry::Occupied(mut occupied) => match self.policy {
                ReconnectPolicy::Reject => {
                    tracing::warn!("Rejected duplicate device registration: {}", device_id);
                    return Err(ProxyError::DuplicateDevice(device_id));
                }
                ReconnectPolicy::Replace => {
                    let old = occupied.insert(entry);
                    tracing::info!("Device {} reconnected, replacing previous session", device_id);
                    old.tear_down();
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                tracing::info!("Device registered: {}", device_id);
            }
        }

        Ok(DeviceHandle {
            device_id,
            session,
            shutdown: shutdown_rx,
        })
    }

    /// Replace the page list of a device wholesale
    pub fn update_pages(&self, device_id: &str, pages: Vec<Page>) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| ProxyError::DeviceNotFound(device_id.to_string()))?;
        entry.pages = Arc::new(pages);
        Ok(())
    }

    /// Remove a device and its pages, tearing down its connections
    pub fn unregister_device(&self, device_id: &str) -> Option<DeviceInfo> {
        // Out of the map first so no attach can race in after the signal
        let (_, entry) = self.devices.remove(device_id)?;
        entry.tear_down();
        tracing::info!("Device unregistered: {}", device_id);
        Some(entry.info)
    }

    /// Unregister only if `handle` is still the live registration.
    ///
    /// A socket replaced by a reconnect calls this on its way out; it must
    /// not evict its successor.
    pub fn release(&self, handle: &DeviceHandle) -> bool {
        match self
            .devices
            .remove_if(&handle.device_id, |_, entry| entry.session == handle.session)
        {
            Some((_, entry)) => {
                entry.tear_down();
                tracing::info!("Device disconnected: {}", handle.device_id);
                true
            }
            None => false,
        }
    }

    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        let mut devices: Vec<_> = self
            .devices
            .iter()
            .map(|entry| DeviceSummary {
                id: entry.info.id.clone(),
                name: entry.info.name.clone(),
                app_id: entry.info.app_id.clone(),
                pages: entry.pages.as_ref().clone(),
            })
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub fn get_page(&self, device_id: &str, page_id: &str) -> Result<Page> {
        let entry = self
            .devices
            .get(device_id)
            .ok_or_else(|| ProxyError::DeviceNotFound(device_id.to_string()))?;
        let page = entry.pages.iter().find(|page| page.id == page_id).cloned();
        page.ok_or_else(|| ProxyError::PageNotFound {
            device_id: device_id.to_string(),
            page_id: page_id.to_string(),
        })
    }

    /// Outbound half of the live socket for `device_id`
    pub fn device_transport(&self, device_id: &str) -> Option<Transport> {
        self.devices.get(device_id).map(|entry| entry.transport.clone())
    }

    /// Teardown signal for whatever registration currently owns `device_id`
    pub fn watch_device(&self, device_id: &str) -> Option<watch::Receiver<bool>> {
        self.devices
            .get(device_id)
            .map(|entry| entry.shutdown.subscribe())
    }

    /// Snapshot everything an attach needs in one shard read
    pub(crate) fn resolve(&self, device_id: &str, page_id: &str) -> Result<ResolvedPage> {
        let entry = self
            .devices
            .get(device_id)
            .ok_or_else(|| ProxyError::DeviceNotFound(device_id.to_string()))?;
        let page = entry
            .pages
            .iter()
            .find(|page| page.id == page_id)
            .cloned()
            .ok_or_else(|| ProxyError::PageNotFound {
                device_id: device_id.to_string(),
                page_id: page_id.to_string(),
            })?;
        Ok(ResolvedPage {
            info: entry.info.clone(),
            page,
            transport: entry.transport.clone(),
            device_gone: entry.shutdown.subscribe(),
        })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Unregister every device
    pub fn shutdown(&self) {
        let ids: Vec<DeviceId> = self.devices.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.unregister_device(&id);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Frame;
    use tokio_test::{assert_err, assert_ok};

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: "Pixel 7".to_string(),
            app_id: "com.example.app".to_string(),
        }
    }

    #[test]
    fn test_register_and_get_page() {
        let registry = Registry::default();
        let (transport, _rx) = Transport::channel();
        assert_ok!(registry.register_device(device("1a9372c"), transport));
        assert_ok!(registry.update_pages("1a9372c", vec![Page::new("-1", "main")]));

        let page = registry.get_page("1a9372c", "-1").unwrap();
        assert_eq!(page.title, "main");
        assert!(matches!(
            registry.get_page("1a9372c", "missing"),
            Err(ProxyError::PageNotFound { .. })
        ));
        assert!(matches!(
            registry.get_page("nope", "-1"),
            Err(ProxyError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_update_pages_leaves_no_stale_page() {
        let registry = Registry::default();
        let (transport, _rx) = Transport::channel();
        registry.register_device(device("1a9372c"), transport).unwrap();
        registry
            .update_pages(
                "1a9372c",
                vec![Page::new("-1", "main"), Page::new("2", "worker")],
            )
            .unwrap();

        registry.update_pages("1a9372c", vec![]).unwrap();

        assert_err!(registry.get_page("1a9372c", "-1"));
        assert_err!(registry.get_page("1a9372c", "2"));
        assert!(registry.list_devices()[0].pages.is_empty());
    }

    #[test]
    fn test_reject_policy() {
        let registry = Registry::new(ReconnectPolicy::Reject);
        let (first, _rx1) = Transport::channel();
        let (second, _rx2) = Transport::channel();
        registry.register_device(device("a"), first.clone()).unwrap();

        let result = registry.register_device(device("a"), second);
        assert!(matches!(result, Err(ProxyError::DuplicateDevice(id)) if id == "a"));
        assert!(first.is_open());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_policy_signals_old_session() {
        let registry = Registry::new(ReconnectPolicy::Replace);
        let (first, _rx1) = Transport::channel();
        let (second, _rx2) = Transport::channel();

        let mut old = registry.register_device(device("a"), first.clone()).unwrap();
        let new = registry.register_device(device("a"), second.clone()).unwrap();
        assert_ne!(old.session, new.session);

        old.closed().await;
        assert!(!first.is_open());
        assert!(second.is_open());

        // The replaced socket cleaning up must not evict the new one
        assert!(!registry.release(&old));
        assert_eq!(registry.len(), 1);
        assert!(registry.release(&new));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_device_transport_follows_live_registration() {
        let registry = Registry::default();
        let (first, _rx1) = Transport::channel();
        let (second, mut rx2) = Transport::channel();
        registry.register_device(device("a"), first).unwrap();
        registry.register_device(device("a"), second).unwrap();

        let transport = registry.device_transport("a").unwrap();
        transport.send_text("ping".to_string()).unwrap();
        assert_eq!(rx2.recv().await, Some(Frame::Text("ping".to_string())));

        registry.unregister_device("a");
        assert!(registry.device_transport("a").is_none());
    }

    #[tokio::test]
    async fn test_unregister_signals_watchers() {
        let registry = Registry::default();
        let (transport, _rx) = Transport::channel();
        registry.register_device(device("a"), transport).unwrap();
        registry.update_pages("a", vec![Page::new("1", "main")]).unwrap();
        let mut watcher = registry.watch_device("a").unwrap();

        let info = registry.unregister_device("a").unwrap();
        assert_eq!(info.app_id, "com.example.app");

        assert_ok!(watcher.wait_for(|gone| *gone).await);
        assert_err!(registry.get_page("a", "1"));
        assert!(registry.unregister_device("a").is_none());
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let registry = Registry::default();
        for id in ["a", "b", "c"] {
            let (transport, _rx) = Transport::channel();
            // Receiver dropped right away; registration itself must not care
            registry.register_device(device(id), transport).unwrap();
        }
        assert_eq!(
            registry
                .list_devices()
                .iter()
                .map(|d| d.id.as_str())
                .collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        registry.shutdown();
        assert!(registry.is_empty());
    }
}
