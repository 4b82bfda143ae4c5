//! Stub Methods Handler - answers CDP methods the runtime does not implement
//!
//! Some frontends call methods a device runtime has no support for and wait
//! forever on the reply (`Overlay.setPausedInDebuggerMessage` is the classic
//! one). This handler claims those messages from either side and answers the
//! debugger with an empty result carrying the original id.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cdp::CDPMessage;
use crate::handler::{
    CustomMessageHandler, CustomMessageHandlerConnection, ExposedDebuggerInfo, HandlerError,
    HandlerOutcome,
};

pub const PAUSED_OVERLAY_METHOD: &str = "Overlay.setPausedInDebuggerMessage";

pub struct StubMethodsHandler {
    methods: HashSet<String>,
    debugger: ExposedDebuggerInfo,

    /// Messages claimed on this connection
    claimed: AtomicU64,
}

impl StubMethodsHandler {
    pub fn new<I, S>(connection: &CustomMessageHandlerConnection, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
            debugger: connection.debugger_info().clone(),
            claimed: AtomicU64::new(0),
        }
    }

    /// Stub only the paused-in-debugger overlay
    pub fn paused_overlay(connection: &CustomMessageHandlerConnection) -> Self {
        Self::new(connection, [PAUSED_OVERLAY_METHOD])
    }

    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::SeqCst)
    }

    fn claim(&self, message: &CDPMessage) -> Result<HandlerOutcome, HandlerError> {
        let Some(method) = message.method() else {
            return Ok(HandlerOutcome::NotHandled);
        };
        if !self.methods.contains(method) {
            return Ok(HandlerOutcome::NotHandled);
        }

        // Events owe nobody a reply
        if let Some(id) = message.id() {
            self.debugger.send_message(&CDPMessage::empty_result(id))?;
        }
        self.claimed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Stubbed {} (id {:?})", method, message.id());
        Ok(HandlerOutcome::Handled)
    }
}

#[async_trait]
impl CustomMessageHandler for StubMethodsHandler {
    async fn handle_device_message(
        &self,
        message: &CDPMessage,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.claim(message)
    }

    async fn handle_debugger_message(
        &self,
        message: &CDPMessage,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.claim(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, DebuggerPeer};
    use crate::device::{DeviceInfo, Page};
    use crate::handler::CreateCustomMessageHandlerFn;
    use crate::registry::Registry;
    use crate::transport::{Frame, Transport};
    use std::sync::{Arc, Mutex};

    fn registry_with_page() -> (Registry, tokio::sync::mpsc::UnboundedReceiver<Frame>) {
        let registry = Registry::default();
        let (transport, device_rx) = Transport::channel();
        registry
            .register_device(
                DeviceInfo {
                    id: "1a9372c".to_string(),
                    name: "iPhone 15".to_string(),
                    app_id: "com.example.app".to_string(),
                },
                transport,
            )
            .unwrap();
        registry
            .update_pages("1a9372c", vec![Page::new("-1", "main")])
            .unwrap();
        (registry, device_rx)
    }

    /// Factory that also hands every built handler back to the test
    fn recording_factory(
        built: Arc<Mutex<Vec<Arc<StubMethodsHandler>>>>,
    ) -> CreateCustomMessageHandlerFn {
        struct Forward(Arc<StubMethodsHandler>);

        #[async_trait]
        impl CustomMessageHandler for Forward {
            async fn handle_device_message(
                &self,
                message: &CDPMessage,
            ) -> Result<HandlerOutcome, HandlerError> {
                self.0.handle_device_message(message).await
            }

            async fn handle_debugger_message(
                &self,
                message: &CDPMessage,
            ) -> Result<HandlerOutcome, HandlerError> {
                self.0.handle_debugger_message(message).await
            }
        }

        Arc::new(move |connection: &CustomMessageHandlerConnection| {
            let handler = Arc::new(StubMethodsHandler::paused_overlay(connection));
            built.lock().unwrap().push(handler.clone());
            Some(Box::new(Forward(handler)) as Box<dyn CustomMessageHandler>)
        })
    }

    fn attach(
        registry: &Registry,
        factory: &CreateCustomMessageHandlerFn,
    ) -> (Connection, tokio::sync::mpsc::UnboundedReceiver<Frame>) {
        let (transport, debugger_rx) = Transport::channel();
        let connection = Connection::attach(
            registry,
            "1a9372c",
            "-1",
            DebuggerPeer {
                user_agent: None,
                transport,
            },
            Some(factory),
        )
        .unwrap();
        (connection, debugger_rx)
    }

    fn drain_wrapped(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Frame>) -> Vec<String> {
        let mut wrapped = Vec::new();
        while let Ok(Frame::Text(text)) = rx.try_recv() {
            let envelope: serde_json::Value = serde_json::from_str(&text).unwrap();
            if envelope["event"] == "wrappedEvent" {
                wrapped.push(envelope["payload"]["wrappedEvent"].as_str().unwrap().to_string());
            }
        }
        wrapped
    }

    #[tokio::test]
    async fn test_device_overlay_request_answered_once() {
        let (registry, mut device_rx) = registry_with_page();
        let built = Arc::new(Mutex::new(Vec::new()));
        let factory = recording_factory(built.clone());
        let (connection, mut debugger_rx) = attach(&registry, &factory);

        connection
            .on_device_message(
                r#"{"id":17,"method":"Overlay.setPausedInDebuggerMessage","params":{"message":"Paused"}}"#,
            )
            .await;

        assert_eq!(
            debugger_rx.try_recv().unwrap(),
            Frame::Text(r#"{"id":17,"result":{}}"#.to_string())
        );
        assert!(debugger_rx.try_recv().is_err());
        assert!(drain_wrapped(&mut device_rx).is_empty());
        assert_eq!(built.lock().unwrap()[0].claimed(), 1);
    }

    #[tokio::test]
    async fn test_debugger_overlay_request_never_reaches_device() {
        let (registry, mut device_rx) = registry_with_page();
        let built = Arc::new(Mutex::new(Vec::new()));
        let factory = recording_factory(built);
        let (connection, mut debugger_rx) = attach(&registry, &factory);

        connection
            .on_debugger_message(r#"{"id":3,"method":"Overlay.setPausedInDebuggerMessage"}"#)
            .await;
        connection
            .on_debugger_message(r#"{"id":4,"method":"Runtime.enable"}"#)
            .await;

        assert_eq!(
            debugger_rx.try_recv().unwrap(),
            Frame::Text(r#"{"id":3,"result":{}}"#.to_string())
        );
        assert_eq!(
            drain_wrapped(&mut device_rx),
            vec![r#"{"id":4,"method":"Runtime.enable"}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_unrelated_messages_pass_through() {
        let (registry, _device_rx) = registry_with_page();
        let captured = Arc::new(Mutex::new(None));
        let slot = captured.clone();
        let factory: CreateCustomMessageHandlerFn =
            Arc::new(move |connection: &CustomMessageHandlerConnection| {
                *slot.lock().unwrap() = Some(connection.clone());
                None
            });
        let (_connection, mut debugger_rx) = attach(&registry, &factory);
        let view = captured.lock().unwrap().clone().unwrap();
        let handler = StubMethodsHandler::new(&view, ["Foo.bar"]);

        for raw in [
            r#"{"id":1,"method":"Network.enable"}"#,
            r#"{"id":1,"result":{}}"#,
            r#"{"method":"Debugger.paused","params":{}}"#,
            r#"{"id":2,"method":"Overlay.setPausedInDebuggerMessage"}"#,
        ] {
            let message = CDPMessage::parse(raw).unwrap();
            assert_eq!(
                handler.handle_device_message(&message).await.unwrap(),
                HandlerOutcome::NotHandled
            );
            assert_eq!(
                handler.handle_debugger_message(&message).await.unwrap(),
                HandlerOutcome::NotHandled
            );
        }

        // A claimed event is absorbed without a reply
        let event = CDPMessage::parse(r#"{"method":"Foo.bar"}"#).unwrap();
        assert!(handler.handle_device_message(&event).await.unwrap().is_handled());
        assert!(debugger_rx.try_recv().is_err());
        assert_eq!(handler.claimed(), 1);
    }

    #[tokio::test]
    async fn test_negative_id_overlay_request_still_answered() {
        let (registry, mut device_rx) = registry_with_page();
        let built = Arc::new(Mutex::new(Vec::new()));
        let factory = recording_factory(built);
        let (connection, mut debugger_rx) = attach(&registry, &factory);

        connection
            .on_debugger_message(r#"{"id":-7,"method":"Overlay.setPausedInDebuggerMessage"}"#)
            .await;

        assert_eq!(
            debugger_rx.try_recv().unwrap(),
            Frame::Text(r#"{"id":-7,"result":{}}"#.to_string())
        );
        assert!(drain_wrapped(&mut device_rx).is_empty());
    }
}
