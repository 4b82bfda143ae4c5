//! Tracing Handler - logs every CDP message on a connection, claims nothing

use async_trait::async_trait;

use crate::cdp::CDPMessage;
use crate::handler::{
    CustomMessageHandler, CustomMessageHandlerConnection, HandlerError, HandlerOutcome,
};

pub struct TracingHandler {
    device_id: String,
    page_id: String,
}

impl TracingHandler {
    pub fn new(connection: &CustomMessageHandlerConnection) -> Self {
        Self {
            device_id: connection.device_info().id().to_string(),
            page_id: connection.page().id.clone(),
        }
    }

    fn observe(&self, from: &str, message: &CDPMessage) {
        tracing::trace!(
            target: "inspector_proxy::cdp",
            device = %self.device_id,
            page = %self.page_id,
            from,
            id = ?message.id(),
            method = message.method().unwrap_or("-"),
            "CDP message"
        );
    }
}

#[async_trait]
impl CustomMessageHandler for TracingHandler {
    async fn handle_device_message(
        &self,
        message: &CDPMessage,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.observe("device", message);
        Ok(HandlerOutcome::NotHandled)
    }

    async fn handle_debugger_message(
        &self,
        message: &CDPMessage,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.observe("debugger", message);
        Ok(HandlerOutcome::NotHandled)
    }
}
