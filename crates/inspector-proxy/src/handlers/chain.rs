//! Handler Chain - several handlers on one connection
//!
//! Handlers are asked in insertion order; the first to claim a message wins
//! and the rest never see it. A failing handler fails the whole chain for
//! that message, which the relay treats as not handled.

use async_trait::async_trait;

use crate::cdp::CDPMessage;
use crate::handler::{CustomMessageHandler, HandlerError, HandlerOutcome};

#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn CustomMessageHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: Box<dyn CustomMessageHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl CustomMessageHandler for HandlerChain {
    async fn handle_device_message(
        &self,
        message: &CDPMessage,
    ) -> Result<HandlerOutcome, HandlerError> {
        for handler in &self.handlers {
            if handler.handle_device_message(message).await?.is_handled() {
                return Ok(HandlerOutcome::Handled);
            }
        }
        Ok(HandlerOutcome::NotHandled)
    }

    async fn handle_debugger_message(
        &self,
        message: &CDPMessage,
    ) -> Result<HandlerOutcome, HandlerError> {
        for handler in &self.handlers {
            if handler.handle_debugger_message(message).await?.is_handled() {
                return Ok(HandlerOutcome::Handled);
            }
        }
        Ok(HandlerOutcome::NotHandled)
    }
}
