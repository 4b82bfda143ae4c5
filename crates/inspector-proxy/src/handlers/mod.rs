//! Concrete Custom Message Handlers
//!
//! Each handler is a separate module. `build_factory` wires the configured
//! ones into the factory the proxy calls on every attach.

pub mod chain;
pub mod logging;
pub mod stub;

pub use chain::HandlerChain;
pub use logging::TracingHandler;
pub use stub::StubMethodsHandler;

use std::sync::Arc;

use crate::handler::{
    CreateCustomMessageHandlerFn, CustomMessageHandler, CustomMessageHandlerConnection,
};

/// Factory for the built-in handlers, or `None` when neither is enabled
pub fn build_factory(
    stub_methods: Vec<String>,
    trace_messages: bool,
) -> Option<CreateCustomMessageHandlerFn> {
    if stub_methods.is_empty() && !trace_messages {
        return None;
    }

    Some(Arc::new(
        move |connection: &CustomMessageHandlerConnection| {
            let mut chain = HandlerChain::new();
            // Tracing first so it also sees what the stub claims
            if trace_messages {
                chain.push(Box::new(TracingHandler::new(connection)));
            }
            if !stub_methods.is_empty() {
                chain.push(Box::new(StubMethodsHandler::new(
                    connection,
                    stub_methods.iter().cloned(),
                )));
            }
            Some(Box::new(chain) as Box<dyn CustomMessageHandler>)
        },
    ))
}
