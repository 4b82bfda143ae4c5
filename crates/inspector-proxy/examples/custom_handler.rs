//! Custom handler example - answer `Network.enable` for runtimes without a
//! Network domain, relay everything else.

use async_trait::async_trait;
use inspector_proxy::handler::{ExposedDebuggerInfo, HandlerError};
use inspector_proxy::{
    server, CDPMessage, CreateCustomMessageHandlerFn, CustomMessageHandler,
    CustomMessageHandlerConnection, HandlerOutcome, InspectorProxy, ProxyConfig, Registry,
};
use std::sync::Arc;

struct NetworkStub {
    debugger: ExposedDebuggerInfo,
}

#[async_trait]
impl CustomMessageHandler for NetworkStub {
    async fn handle_device_message(
        &self,
        _message: &CDPMessage,
    ) -> Result<HandlerOutcome, HandlerError> {
        Ok(HandlerOutcome::NotHandled)
    }

    async fn handle_debugger_message(
        &self,
        message: &CDPMessage,
    ) -> Result<HandlerOutcome, HandlerError> {
        match (message.method(), message.id()) {
            (Some("Network.enable"), Some(id)) => {
                self.debugger.send_message(&CDPMessage::empty_result(id))?;
                Ok(HandlerOutcome::Handled)
            }
            _ => Ok(HandlerOutcome::NotHandled),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let factory: CreateCustomMessageHandlerFn =
        Arc::new(|connection: &CustomMessageHandlerConnection| {
            println!(
                "Debugger {:?} attached to {} on {}",
                connection.debugger_info().user_agent(),
                connection.page().title,
                connection.device_info().name()
            );
            Some(Box::new(NetworkStub {
                debugger: connection.debugger_info().clone(),
            }) as Box<dyn CustomMessageHandler>)
        });

    let config = ProxyConfig::default();
    let registry = Arc::new(Registry::new(config.reconnect_policy));
    let proxy = InspectorProxy::new(registry, Some(factory));

    println!("Listening on ws://{}", config.listen_addr);
    server::serve(proxy, &config).await?;
    Ok(())
}
