//! WebSocket server - device and debugger sockets in, connections out
//!
//! ```text
//! ws://host/inspector/device?device=<id>&name=<name>&app=<app id>
//! ws://host/inspector/debug?device=<id>&page=<page id>
//! ```
//!
//! Every socket gets a writer task draining its `Transport`. The read loop
//! stays on the accepting task.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::USER_AGENT, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::connection::DebuggerPeer;
use crate::device::{send_envelope, DeviceInfo, DeviceToProxy, PageId, ProxyToDevice};
use crate::error::{ProxyError, Result};
use crate::proxy::InspectorProxy;
use crate::transport::{Frame, MessageSink, Transport};

pub const DEVICE_PATH: &str = "/inspector/device";
pub const DEBUGGER_PATH: &str = "/inspector/debug";

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;

/// What a socket asked to be, decided during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Device(DeviceInfo),
    Debugger {
        device_id: String,
        page_id: PageId,
        user_agent: Option<String>,
    },
}

fn parse_endpoint(uri: &str, user_agent: Option<String>) -> Result<Endpoint> {
    let url = Url::parse(&format!("ws://localhost{}", uri))
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let required = |key: &str| {
        query
            .get(key)
            .cloned()
            .ok_or_else(|| ProxyError::InvalidRequest(format!("Missing query parameter: {}", key)))
    };

    match url.path() {
        DEVICE_PATH => Ok(Endpoint::Device(DeviceInfo {
            id: query
                .get("device")
                .cloned()
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            name: query.get("name").cloned().unwrap_or_default(),
            app_id: query.get("app").cloned().unwrap_or_default(),
        })),
        DEBUGGER_PATH => Ok(Endpoint::Debugger {
            device_id: required("device")?,
            page_id: required("page")?,
            user_agent,
        }),
        other => Err(ProxyError::InvalidRequest(format!("Unknown path: {}", other))),
    }
}

/// Bind `config.listen_addr` and serve until the listener fails
pub async fn serve(proxy: Arc<InspectorProxy>, config: &ProxyConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.listen_addr).await?;
    serve_listener(proxy, listener, config.pages_poll_interval()).await
}

pub async fn serve_listener(
    proxy: Arc<InspectorProxy>,
    listener: TcpListener,
    pages_poll_interval: Duration,
) -> Result<()> {
    tracing::info!("Inspector proxy listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let proxy = proxy.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_socket(proxy, stream, pages_poll_interval).await {
                tracing::warn!(%peer, "Socket ended with error: {}", e);
            }
        });
    }
}

async fn handle_socket(
    proxy: Arc<InspectorProxy>,
    stream: TcpStream,
    pages_poll_interval: Duration,
) -> Result<()> {
    let mut endpoint = None;
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        let user_agent = request
            .headers()
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        match parse_endpoint(&request.uri().to_string(), user_agent) {
            Ok(parsed) => {
                endpoint = Some(parsed);
                Ok(response)
            }
            Err(e) => {
                let mut rejection = ErrorResponse::new(Some(e.to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        }
    })
    .await?;

    match endpoint {
        Some(Endpoint::Device(info)) => handle_device(proxy, ws, info, pages_poll_interval).await,
        Some(Endpoint::Debugger {
            device_id,
            page_id,
            user_agent,
        }) => handle_debugger(proxy, ws, device_id, page_id, user_agent).await,
        None => Ok(()),
    }
}

async fn handle_device(
    proxy: Arc<InspectorProxy>,
    mut ws: WsStream,
    info: DeviceInfo,
    pages_poll_interval: Duration,
) -> Result<()> {
    let (transport, outbound) = Transport::channel();
    let mut handle = match proxy.register_device(info.clone(), transport.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            let _ = ws.close(None).await;
            return Err(e);
        }
    };
    tracing::info!(
        device = %info.id,
        name = %info.name,
        app = %info.app_id,
        "Device connected"
    );

    let (sink, mut stream) = ws.split();
    let writer = tokio::spawn(write_frames(sink, outbound));
    let poller = tokio::spawn(poll_pages(transport.clone(), pages_poll_interval));
    let device_id = handle.device_id.clone();

    loop {
        tokio::select! {
            _ = handle.closed() => {
                tracing::info!(device = %device_id, "Device session replaced or unregistered");
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_device_frame(&proxy, &device_id, &text).await
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!(device = %device_id, "Device socket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    }

    poller.abort();
    proxy.disconnect_device(&handle);
    transport.close();
    let _ = writer.await;
    Ok(())
}

async fn handle_device_frame(proxy: &InspectorProxy, device_id: &str, text: &str) {
    match DeviceToProxy::parse(text) {
        Ok(DeviceToProxy::GetPages(pages)) => {
            if let Err(e) = proxy.registry().update_pages(device_id, pages) {
                tracing::debug!(device = %device_id, "Ignoring page list: {}", e);
            }
        }
        Ok(DeviceToProxy::WrappedEvent(event)) => {
            proxy.route_device_message(device_id, &event.page_id, event.wrapped_event);
        }
        Ok(DeviceToProxy::Disconnect(page)) => {
            tracing::debug!(device = %device_id, page = %page.page_id, "Device closed page");
            proxy.detach_page(device_id, &page.page_id).await;
        }
        Err(e) => {
            tracing::warn!(device = %device_id, "Dropping malformed device frame: {}", e);
        }
    }
}

async fn handle_debugger(
    proxy: Arc<InspectorProxy>,
    ws: WsStream,
    device_id: String,
    page_id: PageId,
    user_agent: Option<String>,
) -> Result<()> {
    let (transport, outbound) = Transport::channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (sink, mut stream) = ws.split();
    let writer = tokio::spawn(write_frames(sink, outbound));

    let peer = DebuggerPeer {
        user_agent,
        transport: transport.clone(),
    };
    let connection = match proxy
        .attach_debugger(&device_id, &page_id, peer, inbound_rx)
        .await
    {
        Ok(connection) => connection,
        Err(e) => {
            transport.close();
            let _ = writer.await;
            return Err(e);
        }
    };

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if inbound_tx.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(connection = %connection.id(), "Debugger socket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    drop(inbound_tx);
    connection.detach().await;
    let _ = writer.await;
    Ok(())
}

async fn write_frames(mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Frame::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!("Write failed, dropping socket: {}", e);
                    break;
                }
            }
            Frame::Close => break,
        }
    }
    let _ = sink.close().await;
}

async fn poll_pages(transport: Transport, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if send_envelope(&transport, &ProxyToDevice::GetPages).is_err() {
            break;
        }
    }
}
