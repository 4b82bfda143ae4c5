//! CDP (Chrome DevTools Protocol) message types
//!
//! Only what the relay and handlers need to tell requests, responses and
//! events apart. Domain payloads stay `serde_json::Value`.

pub mod protocol;

pub use protocol::{CDPErrorObject, CDPEvent, CDPMessage, CDPRequest, CDPResponse, RequestId};
