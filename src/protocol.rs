//! WebSocket wire format.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": <payload>}`.
//! Events without a payload leave `data` out entirely.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::staging::UploadPart;

/// identifier of one websocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// opaque token correlating a host transfer negotiation with its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// frames sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// force-claim the host role
    RegisterHost,
    /// ask for the host role, negotiating with the current host if there is one
    RequestHost,
    /// current host accepts a pending transfer
    ReleaseHost { request_id: RequestId },
    /// current host rejects a pending transfer
    DenyHost { request_id: RequestId },
    GiveUpHost,
    CameraUpdate(serde_json::Value),
    ModelTransform(serde_json::Value),
    HostPointerToggle { active: bool },
    HostPointerUpdate { position: serde_json::Value },
    /// the sender's staged uploads form a complete product
    ProductUploadComplete,
}

/// frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        client_id: ClientId,
        host_id: Option<ClientId>,
    },
    HostTransferRequest {
        request_id: RequestId,
        requester_id: ClientId,
    },
    TransferDenied { request_id: RequestId },
    HostChanged { host_id: Option<ClientId> },
    CameraUpdate(serde_json::Value),
    ModelTransform(serde_json::Value),
    HostPointerToggle { active: bool },
    HostPointerUpdate { position: serde_json::Value },
    ProductUploadComplete {
        parts: Vec<UploadPart>,
        sender: ClientId,
    },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_events_parse_without_data() {
        let msg: ClientMessage = serde_json::from_value(json!({ "event": "requestHost" })).unwrap();
        assert_eq!(msg, ClientMessage::RequestHost);
    }

    #[test]
    fn field_names_are_camel_case() {
        let request_id = RequestId::new();
        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "releaseHost",
            "data": { "requestId": request_id.to_string() },
        }))
        .unwrap();
        assert_eq!(msg, ClientMessage::ReleaseHost { request_id });

        let out = serde_json::to_value(ServerMessage::HostChanged { host_id: None }).unwrap();
        assert_eq!(out, json!({ "event": "hostChanged", "data": { "hostId": null } }));
    }

    #[test]
    fn camera_payload_is_opaque() {
        let pose = json!({ "position": [0.0, 1.5, 3.0], "target": [0, 0, 0] });
        let msg: ClientMessage =
            serde_json::from_value(json!({ "event": "cameraUpdate", "data": pose.clone() })).unwrap();
        assert_eq!(msg, ClientMessage::CameraUpdate(pose));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result = serde_json::from_value::<ClientMessage>(json!({ "event": "becomeAdmin" }));
        assert!(result.is_err());
    }

    #[test]
    fn client_id_parse_rejects_garbage() {
        assert!(ClientId::parse("not-a-uuid").is_none());
        let id = ClientId::new();
        assert_eq!(ClientId::parse(&id.to_string()), Some(id));
    }
}
