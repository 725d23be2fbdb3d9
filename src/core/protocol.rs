use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// Peer id -> advertised resource-server address.
pub type PeerMap = HashMap<String, SocketAddr>;

/// Resource name -> owning peer id.
pub type ResourceIndex = HashMap<String, String>;

pub const UNKNOWN_ACTION: &str = "Unknown action";
pub const RESOURCE_NOT_FOUND: &str = "Resource not found";

/// A single request. Serialized as a flat JSON object whose `action` field
/// selects the variant, e.g. `{"action":"leave","peer_id":"alice"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Join {
        peer_id: String,
        peer_address: SocketAddr,
    },
    UploadIndex {
        peer_id: String,
        resources: Vec<String>,
    },
    RetrieveIndex,
    Leave {
        peer_id: String,
    },
    RetrievePeers,
    RequestResource {
        resource_name: String,
    },
    /// Any `action` value this build does not know. Decodes successfully so
    /// the receiver can answer with an explicit error instead of dropping
    /// the connection.
    #[serde(other)]
    Unknown,
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::Join { .. } => "join",
            Request::UploadIndex { .. } => "upload_index",
            Request::RetrieveIndex => "retrieve_index",
            Request::Leave { .. } => "leave",
            Request::RetrievePeers => "retrieve_peers",
            Request::RequestResource { .. } => "request_resource",
            Request::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// A single response. Payload fields are only present for the actions that
/// produce them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<PeerMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_bytes")]
    pub resource: Option<Vec<u8>>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            message: None,
            peers: None,
            resources: None,
            resource: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn with_peers(mut self, peers: PeerMap) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn with_resources(mut self, resources: ResourceIndex) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_resource(mut self, data: Vec<u8>) -> Self {
        self.resource = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn error_message(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown error")
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Status::Success => write!(f, "success")?,
            Status::Error => write!(f, "error: {}", self.error_message())?,
        }
        if let Some(peers) = &self.peers {
            let mut ids: Vec<_> = peers.iter().collect();
            ids.sort();
            write!(f, "\nPeers:")?;
            for (id, addr) in ids {
                write!(f, "\n  {} -> {}", id, addr)?;
            }
        }
        if let Some(resources) = &self.resources {
            let mut names: Vec<_> = resources.iter().collect();
            names.sort();
            write!(f, "\nResources:")?;
            for (name, owner) in names {
                write!(f, "\n  {} -> {}", name, owner)?;
            }
        }
        if let Some(data) = &self.resource {
            write!(f, "\nResource: {} bytes", data.len())?;
        }
        Ok(())
    }
}

/// JSON has no byte type; resource content travels as a hex string.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = Request::Join {
            peer_id: "alice".to_string(),
            peer_address: "10.0.0.2:4000".parse().unwrap(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"action": "join", "peer_id": "alice", "peer_address": "10.0.0.2:4000"})
        );

        let value = serde_json::to_value(Request::RetrieveIndex).unwrap();
        assert_eq!(value, json!({"action": "retrieve_index"}));
    }

    #[test]
    fn test_unknown_action_decodes() {
        let request: Request =
            serde_json::from_value(json!({"action": "frobnicate", "extra": 1})).unwrap();
        assert_eq!(request, Request::Unknown);
    }

    #[test]
    fn test_missing_action_is_rejected() {
        let result = serde_json::from_value::<Request>(json!({"peer_id": "alice"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let result = serde_json::from_value::<Request>(json!({"action": "leave"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_fieldless_actions_ignore_extra_fields() {
        let request: Request =
            serde_json::from_value(json!({"action": "retrieve_peers", "peer_id": "x"})).unwrap();
        assert_eq!(request, Request::RetrievePeers);
    }

    #[test]
    fn test_response_omits_absent_payloads() {
        let value = serde_json::to_value(Response::success()).unwrap();
        assert_eq!(value, json!({"status": "success"}));

        let value = serde_json::to_value(Response::error(UNKNOWN_ACTION)).unwrap();
        assert_eq!(value, json!({"status": "error", "message": "Unknown action"}));
    }

    #[test]
    fn test_resource_bytes_are_hex_encoded() {
        let response = Response::success().with_resource(b"hello".to_vec());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["resource"], json!("68656c6c6f"));

        let decoded: Response = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.resource.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_invalid_hex_is_rejected() {
        let result =
            serde_json::from_value::<Response>(json!({"status": "success", "resource": "zz"}));
        assert!(result.is_err());
    }
}
