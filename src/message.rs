use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::identity::NodeId;
use crate::routing::PeerRecord;

/// Largest datagram the node will send or buffer on receive. UDP payloads
/// top out just under 64 KiB; anything larger must be split by the caller.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Peer coordinates as they travel inside `join` / `join_ack`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

impl From<&PeerRecord> for PeerInfo {
    fn from(record: &PeerRecord) -> Self {
        Self {
            id: record.id,
            host: record.host.clone(),
            port: record.port,
        }
    }
}

/// Every message the protocol speaks, one JSON object per datagram with a
/// `"type"` discriminator. The enum is closed: anything else on the wire is
/// dropped at decode time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Store { key: String, value: String },
    StoreAck,
    Get { key: String },
    GetResponse { value: Option<String> },
    Join { id: NodeId, host: String, port: u16 },
    JoinAck { peers: Vec<PeerInfo> },
    SyncPush {
        entries: HashMap<String, String>,
        /// Who is pushing. Lets the receiver create or refresh the
        /// sender's peer record; absent on pushes from plain clients and
        /// omitted from the JSON entirely when unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PeerInfo>,
    },
    SyncAck,
    Ping,
    Pong,
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(Error::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(Error::MalformedMessage)
    }
}
