//! # simpledht
//!
//! A peer-to-peer distributed key-value store. Every process runs a [`Node`]
//! that binds a UDP socket, joins a network of peers via [`Node::bootstrap`],
//! and keeps data available across nodes through best-effort replication.
//!
//! The wire protocol is one JSON object per datagram with a `"type"`
//! discriminator, so any client that can speak UDP and JSON can talk to a
//! node directly (see [`rpc::request_addr`]).
//!
//! ```no_run
//! use simpledht::Node;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), simpledht::Error> {
//!     let mut node = Node::new("0.0.0.0", 5000);
//!     node.start().await?;
//!     node.put("test_key", "test_value").await?;
//!     assert_eq!(node.get("test_key").await?.as_deref(), Some("test_value"));
//!     node.stop().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod routing;
pub mod rpc;
mod service;
pub mod store;

pub use error::{Error, Result};
pub use identity::{NodeId, NodeIdentity};
pub use message::{Message, PeerInfo};
pub use node::{Node, NodeConfig};
pub use routing::{PeerRecord, RoutingTable};
pub use store::DataStore;
