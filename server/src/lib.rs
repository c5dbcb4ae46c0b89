// Library interface for the game server node: cluster membership,
// replicated player state and the cross-node battle/trade sessions

pub mod api;
pub mod cards;
pub mod cleanup;
pub mod client;
pub mod cluster;
pub mod config;
pub mod directory;
pub mod error;
pub mod messaging;
pub mod node;
pub mod protocol;
pub mod replication;
pub mod roster;
pub mod session;

// Re-export commonly used types for convenience
pub use client::{ClientEvent, ClientHub, ClientRequest, ClientSink};
pub use cluster::NodeId;
pub use config::NodeConfig;
pub use directory::PlayerId;
pub use error::{CoreError, CoreResult};
pub use node::ClusterNode;
