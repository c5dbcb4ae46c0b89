// Node liveness, leader election and the inter-node transport

pub mod election;
pub mod membership;
pub mod probe;
pub mod rpc;

pub type NodeId = String;

pub use election::{elect, Leadership};
pub use membership::{newly_dead, LivenessView, Membership};
pub use probe::{HttpProbe, Probe, UdpProbe};
pub use rpc::PeerClient;
