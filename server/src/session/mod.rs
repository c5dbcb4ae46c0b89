// Cross-node battle and trade sessions.
//
// A session is hosted on the node of the player who asked for it. The host
// drives the state machine; each side is reached through a SeatLink, local
// or remote, picked once when the session opens. A node owning the other
// side of a session hosted elsewhere only keeps a PeerSessionRef.

pub mod battle;
pub mod hosted;
pub mod link;
pub mod table;
pub mod trade;

use uuid::Uuid;

pub type SessionId = String;

pub use hosted::{Conclusion, HostedSession, Outcome, PeerSessionRef, Seat, Side, Verdict};
pub use link::{LocalSeat, RemoteSeat, SeatLink};
pub use table::SessionTable;

/// "battle:1a2b3c4d" style id
pub fn new_session_id(kind: &str) -> SessionId {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}:{}", kind, &uuid[..8])
}
