//! Peer-to-peer replication for one shard: peer directory, event broadcast
//! and anti-entropy repair.

pub mod broadcast;
pub mod peer;
pub mod protocol;
pub mod repair;
pub mod transport;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use peer::{Peer, PeerDirectory};
pub use repair::{AuditReport, JobRunReport, RepairCoordinator, RepairError, RepairReport};
pub use transport::{HttpTransport, PeerError, PeerTransport};
