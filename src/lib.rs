//! A LAN file/text drop daemon interoperable with two existing wire
//! protocols, Dukto and NitroShare: UDP presence/discovery, TCP framing and
//! streaming state machines for each protocol, sender-side file enumeration,
//! receiver-side disk persistence, and an orchestrator that can bind both
//! protocols concurrently.

pub mod dukto;
pub mod error;
pub mod network;
pub mod nitroshare;
pub mod observer;
pub mod orchestrator;
pub mod peer;
pub mod sender;
pub mod sink;
pub mod transport;
pub mod walk;

pub use error::{FramingError, TransferError};
pub use observer::{EngineObserver, NullObserver, SizeMismatchDecision, TransferObserver};
pub use orchestrator::Orchestrator;
pub use peer::{Identity, Node, PeerTable, Protocol};
pub use sink::{DropTarget, FsReceiverSink, RecordSink};
