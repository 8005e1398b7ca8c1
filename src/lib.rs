pub mod config;
pub mod intake;
pub mod kvstore;
pub mod raft_log;
pub mod message;
pub mod replica;
pub mod role;
pub mod timers;
pub mod transport;

pub use config::ReplicaConfig;
pub use message::{LogEntry, Message, MessageBody, BROADCAST};
pub use replica::Replica;
pub use transport::{Transport, UdpTransport};
