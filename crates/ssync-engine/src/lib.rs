#![warn(missing_docs)]

//! ssync protocol engines: session negotiation, the receiver's
//! missing-check and update phases, and the sender driver.

pub mod config;
pub mod error;
pub mod receiver;
pub mod resource;
pub mod sender;
pub mod session;

pub use config::EngineConfig;
pub use error::{NegotiationError, SyncError};
pub use receiver::{Receiver, ReceiverReport};
pub use sender::{Sender, SenderReport, SyncJob};
pub use session::{SessionContext, SyncRequest};
